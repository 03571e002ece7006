//! In-image execution harness
//!
//! A working image is turned into a one-shot test runner by staging a
//! systemd target that becomes the default, a service that runs the test
//! command as an unprivileged user with stdout redirected to the result
//! stream, and the command script itself. The service powers the machine off
//! once the command exits.

use std::fs;
use std::io;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::Path;
use testbench_core::{
    Error, Result, EXIT_TRAILER_PREFIX, IMAGE_CREDENTIAL_PATH, IMAGE_RESULT_PATH,
    IMAGE_RUN_SCRIPT_PATH, RUNNER_USER,
};
use testbench_utils::atomic_file::{remove_if_exists, write_atomic, write_atomic_string};

const UNIT_DIR: &str = "etc/systemd/system";

const RUN_TARGET: &str = "\
[Unit]
Description=testbench-run target
Requires=multi-user.target
After=multi-user.target
Conflicts=rescue.target
AllowIsolate=yes
";

const SUDOERS: &str = "\
# SUDO_USERS HOSTS=(AS_USER) TAGS COMMANDS
testbench ALL=(ALL) NOPASSWD: ALL
";

/// One path staged below the image root
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarnessEntry {
    File {
        path: String,
        content: String,
        mode: u32,
    },
    Symlink {
        path: String,
        target: String,
    },
}

impl HarnessEntry {
    fn file(path: impl Into<String>, content: impl Into<String>, mode: u32) -> Self {
        HarnessEntry::File {
            path: path.into(),
            content: content.into(),
            mode,
        }
    }

    fn symlink(path: impl Into<String>, target: impl Into<String>) -> Self {
        HarnessEntry::Symlink {
            path: path.into(),
            target: target.into(),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            HarnessEntry::File { path, .. } | HarnessEntry::Symlink { path, .. } => path,
        }
    }

    fn install(&self, root: &Path) -> Result<()> {
        let destination = root.join(self.path());
        match self {
            HarnessEntry::File { content, mode, .. } => {
                write_atomic_string(&destination, content)?;
                fs::set_permissions(&destination, fs::Permissions::from_mode(*mode))
                    .map_err(|e| Error::file_system(&destination, "set permissions", e))
            }
            HarnessEntry::Symlink { target, .. } => {
                if let Some(parent) = destination.parent() {
                    fs::create_dir_all(parent)
                        .map_err(|e| Error::file_system(parent, "create directory", e))?;
                }
                // Images ship their own default.target
                remove_if_exists(&destination)?;
                symlink(target, &destination)
                    .map_err(|e| Error::file_system(&destination, "create symlink", e))
            }
        }
    }
}

/// The harness for one test command
#[derive(Debug, Clone)]
pub struct Harness {
    command: Vec<String>,
}

impl Harness {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.is_empty() {
            return Err(Error::MissingCommand);
        }
        Ok(Self { command })
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// The run script: the quoted command followed by the exit trailer
    pub fn script(&self) -> Result<String> {
        let quoted = shlex::try_join(self.command.iter().map(String::as_str))
            .map_err(|e| Error::configuration(format!("cannot quote test command: {e}")))?;
        Ok(format!(
            "#!/bin/sh\n{quoted}\nprintf '{EXIT_TRAILER_PREFIX}%d\\n' \"$?\"\n"
        ))
    }

    fn service(&self) -> String {
        format!(
            "[Unit]
Description=testbench-run service
Wants=network-online.target
After=network-online.target
ConditionFileIsExecutable=/{IMAGE_RUN_SCRIPT_PATH}

[Service]
User={RUNNER_USER}
WorkingDirectory=/home/{RUNNER_USER}
ExecStart=/{IMAGE_RUN_SCRIPT_PATH}
StandardOutput=file:/{IMAGE_RESULT_PATH}
ExecStopPost=+/bin/sh -c 'rm -f /{IMAGE_RUN_SCRIPT_PATH}; systemctl poweroff --no-block'

[Install]
WantedBy=testbench-run.target
"
        )
    }

    /// Everything `stage` writes, in installation order
    pub fn entries(&self) -> Result<Vec<HarnessEntry>> {
        Ok(vec![
            HarnessEntry::file(
                "etc/sysusers.d/testbench.conf",
                format!(
                    "u {RUNNER_USER} - \"testbench runner\" /home/{RUNNER_USER}\nm {RUNNER_USER} users\n"
                ),
                0o644,
            ),
            HarnessEntry::file(
                "etc/tmpfiles.d/testbench.conf",
                format!(
                    "d /home/{RUNNER_USER} 0755 {RUNNER_USER} {RUNNER_USER} -\nZ /home/{RUNNER_USER}/.kube - {RUNNER_USER} {RUNNER_USER} -\n"
                ),
                0o644,
            ),
            HarnessEntry::file("etc/sudoers.d/00-testbench", SUDOERS, 0o440),
            HarnessEntry::file(format!("{UNIT_DIR}/testbench-run.target"), RUN_TARGET, 0o644),
            HarnessEntry::symlink(format!("{UNIT_DIR}/default.target"), "testbench-run.target"),
            HarnessEntry::file(
                format!("{UNIT_DIR}/testbench-run.service"),
                self.service(),
                0o644,
            ),
            HarnessEntry::symlink(
                format!("{UNIT_DIR}/testbench-run.target.wants/testbench-run.service"),
                "../testbench-run.service",
            ),
            HarnessEntry::file(IMAGE_RUN_SCRIPT_PATH, self.script()?, 0o755),
        ])
    }

    /// Install the harness below a mounted image root
    pub fn stage(&self, root: &Path) -> Result<()> {
        for entry in self.entries()? {
            entry.install(root)?;
        }
        tracing::debug!(root = %root.display(), "staged harness");
        Ok(())
    }
}

/// Copy cluster credentials to where the runner user expects them
pub fn install_credentials(root: &Path, credentials: &Path) -> Result<()> {
    let content =
        fs::read(credentials).map_err(|e| Error::file_system(credentials, "read credentials", e))?;
    let destination = root.join(IMAGE_CREDENTIAL_PATH);
    write_atomic(&destination, &content)?;
    fs::set_permissions(&destination, fs::Permissions::from_mode(0o600))
        .map_err(|e| Error::file_system(&destination, "set permissions", e))
}

/// Read the result stream the harness left in a booted image
pub fn read_result(root: &Path) -> Result<String> {
    let path = root.join(IMAGE_RESULT_PATH);
    fs::read_to_string(&path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::tap(&path, "the test command never ran"),
        _ => Error::file_system(&path, "read result stream", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mode(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(matches!(Harness::new(vec![]), Err(Error::MissingCommand)));
    }

    #[test]
    fn test_script_quotes_and_appends_trailer() {
        let command = vec![
            "kubectl".to_string(),
            "get".to_string(),
            "app=web tier; rm -rf /".to_string(),
        ];
        let script = Harness::new(command.clone()).unwrap().script().unwrap();
        let lines: Vec<&str> = script.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "#!/bin/sh");
        assert_eq!(shlex::split(lines[1]).unwrap(), command);
        assert_eq!(lines[2], "printf '# exit: %d\\n' \"$?\"");
    }

    #[test]
    fn test_stage_installs_units_and_script() {
        let root = TempDir::new().unwrap();
        let harness = Harness::new(vec!["true".to_string()]).unwrap();
        harness.stage(root.path()).unwrap();

        let units = root.path().join(UNIT_DIR);
        assert_eq!(
            fs::read_link(units.join("default.target")).unwrap(),
            Path::new("testbench-run.target")
        );
        assert_eq!(
            fs::read_link(units.join("testbench-run.target.wants/testbench-run.service")).unwrap(),
            Path::new("../testbench-run.service")
        );
        let service = fs::read_to_string(units.join("testbench-run.service")).unwrap();
        assert!(service.contains("StandardOutput=file:/var/log/testbench-run.tap"));
        assert!(service.contains("User=testbench"));

        let script = root.path().join(IMAGE_RUN_SCRIPT_PATH);
        assert_eq!(mode(&script), 0o755);
        assert_eq!(mode(&root.path().join("etc/sudoers.d/00-testbench")), 0o440);
    }

    #[test]
    fn test_stage_replaces_existing_default_target() {
        let root = TempDir::new().unwrap();
        let units = root.path().join(UNIT_DIR);
        fs::create_dir_all(&units).unwrap();
        symlink("graphical.target", units.join("default.target")).unwrap();

        let harness = Harness::new(vec!["true".to_string()]).unwrap();
        harness.stage(root.path()).unwrap();
        // Staging twice is harmless
        harness.stage(root.path()).unwrap();

        assert_eq!(
            fs::read_link(units.join("default.target")).unwrap(),
            Path::new("testbench-run.target")
        );
    }

    #[test]
    fn test_credentials_are_private() {
        let root = TempDir::new().unwrap();
        let source = root.path().join("alpha.kubeconfig");
        fs::write(&source, "apiVersion: v1\n").unwrap();

        install_credentials(root.path(), &source).unwrap();
        let installed = root.path().join(IMAGE_CREDENTIAL_PATH);
        assert_eq!(fs::read_to_string(&installed).unwrap(), "apiVersion: v1\n");
        assert_eq!(mode(&installed), 0o600);
    }

    #[test]
    fn test_missing_result_stream() {
        let root = TempDir::new().unwrap();
        assert!(matches!(read_result(root.path()), Err(Error::Tap { .. })));
    }
}
