use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use testbench_core::{Error, Result};
use testbench_utils::ToolCommand;

const UNMOUNT_FLAG: &str = "--umount";

/// The root filesystem of a mounted image
#[derive(Debug)]
pub struct MountPoint {
    image: PathBuf,
    root: PathBuf,
    // Tool that still has to unmount `root` if this is dropped mid-flight
    unmount_on_drop: Option<String>,
    // Keeps the mount directory alive until unmounted
    _dir: Option<TempDir>,
}

impl MountPoint {
    /// A mount point at an existing directory that outlives the mount
    pub fn new(image: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            root: root.into(),
            unmount_on_drop: None,
            _dir: None,
        }
    }

    fn in_temp_dir(image: &Path, dir: TempDir, tool: &str) -> Self {
        Self {
            image: image.to_path_buf(),
            root: dir.path().to_path_buf(),
            unmount_on_drop: Some(tool.to_string()),
            _dir: Some(dir),
        }
    }

    pub fn image(&self) -> &Path {
        &self.image
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn disarm(&mut self) {
        self.unmount_on_drop = None;
    }
}

impl Drop for MountPoint {
    // Reached when a run is interrupted between mount and unmount. Async
    // teardown is no longer possible here, so the unmount blocks.
    fn drop(&mut self) {
        let Some(tool) = self.unmount_on_drop.take() else {
            return;
        };
        tracing::warn!(image = %self.image.display(), root = %self.root.display(), "unmounting abandoned mount");
        let status = std::process::Command::new(&tool)
            .arg(UNMOUNT_FLAG)
            .arg(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) if status.success() => {}
            Ok(status) => {
                tracing::warn!(root = %self.root.display(), %status, "unmount of abandoned mount failed")
            }
            Err(e) => {
                tracing::warn!(root = %self.root.display(), error = %e, "unmount of abandoned mount failed")
            }
        }
    }
}

/// Offline read-write access to an image's root filesystem
#[async_trait]
pub trait ImageAccess: Send + Sync {
    async fn mount(&self, image: &Path) -> Result<MountPoint>;

    async fn unmount(&self, mount: MountPoint) -> Result<()>;
}

/// Mounts images with `systemd-dissect` (or a compatible tool)
#[derive(Debug, Clone)]
pub struct DissectMount {
    tool: String,
}

impl DissectMount {
    pub fn new(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }

    pub fn mount_command(&self, image: &Path, dir: &Path) -> ToolCommand {
        ToolCommand::new(&self.tool)
            .args(["--mount", "--mkdir"])
            .path_arg(image)
            .path_arg(dir)
    }

    pub fn unmount_command(&self, dir: &Path) -> ToolCommand {
        ToolCommand::new(&self.tool).arg(UNMOUNT_FLAG).path_arg(dir)
    }
}

#[async_trait]
impl ImageAccess for DissectMount {
    async fn mount(&self, image: &Path) -> Result<MountPoint> {
        let dir = tempfile::Builder::new()
            .prefix("testbench-mount-")
            .tempdir()
            .map_err(|e| Error::file_system(std::env::temp_dir(), "create mount directory", e))?;
        // Armed before the tool runs: an interrupt may land after the mount
        // took effect but before the tool reported back
        let mut mount = MountPoint::in_temp_dir(image, dir, &self.tool);
        if let Err(e) = self.mount_command(image, mount.root()).output().await {
            mount.disarm();
            return Err(e);
        }
        tracing::debug!(image = %image.display(), root = %mount.root().display(), "mounted image");
        Ok(mount)
    }

    async fn unmount(&self, mut mount: MountPoint) -> Result<()> {
        let outcome = self.unmount_command(mount.root()).output().await;
        mount.disarm();
        outcome?;
        tracing::debug!(image = %mount.image().display(), "unmounted image");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    /// A mount tool that only logs its arguments
    fn logging_tool(dir: &Path) -> (String, PathBuf) {
        let log = dir.join("calls.log");
        let tool = dir.join("dissect");
        fs::write(&tool, format!("#!/bin/sh\necho \"$1\" >> '{}'\n", log.display())).unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
        (tool.display().to_string(), log)
    }

    fn calls(log: &Path) -> Vec<String> {
        fs::read_to_string(log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_command_lines() {
        let access = DissectMount::new("systemd-dissect");
        assert_eq!(
            access
                .mount_command(Path::new("out/alpha.tap.osi"), Path::new("/tmp/m"))
                .get_args(),
            ["--mount", "--mkdir", "out/alpha.tap.osi", "/tmp/m"]
        );
        assert_eq!(
            access.unmount_command(Path::new("/tmp/m")).display(),
            "systemd-dissect --umount /tmp/m"
        );
    }

    #[tokio::test]
    async fn test_failed_mount_is_an_error() {
        let access = DissectMount::new("false");
        assert!(access.mount(Path::new("missing.osi")).await.is_err());
    }

    #[tokio::test]
    async fn test_unmount_runs_once() {
        let temp = TempDir::new().unwrap();
        let (tool, log) = logging_tool(temp.path());
        let access = DissectMount::new(tool);

        let mount = access.mount(&temp.path().join("alpha.tap.osi")).await.unwrap();
        access.unmount(mount).await.unwrap();
        assert_eq!(calls(&log), ["--mount", "--umount"]);
    }

    #[tokio::test]
    async fn test_dropped_mount_is_unmounted() {
        let temp = TempDir::new().unwrap();
        let (tool, log) = logging_tool(temp.path());
        let access = DissectMount::new(tool);

        let mount = access.mount(&temp.path().join("alpha.tap.osi")).await.unwrap();
        drop(mount);
        assert_eq!(calls(&log), ["--mount", "--umount"]);
    }
}
