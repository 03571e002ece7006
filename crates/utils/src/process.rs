//! Helpers for invoking external tools

use std::ffi::OsStr;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Instant;
use testbench_core::{Error, Result};
use tokio::process::Command;

/// An external command line, built up before it is run
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Shell-quoted rendering for logs
    pub fn display(&self) -> String {
        let parts = std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        shlex::try_join(parts).unwrap_or_else(|_| format!("{} {}", self.program, self.args.join(" ")))
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null()).kill_on_drop(true);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd
    }

    /// Run to completion with stdout and stderr captured.
    ///
    /// A non-zero exit status is reported as `Error::CommandExecution`
    /// carrying the tail of stderr.
    pub async fn output(&self) -> Result<Output> {
        tracing::debug!(command = %self.display(), "running");
        let started = Instant::now();

        let output = self
            .build()
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        tracing::debug!(
            command = %self.program,
            duration_ms = %started.elapsed().as_millis(),
            status = ?output.status.code(),
            "finished"
        );

        if !output.status.success() {
            return Err(Error::command_execution(
                &self.program,
                self.args.clone(),
                stderr_tail(&output.stderr),
                output.status.code(),
            ));
        }
        Ok(output)
    }

    /// Run to completion with stdio inherited from the parent process
    pub async fn status(&self) -> Result<()> {
        tracing::info!(command = %self.display(), "running");
        let status = self
            .build()
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !status.success() {
            return Err(Error::command_execution(
                &self.program,
                self.args.clone(),
                "exited unsuccessfully",
                status.code(),
            ));
        }
        Ok(())
    }

    fn spawn_error(&self, e: std::io::Error) -> Error {
        Error::command_execution(
            &self.program,
            self.args.clone(),
            format!("failed to spawn: {e}"),
            None,
        )
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    const MAX_LINES: usize = 20;
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(MAX_LINES);
    let tail = lines[start..].join("\n");
    if tail.is_empty() {
        "no output on stderr".to_string()
    } else {
        tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_quotes_arguments() {
        let cmd = ToolCommand::new("mkosi")
            .arg("--default")
            .arg("my env.mkosi")
            .arg("build");
        assert_eq!(cmd.display(), "mkosi --default 'my env.mkosi' build");
    }

    #[tokio::test]
    async fn test_output_success_and_failure() {
        let ok = ToolCommand::new("sh").args(["-c", "echo hello"]).output().await.unwrap();
        assert_eq!(String::from_utf8_lossy(&ok.stdout).trim(), "hello");

        let err = ToolCommand::new("sh")
            .args(["-c", "echo broken >&2; exit 3"])
            .output()
            .await
            .unwrap_err();
        match err {
            Error::CommandExecution {
                exit_code, message, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(message, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = ToolCommand::new("definitely-not-a-real-binary-xyz")
            .output()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
