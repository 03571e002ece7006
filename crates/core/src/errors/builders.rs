//! Builder methods for creating errors with context

use super::types::Error;
use crate::types::PipelineStep;
use std::path::PathBuf;

impl Error {
    /// Create a build failure for one environment
    #[must_use]
    pub fn build_failed(environment: impl Into<String>, source: Error) -> Self {
        Error::BuildFailed {
            environment: environment.into(),
            source: Box::new(source),
        }
    }

    /// Create a lease error without an underlying cause
    #[must_use]
    pub fn lease(environment: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Lease {
            environment: environment.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a lease error wrapping an underlying cause
    #[must_use]
    pub fn lease_with_source(
        environment: impl Into<String>,
        message: impl Into<String>,
        source: Error,
    ) -> Self {
        Error::Lease {
            environment: environment.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a pipeline step failure
    #[must_use]
    pub fn pipeline_step(environment: impl Into<String>, step: PipelineStep, source: Error) -> Self {
        Error::PipelineStep {
            environment: environment.into(),
            step,
            source: Box::new(source),
        }
    }

    /// Create a descriptor parse error
    #[must_use]
    pub fn descriptor(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Error::Descriptor {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    /// Create a result stream error
    #[must_use]
    pub fn tap(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Tap {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a command execution error
    #[must_use]
    pub fn command_execution(
        command: impl Into<String>,
        args: Vec<String>,
        message: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Error::CommandExecution {
            command: command.into(),
            args,
            message: message.into(),
            exit_code,
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Create a build graph error
    #[must_use]
    pub fn graph(message: impl Into<String>) -> Self {
        Error::Graph {
            message: message.into(),
        }
    }

    /// Create a file system error
    #[must_use]
    pub fn file_system(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Error::FileSystem {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }

    /// Collapse a list of per-environment failures into one error
    #[must_use]
    pub fn from_failures(mut failures: Vec<Error>) -> Option<Self> {
        match failures.len() {
            0 => None,
            1 => failures.pop(),
            _ => Some(Error::RunFailed { failures }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_step_names_environment_and_step() {
        let err = Error::pipeline_step(
            "beta",
            PipelineStep::Booted,
            Error::command_execution("qemu-kvm", vec![], "exited", Some(1)),
        );
        let msg = err.to_string();
        assert!(msg.contains("'beta'"));
        assert!(msg.contains("BOOTED"));
        assert_eq!(err.environment(), Some("beta"));
    }

    #[test]
    fn test_from_failures() {
        assert!(Error::from_failures(vec![]).is_none());

        let single = Error::from_failures(vec![Error::lease("alpha", "boom")]).unwrap();
        assert!(matches!(single, Error::Lease { .. }));

        let many = Error::from_failures(vec![
            Error::lease("alpha", "boom"),
            Error::build_failed("beta", Error::configuration("bad")),
        ])
        .unwrap();
        assert!(many.to_string().starts_with("2 environments failed"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::Interrupted.exit_code(), 130);
        assert_eq!(Error::MissingCommand.exit_code(), 2);
        assert_eq!(Error::configuration("x").exit_code(), 1);
    }
}
