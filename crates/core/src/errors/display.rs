//! Display implementations for error types

use super::types::Error;
use std::fmt;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoEnvironments { root } => {
                write!(
                    f,
                    "no environment descriptors found in '{}'",
                    root.display()
                )
            }
            Error::MissingCommand => write!(f, "no test command given"),
            Error::BuildFailed {
                environment,
                source,
            } => {
                write!(f, "image build failed for '{environment}': {source}")
            }
            Error::Lease {
                environment,
                message,
                source,
            } => match source {
                Some(source) => write!(f, "lease error for '{environment}': {message}: {source}"),
                None => write!(f, "lease error for '{environment}': {message}"),
            },
            Error::PipelineStep {
                environment,
                step,
                source,
            } => {
                write!(f, "environment '{environment}' failed at {step}: {source}")
            }
            Error::Descriptor {
                path,
                line,
                message,
            } => {
                write!(f, "{}:{line}: {message}", path.display())
            }
            Error::Tap { path, message } => {
                write!(f, "invalid result stream '{}': {message}", path.display())
            }
            Error::CommandExecution {
                command,
                args,
                message,
                exit_code,
            } => {
                let args_str = args.join(" ");
                let shown = if args_str.is_empty() {
                    command.clone()
                } else {
                    format!("{command} {args_str}")
                };
                match exit_code {
                    Some(code) => {
                        write!(f, "command '{shown}' failed with exit code {code}: {message}")
                    }
                    None => write!(f, "command '{shown}' failed: {message}"),
                }
            }
            Error::Configuration { message } => {
                write!(f, "configuration error: {message}")
            }
            Error::Graph { message } => {
                write!(f, "build graph error: {message}")
            }
            Error::FileSystem {
                path,
                operation,
                source,
            } => {
                write!(
                    f,
                    "file system {operation} operation failed for '{}': {source}",
                    path.display()
                )
            }
            Error::Json { message, .. } => {
                write!(f, "JSON error: {message}")
            }
            Error::RunFailed { failures } => {
                write!(f, "{} environments failed:", failures.len())?;
                for failure in failures {
                    write!(f, "\n  - {failure}")?;
                }
                Ok(())
            }
            Error::Interrupted => write!(f, "interrupted"),
        }
    }
}
