//! Core error type definitions

use crate::types::PipelineStep;
use std::path::PathBuf;

/// Result type alias for testbench operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for testbench operations using thiserror
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The descriptor directory holds no base descriptors
    NoEnvironments { root: PathBuf },

    /// `run` was invoked without a test command
    MissingCommand,

    /// The external image builder failed for one environment
    BuildFailed {
        environment: String,
        #[source]
        source: Box<Error>,
    },

    /// Claiming, fetching or releasing a cluster lease failed
    Lease {
        environment: String,
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },

    /// One step of the execution driver failed
    PipelineStep {
        environment: String,
        step: PipelineStep,
        #[source]
        source: Box<Error>,
    },

    /// Malformed base descriptor
    Descriptor {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// Unusable result stream
    Tap { path: PathBuf, message: String },

    /// Command execution errors
    CommandExecution {
        command: String,
        args: Vec<String>,
        message: String,
        exit_code: Option<i32>,
    },

    /// Configuration errors
    Configuration { message: String },

    /// Build graph construction or scheduling errors
    Graph { message: String },

    /// File system operations
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization errors
    Json {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    /// More than one environment failed in the same run
    RunFailed { failures: Vec<Error> },

    /// The run was interrupted by the operator
    Interrupted,
}

impl Error {
    /// Name of the environment this error belongs to, if any
    pub fn environment(&self) -> Option<&str> {
        match self {
            Error::BuildFailed { environment, .. }
            | Error::Lease { environment, .. }
            | Error::PipelineStep { environment, .. } => Some(environment),
            _ => None,
        }
    }

    /// Process exit code the CLI should use for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Interrupted => 130,
            Error::MissingCommand => 2,
            _ => 1,
        }
    }
}
