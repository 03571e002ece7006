//! Core domain types, errors, and constants for `testbench`.
//!
//! ## Key Components
//!
//! - **`errors`**: the `Error` enum and `Result` alias. Every failure a run can
//!   surface, from a missing descriptor directory to a pipeline step that
//!   failed inside one environment, is a variant here.
//! - **`types`**: small domain newtypes shared by every crate
//!   (`EnvironmentName`, `PipelineStep`).
//! - **`constants`**: file suffixes, well-known in-image paths and
//!   environment variable names.

pub mod constants;
pub mod errors;
pub mod types;

pub use self::{
    constants::*,
    errors::{Error, Result},
    types::*,
};
