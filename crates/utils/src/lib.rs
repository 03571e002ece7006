//! Shared utilities for testbench
//!
//! File persistence primitives, the run lock, external process helpers and
//! tracing initialisation used by every other crate in the workspace.

pub mod atomic_file;
pub mod process;
pub mod run_lock;
pub mod tracing;

pub use atomic_file::*;
pub use process::*;
pub use run_lock::*;
