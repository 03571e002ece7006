//! Configuration and environment discovery for testbench
//!
//! This crate owns the explicit [`TestbenchConfig`] threaded through every
//! component, the loader that layers defaults, environment variables and CLI
//! overrides, and the descriptor registry that turns a directory of
//! descriptor files into [`EnvironmentSpec`]s.

pub mod config;
pub mod descriptor;
pub mod loader;
pub mod registry;

pub use config::*;
pub use descriptor::*;
pub use loader::*;
pub use registry::*;
