//! Per-environment execution and whole-run orchestration
//!
//! ## Key Components
//!
//! - **`driver`**: the execution state machine that turns a realized image
//!   and a cluster claim into an extracted result stream.
//! - **`harness`**: the files staged into a working image so it runs the
//!   test command on boot and powers off.
//! - **`image_access`** and **`hypervisor`**: seams over the offline mount
//!   tool and the virtual machine monitor.
//! - **`graph`** and **`scheduler`**: the explicit build graph and the
//!   bounded executor that walks it.
//! - **`orchestrator`**: ties everything together for `run`, `prepare`,
//!   `delete-claims` and `report`.

pub mod driver;
pub mod graph;
pub mod harness;
pub mod hypervisor;
pub mod image_access;
pub mod orchestrator;
pub mod scheduler;

pub use driver::ExecutionDriver;
pub use graph::{BuildGraph, Node, Stage};
pub use harness::Harness;
pub use hypervisor::{Hypervisor, Qemu};
pub use image_access::{DissectMount, ImageAccess, MountPoint};
pub use orchestrator::{Collaborators, Orchestrator};
pub use scheduler::Scheduler;
