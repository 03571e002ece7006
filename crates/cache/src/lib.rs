//! Incremental image realization for testbench
//!
//! The [`FingerprintStore`] records which files made up an environment the
//! last time its image was built; the [`ImageRealizer`] consults it and only
//! invokes the external [`ImageBuilder`] when the recorded set no longer
//! matches.

pub mod builder;
pub mod fingerprint;
pub mod hashing;
pub mod realize;

pub use builder::{BuildRequest, ImageBuilder, ProcessImageBuilder};
pub use fingerprint::{EntryKind, Fingerprint, FingerprintEntry, FingerprintStore};
pub use realize::{ImageArtifact, ImageRealizer};
