//! Cluster lease lifecycle
//!
//! Each environment runs its tests against a short-lived cluster claimed
//! from a broker. The claim id is written to disk before the broker is asked
//! for anything, so a claim can always be released later, even when the
//! run that created it died halfway.

pub mod broker;
pub mod manager;

pub use broker::{LeaseBroker, ProcessLeaseBroker};
pub use manager::{generate_claim_id, ClusterClaim, LeaseManager};
