//! Centralized configuration for testbench
//!
//! `TestbenchConfig` is the single source of truth for tool names, directory
//! layout and run parameters. It is immutable after loading and shared as
//! `Arc<TestbenchConfig>` by every component, so nothing below the CLI reads
//! the process environment.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use testbench_core::{
    Error, Result, CACHE_DIRNAME, CLAIM_SUFFIX, CREDENTIAL_SUFFIX, DEFAULT_BUILDER,
    DEFAULT_LEASE_BROKER, DEFAULT_LEASE_POOL, DEFAULT_MOUNT_TOOL, DEFAULT_OUTPUT_DIR,
    FINGERPRINT_SUFFIX, IMAGE_SUFFIX, REPORT_FILENAME, RESULT_SUFFIX, WORKING_IMAGE_SUFFIX,
};

/// What a fingerprint entry records about each file of an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FingerprintMode {
    /// Path, existence and a SHA-256 of the content
    #[default]
    Content,
    /// Path and existence only
    FileList,
}

impl fmt::Display for FingerprintMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FingerprintMode::Content => write!(f, "content"),
            FingerprintMode::FileList => write!(f, "file-list"),
        }
    }
}

impl FromStr for FingerprintMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "content" => Ok(FingerprintMode::Content),
            "file-list" => Ok(FingerprintMode::FileList),
            other => Err(Error::configuration(format!(
                "unknown fingerprint mode '{other}' (expected 'content' or 'file-list')"
            ))),
        }
    }
}

/// Immutable configuration for one testbench invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestbenchConfig {
    /// Directory scanned for base descriptors
    pub descriptor_dir: PathBuf,

    /// Directory holding images, fingerprints, claims and results
    pub output_dir: PathBuf,

    /// Package cache shared by every image build
    pub cache_dir: PathBuf,

    /// External image builder binary
    pub builder: String,

    /// External lease broker binary
    pub lease_broker: String,

    /// Cluster pool leases are claimed from
    pub lease_pool: String,

    /// Tool used to mount images offline
    pub mount_tool: String,

    /// Explicit hypervisor binary; discovered when unset
    pub hypervisor: Option<String>,

    /// Extra arguments appended to the hypervisor command line
    pub hypervisor_args: Vec<String>,

    /// Home directory handed to the lease broker
    pub home_dir: PathBuf,

    /// Invoking user, embedded in claim ids
    pub user: String,

    /// Maximum number of build graph nodes running at once
    pub jobs: usize,

    pub fingerprint_mode: FingerprintMode,

    /// Keep leases after an environment finishes instead of releasing them
    pub keep_claims: bool,
}

impl Default for TestbenchConfig {
    fn default() -> Self {
        let output_dir = PathBuf::from(DEFAULT_OUTPUT_DIR);
        Self {
            descriptor_dir: PathBuf::from("."),
            cache_dir: output_dir.join(CACHE_DIRNAME),
            output_dir,
            builder: DEFAULT_BUILDER.to_string(),
            lease_broker: DEFAULT_LEASE_BROKER.to_string(),
            lease_pool: DEFAULT_LEASE_POOL.to_string(),
            mount_tool: DEFAULT_MOUNT_TOOL.to_string(),
            hypervisor: None,
            hypervisor_args: Vec::new(),
            home_dir: dirs::home_dir().unwrap_or_else(|| PathBuf::from("/")),
            user: whoami::username(),
            jobs: 1,
            fingerprint_mode: FingerprintMode::default(),
            keep_claims: false,
        }
    }
}

impl TestbenchConfig {
    /// Reject configurations no run could succeed with
    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            return Err(Error::configuration("jobs must be at least 1"));
        }
        for (what, value) in [
            ("builder", &self.builder),
            ("lease broker", &self.lease_broker),
            ("lease pool", &self.lease_pool),
            ("mount tool", &self.mount_tool),
            ("user", &self.user),
        ] {
            if value.trim().is_empty() {
                return Err(Error::configuration(format!("{what} cannot be empty")));
            }
        }
        if matches!(&self.hypervisor, Some(h) if h.trim().is_empty()) {
            return Err(Error::configuration("hypervisor cannot be empty"));
        }
        Ok(())
    }

    fn output_file(&self, environment: &str, suffix: &str) -> PathBuf {
        self.output_dir.join(format!("{environment}{suffix}"))
    }

    /// Cached image artifact
    pub fn image_path(&self, environment: &str) -> PathBuf {
        self.output_file(environment, IMAGE_SUFFIX)
    }

    /// Fingerprint record of the image artifact
    pub fn fingerprint_path(&self, environment: &str) -> PathBuf {
        self.output_file(environment, FINGERPRINT_SUFFIX)
    }

    /// Persisted lease claim id
    pub fn claim_path(&self, environment: &str) -> PathBuf {
        self.output_file(environment, CLAIM_SUFFIX)
    }

    /// Local copy of the lease credentials
    pub fn credential_path(&self, environment: &str) -> PathBuf {
        self.output_file(environment, CREDENTIAL_SUFFIX)
    }

    /// Disposable per-run copy of the image
    pub fn working_image_path(&self, environment: &str) -> PathBuf {
        self.output_file(environment, WORKING_IMAGE_SUFFIX)
    }

    /// Extracted result stream
    pub fn result_path(&self, environment: &str) -> PathBuf {
        self.output_file(environment, RESULT_SUFFIX)
    }

    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join(REPORT_FILENAME)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}
