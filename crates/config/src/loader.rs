//! Configuration loader for testbench
//!
//! Layers defaults, environment variables and explicit overrides (usually CLI
//! flags) into one validated [`TestbenchConfig`].

use crate::config::{FingerprintMode, TestbenchConfig};
use std::collections::HashMap;
use std::path::PathBuf;
use testbench_core::{
    Error, Result, CACHE_DIRNAME, TESTBENCH_BUILDER_VAR, TESTBENCH_FINGERPRINT_VAR,
    TESTBENCH_JOBS_VAR, TESTBENCH_LEASE_BROKER_VAR, TESTBENCH_LEASE_POOL_VAR,
    TESTBENCH_MOUNT_TOOL_VAR, TESTBENCH_OUTPUT_DIR_VAR, TESTBENCH_QEMU_VAR,
};

/// Explicit overrides, applied after environment variables
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub descriptor_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub jobs: Option<usize>,
    pub fingerprint_mode: Option<FingerprintMode>,
    pub keep_claims: bool,
    pub hypervisor_args: Vec<String>,
}

/// Configuration loader that handles all startup configuration
pub struct ConfigLoader {
    env: HashMap<String, String>,
    overrides: ConfigOverrides,
}

impl ConfigLoader {
    /// Create a loader reading the current process environment
    pub fn new() -> Self {
        Self::with_env(std::env::vars().collect())
    }

    /// Create a loader over an explicit environment map
    pub fn with_env(env: HashMap<String, String>) -> Self {
        Self {
            env,
            overrides: ConfigOverrides::default(),
        }
    }

    /// Set overrides to apply on top of the environment
    pub fn overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    fn var(&self, key: &str) -> Option<&str> {
        self.env
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Build and validate the configuration
    pub fn load(self) -> Result<TestbenchConfig> {
        let mut config = TestbenchConfig::default();

        if let Some(builder) = self.var(TESTBENCH_BUILDER_VAR) {
            config.builder = builder.to_string();
        }
        if let Some(broker) = self.var(TESTBENCH_LEASE_BROKER_VAR) {
            config.lease_broker = broker.to_string();
        }
        if let Some(pool) = self.var(TESTBENCH_LEASE_POOL_VAR) {
            config.lease_pool = pool.to_string();
        }
        if let Some(tool) = self.var(TESTBENCH_MOUNT_TOOL_VAR) {
            config.mount_tool = tool.to_string();
        }
        if let Some(qemu) = self.var(TESTBENCH_QEMU_VAR) {
            config.hypervisor = Some(qemu.to_string());
        }
        if let Some(dir) = self.var(TESTBENCH_OUTPUT_DIR_VAR) {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(jobs) = self.var(TESTBENCH_JOBS_VAR) {
            config.jobs = jobs.parse().map_err(|_| {
                Error::configuration(format!("{TESTBENCH_JOBS_VAR} must be a number, got '{jobs}'"))
            })?;
        }
        if let Some(mode) = self.var(TESTBENCH_FINGERPRINT_VAR) {
            config.fingerprint_mode = mode.parse()?;
        }
        if let Some(home) = self.var("HOME") {
            config.home_dir = PathBuf::from(home);
        }
        if let Some(user) = self.var("USER") {
            config.user = user.to_string();
        }

        let overrides = self.overrides;
        if let Some(dir) = overrides.descriptor_dir {
            config.descriptor_dir = dir;
        }
        if let Some(dir) = overrides.output_dir {
            config.output_dir = dir;
        }
        config.cache_dir = overrides
            .cache_dir
            .unwrap_or_else(|| config.output_dir.join(CACHE_DIRNAME));
        if let Some(jobs) = overrides.jobs {
            config.jobs = jobs;
        }
        if let Some(mode) = overrides.fingerprint_mode {
            config.fingerprint_mode = mode;
        }
        config.keep_claims = overrides.keep_claims;
        config.hypervisor_args = overrides.hypervisor_args;

        config.validate()?;
        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
