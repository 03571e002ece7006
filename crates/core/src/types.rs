//! Domain newtypes shared across the workspace

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::ops::Deref;
use std::path::Path;

use crate::errors::{Error, Result};

/// Name of one test environment, derived from its descriptor path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentName(String);

impl EnvironmentName {
    /// Create a name, rejecting empty values and path separators
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::configuration("environment name cannot be empty"));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(Error::configuration(format!(
                "environment name '{name}' must not contain path separators"
            )));
        }
        Ok(Self(name))
    }

    /// Derive a name from a descriptor path relative to the descriptor root.
    ///
    /// The descriptor suffix is stripped and any remaining separators are
    /// normalized to `_`, so `fedora/base.mkosi` becomes `fedora_base`.
    pub fn from_descriptor_path(root: &Path, descriptor: &Path, suffix: &str) -> Result<Self> {
        let relative = descriptor.strip_prefix(root).unwrap_or(descriptor);
        let raw = relative.to_string_lossy();
        let stem = raw.strip_suffix(suffix).unwrap_or(&raw);
        let normalized: String = stem
            .trim_start_matches(['/', '\\'])
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        Self::new(normalized)
    }

    /// Lowercase, DNS-label-safe form used in remote identifiers
    pub fn slug(&self) -> String {
        let mut slug = String::with_capacity(self.0.len());
        let mut last_dash = false;
        for c in self.0.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
                last_dash = false;
            } else if !last_dash {
                slug.push('-');
                last_dash = true;
            }
        }
        slug.trim_matches('-').to_string()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EnvironmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Deref for EnvironmentName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for EnvironmentName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for EnvironmentName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Steps of the per-environment execution pipeline, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStep {
    ImageCopied,
    CredentialsInjected,
    CommandInjected,
    Booted,
    ResultExtracted,
}

impl PipelineStep {
    pub const ALL: [PipelineStep; 5] = [
        PipelineStep::ImageCopied,
        PipelineStep::CredentialsInjected,
        PipelineStep::CommandInjected,
        PipelineStep::Booted,
        PipelineStep::ResultExtracted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::ImageCopied => "IMAGE_COPIED",
            PipelineStep::CredentialsInjected => "CREDENTIALS_INJECTED",
            PipelineStep::CommandInjected => "COMMAND_INJECTED",
            PipelineStep::Booted => "BOOTED",
            PipelineStep::ResultExtracted => "RESULT_EXTRACTED",
        }
    }
}

impl Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
