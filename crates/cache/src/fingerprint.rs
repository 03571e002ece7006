//! Fingerprint store
//!
//! A fingerprint is the sorted list of files that make up one environment:
//! the base descriptor, the post-install script slot, and the extra overlay
//! (walked recursively when it is a directory). Candidate companions that do
//! not exist are recorded as absent, so creating one later is a change too.
//!
//! Records are plain text, one tab separated entry per line, and are only
//! ever replaced through [`write_if_changed`].

use crate::hashing::{hash_bytes, hash_file};
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use testbench_config::{EnvironmentSpec, FingerprintMode, TestbenchConfig};
use testbench_core::{
    Error, Result, DESCRIPTOR_SUFFIX, EXTRA_ARCHIVE_SUFFIX, EXTRA_DIR_SUFFIX, POSTINST_SUFFIX,
};
use testbench_utils::atomic_file::{remove_if_exists, write_if_changed};
use walkdir::WalkDir;

/// What was found at a fingerprinted path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Absent,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Directory => "dir",
            EntryKind::Symlink => "link",
            EntryKind::Absent => "absent",
        }
    }

    fn of(metadata: &fs::Metadata) -> Self {
        let file_type = metadata.file_type();
        if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        }
    }
}

/// One fingerprinted path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintEntry {
    /// Path relative to the descriptor directory
    pub path: String,
    pub kind: EntryKind,
    /// Content digest, only in [`FingerprintMode::Content`]
    pub digest: Option<String>,
}

/// The deterministic file set of one environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    entries: Vec<FingerprintEntry>,
}

impl Fingerprint {
    /// Enumerate every file that constitutes `spec`
    pub fn compute(spec: &EnvironmentSpec, mode: FingerprintMode) -> Result<Self> {
        let root = spec
            .descriptor
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let name = spec.name.as_str();

        let mut entries = Vec::new();
        for suffix in [DESCRIPTOR_SUFFIX, POSTINST_SUFFIX, EXTRA_ARCHIVE_SUFFIX] {
            let path = root.join(format!("{name}{suffix}"));
            entries.push(entry_for(&root, &path, mode)?);
        }

        let extra_dir = root.join(format!("{name}{EXTRA_DIR_SUFFIX}"));
        if extra_dir.is_dir() {
            for item in WalkDir::new(&extra_dir).follow_links(false) {
                let item = item.map_err(|e| {
                    let path = e.path().map_or_else(|| extra_dir.clone(), Path::to_path_buf);
                    Error::file_system(path, "walk extra overlay", io::Error::from(e))
                })?;
                entries.push(entry_for(&root, item.path(), mode)?);
            }
        } else {
            entries.push(entry_for(&root, &extra_dir, mode)?);
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[FingerprintEntry] {
        &self.entries
    }

    /// Serialized record form
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let _ = write!(out, "{}\t{}", entry.path, entry.kind.as_str());
            if let Some(digest) = &entry.digest {
                let _ = write!(out, "\t{digest}");
            }
            out.push('\n');
        }
        out
    }
}

fn entry_for(root: &Path, path: &Path, mode: FingerprintMode) -> Result<FingerprintEntry> {
    let relative = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .escape_default()
        .to_string();

    let kind = match fs::symlink_metadata(path) {
        Ok(metadata) => EntryKind::of(&metadata),
        Err(e) if e.kind() == io::ErrorKind::NotFound => EntryKind::Absent,
        Err(e) => return Err(Error::file_system(path, "stat fingerprinted file", e)),
    };

    let digest = match (mode, kind) {
        (FingerprintMode::FileList, _) => None,
        (FingerprintMode::Content, EntryKind::File) => Some(hash_file(path)?),
        (FingerprintMode::Content, EntryKind::Symlink) => {
            let target = fs::read_link(path)
                .map_err(|e| Error::file_system(path, "read symlink", e))?;
            Some(hash_bytes(target.to_string_lossy().as_bytes()))
        }
        (FingerprintMode::Content, EntryKind::Directory | EntryKind::Absent) => {
            Some("-".to_string())
        }
    };

    Ok(FingerprintEntry {
        path: relative,
        kind,
        digest,
    })
}

/// Persisted fingerprints, one record per environment in the output directory
#[derive(Debug, Clone)]
pub struct FingerprintStore {
    config: Arc<TestbenchConfig>,
}

impl FingerprintStore {
    pub fn new(config: Arc<TestbenchConfig>) -> Self {
        Self { config }
    }

    pub fn mode(&self) -> FingerprintMode {
        self.config.fingerprint_mode
    }

    pub fn compute(&self, spec: &EnvironmentSpec) -> Result<Fingerprint> {
        Fingerprint::compute(spec, self.mode())
    }

    /// The last recorded fingerprint, if any
    pub fn stored(&self, environment: &str) -> Result<Option<String>> {
        let path = self.config.fingerprint_path(environment);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::file_system(path, "read fingerprint", e)),
        }
    }

    /// Whether the current file set differs from the recorded one
    pub fn is_stale(&self, spec: &EnvironmentSpec) -> Result<bool> {
        let current = self.compute(spec)?;
        self.differs(spec.name.as_str(), &current)
    }

    /// Compare an already computed fingerprint against the record
    pub fn differs(&self, environment: &str, fingerprint: &Fingerprint) -> Result<bool> {
        Ok(self.stored(environment)?.as_deref() != Some(fingerprint.render().as_str()))
    }

    /// Record the current file set of `spec`. Returns whether the record changed.
    pub fn record(&self, spec: &EnvironmentSpec) -> Result<bool> {
        let current = self.compute(spec)?;
        self.record_fingerprint(spec.name.as_str(), &current)
    }

    pub fn record_fingerprint(&self, environment: &str, fingerprint: &Fingerprint) -> Result<bool> {
        let path = self.config.fingerprint_path(environment);
        let changed = write_if_changed(&path, fingerprint.render().as_bytes())?;
        tracing::debug!(environment = %environment, changed, "fingerprint recorded");
        Ok(changed)
    }

    /// Forget the record so the next check reports stale
    pub fn invalidate(&self, environment: &str) -> Result<()> {
        remove_if_exists(&self.config.fingerprint_path(environment))?;
        Ok(())
    }
}
