//! Descriptor registry
//!
//! Discovers the environments declared in a descriptor directory. Every
//! regular file named `NAME.mkosi` directly inside the directory is a base
//! descriptor; `NAME.mkosi.postinst` and `NAME.mkosi.extra` (a directory) or
//! `NAME.mkosi.extra.tar` (an archive) are optional companions.

use crate::descriptor::Descriptor;
use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};
use testbench_core::{
    EnvironmentName, Error, Result, DESCRIPTOR_SUFFIX, EXTRA_ARCHIVE_SUFFIX, EXTRA_DIR_SUFFIX,
    POSTINST_SUFFIX,
};

/// Extra files copied on top of the image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraOverlay {
    /// A directory tree; ownership is not preserved
    Directory(PathBuf),
    /// A tar archive; ownership metadata is preserved
    Archive(PathBuf),
}

impl ExtraOverlay {
    pub fn path(&self) -> &Path {
        match self {
            ExtraOverlay::Directory(path) | ExtraOverlay::Archive(path) => path,
        }
    }
}

/// One logical test environment: a base descriptor and its companions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSpec {
    pub name: EnvironmentName,
    pub descriptor: PathBuf,
    /// Descriptor content as read at discovery time
    pub content: String,
    pub postinst: Option<PathBuf>,
    pub extra: Option<ExtraOverlay>,
}

impl EnvironmentSpec {
    /// Parse the base descriptor captured at discovery
    pub fn parse_descriptor(&self) -> Result<Descriptor> {
        Descriptor::parse(&self.descriptor, &self.content)
    }
}

/// The environments of one run, in discovery order
#[derive(Debug, Clone, Default)]
pub struct EnvironmentSet {
    root: PathBuf,
    specs: IndexMap<EnvironmentName, EnvironmentSpec>,
}

impl EnvironmentSet {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&EnvironmentSpec> {
        self.specs.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnvironmentSpec> {
        self.specs.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &EnvironmentName> {
        self.specs.keys()
    }

    /// Keep only the named environments, preserving discovery order
    pub fn select(self, names: &[String]) -> Result<Self> {
        if names.is_empty() {
            return Ok(self);
        }
        for name in names {
            if !self.specs.contains_key(name.as_str()) {
                return Err(Error::configuration(format!(
                    "environment '{name}' not found in '{}'",
                    self.root.display()
                )));
            }
        }
        let specs = self
            .specs
            .into_iter()
            .filter(|(name, _)| names.iter().any(|n| n == name.as_str()))
            .collect();
        Ok(Self {
            root: self.root,
            specs,
        })
    }
}

impl<'a> IntoIterator for &'a EnvironmentSet {
    type Item = &'a EnvironmentSpec;
    type IntoIter = indexmap::map::Values<'a, EnvironmentName, EnvironmentSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.specs.values()
    }
}

/// Scan `root` for environment descriptors.
///
/// Environments are ordered by descriptor file name. Finding none is fatal.
pub fn discover(root: &Path) -> Result<EnvironmentSet> {
    let entries =
        fs::read_dir(root).map_err(|e| Error::file_system(root, "read descriptor directory", e))?;

    let mut descriptors = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::file_system(root, "read directory entry", e))?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if file_name.starts_with('.') || !file_name.ends_with(DESCRIPTOR_SUFFIX) {
            continue;
        }
        let path = entry.path();
        // Follows symlinks so a linked descriptor counts
        if !path.is_file() {
            continue;
        }
        descriptors.push(path);
    }
    descriptors.sort();

    if descriptors.is_empty() {
        return Err(Error::NoEnvironments {
            root: root.to_path_buf(),
        });
    }

    let mut specs = IndexMap::with_capacity(descriptors.len());
    for descriptor in descriptors {
        let spec = load_spec(root, descriptor)?;
        tracing::debug!(
            environment = %spec.name,
            postinst = spec.postinst.is_some(),
            extra = spec.extra.is_some(),
            "discovered environment"
        );
        specs.insert(spec.name.clone(), spec);
    }

    Ok(EnvironmentSet {
        root: root.to_path_buf(),
        specs,
    })
}

fn load_spec(root: &Path, descriptor: PathBuf) -> Result<EnvironmentSpec> {
    let name = EnvironmentName::from_descriptor_path(root, &descriptor, DESCRIPTOR_SUFFIX)?;
    let content = fs::read_to_string(&descriptor)
        .map_err(|e| Error::file_system(&descriptor, "read descriptor", e))?;

    let stem = root.join(name.as_str());
    let with_suffix = |suffix: &str| {
        let mut path = stem.clone().into_os_string();
        path.push(suffix);
        PathBuf::from(path)
    };

    let postinst = Some(with_suffix(POSTINST_SUFFIX)).filter(|p| p.is_file());

    let extra_dir = with_suffix(EXTRA_DIR_SUFFIX);
    let extra_archive = with_suffix(EXTRA_ARCHIVE_SUFFIX);
    let extra = match (extra_dir.is_dir(), extra_archive.is_file()) {
        (true, true) => {
            tracing::warn!(
                environment = %name,
                "both an extra directory and an extra archive exist; using the directory"
            );
            Some(ExtraOverlay::Directory(extra_dir))
        }
        (true, false) => Some(ExtraOverlay::Directory(extra_dir)),
        (false, true) => Some(ExtraOverlay::Archive(extra_archive)),
        (false, false) => None,
    };

    Ok(EnvironmentSpec {
        name,
        descriptor,
        content,
        postinst,
        extra,
    })
}
