//! Parsing of INI-style base descriptors
//!
//! The orchestrator treats descriptors as opaque inputs to the image builder;
//! parsing exists so `summary` can show what each environment asks for and so
//! obviously broken files are caught before a build is attempted.

use indexmap::IndexMap;
use std::path::Path;
use testbench_core::{Error, Result};

/// Sections and keys the image builder understands
const KNOWN_KEYS: &[(&str, &[&str])] = &[
    ("Distribution", &["Distribution", "Release", "Repositories", "Mirror"]),
    (
        "Output",
        &[
            "Format",
            "Output",
            "OutputDirectory",
            "Force",
            "Bootable",
            "KernelCommandLine",
            "SecureBoot",
            "SecureBootKey",
            "SecureBootCertificate",
            "ReadOnly",
            "Encrypt",
            "Verity",
            "Compress",
            "XZ",
            "QCow2",
            "Hostname",
        ],
    ),
    (
        "Packages",
        &[
            "Packages",
            "WithDocs",
            "WithTests",
            "Cache",
            "ExtraTrees",
            "SkeletonTrees",
            "BuildScript",
            "BuildSources",
            "BuildDirectory",
            "BuildPackages",
            "PostinstallScript",
            "PostInstallationScript",
            "WithNetwork",
            "NSpawnSettings",
        ],
    ),
    (
        "Partitions",
        &["RootSize", "ESPSize", "SwapSize", "HomeSize", "SrvSize"],
    ),
    ("Validation", &["CheckSum", "Sign", "Key", "Bmap", "Password"]),
    ("Host", &["ExtraSearchPaths"]),
];

/// Keys whose values are whitespace separated lists that accumulate
const LIST_KEYS: &[&str] = &[
    "Repositories",
    "Packages",
    "ExtraTrees",
    "SkeletonTrees",
    "BuildPackages",
    "ExtraSearchPaths",
];

/// A parsed base descriptor, sections and keys in file order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Descriptor {
    sections: IndexMap<String, IndexMap<String, String>>,
}

impl Descriptor {
    /// Parse descriptor text. `path` is only used for error messages.
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let mut sections: IndexMap<String, IndexMap<String, String>> = IndexMap::new();
        let mut current: Option<String> = None;
        let mut last_key: Option<String> = None;

        for (index, raw) in content.lines().enumerate() {
            let lineno = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            // Indented lines continue the previous value
            if raw.starts_with(char::is_whitespace) {
                if let (Some(section), Some(key)) = (&current, &last_key) {
                    if let Some(value) = sections.get_mut(section).and_then(|s| s.get_mut(key)) {
                        if !value.is_empty() {
                            value.push(' ');
                        }
                        value.push_str(line);
                        continue;
                    }
                }
            }

            if let Some(rest) = line.strip_prefix('[') {
                let name = rest
                    .strip_suffix(']')
                    .ok_or_else(|| Error::descriptor(path, lineno, "unterminated section header"))?
                    .trim();
                if name.is_empty() {
                    return Err(Error::descriptor(path, lineno, "empty section name"));
                }
                if !is_known_section(name) {
                    tracing::warn!(path = %path.display(), section = %name, "unknown descriptor section");
                }
                sections.entry(name.to_string()).or_default();
                current = Some(name.to_string());
                last_key = None;
                continue;
            }

            let section = current.as_deref().ok_or_else(|| {
                Error::descriptor(path, lineno, "setting outside of any section")
            })?;
            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::descriptor(path, lineno, format!("expected 'Key=Value', got '{line}'"))
            })?;
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() {
                return Err(Error::descriptor(path, lineno, "empty key"));
            }
            if is_known_section(section) && !is_known_key(section, key) {
                tracing::warn!(path = %path.display(), section = %section, key = %key, "unknown descriptor key");
            }

            let entries = sections.entry(section.to_string()).or_default();
            match entries.get_mut(key) {
                Some(existing) if LIST_KEYS.contains(&key) => {
                    if !value.is_empty() {
                        existing.push(' ');
                        existing.push_str(value);
                    }
                }
                _ => {
                    entries.insert(key.to_string(), value.to_string());
                }
            }
            last_key = Some(key.to_string());
        }

        Ok(Self { sections })
    }

    /// Read and parse a descriptor file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::file_system(path, "read descriptor", e))?;
        Self::parse(path, &content)
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections.get(section)?.get(key).map(String::as_str)
    }

    /// A list-valued setting split on whitespace
    pub fn get_list(&self, section: &str, key: &str) -> Vec<&str> {
        self.get(section, key)
            .map(|v| v.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// A boolean setting using the builder's spelling rules
    pub fn get_bool(&self, section: &str, key: &str) -> Option<bool> {
        self.get(section, key).and_then(parse_boolean)
    }

    pub fn distribution(&self) -> Option<&str> {
        self.get("Distribution", "Distribution")
    }

    pub fn release(&self) -> Option<&str> {
        self.get("Distribution", "Release")
    }

    pub fn bootable(&self) -> bool {
        self.get_bool("Output", "Bootable").unwrap_or(false)
    }

    pub fn root_size(&self) -> Option<&str> {
        self.get("Partitions", "RootSize")
    }

    pub fn packages(&self) -> Vec<&str> {
        self.get_list("Packages", "Packages")
    }

    pub fn with_network(&self) -> bool {
        self.get_bool("Packages", "WithNetwork").unwrap_or(false)
    }

    /// All sections in file order
    pub fn sections(&self) -> impl Iterator<Item = (&str, &IndexMap<String, String>)> {
        self.sections.iter().map(|(k, v)| (k.as_str(), v))
    }
}

fn is_known_section(section: &str) -> bool {
    KNOWN_KEYS.iter().any(|(name, _)| *name == section)
}

fn is_known_key(section: &str, key: &str) -> bool {
    KNOWN_KEYS
        .iter()
        .find(|(name, _)| *name == section)
        .is_some_and(|(_, keys)| keys.contains(&key))
}

fn parse_boolean(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const FEDORA: &str = r#"
# Fedora test environment
[Distribution]
Distribution=fedora
Release=31

[Output]
Bootable=yes

[Partitions]
RootSize=3G

[Packages]
Packages=systemd sudo
  kubernetes-client
Packages=git
WithNetwork=true
"#;

    #[test]
    fn test_parse_known_sections() {
        let desc = Descriptor::parse(&PathBuf::from("fedora.mkosi"), FEDORA).unwrap();
        assert_eq!(desc.distribution(), Some("fedora"));
        assert_eq!(desc.release(), Some("31"));
        assert!(desc.bootable());
        assert_eq!(desc.root_size(), Some("3G"));
        assert!(desc.with_network());
        let sections: Vec<&str> = desc.sections().map(|(name, _)| name).collect();
        assert_eq!(sections, ["Distribution", "Output", "Partitions", "Packages"]);
    }

    #[test]
    fn test_list_values_accumulate() {
        let desc = Descriptor::parse(
            &PathBuf::from("x.mkosi"),
            "[Packages]\nPackages=systemd sudo\nPackages=git\n",
        )
        .unwrap();
        assert_eq!(desc.packages(), vec!["systemd", "sudo", "git"]);
    }

    #[test]
    fn test_continuation_lines_extend_value() {
        let desc = Descriptor::parse(&PathBuf::from("fedora.mkosi"), FEDORA).unwrap();
        assert_eq!(
            desc.packages(),
            vec!["systemd", "sudo", "kubernetes-client", "git"]
        );
    }

    #[test]
    fn test_bare_word_is_rejected() {
        let err = Descriptor::parse(&PathBuf::from("x.mkosi"), "[Output]
Bootable
").unwrap_err();
        assert!(err.to_string().contains("expected 'Key=Value'"));
    }

    #[test]
    fn test_setting_before_section() {
        let err = Descriptor::parse(&PathBuf::from("bad.mkosi"), "Bootable=yes\n").unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("bad.mkosi:1:"), "{msg}");
        assert!(msg.contains("outside of any section"));
    }

    #[test]
    fn test_unterminated_header() {
        let err = Descriptor::parse(&PathBuf::from("bad.mkosi"), "\n[Output\n").unwrap_err();
        assert!(err.to_string().starts_with("bad.mkosi:2:"));
    }

    #[test]
    fn test_unknown_sections_are_kept() {
        let desc =
            Descriptor::parse(&PathBuf::from("x.mkosi"), "[Custom]\nThing=1\n").unwrap();
        assert_eq!(desc.get("Custom", "Thing"), Some("1"));
    }
}
