//! Atomic file operations to prevent corrupted records

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use testbench_core::{Error, Result};
use uuid::Uuid;

/// Write data to a file atomically by writing to a temporary file and renaming
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let temp_path = write_scratch(path, content)?;

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::file_system(path.to_path_buf(), "atomic rename", e)
    })?;

    Ok(())
}

/// Write string content to a file atomically
pub fn write_atomic_string(path: &Path, content: &str) -> Result<()> {
    write_atomic(path, content.as_bytes())
}

/// Replace `path` with `content` only if the bytes differ.
///
/// The content is first written to a scratch file next to `path`, compared
/// byte-for-byte with the current record and then either renamed over it or
/// discarded. Returns `true` when the record was replaced. An unchanged record
/// keeps its modification time.
pub fn write_if_changed(path: &Path, content: &[u8]) -> Result<bool> {
    let temp_path = write_scratch(path, content)?;

    let unchanged = match fs::read(path) {
        Ok(existing) => existing == content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            return Err(Error::file_system(path.to_path_buf(), "read existing record", e));
        }
    };

    if unchanged {
        fs::remove_file(&temp_path)
            .map_err(|e| Error::file_system(&temp_path, "discard scratch file", e))?;
        return Ok(false);
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::file_system(path.to_path_buf(), "atomic rename", e)
    })?;

    Ok(true)
}

/// Remove a file, treating an already missing file as success
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::file_system(path.to_path_buf(), "remove", e)),
    }
}

fn write_scratch(path: &Path, content: &[u8]) -> Result<PathBuf> {
    let parent = path.parent().ok_or_else(|| {
        Error::configuration(format!("Invalid file path '{}': no parent directory", path.display()))
    })?;

    fs::create_dir_all(parent)
        .map_err(|e| Error::file_system(parent.to_path_buf(), "create parent directory", e))?;

    // Same directory as the target so the rename stays on one filesystem
    let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));

    let result = (|| -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| Error::file_system(&temp_path, "create temporary file", e))?;

        file.write_all(content)
            .map_err(|e| Error::file_system(&temp_path, "write to temporary file", e))?;

        file.sync_all()
            .map_err(|e| Error::file_system(&temp_path, "sync temporary file", e))?;

        Ok(())
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    Ok(temp_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn leftover_temp_files(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count()
    }

    #[test]
    fn test_atomic_write() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.txt");

        write_atomic_string(&file_path, "Hello, World!").unwrap();

        let content = fs::read_to_string(&file_path).unwrap();
        assert_eq!(content, "Hello, World!");
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("subdir").join("test.txt");

        write_atomic_string(&file_path, "Test").unwrap();

        let content = fs::read_to_string(&file_path).unwrap();
        assert_eq!(content, "Test");
    }

    #[test]
    fn test_write_if_changed_creates_then_skips() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("record");

        assert!(write_if_changed(&file_path, b"a\nb\n").unwrap());
        let first_mtime = fs::metadata(&file_path).unwrap().modified().unwrap();

        assert!(!write_if_changed(&file_path, b"a\nb\n").unwrap());
        let second_mtime = fs::metadata(&file_path).unwrap().modified().unwrap();
        assert_eq!(first_mtime, second_mtime);
        assert_eq!(leftover_temp_files(temp_dir.path()), 0);
    }

    #[test]
    fn test_write_if_changed_replaces_different_content() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("record");

        fs::write(&file_path, "old").unwrap();
        assert!(write_if_changed(&file_path, b"new").unwrap());
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "new");
        assert_eq!(leftover_temp_files(temp_dir.path()), 0);
    }

    #[test]
    fn test_remove_if_exists() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("gone");

        assert!(!remove_if_exists(&file_path).unwrap());
        fs::write(&file_path, "x").unwrap();
        assert!(remove_if_exists(&file_path).unwrap());
        assert!(!file_path.exists());
    }
}
