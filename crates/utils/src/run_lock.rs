//! Exclusive lock on an output directory for the duration of a run

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use testbench_core::{Error, Result, LOCK_FILENAME};

/// Held while an orchestrator owns an output directory.
///
/// The lock is an advisory `flock` on `<dir>/.testbench.lock`; the kernel
/// drops it if the process dies, so a crashed run never blocks the next one.
#[derive(Debug)]
pub struct RunLock {
    lock_file: File,
    lock_path: PathBuf,
    directory: PathBuf,
}

impl RunLock {
    /// Try to acquire the lock for the given directory without blocking
    pub fn try_acquire(directory: &Path) -> Result<Self> {
        fs::create_dir_all(directory)
            .map_err(|e| Error::file_system(directory, "create output directory", e))?;
        let lock_path = directory.join(LOCK_FILENAME);

        let mut lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| Error::file_system(&lock_path, "open lock file", e))?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => {
                let pid = std::process::id();
                lock_file
                    .set_len(0)
                    .and_then(|_| writeln!(lock_file, "{pid}"))
                    .map_err(|e| Error::file_system(&lock_path, "write lock owner", e))?;

                Ok(Self {
                    lock_file,
                    lock_path,
                    directory: directory.to_path_buf(),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || is_contended(&e) => {
                let owner = fs::read_to_string(&lock_path).unwrap_or_default();
                Err(Error::configuration(format!(
                    "another testbench run (pid {}) is using '{}'",
                    owner.trim(),
                    directory.display()
                )))
            }
            Err(e) => Err(Error::file_system(&lock_path, "lock", e)),
        }
    }

    /// Get the directory this lock is for
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.lock_file);
        let _ = fs::remove_file(&self.lock_path);
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_run_lock_exclusive() {
        let temp_dir = TempDir::new().unwrap();
        let dir_path = temp_dir.path();

        let lock1 = RunLock::try_acquire(dir_path).unwrap();
        assert_eq!(lock1.directory(), dir_path);

        let lock2 = RunLock::try_acquire(dir_path);
        assert!(matches!(lock2, Err(Error::Configuration { .. })));

        drop(lock1);

        let lock3 = RunLock::try_acquire(dir_path).unwrap();
        drop(lock3);
        assert!(!dir_path.join(LOCK_FILENAME).exists());
    }
}
