//! Exclusive directory lock.
//!
//! Every engine takes an exclusive `fs2` lock on `<dir>/LOCK` before touching
//! its files, so two handles (in this or another process) can never
//! interleave writes into the same store.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// Lock file name inside a store directory
pub const LOCK_FILE_NAME: &str = "LOCK";

/// Held exclusive lock on a store directory; released on drop.
#[derive(Debug)]
pub struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    /// Try to lock `dir` without blocking.
    ///
    /// Returns a human-readable reason on failure, for use in an
    /// `EngineOpen` error.
    pub fn acquire(dir: &Path) -> Result<Self, String> {
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| format!("failed to open lock file {}: {}", path.display(), e))?;
        file.try_lock_exclusive().map_err(|_| {
            format!(
                "lock held by another process: '{}' is already in use",
                dir.display()
            )
        })?;
        Ok(DirLock { file, path })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
