//! Per-run advisory locking using fd-lock
//!
//! Two collectors on the same `run_id` would race on the checkpoint and the
//! output namespace, so the second one fails fast instead.

use super::CheckpointError;
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive lock on a run, held until dropped
pub struct RunLock {
    _lock: RwLock<File>,
    path: PathBuf,
}

impl RunLock {
    /// Try to take the lock for `run_id` in `dir` without blocking
    ///
    /// Returns [`CheckpointError::Locked`] if another process (or another
    /// collector in this process) holds it.
    pub fn try_acquire(dir: &Path, run_id: &str) -> Result<Self, CheckpointError> {
        std::fs::create_dir_all(dir).map_err(|e| CheckpointError::IoError(e.to_string()))?;

        let path = dir.join(format!("{run_id}.lock"));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| CheckpointError::LockError(format!("Failed to open lock file: {e}")))?;

        let mut lock = RwLock::new(file);
        match lock.try_write() {
            // The flock is tied to the file handle; keep it past the guard
            Ok(guard) => std::mem::forget(guard),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                return Err(CheckpointError::Locked {
                    run_id: run_id.to_string(),
                })
            }
            Err(e) => {
                return Err(CheckpointError::LockError(format!(
                    "Failed to acquire lock: {e}"
                )))
            }
        }

        debug!(path = %path.display(), "Run lock acquired");
        Ok(Self { _lock: lock, path })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for RunLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLock").field("path", &self.path).finish()
    }
}
