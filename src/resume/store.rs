//! Checkpoint persistence
//!
//! Checkpoints live at `<dir>/<run_id>.checkpoint.json` and are replaced
//! atomically (temp file in the same directory, fsync, rename, fsync of the
//! directory) so a crash leaves either the old or the new checkpoint, and
//! concurrent readers never see a half-written file.

use super::checkpoint::{Checkpoint, SCHEMA_VERSION};
use super::CheckpointError;
use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Maximum accepted checkpoint size (10 MB)
pub const MAX_CHECKPOINT_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Directory-backed checkpoint store keyed by `run_id`
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Create a store rooted at `dir` (created lazily on first save)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Checkpoint directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the live checkpoint for `run_id`
    pub fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.checkpoint.json"))
    }

    /// Whether a live checkpoint file exists for `run_id`
    pub fn exists(&self, run_id: &str) -> bool {
        self.path_for(run_id).exists()
    }

    /// Load the checkpoint for `run_id`
    ///
    /// A missing checkpoint is `Ok(None)`. A corrupt, oversized or
    /// foreign-version checkpoint is logged as a warning and also treated as
    /// `None`, so the run starts from its first date.
    pub fn load(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.path_for(run_id);
        if !path.exists() {
            debug!(path = %path.display(), "No checkpoint found");
            return Ok(None);
        }

        match read_checkpoint(&path, run_id) {
            Ok(checkpoint) => {
                info!(
                    run_id = %run_id,
                    last_completed_date = ?checkpoint.last_completed_date(),
                    cursor = ?checkpoint.last_cursor(),
                    total_records = checkpoint.total_records_written(),
                    "Checkpoint loaded"
                );
                Ok(Some(checkpoint))
            }
            Err(CheckpointError::IoError(e)) => Err(CheckpointError::IoError(e)),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Ignoring unusable checkpoint, starting from the first date"
                );
                Ok(None)
            }
        }
    }

    /// Atomically replace the checkpoint for `checkpoint.run_id()`
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let path = self.path_for(checkpoint.run_id());
        let json = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| CheckpointError::SerializationError(e.to_string()))?;

        write_atomic(&path, json.as_bytes()).map_err(|e| CheckpointError::IoError(e.to_string()))?;

        debug!(
            path = %path.display(),
            last_completed_date = ?checkpoint.last_completed_date(),
            cursor = ?checkpoint.last_cursor(),
            total_records = checkpoint.total_records_written(),
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Archive the checkpoint for `run_id` under a timestamped name
    ///
    /// Returns the archive path, or `None` if there was nothing to archive.
    pub fn clear(&self, run_id: &str) -> Result<Option<PathBuf>, CheckpointError> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        self.archive(run_id, &stamp)
    }

    /// Archive the checkpoint of a finished run as `<run_id>.checkpoint.completed.json`
    pub fn archive_completed(&self, run_id: &str) -> Result<Option<PathBuf>, CheckpointError> {
        self.archive(run_id, "completed")
    }

    fn archive(&self, run_id: &str, suffix: &str) -> Result<Option<PathBuf>, CheckpointError> {
        let path = self.path_for(run_id);
        if !path.exists() {
            return Ok(None);
        }

        let target = unique_path(self.dir.join(format!("{run_id}.checkpoint.{suffix}.json")));
        std::fs::rename(&path, &target).map_err(|e| {
            CheckpointError::IoError(format!("Failed to archive checkpoint: {e}"))
        })?;
        sync_parent(&target);

        info!(
            from = %path.display(),
            to = %target.display(),
            "Checkpoint archived"
        );
        Ok(Some(target))
    }
}

fn read_checkpoint(path: &Path, run_id: &str) -> Result<Checkpoint, CheckpointError> {
    let metadata = std::fs::metadata(path).map_err(|e| CheckpointError::IoError(e.to_string()))?;
    if metadata.len() > MAX_CHECKPOINT_FILE_SIZE {
        return Err(CheckpointError::TooLarge {
            size: metadata.len(),
            max: MAX_CHECKPOINT_FILE_SIZE,
        });
    }

    let contents =
        std::fs::read_to_string(path).map_err(|e| CheckpointError::IoError(e.to_string()))?;
    let checkpoint: Checkpoint = serde_json::from_str(&contents)
        .map_err(|e| CheckpointError::DeserializationError(e.to_string()))?;

    if checkpoint.schema_version() != SCHEMA_VERSION {
        return Err(CheckpointError::SchemaVersionMismatch {
            expected: SCHEMA_VERSION,
            found: checkpoint.schema_version(),
        });
    }
    if checkpoint.run_id() != run_id {
        return Err(CheckpointError::DeserializationError(format!(
            "checkpoint belongs to run '{}'",
            checkpoint.run_id()
        )));
    }
    Ok(checkpoint)
}

/// Write `bytes` to `path` via a synced temp file and an atomic rename
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir)?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)?;
    temp_file.write_all(bytes)?;
    temp_file.flush()?;
    temp_file.as_file().sync_all()?;
    temp_file.persist(path).map_err(|e| e.error)?;

    sync_parent(path);
    Ok(())
}

/// Fsync the parent directory so a rename is durable
pub(crate) fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

/// `path`, or `path` with a numeric suffix if it is already taken
pub(crate) fn unique_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (1..)
        .map(|n| path.with_file_name(format!("{stem}_{n}{ext}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(path)
}
