//! Run manifest
//!
//! The manifest indexes every closed batch of a run. It is rewritten
//! atomically whenever a batch is closed and when the run ends, so a reader
//! always sees a complete document.

use super::{OutputError, OutputResult};
use crate::resume::write_atomic;
use crate::Gap;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Terminal or in-flight state of a run as recorded in the manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Collection in progress (or the process died without finalizing)
    Running,
    /// Every date completed or skipped
    Completed,
    /// Aborted on a fatal error
    Failed,
    /// Stopped by an external interrupt; resumable
    Interrupted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

/// One closed batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchDescriptor {
    /// File name relative to the run directory
    pub path: String,
    /// Sequence number
    pub sequence: u32,
    /// Records in the file
    pub record_count: u64,
    /// File size in bytes
    pub byte_size: u64,
    /// First collection date written to the batch
    pub first_date: Option<NaiveDate>,
    /// Last collection date written to the batch
    pub last_date: Option<NaiveDate>,
    /// Adopted from disk after an interrupted run
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub recovered: bool,
}

/// Summary index over all batches of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Run identifier
    pub run_id: String,
    /// Platform name
    pub platform: String,
    /// Country code
    pub country_code: String,
    /// First date of the run
    pub start_date: NaiveDate,
    /// Last date of the run (inclusive)
    pub end_date: NaiveDate,
    /// Current status
    pub status: RunStatus,
    /// Closed batches in sequence order
    pub batches: Vec<BatchDescriptor>,
    /// Records across all closed batches
    pub total_records: u64,
    /// Skipped work units
    #[serde(default)]
    pub gaps: Vec<Gap>,
    /// When the run was first started
    pub created_at: DateTime<Utc>,
    /// Last rewrite
    pub updated_at: DateTime<Utc>,
    /// When the run reached a terminal status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Manifest {
    /// Create an empty manifest in `running` state
    pub fn new(
        run_id: impl Into<String>,
        platform: impl Into<String>,
        country_code: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            platform: platform.into(),
            country_code: country_code.into(),
            start_date,
            end_date,
            status: RunStatus::Running,
            batches: Vec::new(),
            total_records: 0,
            gaps: Vec::new(),
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Load a manifest, `Ok(None)` if the file does not exist
    pub fn load(path: &Path) -> OutputResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| OutputError::IoError(format!("Failed to read manifest: {e}")))?;
        let manifest = serde_json::from_str(&contents).map_err(|e| {
            OutputError::ManifestError(format!("Failed to parse {}: {e}", path.display()))
        })?;
        Ok(Some(manifest))
    }

    /// Atomically rewrite the manifest at `path`
    pub fn save(&mut self, path: &Path) -> OutputResult<()> {
        self.updated_at = Utc::now();
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| OutputError::SerializationError(e.to_string()))?;
        write_atomic(path, json.as_bytes())
            .map_err(|e| OutputError::IoError(format!("Failed to write manifest: {e}")))
    }

    /// Append a closed batch
    pub fn push_batch(&mut self, batch: BatchDescriptor) {
        self.total_records += batch.record_count;
        self.batches.push(batch);
        self.batches.sort_by_key(|b| b.sequence);
    }

    /// Whether `file_name` is already listed
    pub fn contains(&self, file_name: &str) -> bool {
        self.batches.iter().any(|b| b.path == file_name)
    }

    /// Highest sequence number listed, 0 if none
    pub fn max_sequence(&self) -> u32 {
        self.batches.iter().map(|b| b.sequence).max().unwrap_or(0)
    }

    /// Mark the run terminal
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = match status {
            RunStatus::Running => None,
            _ => Some(Utc::now()),
        };
    }
}
