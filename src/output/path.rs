//! Output naming
//!
//! Every run owns one namespace directory, `<output_dir>/<run_id>/`, holding
//! its manifest and its batch files:
//!
//! ```text
//! out/meta_PL_2024-12-01_2024-12-07/
//!     meta_PL_2024-12-01_2024-12-07_manifest.json
//!     meta_PL_2024-12-01_2024-12-07_20241208T101500Z_batch_00001.ndjson
//!     meta_PL_2024-12-01_2024-12-07_20241208T113012Z_batch_00002.ndjson
//! ```
//!
//! Batch names embed the run id, the time the batch was opened and a
//! zero-padded sequence number, so a batch on disk that the manifest does not
//! list can be recognised as an orphan of an interrupted run.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};

const BATCH_MARKER: &str = "_batch_";
const BATCH_EXTENSION: &str = ".ndjson";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Name of one batch file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchName {
    /// Run the batch belongs to
    pub run_id: String,
    /// When the batch was opened (second precision)
    pub opened_at: NaiveDateTime,
    /// Sequence number, starting at 1
    pub sequence: u32,
}

impl BatchName {
    /// Name a new batch opened at `opened_at`
    pub fn new(run_id: impl Into<String>, sequence: u32, opened_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            opened_at: opened_at.naive_utc(),
            sequence,
        }
    }

    /// File name, e.g. `run_20241208T101500Z_batch_00001.ndjson`
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}{BATCH_MARKER}{:05}{BATCH_EXTENSION}",
            self.run_id,
            self.opened_at.format(TIMESTAMP_FORMAT),
            self.sequence
        )
    }

    /// Parse a batch file name belonging to `run_id`
    ///
    /// Returns `None` for anything that is not a batch of this run.
    pub fn parse(run_id: &str, file_name: &str) -> Option<Self> {
        let rest = file_name
            .strip_prefix(run_id)?
            .strip_prefix('_')?
            .strip_suffix(BATCH_EXTENSION)?;
        let (timestamp, sequence) = rest.split_once(BATCH_MARKER)?;

        let opened_at = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
        if sequence.len() < 5 || !sequence.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        Some(Self {
            run_id: run_id.to_string(),
            opened_at,
            sequence: sequence.parse().ok()?,
        })
    }
}

/// Namespace directory of a run
pub fn run_dir(output_dir: &Path, run_id: &str) -> PathBuf {
    output_dir.join(run_id)
}

/// Manifest path inside a run's namespace directory
pub fn manifest_path(run_dir: &Path, run_id: &str) -> PathBuf {
    run_dir.join(format!("{run_id}_manifest.json"))
}

/// Check that a run id is safe to use as a file name component
///
/// Allows ASCII letters, digits, `-`, `_` and `.`, and rejects `..` so a run
/// id can never address a path outside its directory.
pub fn validate_run_id(run_id: &str) -> Result<(), String> {
    if run_id.is_empty() {
        return Err("run_id must not be empty".to_string());
    }
    if run_id.len() > 200 {
        return Err(format!("run_id is too long ({} chars, max 200)", run_id.len()));
    }
    if run_id.contains("..") || run_id.starts_with('.') {
        return Err(format!("run_id '{run_id}' must not start with '.' or contain '..'"));
    }
    if let Some(bad) = run_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(format!("run_id '{run_id}' contains invalid character '{bad}'"));
    }
    Ok(())
}
