//! Record output
//!
//! Validated records go to a [`Sink`]: either real NDJSON batches with a
//! manifest ([`batch::BatchWriter`]) or a dry-run counter that never touches
//! the filesystem ([`DryRunSink`]).

use crate::{AdRecord, Gap};
use chrono::NaiveDate;
use std::path::PathBuf;
use tracing::info;

pub mod batch;
pub mod manifest;
pub mod path;

pub use batch::BatchWriter;
pub use manifest::{BatchDescriptor, Manifest, RunStatus};

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Buffer flush error
    #[error("flush error: {0}")]
    FlushError(String),

    /// Manifest unreadable or belonging to another run
    #[error("manifest error: {0}")]
    ManifestError(String),

    /// A fresh run found existing output for its run id
    #[error("output namespace {} already exists", path.display())]
    NamespaceInUse {
        /// Namespace directory
        path: PathBuf,
    },
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Batch rotation thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Close a batch once it holds this many records
    pub max_records: u64,
    /// Close a batch before it would grow past this many bytes
    pub max_bytes: u64,
}

/// Destination for validated records
pub trait RecordSink {
    /// Append a record collected for `date`, rotating batches as needed
    fn emit(&mut self, record: &AdRecord, date: NaiveDate) -> OutputResult<()>;

    /// Make everything emitted so far durable
    fn commit(&mut self) -> OutputResult<()>;

    /// Note a skipped work unit in the run summary
    fn record_gap(&mut self, gap: Gap);

    /// Close the active batch and write the terminal manifest
    fn finalize(&mut self, status: RunStatus) -> OutputResult<Option<Manifest>>;

    /// Records accepted so far
    fn records_written(&self) -> u64;
}

/// Counts what a real run would write, without any side effects
#[derive(Debug)]
pub struct DryRunSink {
    limits: BatchLimits,
    records: u64,
    bytes: u64,
    batches: u64,
    open_records: u64,
    open_bytes: u64,
    gaps: usize,
}

impl DryRunSink {
    /// Create a dry-run sink that mirrors rotation under `limits`
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            limits,
            records: 0,
            bytes: 0,
            batches: 0,
            open_records: 0,
            open_bytes: 0,
            gaps: 0,
        }
    }

    /// Batches a real run would have produced so far
    pub fn batches(&self) -> u64 {
        self.batches + u64::from(self.open_records > 0)
    }

    /// Serialized bytes a real run would have written
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    fn rotate(&mut self) {
        self.batches += 1;
        self.open_records = 0;
        self.open_bytes = 0;
    }
}

impl RecordSink for DryRunSink {
    fn emit(&mut self, record: &AdRecord, _date: NaiveDate) -> OutputResult<()> {
        let line_len = serde_json::to_vec(record)
            .map_err(|e| OutputError::SerializationError(e.to_string()))?
            .len() as u64
            + 1;

        if self.open_records > 0 && self.open_bytes + line_len > self.limits.max_bytes {
            self.rotate();
        }
        self.open_records += 1;
        self.open_bytes += line_len;
        self.records += 1;
        self.bytes += line_len;
        if self.open_records >= self.limits.max_records || self.open_bytes >= self.limits.max_bytes {
            self.rotate();
        }
        Ok(())
    }

    fn commit(&mut self) -> OutputResult<()> {
        Ok(())
    }

    fn record_gap(&mut self, _gap: Gap) {
        self.gaps += 1;
    }

    fn finalize(&mut self, status: RunStatus) -> OutputResult<Option<Manifest>> {
        info!(
            status = %status,
            records = self.records,
            bytes = self.bytes,
            batches = self.batches(),
            gaps = self.gaps,
            "Dry run finished, nothing written"
        );
        Ok(None)
    }

    fn records_written(&self) -> u64 {
        self.records
    }
}

/// Sink selected for a run
pub enum Sink {
    /// Durable NDJSON batches
    Batches(BatchWriter),
    /// No-op counting sink
    DryRun(DryRunSink),
}

impl Sink {
    /// Whether this is a dry run
    pub fn is_dry_run(&self) -> bool {
        matches!(self, Sink::DryRun(_))
    }
}

impl RecordSink for Sink {
    fn emit(&mut self, record: &AdRecord, date: NaiveDate) -> OutputResult<()> {
        match self {
            Sink::Batches(w) => w.emit(record, date),
            Sink::DryRun(w) => w.emit(record, date),
        }
    }

    fn commit(&mut self) -> OutputResult<()> {
        match self {
            Sink::Batches(w) => w.commit(),
            Sink::DryRun(w) => w.commit(),
        }
    }

    fn record_gap(&mut self, gap: Gap) {
        match self {
            Sink::Batches(w) => w.record_gap(gap),
            Sink::DryRun(w) => w.record_gap(gap),
        }
    }

    fn finalize(&mut self, status: RunStatus) -> OutputResult<Option<Manifest>> {
        match self {
            Sink::Batches(w) => w.finalize(status),
            Sink::DryRun(w) => w.finalize(status),
        }
    }

    fn records_written(&self) -> u64 {
        match self {
            Sink::Batches(w) => w.records_written(),
            Sink::DryRun(w) => w.records_written(),
        }
    }
}
