//! NDJSON batch writer
//!
//! Records are appended to the active batch, one JSON document per line.
//! A batch is opened lazily on the first record, closed once it reaches
//! `max_records` (or would exceed `max_bytes`), and never reopened. Closing a
//! batch fsyncs it and rewrites the manifest.

use super::manifest::{BatchDescriptor, Manifest, RunStatus};
use super::path::{self, BatchName};
use super::{BatchLimits, OutputError, OutputResult, RecordSink};
use crate::resume::{sync_parent, unique_path};
use crate::{AdRecord, Gap};
use chrono::{NaiveDate, Utc};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

struct ActiveBatch {
    name: BatchName,
    path: PathBuf,
    writer: BufWriter<File>,
    record_count: u64,
    byte_size: u64,
    first_date: Option<NaiveDate>,
    last_date: Option<NaiveDate>,
}

impl ActiveBatch {
    fn write_line(&mut self, line: &[u8], date: NaiveDate) -> OutputResult<()> {
        self.writer.write_all(line).map_err(|e| {
            OutputError::IoError(format!("Failed to write to {}: {e}", self.path.display()))
        })?;
        self.record_count += 1;
        self.byte_size += line.len() as u64;
        self.first_date.get_or_insert(date);
        self.last_date = Some(date);
        Ok(())
    }
}

/// Batch writer owning one run's output namespace
pub struct BatchWriter {
    run_dir: PathBuf,
    manifest_path: PathBuf,
    manifest: Manifest,
    limits: BatchLimits,
    active: Option<ActiveBatch>,
    next_sequence: u32,
    recovered_batches: usize,
}

impl BatchWriter {
    /// Claim a fresh output namespace for `manifest.run_id`
    ///
    /// Fails with [`OutputError::NamespaceInUse`] if the namespace already has
    /// a manifest or batch files; an existing run must be resumed or cleared.
    pub fn create(output_dir: &Path, manifest: Manifest, limits: BatchLimits) -> OutputResult<Self> {
        let run_dir = path::run_dir(output_dir, &manifest.run_id);
        let manifest_path = path::manifest_path(&run_dir, &manifest.run_id);

        if manifest_path.exists() || !list_batches(&run_dir, &manifest.run_id)?.is_empty() {
            return Err(OutputError::NamespaceInUse { path: run_dir });
        }

        std::fs::create_dir_all(&run_dir)
            .map_err(|e| OutputError::IoError(format!("Failed to create directory: {e}")))?;

        let mut writer = Self {
            run_dir,
            manifest_path,
            manifest,
            limits,
            active: None,
            next_sequence: 1,
            recovered_batches: 0,
        };
        writer.manifest.save(&writer.manifest_path)?;

        info!(run_dir = %writer.run_dir.display(), "Output namespace created");
        Ok(writer)
    }

    /// Reopen the output namespace of an interrupted run
    ///
    /// Loads the manifest (or starts from `template` if there is none),
    /// adopts orphaned batch files and continues numbering after the highest
    /// sequence seen.
    pub fn resume(output_dir: &Path, template: Manifest, limits: BatchLimits) -> OutputResult<Self> {
        let run_dir = path::run_dir(output_dir, &template.run_id);
        let manifest_path = path::manifest_path(&run_dir, &template.run_id);

        let manifest = match Manifest::load(&manifest_path)? {
            Some(existing) if existing.run_id != template.run_id => {
                return Err(OutputError::ManifestError(format!(
                    "{} belongs to run '{}'",
                    manifest_path.display(),
                    existing.run_id
                )))
            }
            Some(existing) => existing,
            None => template,
        };

        std::fs::create_dir_all(&run_dir)
            .map_err(|e| OutputError::IoError(format!("Failed to create directory: {e}")))?;

        let mut writer = Self {
            next_sequence: manifest.max_sequence() + 1,
            run_dir,
            manifest_path,
            manifest,
            limits,
            active: None,
            recovered_batches: 0,
        };
        writer.recover_orphans()?;
        writer.manifest.finish(RunStatus::Running);
        writer.manifest.save(&writer.manifest_path)?;

        info!(
            run_dir = %writer.run_dir.display(),
            batches = writer.manifest.batches.len(),
            total_records = writer.manifest.total_records,
            recovered = writer.recovered_batches,
            next_sequence = writer.next_sequence,
            "Output namespace reopened"
        );
        Ok(writer)
    }

    /// Move a run's namespace aside so the run can start over
    ///
    /// Returns the archive path, or `None` if the namespace does not exist.
    pub fn archive_namespace(output_dir: &Path, run_id: &str) -> OutputResult<Option<PathBuf>> {
        let run_dir = path::run_dir(output_dir, run_id);
        if !run_dir.exists() {
            return Ok(None);
        }

        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let target = unique_path(output_dir.join(format!("{run_id}_archived_{stamp}")));
        std::fs::rename(&run_dir, &target)
            .map_err(|e| OutputError::IoError(format!("Failed to archive output namespace: {e}")))?;
        sync_parent(&target);

        info!(from = %run_dir.display(), to = %target.display(), "Output namespace archived");
        Ok(Some(target))
    }

    /// The run's namespace directory
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Current manifest
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Number of orphan batches adopted when the namespace was reopened
    pub fn recovered_batches(&self) -> usize {
        self.recovered_batches
    }

    /// Replace the manifest's gap list
    pub fn set_gaps(&mut self, gaps: Vec<Gap>) {
        self.manifest.gaps = gaps;
    }

    /// Narrow the date range of batches adopted on resume
    ///
    /// `through` is the date the run stopped in; an orphan cannot hold
    /// records collected after it.
    pub fn bound_recovered_batches(&mut self, through: NaiveDate) -> OutputResult<()> {
        let mut changed = false;
        for batch in self.manifest.batches.iter_mut().filter(|b| b.recovered) {
            let first = batch.first_date.unwrap_or(self.manifest.start_date);
            let bounded = through.max(first);
            if batch.last_date.map_or(true, |last| bounded < last) {
                batch.last_date = Some(bounded);
                changed = true;
            }
        }
        if changed {
            self.manifest.save(&self.manifest_path)?;
        }
        Ok(())
    }

    fn recover_orphans(&mut self) -> OutputResult<()> {
        let run_id = self.manifest.run_id.clone();
        // Orphans continue where the last listed batch stopped, possibly mid-date
        let floor = self
            .manifest
            .batches
            .iter()
            .filter_map(|b| b.last_date)
            .max()
            .unwrap_or(self.manifest.start_date);
        for (name, path) in list_batches(&self.run_dir, &run_id)? {
            self.next_sequence = self.next_sequence.max(name.sequence + 1);

            let file_name = name.file_name();
            if self.manifest.contains(&file_name) {
                continue;
            }

            let (record_count, byte_size, truncated) = repair_batch(&path)?;
            if record_count == 0 {
                warn!(path = %path.display(), "Removing empty orphan batch");
                std::fs::remove_file(&path).map_err(|e| {
                    OutputError::IoError(format!("Failed to remove {}: {e}", path.display()))
                })?;
                continue;
            }

            warn!(
                path = %path.display(),
                records = record_count,
                truncated_bytes = truncated,
                "Recovered orphan batch from interrupted run"
            );
            self.manifest.push_batch(BatchDescriptor {
                path: file_name,
                sequence: name.sequence,
                record_count,
                byte_size,
                first_date: Some(floor),
                last_date: Some(self.manifest.end_date),
                recovered: true,
            });
            self.recovered_batches += 1;
        }
        Ok(())
    }

    fn open_batch(&mut self) -> OutputResult<ActiveBatch> {
        let name = BatchName::new(self.manifest.run_id.clone(), self.next_sequence, Utc::now());
        let path = self.run_dir.join(name.file_name());

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                OutputError::IoError(format!("Failed to create {}: {e}", path.display()))
            })?;
        self.next_sequence += 1;

        debug!(path = %path.display(), sequence = name.sequence, "Opened batch");
        Ok(ActiveBatch {
            name,
            path,
            writer: BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, file),
            record_count: 0,
            byte_size: 0,
            first_date: None,
            last_date: None,
        })
    }

    fn close_active(&mut self) -> OutputResult<()> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };

        let file = active
            .writer
            .into_inner()
            .map_err(|e| OutputError::FlushError(format!("Failed to flush batch: {e}")))?;
        file.sync_all()
            .map_err(|e| OutputError::IoError(format!("Failed to sync batch: {e}")))?;

        self.manifest.push_batch(BatchDescriptor {
            path: active.name.file_name(),
            sequence: active.name.sequence,
            record_count: active.record_count,
            byte_size: active.byte_size,
            first_date: active.first_date,
            last_date: active.last_date,
            recovered: false,
        });
        self.manifest.save(&self.manifest_path)?;

        info!(
            path = %active.path.display(),
            records = active.record_count,
            bytes = active.byte_size,
            "Batch closed"
        );
        Ok(())
    }
}

impl RecordSink for BatchWriter {
    fn emit(&mut self, record: &AdRecord, date: NaiveDate) -> OutputResult<()> {
        let mut line = serde_json::to_vec(record)
            .map_err(|e| OutputError::SerializationError(e.to_string()))?;
        line.push(b'\n');

        let would_overflow = self.active.as_ref().is_some_and(|a| {
            a.record_count > 0 && a.byte_size + line.len() as u64 > self.limits.max_bytes
        });
        if would_overflow {
            self.close_active()?;
        }

        let active = match self.active.take() {
            Some(active) => active,
            None => self.open_batch()?,
        };
        let active = self.active.insert(active);
        active.write_line(&line, date)?;

        if active.record_count >= self.limits.max_records || active.byte_size >= self.limits.max_bytes
        {
            self.close_active()?;
        }
        Ok(())
    }

    fn commit(&mut self) -> OutputResult<()> {
        if let Some(active) = self.active.as_mut() {
            active
                .writer
                .flush()
                .map_err(|e| OutputError::FlushError(format!("Failed to flush batch: {e}")))?;
            active
                .writer
                .get_ref()
                .sync_data()
                .map_err(|e| OutputError::IoError(format!("Failed to sync batch: {e}")))?;
        }
        Ok(())
    }

    fn record_gap(&mut self, gap: Gap) {
        self.manifest.gaps.push(gap);
    }

    fn finalize(&mut self, status: RunStatus) -> OutputResult<Option<Manifest>> {
        self.close_active()?;
        self.manifest.finish(status);
        self.manifest.save(&self.manifest_path)?;

        info!(
            manifest = %self.manifest_path.display(),
            status = %status,
            batches = self.manifest.batches.len(),
            total_records = self.manifest.total_records,
            "Manifest finalized"
        );
        Ok(Some(self.manifest.clone()))
    }

    fn records_written(&self) -> u64 {
        self.manifest.total_records + self.active.as_ref().map_or(0, |a| a.record_count)
    }
}

impl Drop for BatchWriter {
    fn drop(&mut self) {
        if let Some(active) = self.active.as_mut() {
            let _ = active.writer.flush();
            warn!(
                path = %active.path.display(),
                records = active.record_count,
                "Batch writer dropped without finalize; batch left for recovery"
            );
        }
    }
}

/// Batch files of `run_id` in `dir`, ordered by sequence
fn list_batches(dir: &Path, run_id: &str) -> OutputResult<Vec<(BatchName, PathBuf)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(dir)
        .map_err(|e| OutputError::IoError(format!("Failed to list {}: {e}", dir.display())))?;

    let mut batches = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| OutputError::IoError(e.to_string()))?;
        let file_name = entry.file_name();
        if let Some(name) = BatchName::parse(run_id, &file_name.to_string_lossy()) {
            batches.push((name, entry.path()));
        }
    }
    batches.sort_by_key(|(name, _)| name.sequence);
    Ok(batches)
}

/// Drop a trailing partial line and count complete records
///
/// Returns `(records, bytes, truncated_bytes)`.
fn repair_batch(path: &Path) -> OutputResult<(u64, u64, u64)> {
    let contents = std::fs::read(path)
        .map_err(|e| OutputError::IoError(format!("Failed to read {}: {e}", path.display())))?;

    let complete_len = contents
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |pos| pos + 1);
    let truncated = (contents.len() - complete_len) as u64;

    if truncated > 0 {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| OutputError::IoError(format!("Failed to open {}: {e}", path.display())))?;
        file.set_len(complete_len as u64)
            .map_err(|e| OutputError::IoError(format!("Failed to truncate {}: {e}", path.display())))?;
        file.sync_all()
            .map_err(|e| OutputError::IoError(format!("Failed to sync {}: {e}", path.display())))?;
    }

    let records = contents[..complete_len].iter().filter(|&&b| b == b'\n').count() as u64;
    Ok((records, complete_len as u64, truncated))
}
