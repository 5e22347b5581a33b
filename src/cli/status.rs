//! Status command implementation
//!
//! Reads a run's checkpoint and manifest without taking the run lock, so it
//! can be pointed at a run that is still in progress.

use crate::collector::config::{DEFAULT_CHECKPOINT_DIR, DEFAULT_OUTPUT_DIR};
use crate::output::{path, Manifest, OutputError};
use crate::resume::{Checkpoint, CheckpointStore};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

use super::{CliError, OutputFormat};

/// Status command arguments
#[derive(Parser, Debug, Clone)]
pub struct StatusArgs {
    /// Run to inspect
    #[arg(long)]
    pub run_id: String,

    /// Output root
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,

    /// Checkpoint root
    #[arg(long, default_value = DEFAULT_CHECKPOINT_DIR)]
    pub checkpoint_dir: PathBuf,
}

/// What is known about a run on disk
#[derive(Debug, Serialize)]
pub struct RunStatusReport {
    /// Run id
    pub run_id: String,
    /// Live checkpoint, absent once the run completed or was cleared
    pub checkpoint: Option<Checkpoint>,
    /// Manifest, absent before the run first started
    pub manifest: Option<Manifest>,
}

impl StatusArgs {
    /// Collect the run's on-disk state
    pub fn report(&self) -> Result<RunStatusReport, CliError> {
        path::validate_run_id(&self.run_id).map_err(CliError::InvalidArgument)?;

        let checkpoint = CheckpointStore::new(self.checkpoint_dir.clone()).load(&self.run_id)?;
        let manifest_path =
            path::manifest_path(&path::run_dir(&self.output_dir, &self.run_id), &self.run_id);
        let manifest = Manifest::load(&manifest_path)?;

        if checkpoint.is_none() && manifest.is_none() {
            return Err(CliError::InvalidArgument(format!(
                "no checkpoint or manifest found for run '{}'",
                self.run_id
            )));
        }

        Ok(RunStatusReport {
            run_id: self.run_id.clone(),
            checkpoint,
            manifest,
        })
    }

    /// Print the run's state
    pub fn execute(&self, format: OutputFormat) -> Result<(), CliError> {
        let report = self.report()?;

        if format == OutputFormat::Json {
            let json = serde_json::to_string_pretty(&report)
                .map_err(|e| OutputError::SerializationError(e.to_string()))?;
            println!("{json}");
            return Ok(());
        }

        println!("Run: {}", report.run_id);
        match &report.checkpoint {
            Some(cp) => {
                println!("\nCheckpoint:");
                println!("  Range: {} {}..={}", cp.country_code(), cp.start_date(), cp.end_date());
                match cp.last_completed_date() {
                    Some(date) => println!("  Last completed date: {date}"),
                    None => println!("  Last completed date: none"),
                }
                if let Some(cursor) = cp.last_cursor() {
                    println!("  In-progress cursor: {cursor}");
                }
                println!("  Records committed: {}", cp.total_records_written());
                println!("  Gaps: {}", cp.gaps().len());
                println!("  Updated: {}", cp.updated_at().to_rfc3339());
            }
            None => println!("\nCheckpoint: none (completed, cleared or never started)"),
        }

        if let Some(manifest) = &report.manifest {
            println!("\nManifest:");
            println!("  Status: {}", manifest.status);
            println!("  Batches: {}", manifest.batches.len());
            println!("  Total records: {}", manifest.total_records);
            println!("  Gaps: {}", manifest.gaps.len());
            for gap in &manifest.gaps {
                println!("    {}: {}", gap.date, gap.reason);
            }
            println!("  Updated: {}", manifest.updated_at.to_rfc3339());
        }
        Ok(())
    }
}
