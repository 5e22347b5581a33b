//! Collect command implementation

use crate::collector::config::DEFAULT_COUNTRY_CODE;
use crate::collector::{Collector, CollectorConfig, RunSummary, Settings};
use crate::output::OutputError;
use crate::shutdown::SharedShutdown;
use crate::source::replay::ReplaySource;
use chrono::NaiveDate;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};

use super::{CliError, OutputFormat};

/// Parse a `YYYY-MM-DD` date
fn parse_date(input: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|e| format!("'{input}' is not a YYYY-MM-DD date: {e}"))
}

/// Collect command arguments
#[derive(Parser, Debug, Clone)]
pub struct CollectArgs {
    /// Directory of recorded API pages (`<COUNTRY>/<YYYY-MM-DD>.json`)
    #[arg(long)]
    pub source_dir: PathBuf,

    /// Platform name used in the run id and records (e.g., meta, google)
    #[arg(long)]
    pub platform: String,

    /// First date to collect (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub start_date: NaiveDate,

    /// Last date to collect, inclusive (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub end_date: NaiveDate,

    /// ISO 3166 alpha-2 country code
    #[arg(long, default_value = DEFAULT_COUNTRY_CODE)]
    pub country: String,

    /// Run id (default: `<platform>_<country>_<start>_<end>`)
    #[arg(long)]
    pub run_id: Option<String>,

    /// Continue from the run's checkpoint
    #[arg(long, default_value_t = false, conflicts_with = "clear_checkpoint")]
    pub resume: bool,

    /// Archive the run's checkpoint and output, then start over
    #[arg(long, default_value_t = false)]
    pub clear_checkpoint: bool,

    /// Fetch, transform and validate without writing anything
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Sustained request rate (default: 180)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub requests_per_minute: Option<u32>,

    /// Token bucket capacity (default: 5)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub burst: Option<u32>,

    /// Attempts per page before it is skipped (default: 5, range: 1-20)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_attempts: Option<u32>,

    /// Records per output batch (default: 10000)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub batch_records: Option<u64>,

    /// Bytes per output batch (default: 64 MiB)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub batch_bytes: Option<u64>,

    /// Output root (default: "data")
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Checkpoint root (default: ".checkpoints")
    #[arg(long)]
    pub checkpoint_dir: Option<PathBuf>,

    /// TOML settings file; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Serve Prometheus metrics on this address (e.g., 0.0.0.0:9090)
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

impl CollectArgs {
    /// Build the run configuration: defaults, then the settings file, then flags
    pub fn build_config(&self) -> Result<CollectorConfig, CliError> {
        let mut config = CollectorConfig::new(self.start_date, self.end_date)
            .with_country(self.country.clone())
            .with_resume(self.resume)
            .with_clear_checkpoint(self.clear_checkpoint)
            .with_dry_run(self.dry_run);

        if let Some(path) = &self.config {
            config = Settings::load(path)?.apply(config);
        }

        if let Some(run_id) = &self.run_id {
            config = config.with_run_id(run_id.clone());
        }
        if let Some(rpm) = self.requests_per_minute {
            config.requests_per_minute = rpm;
        }
        if let Some(burst) = self.burst {
            config.burst_capacity = burst;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.retry = config.retry.with_max_attempts(max_attempts);
        }
        if let Some(records) = self.batch_records {
            config.batch_limits.max_records = records;
        }
        if let Some(bytes) = self.batch_bytes {
            config.batch_limits.max_bytes = bytes;
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(dir) = &self.checkpoint_dir {
            config.checkpoint_dir = dir.clone();
        }

        Ok(config)
    }

    /// Run the collection and print its summary
    pub async fn execute(
        &self,
        format: OutputFormat,
        shutdown: SharedShutdown,
    ) -> Result<RunSummary, CliError> {
        if let Some(addr) = self.metrics_addr {
            if let Err(e) = crate::metrics::init_metrics(addr).await {
                warn!(error = %e, "Metrics exporter unavailable, continuing without it");
            }
        }

        let config = self.build_config()?;
        let source = ReplaySource::new(self.source_dir.clone(), self.platform.clone());
        let collector = Collector::new(source, config)?.with_shutdown(shutdown);

        info!(
            run_id = %collector.run_id(),
            requests_per_minute = collector.config().requests_per_minute,
            "Starting collection"
        );

        let summary = collector.run().await?;
        print_summary(&summary, format)?;
        Ok(summary)
    }
}

fn print_summary(summary: &RunSummary, format: OutputFormat) -> Result<(), CliError> {
    if format == OutputFormat::Json {
        let json = serde_json::to_string_pretty(summary)
            .map_err(|e| OutputError::SerializationError(e.to_string()))?;
        println!("{json}");
        return Ok(());
    }

    let mode = if summary.dry_run { " (dry run)" } else { "" };
    println!("\nRun {} {}{mode}", summary.run_id, summary.status);
    println!(
        "Dates completed: {}/{}",
        summary.dates_completed, summary.dates_total
    );
    if let Some(date) = summary.resumed_from {
        println!("Resumed from: {date}");
    }
    println!("Pages fetched: {}", summary.pages_fetched);
    println!("Records fetched: {}", summary.records_fetched);
    println!("Records written: {}", summary.records_written);
    if !summary.dry_run {
        println!("Records in run: {}", summary.total_records_written);
    }
    if summary.records_invalid > 0 {
        println!("Invalid records: {}", summary.records_invalid);
    }
    if summary.retries > 0 {
        println!("Retries: {}", summary.retries);
    }
    if summary.recovered_batches > 0 {
        println!("Recovered batches: {}", summary.recovered_batches);
    }
    println!("Elapsed: {:.1}s", summary.elapsed.as_secs_f64());

    if summary.skipped() > 0 {
        println!("\nSkipped work units: {}", summary.skipped());
        for gap in &summary.gaps {
            let cursor = gap.cursor.as_deref().unwrap_or("start");
            println!(
                "  {} (cursor {cursor}, {} attempts): {}",
                gap.date, gap.attempts, gap.reason
            );
        }
    }
    Ok(())
}
