//! Collection metrics
//!
//! Counters, histograms and gauges for pages fetched, records written and
//! rejected, retries and their backoff, rate-limiter waits, skipped work units
//! and run outcomes.
//!
//! ## Architecture
//!
//! - Uses the `metrics` facade, so every call is a no-op until a recorder is installed
//! - [`init_metrics`] installs a Prometheus exporter serving a scrape endpoint
//! - Metric names are registered with descriptions on initialization

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Initialize metrics with a Prometheus exporter
///
/// Idempotent: later calls are ignored once an exporter is installed.
///
/// # Arguments
/// * `addr` - Socket address for the scrape endpoint (e.g., "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "collector_pages_fetched_total",
        Unit::Count,
        "Pages successfully fetched from the source"
    );
    describe_counter!(
        "collector_records_fetched_total",
        Unit::Count,
        "Raw records returned by the source"
    );
    describe_counter!(
        "collector_records_written_total",
        Unit::Count,
        "Validated records handed to the output writer"
    );
    describe_counter!(
        "collector_records_invalid_total",
        Unit::Count,
        "Records rejected by transform or validation"
    );
    describe_counter!(
        "collector_retries_total",
        Unit::Count,
        "Retries of a failed page fetch"
    );
    describe_histogram!(
        "collector_retry_backoff_seconds",
        Unit::Seconds,
        "Wait before each retry"
    );
    describe_histogram!(
        "collector_rate_limit_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for rate limiter tokens"
    );
    describe_gauge!(
        "collector_rate_limit_tokens_available",
        Unit::Count,
        "Tokens left in the bucket after the last acquire"
    );
    describe_counter!(
        "collector_work_units_skipped_total",
        Unit::Count,
        "Work units given up on and recorded as gaps"
    );
    describe_counter!(
        "collector_checkpoints_saved_total",
        Unit::Count,
        "Checkpoint commits"
    );
    describe_counter!(
        "collector_runs_completed_total",
        Unit::Count,
        "Runs that reached the end of their date range"
    );
    describe_counter!(
        "collector_runs_failed_total",
        Unit::Count,
        "Runs aborted on a fatal error"
    );
    describe_counter!(
        "collector_runs_interrupted_total",
        Unit::Count,
        "Runs stopped by an interrupt"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// Record a fetched page and the raw records it carried
pub fn record_page_fetched(platform: &str, records: usize) {
    counter!("collector_pages_fetched_total", "platform" => platform.to_string()).increment(1);
    counter!("collector_records_fetched_total", "platform" => platform.to_string())
        .increment(records as u64);
}

/// Record validated records written
pub fn record_records_written(platform: &str, records: u64) {
    counter!("collector_records_written_total", "platform" => platform.to_string())
        .increment(records);
}

/// Record a rejected record
pub fn record_invalid_record(platform: &str, stage: &'static str) {
    counter!(
        "collector_records_invalid_total",
        "platform" => platform.to_string(),
        "stage" => stage,
    )
    .increment(1);
}

/// Record retry backoff duration
pub fn record_retry_backoff(duration: Duration, attempt: u32, classification: &'static str) {
    counter!(
        "collector_retries_total",
        "classification" => classification,
    )
    .increment(1);

    histogram!(
        "collector_retry_backoff_seconds",
        "classification" => classification,
    )
    .record(duration.as_secs_f64());

    debug!(
        attempt = attempt,
        backoff_ms = duration.as_millis() as u64,
        classification = classification,
        "Retry backoff recorded"
    );
}

/// Record a completed rate limiter acquire
pub fn record_rate_limit_wait(waited: Duration, tokens_available: f64) {
    histogram!("collector_rate_limit_wait_seconds").record(waited.as_secs_f64());
    gauge!("collector_rate_limit_tokens_available").set(tokens_available);

    if waited.as_millis() > 100 {
        debug!(
            wait_ms = waited.as_millis() as u64,
            "Rate limit token acquired after wait"
        );
    }
}

/// Record a skipped work unit
pub fn record_skip(platform: &str, classification: &'static str) {
    counter!(
        "collector_work_units_skipped_total",
        "platform" => platform.to_string(),
        "classification" => classification,
    )
    .increment(1);
}

/// Record a checkpoint commit
pub fn record_checkpoint_saved() {
    counter!("collector_checkpoints_saved_total").increment(1);
}

/// Outcome tracking for one run
pub struct RunMetrics {
    platform: String,
    run_id: String,
    start_time: Instant,
}

impl RunMetrics {
    /// Start tracking a run
    pub fn start(platform: impl Into<String>, run_id: impl Into<String>) -> Self {
        let platform = platform.into();
        let run_id = run_id.into();

        info!(platform = %platform, run_id = %run_id, "Collection run started");

        Self {
            platform,
            run_id,
            start_time: Instant::now(),
        }
    }

    /// Elapsed wall time
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Record a run that reached the end of its range
    pub fn record_success(&self, records_written: u64, skipped: usize) {
        counter!("collector_runs_completed_total", "platform" => self.platform.clone())
            .increment(1);

        if skipped > 0 {
            warn!(
                platform = %self.platform,
                run_id = %self.run_id,
                records_written = records_written,
                skipped = skipped,
                duration_secs = self.elapsed().as_secs(),
                "Collection completed with skipped work units"
            );
        } else {
            info!(
                platform = %self.platform,
                run_id = %self.run_id,
                records_written = records_written,
                duration_secs = self.elapsed().as_secs(),
                "Collection completed successfully"
            );
        }
    }

    /// Record an aborted run
    pub fn record_failure(&self, error: &str) {
        counter!("collector_runs_failed_total", "platform" => self.platform.clone()).increment(1);

        error!(
            platform = %self.platform,
            run_id = %self.run_id,
            error = %error,
            duration_secs = self.elapsed().as_secs(),
            "Collection aborted"
        );
    }

    /// Record an interrupted run
    pub fn record_interrupted(&self) {
        counter!("collector_runs_interrupted_total", "platform" => self.platform.clone())
            .increment(1);

        warn!(
            platform = %self.platform,
            run_id = %self.run_id,
            duration_secs = self.elapsed().as_secs(),
            "Collection interrupted; rerun with --resume to continue"
        );
    }
}
