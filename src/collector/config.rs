//! Collection configuration
//!
//! [`CollectorConfig`] is the single validated structure handed to the
//! orchestrator. Every option is enumerated here:
//!
//! | Option | Effect |
//! |--------|--------|
//! | `start_date`, `end_date` | Inclusive date range, walked ascending |
//! | `country_code` | ISO 3166 alpha-2 code passed to every fetch |
//! | `run_id` | Checkpoint and output namespace key; defaults to `{platform}_{country}_{start}_{end}` |
//! | `resume` | Continue from an existing checkpoint |
//! | `clear_checkpoint` | Archive checkpoint and output of a previous run, then start over |
//! | `dry_run` | Exercise fetch, transform and validation with no durable writes |
//! | `requests_per_minute` | Sets the token refill rate to `value / 60` per second |
//! | `burst_capacity` | Token bucket capacity |
//! | `retry` | Attempt ceiling and backoff shape |
//! | `batch_limits` | Record and byte thresholds for batch rotation |
//! | `max_pages_per_date` | Cursor-loop guard; the date is skipped past it |
//! | `output_dir`, `checkpoint_dir` | Local storage roots |
//!
//! An optional TOML [`Settings`] file provides the same knobs; CLI flags
//! override file values.

use super::retry::RetryPolicy;
use crate::output::path::validate_run_id;
use crate::output::BatchLimits;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default sustained request rate
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 180;

/// Default token bucket capacity
pub const DEFAULT_BURST_CAPACITY: u32 = 5;

/// Default attempts per work unit, including the first
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay after the first failure
pub const DEFAULT_BASE_BACKOFF_MS: u64 = 1_000;

/// Default backoff cap
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 60_000;

/// Default relative jitter applied to backoff delays
pub const DEFAULT_JITTER: f64 = 0.2;

/// Default records per batch
pub const DEFAULT_BATCH_MAX_RECORDS: u64 = 10_000;

/// Default bytes per batch (64 MiB)
pub const DEFAULT_BATCH_MAX_BYTES: u64 = 64 * 1024 * 1024;

/// Default pages per date before the cursor is assumed to loop
pub const DEFAULT_MAX_PAGES_PER_DATE: u32 = 10_000;

/// Default output root
pub const DEFAULT_OUTPUT_DIR: &str = "data";

/// Default checkpoint root
pub const DEFAULT_CHECKPOINT_DIR: &str = ".checkpoints";

/// Default country
pub const DEFAULT_COUNTRY_CODE: &str = "PL";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Date range ends before it starts
    #[error("end date {end} is before start date {start}")]
    InvalidDateRange {
        /// Start date
        start: NaiveDate,
        /// End date
        end: NaiveDate,
    },

    /// A value is out of range
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// Field name
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// Mutually exclusive options
    #[error("--resume and --clear-checkpoint cannot be combined")]
    ResumeAndClear,

    /// Settings file unreadable
    #[error("failed to read settings file {path}: {reason}")]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying error
        reason: String,
    },

    /// Settings file is not valid TOML for [`Settings`]
    #[error("failed to parse settings file {path}: {reason}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Underlying error
        reason: String,
    },
}

/// Validated run configuration
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// First date to collect
    pub start_date: NaiveDate,
    /// Last date to collect (inclusive)
    pub end_date: NaiveDate,
    /// ISO 3166 alpha-2 country code
    pub country_code: String,
    /// Explicit run id; derived from platform, country and range when `None`
    pub run_id: Option<String>,
    /// Continue an existing checkpoint
    pub resume: bool,
    /// Archive a previous run's checkpoint and output, then start over
    pub clear_checkpoint: bool,
    /// No durable writes
    pub dry_run: bool,
    /// Sustained request rate
    pub requests_per_minute: u32,
    /// Token bucket capacity
    pub burst_capacity: u32,
    /// Retry policy
    pub retry: RetryPolicy,
    /// Batch rotation thresholds
    pub batch_limits: BatchLimits,
    /// Cursor-loop guard
    pub max_pages_per_date: u32,
    /// Output root
    pub output_dir: PathBuf,
    /// Checkpoint root
    pub checkpoint_dir: PathBuf,
}

impl CollectorConfig {
    /// Configuration for `[start_date, end_date]` with every other option at its default
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
            country_code: DEFAULT_COUNTRY_CODE.to_string(),
            run_id: None,
            resume: false,
            clear_checkpoint: false,
            dry_run: false,
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            burst_capacity: DEFAULT_BURST_CAPACITY,
            retry: RetryPolicy::default(),
            batch_limits: BatchLimits {
                max_records: DEFAULT_BATCH_MAX_RECORDS,
                max_bytes: DEFAULT_BATCH_MAX_BYTES,
            },
            max_pages_per_date: DEFAULT_MAX_PAGES_PER_DATE,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            checkpoint_dir: PathBuf::from(DEFAULT_CHECKPOINT_DIR),
        }
    }

    /// Set the country code (upper-cased)
    pub fn with_country(mut self, country_code: impl Into<String>) -> Self {
        self.country_code = country_code.into().to_ascii_uppercase();
        self
    }

    /// Set an explicit run id
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Request resume from an existing checkpoint
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Request archiving of a previous run
    pub fn with_clear_checkpoint(mut self, clear: bool) -> Self {
        self.clear_checkpoint = clear;
        self
    }

    /// Enable dry-run mode
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set the sustained rate and burst
    pub fn with_rate_limit(mut self, requests_per_minute: u32, burst_capacity: u32) -> Self {
        self.requests_per_minute = requests_per_minute;
        self.burst_capacity = burst_capacity;
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set batch rotation thresholds
    pub fn with_batch_limits(mut self, max_records: u64, max_bytes: u64) -> Self {
        self.batch_limits = BatchLimits {
            max_records,
            max_bytes,
        };
        self
    }

    /// Set the cursor-loop guard
    pub fn with_max_pages_per_date(mut self, max_pages: u32) -> Self {
        self.max_pages_per_date = max_pages;
        self
    }

    /// Set the output root
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set the checkpoint root
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = dir.into();
        self
    }

    /// Run id for `platform`, derived from platform, country and range unless set explicitly
    pub fn run_id(&self, platform: &str) -> String {
        match &self.run_id {
            Some(run_id) => run_id.clone(),
            None => format!(
                "{}_{}_{}_{}",
                platform.to_ascii_lowercase(),
                self.country_code.to_ascii_lowercase(),
                self.start_date.format("%Y%m%d"),
                self.end_date.format("%Y%m%d")
            ),
        }
    }

    /// Number of dates in the range
    pub fn total_days(&self) -> u64 {
        ((self.end_date - self.start_date).num_days() + 1).max(0) as u64
    }

    /// Reject inconsistent or out-of-range options
    pub fn validate(&self, platform: &str) -> Result<(), ConfigError> {
        if self.end_date < self.start_date {
            return Err(ConfigError::InvalidDateRange {
                start: self.start_date,
                end: self.end_date,
            });
        }
        if self.resume && self.clear_checkpoint {
            return Err(ConfigError::ResumeAndClear);
        }
        if self.country_code.len() != 2 || !self.country_code.chars().all(|c| c.is_ascii_uppercase())
        {
            return Err(ConfigError::InvalidValue {
                field: "country_code",
                reason: format!("'{}' is not an ISO 3166 alpha-2 code", self.country_code),
            });
        }
        if self.requests_per_minute == 0 {
            return Err(positive("requests_per_minute"));
        }
        if self.burst_capacity == 0 {
            return Err(positive("burst_capacity"));
        }
        if self.batch_limits.max_records == 0 {
            return Err(positive("batch_max_records"));
        }
        if self.batch_limits.max_bytes == 0 {
            return Err(positive("batch_max_bytes"));
        }
        if self.max_pages_per_date == 0 {
            return Err(positive("max_pages_per_date"));
        }
        if self.retry.base_delay() > self.retry.max_delay() {
            return Err(ConfigError::InvalidValue {
                field: "retry",
                reason: "base delay exceeds max delay".to_string(),
            });
        }
        validate_run_id(&self.run_id(platform)).map_err(|reason| ConfigError::InvalidValue {
            field: "run_id",
            reason,
        })
    }
}

fn positive(field: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: "must be greater than zero".to_string(),
    }
}

/// Optional TOML settings file
///
/// ```toml
/// [rate_limiting]
/// requests_per_minute = 120
/// burst = 3
///
/// [retry]
/// max_attempts = 8
/// max_delay_secs = 120
///
/// [output]
/// dir = "/var/lib/ads"
/// batch_max_records = 50000
///
/// [checkpoint]
/// dir = "/var/lib/ads/.checkpoints"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `[rate_limiting]`
    pub rate_limiting: RateLimitSettings,
    /// `[retry]`
    pub retry: RetrySettings,
    /// `[output]`
    pub output: OutputSettings,
    /// `[checkpoint]`
    pub checkpoint: CheckpointSettings,
}

/// `[rate_limiting]` table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Sustained request rate
    pub requests_per_minute: Option<u32>,
    /// Token bucket capacity
    pub burst: Option<u32>,
}

/// `[retry]` table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts per work unit
    pub max_attempts: Option<u32>,
    /// Delay after the first failure, in milliseconds
    pub base_delay_ms: Option<u64>,
    /// Backoff cap, in seconds
    pub max_delay_secs: Option<u64>,
    /// Relative jitter
    pub jitter: Option<f64>,
}

/// `[output]` table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Output root
    pub dir: Option<PathBuf>,
    /// Records per batch
    pub batch_max_records: Option<u64>,
    /// Bytes per batch
    pub batch_max_bytes: Option<u64>,
    /// Cursor-loop guard
    pub max_pages_per_date: Option<u32>,
}

/// `[checkpoint]` table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointSettings {
    /// Checkpoint root
    pub dir: Option<PathBuf>,
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        tracing::debug!(path = %path.display(), "Loading settings");
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Overlay the values present in this file onto `config`
    pub fn apply(&self, mut config: CollectorConfig) -> CollectorConfig {
        let rate = &self.rate_limiting;
        if let Some(rpm) = rate.requests_per_minute {
            config.requests_per_minute = rpm;
        }
        if let Some(burst) = rate.burst {
            config.burst_capacity = burst;
        }

        let retry = &self.retry;
        let mut policy = config.retry.clone();
        if let Some(max_attempts) = retry.max_attempts {
            policy = policy.with_max_attempts(max_attempts);
        }
        let base = retry
            .base_delay_ms
            .map_or(policy.base_delay(), Duration::from_millis);
        let cap = retry
            .max_delay_secs
            .map_or(policy.max_delay(), Duration::from_secs);
        policy = policy.with_delays(base, cap);
        if let Some(jitter) = retry.jitter {
            policy = policy.with_jitter(jitter);
        }
        config.retry = policy;

        let output = &self.output;
        if let Some(dir) = &output.dir {
            config.output_dir = dir.clone();
        }
        if let Some(max_records) = output.batch_max_records {
            config.batch_limits.max_records = max_records;
        }
        if let Some(max_bytes) = output.batch_max_bytes {
            config.batch_limits.max_bytes = max_bytes;
        }
        if let Some(max_pages) = output.max_pages_per_date {
            config.max_pages_per_date = max_pages;
        }

        if let Some(dir) = &self.checkpoint.dir {
            config.checkpoint_dir = dir.clone();
        }
        config
    }
}
