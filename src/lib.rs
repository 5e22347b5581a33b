//! # Ad Collector Library
//!
//! A resumable collection engine for ad-transparency records served by
//! paginated, rate-limited advertising APIs. Designed for multi-hour
//! backfills that can be killed and resumed without re-fetching committed
//! pages or silently dropping any.
//!
//! ## Features
//!
//! - **Token-Bucket Throttling**: Every page request is gated by a shared
//!   token bucket bounding burst and sustained request rate
//! - **Classified Retries**: Rate limits and transient failures are retried
//!   with capped, jittered exponential backoff; fatal failures abort or skip
//! - **Checkpoint/Resume**: Progress is committed after every drained page,
//!   always after the page's records are durably written
//! - **Batched Output**: Size-bounded NDJSON batches with an atomically
//!   rewritten manifest, including recovery of orphaned batches after a crash
//! - **Dry Run**: Exercises fetch, transform and validation without touching
//!   durable storage
//!
//! ## Quick Start
//!
//! ```no_run
//! use ad_collector::collector::{Collector, CollectorConfig};
//! use ad_collector::source::replay::ReplaySource;
//! use chrono::NaiveDate;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let start = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
//! let end = NaiveDate::from_ymd_opt(2024, 12, 7).unwrap();
//!
//! let source = ReplaySource::new("./fixtures", "meta");
//! let config = CollectorConfig::new(start, end).with_country("PL");
//!
//! let summary = Collector::new(source, config)?.run().await?;
//! println!("{} records written", summary.records_written);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`source`] - The capability set a data provider implements (fetch, transform, validate)
//! - [`collector`] - Orchestration loop, rate limiter, retry policy and run configuration
//! - [`resume`] - Checkpoint persistence and per-run locking
//! - [`output`] - Batch files and the run manifest
//! - [`shutdown`] - Graceful interruption
//! - [`metrics`] - Collection metrics and the optional Prometheus exporter

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// CLI command implementations
pub mod cli;

/// Collection orchestration
pub mod collector;

/// Collection metrics
pub mod metrics;

/// Batch and manifest output
pub mod output;

/// Checkpoint persistence for resumable runs
pub mod resume;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Data source capability and built-in sources
pub mod source;

/// A transformed ad record in the standard cross-platform schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdRecord {
    /// Unique identifier of the ad within its platform
    #[serde(alias = "id")]
    pub ad_id: String,
    /// Platform name (e.g., "meta", "google")
    #[serde(default)]
    pub platform: String,
    /// Name of the advertiser or page
    #[serde(alias = "page_name")]
    pub advertiser_name: String,
    /// Entity that paid for the ad
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funding_entity: Option<String>,
    /// Delivery start (ISO 8601)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    /// Delivery stop (ISO 8601)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    /// Lower bound of the reported spend range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spend_min: Option<f64>,
    /// Upper bound of the reported spend range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spend_max: Option<f64>,
    /// Currency code of the spend range (e.g., "PLN")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spend_currency: Option<String>,
    /// Lower bound of the reported impressions range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impressions_min: Option<u64>,
    /// Upper bound of the reported impressions range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impressions_max: Option<u64>,
    /// Ad text or caption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_content: Option<String>,
    /// Targeting information as reported by the platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targeting_data: Option<serde_json::Value>,
    /// Full provider payload the record was built from
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub raw_response: serde_json::Value,
    /// When this record was extracted
    #[serde(default = "Utc::now")]
    pub extracted_at: DateTime<Utc>,
}

impl AdRecord {
    /// Create a record with only the required fields set
    pub fn new(
        ad_id: impl Into<String>,
        platform: impl Into<String>,
        advertiser_name: impl Into<String>,
    ) -> Self {
        Self {
            ad_id: ad_id.into(),
            platform: platform.into(),
            advertiser_name: advertiser_name.into(),
            funding_entity: None,
            start_date: None,
            end_date: None,
            spend_min: None,
            spend_max: None,
            spend_currency: None,
            impressions_min: None,
            impressions_max: None,
            ad_content: None,
            targeting_data: None,
            raw_response: serde_json::Value::Null,
            extracted_at: Utc::now(),
        }
    }

    /// Validate record integrity
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("ad_id", &self.ad_id),
            ("platform", &self.platform),
            ("advertiser_name", &self.advertiser_name),
        ] {
            if value.trim().is_empty() {
                return Err(format!("Missing or empty required field: {field}"));
            }
        }

        if let (Some(min), Some(max)) = (self.spend_min, self.spend_max) {
            if min < 0.0 || max < 0.0 {
                return Err(format!("Spend must be non-negative, got {min} - {max}"));
            }
            if min > max {
                return Err(format!("Spend min ({min}) must be <= spend max ({max})"));
            }
        }

        if let (Some(min), Some(max)) = (self.impressions_min, self.impressions_max) {
            if min > max {
                return Err(format!(
                    "Impressions min ({min}) must be <= impressions max ({max})"
                ));
            }
        }

        Ok(())
    }
}

/// A work unit that was skipped instead of committed.
///
/// Gaps are carried in the checkpoint across resumes and reported in the
/// manifest so that missing data can be re-collected later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Gap {
    /// Date whose remaining pages were skipped
    pub date: NaiveDate,
    /// Cursor of the page that failed (`None` for the first page of the date)
    pub cursor: Option<String>,
    /// Attempts made before giving up
    pub attempts: u32,
    /// Why the work unit was skipped
    pub reason: String,
    /// When the skip was recorded
    pub recorded_at: DateTime<Utc>,
}

impl Gap {
    /// Record a skipped work unit
    pub fn new(
        date: NaiveDate,
        cursor: Option<String>,
        attempts: u32,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            date,
            cursor,
            attempts,
            reason: reason.into(),
            recorded_at: Utc::now(),
        }
    }
}
