//! Data source capability
//!
//! A source is anything that can serve ad records for one calendar date and
//! country, a page at a time. The orchestrator only relies on the three
//! operations of [`AdSource`]; request shaping, credentials and platform field
//! mapping are the source's own business.

use crate::AdRecord;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::time::Duration;

pub mod replay;

/// Source errors
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Server-signalled throttling ("too many requests")
    #[error("rate limited by provider{}", retry_hint(.retry_after))]
    RateLimited {
        /// Server-provided wait hint, if any
        retry_after: Option<Duration>,
    },

    /// Request timed out
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection-level failure
    #[error("network error: {0}")]
    Network(String),

    /// HTTP 5xx or equivalent provider-side failure
    #[error("server error ({status}): {message}")]
    Server {
        /// Status code reported by the provider
        status: u16,
        /// Error message
        message: String,
    },

    /// Expired or invalid credentials
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Malformed request parameters
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A raw record could not be mapped to the standard schema
    #[error("transform failed: {0}")]
    Transform(String),

    /// Anything else the provider reported
    #[error("source error: {0}")]
    Other(String),
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    retry_after
        .map(|d| format!(" (retry after {}s)", d.as_secs()))
        .unwrap_or_default()
}

/// Result type for source operations
pub type SourceResult<T> = Result<T, SourceError>;

/// One page of raw records returned by [`AdSource::fetch_page`]
#[derive(Debug, Clone, PartialEq)]
pub struct Page<R> {
    /// Raw records in provider order
    pub records: Vec<R>,
    /// Cursor for the next page, `None` at the end of the date
    pub next_cursor: Option<String>,
}

impl<R> Page<R> {
    /// A page followed by another page
    pub fn more(records: Vec<R>, next_cursor: impl Into<String>) -> Self {
        Self {
            records,
            next_cursor: Some(next_cursor.into()),
        }
    }

    /// The final page of a date
    pub fn last(records: Vec<R>) -> Self {
        Self {
            records,
            next_cursor: None,
        }
    }

    /// Whether the date is drained after this page
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// Capability set a data provider implements
#[async_trait]
pub trait AdSource: Send + Sync {
    /// Raw record type as returned by the provider
    type Raw: Send;

    /// Platform name used in run ids, records and metrics (e.g., "meta")
    fn platform(&self) -> &str;

    /// Fetch one page of records for `date` in `country_code`
    ///
    /// # Arguments
    /// * `date` - Calendar date being collected
    /// * `country_code` - ISO 3166 alpha-2 country code
    /// * `cursor` - Cursor returned by the previous page, `None` for the start of the date
    async fn fetch_page(
        &self,
        date: NaiveDate,
        country_code: &str,
        cursor: Option<&str>,
    ) -> SourceResult<Page<Self::Raw>>;

    /// Map a raw record to the standard schema. Pure, no I/O.
    fn transform(&self, raw: Self::Raw) -> SourceResult<AdRecord>;

    /// Check a transformed record, returning the reason on failure
    fn validate(&self, record: &AdRecord) -> Result<(), String> {
        record.validate()
    }
}
