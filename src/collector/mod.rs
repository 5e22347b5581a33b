//! Collection orchestration
//!
//! The [`Collector`] walks a date range one page at a time. Every fetch is
//! gated by the [`RateLimiter`], failures go through the [`RetryPolicy`],
//! accepted records go to the output sink and progress is committed to the
//! checkpoint store after the page's records are durable.

pub mod config;
pub mod job;
pub mod orchestrator;
pub mod progress;
pub mod rate_limit;
pub mod retry;

pub use config::{CollectorConfig, ConfigError, Settings};
pub use job::{RunSummary, UnitState, WorkUnit};
pub use orchestrator::Collector;
pub use rate_limit::RateLimiter;
pub use retry::{classify, Classification, RetryDecision, RetryPolicy};

use crate::output::OutputError;
use crate::resume::CheckpointError;
use chrono::NaiveDate;

/// Errors that end a run
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Existing state requires an explicit operator choice
    #[error("{0}")]
    Conflict(String),

    /// Credentials rejected by the provider
    #[error("authentication failed while collecting {date}: {message}")]
    Auth {
        /// Date being collected when the failure occurred
        date: NaiveDate,
        /// Provider message
        message: String,
    },

    /// Checkpoint persistence failed
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Output persistence failed
    #[error("output error: {0}")]
    Output(#[from] OutputError),

    /// Stopped by an interrupt; the run is resumable
    #[error("run '{run_id}' interrupted; rerun with --resume to continue")]
    Interrupted {
        /// Interrupted run
        run_id: String,
    },
}

impl CollectorError {
    /// Whether the run was refused because of existing state or a concurrent holder
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CollectorError::Conflict(_) | CollectorError::Checkpoint(CheckpointError::Locked { .. })
        )
    }

    /// Whether the run stopped on an interrupt
    pub fn is_interrupted(&self) -> bool {
        matches!(self, CollectorError::Interrupted { .. })
    }
}
