//! Failure classification and retry policy
//!
//! Every fetch failure is classified into one of four outcomes:
//!
//! | Classification | Source errors | Outcome |
//! |----------------|---------------|---------|
//! | `RetryableRateLimited` | `RateLimited`, HTTP 429 | wait for the server hint (or backoff), retry |
//! | `RetryableTransient` | `Timeout`, `Network`, HTTP 5xx/408, `Other` | exponential backoff with jitter, retry |
//! | `FatalAuth` | `Auth`, HTTP 401/403 | abort the run |
//! | `FatalInvalidRequest` | `InvalidRequest`, `Transform`, other HTTP 4xx | skip the work unit |
//!
//! Retryable failures are bounded by a per-work-unit attempt ceiling; once it
//! is reached the work unit is skipped and recorded as a gap.

use crate::source::SourceError;
use rand::Rng;
use std::fmt;
use std::time::Duration;

use super::config::{
    DEFAULT_BASE_BACKOFF_MS, DEFAULT_JITTER, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BACKOFF_MS,
};

/// How a fetch failure should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Server-signalled throttling
    RetryableRateLimited,
    /// Timeouts, connection failures and 5xx
    RetryableTransient,
    /// Expired or invalid credentials
    FatalAuth,
    /// Malformed request for this work unit
    FatalInvalidRequest,
}

impl Classification {
    /// Whether the failure is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Classification::RetryableRateLimited | Classification::RetryableTransient
        )
    }

    /// Short label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Classification::RetryableRateLimited => "rate_limited",
            Classification::RetryableTransient => "transient",
            Classification::FatalAuth => "auth",
            Classification::FatalInvalidRequest => "invalid_request",
        }
    }

    /// Operator-facing hint on what to do about it
    pub fn suggestion(&self) -> &'static str {
        match self {
            Classification::RetryableRateLimited => {
                "Lower --requests-per-minute if this keeps happening"
            }
            Classification::RetryableTransient => {
                "Check network connectivity and the provider's status page"
            }
            Classification::FatalAuth => {
                "Refresh the access token, then rerun with --resume"
            }
            Classification::FatalInvalidRequest => {
                "Check the request parameters (country code, date range)"
            }
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classify a source error
pub fn classify(error: &SourceError) -> Classification {
    match error {
        SourceError::RateLimited { .. } => Classification::RetryableRateLimited,
        SourceError::Timeout(_) | SourceError::Network(_) | SourceError::Other(_) => {
            Classification::RetryableTransient
        }
        SourceError::Server { status, .. } => classify_status(*status),
        SourceError::Auth(_) => Classification::FatalAuth,
        SourceError::InvalidRequest(_) | SourceError::Transform(_) => {
            Classification::FatalInvalidRequest
        }
    }
}

#[allow(clippy::match_same_arms)]
fn classify_status(status: u16) -> Classification {
    match status {
        401 | 403 => Classification::FatalAuth,
        408 => Classification::RetryableTransient,
        429 => Classification::RetryableRateLimited,
        400..=499 => Classification::FatalInvalidRequest,
        _ => Classification::RetryableTransient,
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait, then retry the same work unit
    Retry {
        /// How long to wait
        delay: Duration,
        /// Number of the next attempt (1-indexed)
        attempt: u32,
    },
    /// Give up on this work unit and record a gap
    Skip {
        /// Why
        reason: String,
    },
    /// Stop the whole run
    Abort {
        /// Why
        reason: String,
    },
}

/// Retry policy with capped, jittered exponential backoff
///
/// `delay(n) = min(base * 2^n * (1 ± jitter), max_delay)` where `n` is the
/// number of failed attempts so far minus one. Jitter is applied before the
/// cap, so consecutive delays for one work unit never decrease as long as
/// `jitter < 1/3`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_BACKOFF_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Create a policy
    ///
    /// # Arguments
    /// * `max_attempts` - Attempts per work unit, including the first (at least 1)
    /// * `base_delay` - Delay after the first failure
    /// * `max_delay` - Delay cap
    /// * `jitter` - Relative jitter, clamped to `[0, 0.33]`
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, jitter: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: jitter.clamp(0.0, 0.33),
        }
    }

    /// Same policy with a different attempt ceiling
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Same policy with different delays
    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Same policy with a different jitter
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 0.33);
        self
    }

    /// Attempts per work unit
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Base delay
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Delay cap
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Relative jitter
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Backoff after `retry` previous retries (0 for the first), with random jitter
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = if self.jitter > 0.0 {
            rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter))
        } else {
            1.0
        };
        self.backoff_delay_with_factor(retry, factor)
    }

    /// Backoff after `retry` previous retries with an explicit jitter factor
    pub fn backoff_delay_with_factor(&self, retry: u32, factor: f64) -> Duration {
        let exponential = self.base_delay.as_secs_f64() * 2f64.powi(retry.min(32) as i32);
        let jittered = exponential * factor.max(0.0);
        Duration::from_secs_f64(jittered.min(self.max_delay.as_secs_f64()))
    }

    /// Decide what to do after attempt number `attempt` (1-indexed) failed
    ///
    /// # Arguments
    /// * `classification` - Classification of the failure
    /// * `attempt` - The attempt that just failed
    /// * `retry_after` - Server-provided wait hint for rate limits
    pub fn decide(
        &self,
        classification: Classification,
        attempt: u32,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        match classification {
            Classification::FatalAuth => {
                return RetryDecision::Abort {
                    reason: "authentication failed - retrying cannot help".to_string(),
                }
            }
            Classification::FatalInvalidRequest => {
                return RetryDecision::Skip {
                    reason: "invalid request - retrying cannot help".to_string(),
                }
            }
            Classification::RetryableRateLimited | Classification::RetryableTransient => {}
        }

        if attempt >= self.max_attempts {
            return RetryDecision::Skip {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let backoff = self.backoff_delay(attempt.saturating_sub(1));
        let delay = match (classification, retry_after) {
            (Classification::RetryableRateLimited, Some(hint)) => hint,
            _ => backoff,
        };

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }
}
