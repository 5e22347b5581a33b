//! Work units and run summaries

use crate::output::RunStatus;
use crate::Gap;
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Lifecycle of one work unit
///
/// `Pending → Fetching → (Retrying)* → Transforming → Writing → Checkpointed`.
/// `Skipped` is reached from `Pending` (page budget exhausted), from
/// `Fetching`/`Retrying` (retries given up) or from `Writing` (the page was
/// kept but the cursor repeated). `Aborted` ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    /// Not started
    Pending,
    /// Waiting for a rate-limit token or the page response
    Fetching,
    /// Backing off after a retryable failure
    Retrying,
    /// Mapping and validating raw records
    Transforming,
    /// Emitting records to the output writer
    Writing,
    /// Records durable and checkpoint advanced
    Checkpointed,
    /// Given up on; recorded as a gap
    Skipped,
    /// Stopped the run
    Aborted,
}

impl UnitState {
    /// Whether the unit has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UnitState::Checkpointed | UnitState::Skipped | UnitState::Aborted
        )
    }

    /// Whether moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: UnitState) -> bool {
        use UnitState::*;
        matches!(
            (self, next),
            (Pending, Fetching)
                | (Pending, Skipped)
                | (Fetching, Retrying)
                | (Fetching, Transforming)
                | (Fetching, Skipped)
                | (Fetching, Aborted)
                | (Retrying, Fetching)
                | (Retrying, Skipped)
                | (Retrying, Aborted)
                | (Transforming, Writing)
                | (Writing, Checkpointed)
                | (Writing, Skipped)
        )
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitState::Pending => "pending",
            UnitState::Fetching => "fetching",
            UnitState::Retrying => "retrying",
            UnitState::Transforming => "transforming",
            UnitState::Writing => "writing",
            UnitState::Checkpointed => "checkpointed",
            UnitState::Skipped => "skipped",
            UnitState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// One page of one date
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// Calendar date being collected
    pub date: NaiveDate,
    /// Cursor of the page, `None` for the start of the date
    pub page_cursor: Option<String>,
    /// Fetch attempts made so far
    pub attempt_count: u32,
    /// Current state
    pub state: UnitState,
}

impl WorkUnit {
    /// New pending unit
    pub fn new(date: NaiveDate, page_cursor: Option<String>) -> Self {
        Self {
            date,
            page_cursor,
            attempt_count: 0,
            state: UnitState::Pending,
        }
    }

    /// Move to `next`
    ///
    /// Illegal transitions panic in debug builds. Release builds log them and
    /// leave the state unchanged, returning `false`.
    pub fn transition(&mut self, next: UnitState) -> bool {
        let legal = self.state.can_transition_to(next);
        debug_assert!(legal, "illegal work unit transition {} -> {}", self.state, next);
        if !legal {
            tracing::warn!(
                date = %self.date,
                cursor = ?self.page_cursor,
                from = %self.state,
                to = %next,
                "Ignoring illegal work unit transition"
            );
            return false;
        }
        self.state = next;
        true
    }

    /// Cursor as a borrowed string
    pub fn cursor(&self) -> Option<&str> {
        self.page_cursor.as_deref()
    }
}

/// Outcome of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Run id
    pub run_id: String,
    /// Terminal status
    pub status: RunStatus,
    /// Whether nothing was written
    pub dry_run: bool,
    /// Dates in the configured range
    pub dates_total: u64,
    /// Dates drained by this invocation
    pub dates_completed: u64,
    /// Pages fetched by this invocation
    pub pages_fetched: u64,
    /// Raw records returned by the source
    pub records_fetched: u64,
    /// Valid records written by this invocation
    pub records_written: u64,
    /// Records written across every invocation of the run
    pub total_records_written: u64,
    /// Records rejected by transform or validation
    pub records_invalid: u64,
    /// Retries performed
    pub retries: u64,
    /// Skipped work units across every invocation of the run
    pub gaps: Vec<Gap>,
    /// Date the invocation resumed from, when it continued a checkpoint
    pub resumed_from: Option<NaiveDate>,
    /// Orphan batches adopted on resume
    pub recovered_batches: usize,
    /// Wall time of this invocation
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl RunSummary {
    /// Empty summary for `run_id`
    pub fn new(run_id: impl Into<String>, dates_total: u64, dry_run: bool) -> Self {
        Self {
            run_id: run_id.into(),
            status: RunStatus::Running,
            dry_run,
            dates_total,
            dates_completed: 0,
            pages_fetched: 0,
            records_fetched: 0,
            records_written: 0,
            total_records_written: 0,
            records_invalid: 0,
            retries: 0,
            gaps: Vec::new(),
            resumed_from: None,
            recovered_batches: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Number of skipped work units
    pub fn skipped(&self) -> usize {
        self.gaps.len()
    }

    /// Whether every date was collected without a gap
    pub fn is_clean(&self) -> bool {
        self.status == RunStatus::Completed && self.gaps.is_empty()
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }
}
