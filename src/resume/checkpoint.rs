//! Checkpoint model
//!
//! A checkpoint is the durable marker of the last committed work-unit
//! boundary of a run. It only ever moves forward: a page cursor advances
//! within the in-progress date, and completing (or skipping) a date clears the
//! cursor and advances `last_completed_date`.

use crate::Gap;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Current checkpoint schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Persisted progress of one run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    schema_version: u32,
    run_id: String,
    platform: String,
    country_code: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    last_completed_date: Option<NaiveDate>,
    last_cursor_within_current_date: Option<String>,
    total_records_written: u64,
    #[serde(default)]
    gaps: Vec<Gap>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Create an empty checkpoint for a run over `[start_date, end_date]`
    pub fn new(
        run_id: impl Into<String>,
        platform: impl Into<String>,
        country_code: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            run_id: run_id.into(),
            platform: platform.into(),
            country_code: country_code.into(),
            start_date,
            end_date,
            last_completed_date: None,
            last_cursor_within_current_date: None,
            total_records_written: 0,
            gaps: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Schema version this checkpoint was written with
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Run identifier
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Platform name
    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Country code the run collects
    pub fn country_code(&self) -> &str {
        &self.country_code
    }

    /// First date of the run
    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    /// Last date of the run (inclusive)
    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    /// Last fully drained (or skipped) date
    pub fn last_completed_date(&self) -> Option<NaiveDate> {
        self.last_completed_date
    }

    /// Cursor of the next page within the in-progress date
    pub fn last_cursor(&self) -> Option<&str> {
        self.last_cursor_within_current_date.as_deref()
    }

    /// Records durably written so far
    pub fn total_records_written(&self) -> u64 {
        self.total_records_written
    }

    /// Work units skipped so far
    pub fn gaps(&self) -> &[Gap] {
        &self.gaps
    }

    /// Creation timestamp
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last update timestamp
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Date and cursor to resume from, or `None` if every date is done
    pub fn resume_position(&self) -> Option<(NaiveDate, Option<String>)> {
        let date = match self.last_completed_date {
            Some(done) => done.succ_opt()?,
            None => self.start_date,
        };
        if date > self.end_date {
            return None;
        }
        Some((date, self.last_cursor_within_current_date.clone()))
    }

    /// Whether every date in the range is completed or skipped
    pub fn is_range_complete(&self) -> bool {
        self.resume_position().is_none()
    }

    /// Commit a drained page that is followed by `next_cursor`
    pub fn advance_cursor(&mut self, next_cursor: impl Into<String>, records_written: u64) {
        self.last_cursor_within_current_date = Some(next_cursor.into());
        self.total_records_written += records_written;
        self.touch();
    }

    /// Commit the last page of `date` and mark the date completed
    pub fn complete_date(&mut self, date: NaiveDate, records_written: u64) {
        self.total_records_written += records_written;
        self.mark_done(date);
    }

    /// Record a skipped work unit; the rest of its date is abandoned
    pub fn skip_date(&mut self, gap: Gap) {
        let date = gap.date;
        self.gaps.push(gap);
        self.mark_done(date);
    }

    fn mark_done(&mut self, date: NaiveDate) {
        if self.last_completed_date.map_or(true, |done| date > done) {
            self.last_completed_date = Some(date);
        }
        self.last_cursor_within_current_date = None;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
