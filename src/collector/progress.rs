//! Periodic progress reporting for long collection runs
//!
//! Progress is measured in dates of the configured range. An update is emitted
//! whenever completion jumps by at least `min_percentage_step`, or once the
//! run has been going for a while and `update_interval` has elapsed.

use std::time::{Duration, Instant};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const MIN_RUN_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_PERCENTAGE_STEP: f64 = 10.0;

/// Progress over the dates of one run
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Dates in the range
    pub dates_total: u64,
    /// Dates finished (completed or skipped), including those done before a resume
    pub dates_done: u64,
    /// Dates finished by this invocation
    pub dates_done_here: u64,
    /// Records written by this invocation
    pub records_written: u64,
    /// When this invocation started
    pub start_time: Instant,
    /// Last time progress was reported
    pub last_update: Instant,
    /// Minimum interval between time-based updates
    pub update_interval: Duration,
    /// Last reported completion percentage
    pub last_reported_percentage: f64,
    /// Minimum percentage delta required to emit a new update
    pub min_percentage_step: f64,
}

impl ProgressState {
    /// Track a range of `dates_total` dates, `dates_done` of them already finished
    pub fn new(dates_total: u64, dates_done: u64) -> Self {
        let now = Instant::now();
        let mut state = Self {
            dates_total,
            dates_done: dates_done.min(dates_total),
            dates_done_here: 0,
            records_written: 0,
            start_time: now,
            last_update: now,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            last_reported_percentage: 0.0,
            min_percentage_step: DEFAULT_PERCENTAGE_STEP,
        };
        state.last_reported_percentage = state.percentage();
        state
    }

    /// Count records written
    pub fn add_records(&mut self, records: u64) {
        self.records_written = self.records_written.saturating_add(records);
    }

    /// Count a finished date
    pub fn finish_date(&mut self) {
        if self.dates_done < self.dates_total {
            self.dates_done += 1;
        }
        self.dates_done_here += 1;
    }

    /// Completion percentage (0-100)
    pub fn percentage(&self) -> f64 {
        if self.dates_total == 0 {
            return 100.0;
        }
        self.dates_done as f64 / self.dates_total as f64 * 100.0
    }

    /// Whether a progress update should be emitted
    pub fn should_emit(&self) -> bool {
        if self.dates_done_here == 0 && self.records_written == 0 {
            return false;
        }
        if self.percentage() - self.last_reported_percentage >= self.min_percentage_step {
            return true;
        }
        self.start_time.elapsed() >= MIN_RUN_DURATION
            && self.last_update.elapsed() >= self.update_interval
    }

    /// Reset timers after an update was emitted
    pub fn mark_emitted(&mut self) {
        self.last_update = Instant::now();
        self.last_reported_percentage = self.percentage();
    }

    /// Remaining time extrapolated from this invocation's pace
    pub fn estimate_remaining(&self) -> Option<Duration> {
        if self.dates_done_here == 0 {
            return None;
        }
        let remaining = self.dates_total.saturating_sub(self.dates_done);
        if remaining == 0 {
            return None;
        }
        let per_date = self.start_time.elapsed().as_secs_f64() / self.dates_done_here as f64;
        Some(Duration::from_secs_f64(per_date * remaining as f64))
    }

    /// Human-readable progress line
    pub fn format_progress(&self) -> String {
        let mut parts = vec![format!(
            "[PROGRESS] {}/{} days - {:.1}% complete - {} records written",
            self.dates_done,
            self.dates_total,
            self.percentage(),
            self.records_written
        )];

        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
