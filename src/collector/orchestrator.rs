//! Collection loop
//!
//! Work units are processed strictly in order: dates ascending, pages in the
//! order the source hands out cursors. For every page:
//!
//! 1. take a token from the rate limiter
//! 2. fetch, retrying per the retry policy
//! 3. transform and validate each raw record (rejects are counted and logged)
//! 4. emit accepted records and commit them to disk
//! 5. advance and save the checkpoint
//!
//! Step 5 never runs before step 4 has returned, so a checkpoint never points
//! past records that are not on disk. An interrupt between pages (or during a
//! wait) leaves the checkpoint at the last committed page.

use super::config::CollectorConfig;
use super::job::{RunSummary, UnitState, WorkUnit};
use super::progress::ProgressState;
use super::rate_limit::RateLimiter;
use super::retry::{classify, Classification, RetryDecision};
use super::CollectorError;
use crate::metrics::{self, RunMetrics};
use crate::output::{
    path, BatchWriter, DryRunSink, Manifest, OutputError, RecordSink, RunStatus, Sink,
};
use crate::resume::{Checkpoint, CheckpointStore, RunLock};
use crate::shutdown::{self, SharedShutdown};
use crate::source::{AdSource, Page, SourceError};
use crate::Gap;
use chrono::NaiveDate;
use std::future::Future;
use tracing::{debug, error, info, warn, Instrument};

/// Mutable state of one run, owned for its whole lifetime
struct RunState {
    checkpoint: Checkpoint,
    sink: Sink,
    _lock: Option<RunLock>,
}

enum Prepared {
    Run(RunState),
    AlreadyCompleted(Manifest),
}

enum FetchOutcome<R> {
    Page(Page<R>),
    Skip {
        gap: Gap,
        classification: Classification,
    },
}

/// Drives one run over a date range for one source
pub struct Collector<S: AdSource> {
    source: S,
    config: CollectorConfig,
    run_id: String,
    limiter: RateLimiter,
    store: CheckpointStore,
    shutdown: Option<SharedShutdown>,
}

impl<S: AdSource> Collector<S> {
    /// Validate `config` and build a collector for `source`
    ///
    /// Picks up the process-wide shutdown handle if one is registered.
    pub fn new(source: S, config: CollectorConfig) -> Result<Self, CollectorError> {
        config.validate(source.platform())?;
        let run_id = config.run_id(source.platform());
        let limiter = RateLimiter::per_minute(config.requests_per_minute, config.burst_capacity);
        let store = CheckpointStore::new(config.checkpoint_dir.clone());

        Ok(Self {
            source,
            config,
            run_id,
            limiter,
            store,
            shutdown: shutdown::get_global_shutdown(),
        })
    }

    /// Attach a shutdown handle
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Share a rate limiter with other collectors
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// Run id addressing the checkpoint and output namespace
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The limiter gating every fetch
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// The source being collected
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Effective configuration
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Collect the configured range
    ///
    /// Returns the run summary once every date is completed or skipped.
    /// Skipped work units are reported in the summary, not as an error.
    pub async fn run(&self) -> Result<RunSummary, CollectorError> {
        let span = tracing::info_span!(
            "collect",
            run_id = %self.run_id,
            platform = %self.source.platform(),
            country = %self.config.country_code,
            start_date = %self.config.start_date,
            end_date = %self.config.end_date,
            dry_run = self.config.dry_run,
        );
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&self) -> Result<RunSummary, CollectorError> {
        let run_metrics = RunMetrics::start(self.source.platform(), &self.run_id);
        let mut summary =
            RunSummary::new(&self.run_id, self.config.total_days(), self.config.dry_run);

        let prepared = match self.prepare() {
            Ok(prepared) => prepared,
            Err(e) => {
                run_metrics.record_failure(&e.to_string());
                return Err(e);
            }
        };

        let mut state = match prepared {
            Prepared::Run(state) => state,
            Prepared::AlreadyCompleted(manifest) => {
                info!(
                    total_records = manifest.total_records,
                    batches = manifest.batches.len(),
                    "Run already completed, nothing to collect"
                );
                summary.status = RunStatus::Completed;
                summary.total_records_written = manifest.total_records;
                summary.gaps = manifest.gaps;
                summary.elapsed = run_metrics.elapsed();
                return Ok(summary);
            }
        };

        if let Sink::Batches(writer) = &state.sink {
            summary.recovered_batches = writer.recovered_batches();
        }
        if state.checkpoint.last_completed_date().is_some()
            || state.checkpoint.last_cursor().is_some()
        {
            summary.resumed_from = state.checkpoint.resume_position().map(|(date, _)| date);
            info!(
                resumed_from = ?summary.resumed_from,
                cursor = ?state.checkpoint.last_cursor(),
                total_records = state.checkpoint.total_records_written(),
                "Resuming run"
            );
        }

        let outcome = self.collect_range(&mut state, &mut summary).await;

        let status = match &outcome {
            Ok(()) => RunStatus::Completed,
            Err(CollectorError::Interrupted { .. }) => RunStatus::Interrupted,
            Err(_) => RunStatus::Failed,
        };
        let finalized = state.sink.finalize(status);

        summary.status = status;
        summary.total_records_written = state.checkpoint.total_records_written();
        summary.gaps = state.checkpoint.gaps().to_vec();
        summary.elapsed = run_metrics.elapsed();

        match outcome {
            Ok(()) => {
                finalized?;
                if !self.config.dry_run {
                    if let Some(archived) = self.store.archive_completed(&self.run_id)? {
                        debug!(path = %archived.display(), "Checkpoint archived");
                    }
                }
                run_metrics.record_success(summary.total_records_written, summary.skipped());
                Ok(summary)
            }
            Err(e) => {
                if let Err(finalize_error) = finalized {
                    warn!(error = %finalize_error, "Failed to finalize output after abort");
                }
                if e.is_interrupted() {
                    run_metrics.record_interrupted();
                } else {
                    run_metrics.record_failure(&e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Decide the start position and claim the run's checkpoint and output
    fn prepare(&self) -> Result<Prepared, CollectorError> {
        let fresh = || {
            Checkpoint::new(
                &self.run_id,
                self.source.platform(),
                &self.config.country_code,
                self.config.start_date,
                self.config.end_date,
            )
        };

        if self.config.dry_run {
            if self.config.resume || self.config.clear_checkpoint {
                warn!("Dry run ignores --resume and --clear-checkpoint; starting from the first date");
            }
            return Ok(Prepared::Run(RunState {
                checkpoint: fresh(),
                sink: Sink::DryRun(DryRunSink::new(self.config.batch_limits)),
                _lock: None,
            }));
        }

        let lock = RunLock::try_acquire(self.store.dir(), &self.run_id)?;
        let template = Manifest::new(
            &self.run_id,
            self.source.platform(),
            &self.config.country_code,
            self.config.start_date,
            self.config.end_date,
        );
        let output_dir = &self.config.output_dir;
        let limits = self.config.batch_limits;

        if self.config.clear_checkpoint {
            if let Some(archived) = self.store.clear(&self.run_id)? {
                info!(path = %archived.display(), "Previous checkpoint archived");
            }
            BatchWriter::archive_namespace(output_dir, &self.run_id)?;
        }

        let (checkpoint, writer) = match self.store.load(&self.run_id)? {
            Some(_) if !self.config.resume => {
                return Err(CollectorError::Conflict(format!(
                    "a checkpoint for run '{}' already exists at {}; pass --resume to continue it \
                     or --clear-checkpoint to start over",
                    self.run_id,
                    self.store.path_for(&self.run_id).display()
                )));
            }
            Some(checkpoint) => {
                self.check_compatible(&checkpoint)?;
                let mut writer = BatchWriter::resume(output_dir, template, limits)?;
                writer.set_gaps(checkpoint.gaps().to_vec());
                let stopped_in = checkpoint
                    .resume_position()
                    .map(|(date, _)| date)
                    .or(checkpoint.last_completed_date())
                    .unwrap_or(self.config.end_date);
                writer.bound_recovered_batches(stopped_in)?;
                (checkpoint, writer)
            }
            None if self.config.resume => {
                let manifest_path =
                    path::manifest_path(&path::run_dir(output_dir, &self.run_id), &self.run_id);
                if let Some(manifest) = Manifest::load(&manifest_path)? {
                    if manifest.status == RunStatus::Completed {
                        return Ok(Prepared::AlreadyCompleted(manifest));
                    }
                }
                warn!("--resume requested but no checkpoint found; starting from the first date");
                let mut writer = BatchWriter::resume(output_dir, template, limits)?;
                writer.bound_recovered_batches(self.config.start_date)?;
                (fresh(), writer)
            }
            None => {
                let writer = BatchWriter::create(output_dir, template, limits).map_err(|e| match e {
                    OutputError::NamespaceInUse { path } => CollectorError::Conflict(format!(
                        "output for run '{}' already exists at {}; pass --resume to continue it \
                         or --clear-checkpoint to start over",
                        self.run_id,
                        path.display()
                    )),
                    other => other.into(),
                })?;
                (fresh(), writer)
            }
        };

        Ok(Prepared::Run(RunState {
            checkpoint,
            sink: Sink::Batches(writer),
            _lock: Some(lock),
        }))
    }

    fn check_compatible(&self, checkpoint: &Checkpoint) -> Result<(), CollectorError> {
        let config = &self.config;
        if checkpoint.start_date() != config.start_date
            || checkpoint.end_date() != config.end_date
            || checkpoint.country_code() != config.country_code
        {
            return Err(CollectorError::Conflict(format!(
                "checkpoint for run '{}' covers {} {}..={}, but {} {}..={} was requested; \
                 use a different --run-id or --clear-checkpoint",
                self.run_id,
                checkpoint.country_code(),
                checkpoint.start_date(),
                checkpoint.end_date(),
                config.country_code,
                config.start_date,
                config.end_date
            )));
        }
        Ok(())
    }

    async fn collect_range(
        &self,
        state: &mut RunState,
        summary: &mut RunSummary,
    ) -> Result<(), CollectorError> {
        let Some((mut date, mut cursor)) = state.checkpoint.resume_position() else {
            info!("Every date already committed");
            return Ok(());
        };

        let already_done = (date - self.config.start_date).num_days().max(0) as u64;
        let mut progress = ProgressState::new(summary.dates_total, already_done);

        while date <= self.config.end_date {
            self.collect_date(state, summary, &mut progress, date, cursor.take())
                .await?;

            progress.finish_date();
            if progress.should_emit() {
                info!("{}", progress.format_progress());
                progress.mark_emitted();
            }

            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }
        Ok(())
    }

    /// Drain one date, starting at `cursor`
    async fn collect_date(
        &self,
        state: &mut RunState,
        summary: &mut RunSummary,
        progress: &mut ProgressState,
        date: NaiveDate,
        mut cursor: Option<String>,
    ) -> Result<(), CollectorError> {
        let platform = self.source.platform();
        let mut pages: u32 = 0;
        debug!(date = %date, cursor = ?cursor, "Collecting date");

        loop {
            if self.shutdown_requested() {
                return Err(self.interrupted());
            }

            let mut unit = WorkUnit::new(date, cursor.clone());
            if pages >= self.config.max_pages_per_date {
                unit.transition(UnitState::Skipped);
                let gap = Gap::new(
                    date,
                    cursor,
                    0,
                    format!(
                        "more than {} pages for one date; cursor loop suspected",
                        self.config.max_pages_per_date
                    ),
                );
                return self.skip(state, gap, Classification::FatalInvalidRequest);
            }

            let page = match self.fetch_with_retry(&mut unit, summary).await? {
                FetchOutcome::Page(page) => page,
                FetchOutcome::Skip {
                    gap,
                    classification,
                } => {
                    unit.transition(UnitState::Skipped);
                    return self.skip(state, gap, classification);
                }
            };
            pages += 1;
            summary.pages_fetched += 1;
            summary.records_fetched += page.records.len() as u64;
            metrics::record_page_fetched(platform, page.records.len());

            unit.transition(UnitState::Transforming);
            let Page {
                records,
                next_cursor,
            } = page;
            let mut accepted = Vec::with_capacity(records.len());
            for raw in records {
                let record = match self.source.transform(raw) {
                    Ok(record) => record,
                    Err(e) => {
                        summary.records_invalid += 1;
                        metrics::record_invalid_record(platform, "transform");
                        warn!(date = %date, cursor = ?unit.page_cursor, error = %e, "Dropping record that failed to transform");
                        continue;
                    }
                };
                match self.source.validate(&record) {
                    Ok(()) => accepted.push(record),
                    Err(reason) => {
                        summary.records_invalid += 1;
                        metrics::record_invalid_record(platform, "validate");
                        warn!(
                            date = %date,
                            cursor = ?unit.page_cursor,
                            ad_id = %record.ad_id,
                            reason = %reason,
                            "Dropping invalid record"
                        );
                    }
                }
            }

            unit.transition(UnitState::Writing);
            for record in &accepted {
                state.sink.emit(record, date)?;
            }
            // Records must be durable before the checkpoint moves past them
            state.sink.commit()?;

            let written = accepted.len() as u64;
            summary.records_written += written;
            progress.add_records(written);
            metrics::record_records_written(platform, written);

            match next_cursor {
                Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                    state.checkpoint.advance_cursor(next.clone(), written);
                    unit.transition(UnitState::Skipped);
                    let gap = Gap::new(
                        date,
                        Some(next),
                        unit.attempt_count,
                        "source returned the same cursor again; cursor loop suspected",
                    );
                    return self.skip(state, gap, Classification::FatalInvalidRequest);
                }
                Some(next) => {
                    state.checkpoint.advance_cursor(next.clone(), written);
                    self.save_checkpoint(&state.checkpoint)?;
                    unit.transition(UnitState::Checkpointed);
                    debug!(date = %date, records = written, next_cursor = %next, "Page committed");
                    cursor = Some(next);
                }
                None => {
                    state.checkpoint.complete_date(date, written);
                    self.save_checkpoint(&state.checkpoint)?;
                    unit.transition(UnitState::Checkpointed);
                    summary.dates_completed += 1;
                    info!(
                        date = %date,
                        pages = pages,
                        total_records = state.checkpoint.total_records_written(),
                        "Date completed"
                    );
                    return Ok(());
                }
            }
        }
    }

    /// Fetch the page of `unit`, retrying retryable failures
    async fn fetch_with_retry(
        &self,
        unit: &mut WorkUnit,
        summary: &mut RunSummary,
    ) -> Result<FetchOutcome<S::Raw>, CollectorError> {
        let policy = &self.config.retry;

        loop {
            unit.attempt_count += 1;
            unit.transition(UnitState::Fetching);

            self.until_interrupted(self.limiter.acquire(1)).await?;
            let result = self
                .until_interrupted(self.source.fetch_page(
                    unit.date,
                    &self.config.country_code,
                    unit.cursor(),
                ))
                .await?;

            let error = match result {
                Ok(page) => return Ok(FetchOutcome::Page(page)),
                Err(error) => error,
            };

            let classification = classify(&error);
            let retry_after = match &error {
                SourceError::RateLimited { retry_after } => *retry_after,
                _ => None,
            };

            match policy.decide(classification, unit.attempt_count, retry_after) {
                RetryDecision::Retry { delay, attempt } => {
                    unit.transition(UnitState::Retrying);
                    summary.retries += 1;
                    metrics::record_retry_backoff(delay, attempt, classification.label());
                    warn!(
                        date = %unit.date,
                        cursor = ?unit.page_cursor,
                        attempt = unit.attempt_count,
                        max_attempts = policy.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        classification = %classification,
                        error = %error,
                        "Fetch failed, retrying after backoff"
                    );
                    self.until_interrupted(tokio::time::sleep(delay)).await?;
                }
                RetryDecision::Skip { reason } => {
                    let gap = Gap::new(
                        unit.date,
                        unit.page_cursor.clone(),
                        unit.attempt_count,
                        format!("{classification}: {error} ({reason})"),
                    );
                    return Ok(FetchOutcome::Skip {
                        gap,
                        classification,
                    });
                }
                RetryDecision::Abort { reason } => {
                    unit.transition(UnitState::Aborted);
                    error!(
                        date = %unit.date,
                        cursor = ?unit.page_cursor,
                        attempt = unit.attempt_count,
                        error = %error,
                        suggestion = classification.suggestion(),
                        "Fatal source failure, aborting run"
                    );
                    return Err(CollectorError::Auth {
                        date: unit.date,
                        message: format!("{error} ({reason})"),
                    });
                }
            }
        }
    }

    /// Record a skipped work unit and move past its date
    fn skip(
        &self,
        state: &mut RunState,
        gap: Gap,
        classification: Classification,
    ) -> Result<(), CollectorError> {
        warn!(
            date = %gap.date,
            cursor = ?gap.cursor,
            attempts = gap.attempts,
            reason = %gap.reason,
            suggestion = classification.suggestion(),
            "Skipping rest of date; recorded as gap"
        );
        metrics::record_skip(self.source.platform(), classification.label());

        state.sink.record_gap(gap.clone());
        state.checkpoint.skip_date(gap);
        state.sink.commit()?;
        self.save_checkpoint(&state.checkpoint)
    }

    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), CollectorError> {
        if self.config.dry_run {
            return Ok(());
        }
        self.store.save(checkpoint)?;
        metrics::record_checkpoint_saved();
        Ok(())
    }

    /// Run `fut` unless shutdown is requested first
    async fn until_interrupted<F: Future>(&self, fut: F) -> Result<F::Output, CollectorError> {
        let Some(shutdown) = &self.shutdown else {
            return Ok(fut.await);
        };
        if shutdown.is_shutdown_requested() {
            return Err(self.interrupted());
        }
        tokio::select! {
            biased;
            _ = shutdown.wait_for_shutdown() => Err(self.interrupted()),
            output = fut => Ok(output),
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }

    fn interrupted(&self) -> CollectorError {
        let reason = self.shutdown.as_ref().and_then(|s| s.reason());
        info!(reason = ?reason, "Stop requested - finishing at the last committed page");
        CollectorError::Interrupted {
            run_id: self.run_id.clone(),
        }
    }
}
