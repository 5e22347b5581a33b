//! Retry, skip and abort behavior against failing sources

use crate::common::{self, date, Fail, ScriptedSource};
use ad_collector::collector::{Collector, CollectorError, RetryPolicy};
use ad_collector::output::RunStatus;
use ad_collector::resume::CheckpointStore;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_with_backoff() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::new()
        .with_generated(date(1), 1, 2)
        .failing(date(1), None, vec![Fail::Transient, Fail::ServerError]);

    let collector = Collector::new(source, common::config(dir.path(), date(1), date(1))).unwrap();
    let started = Instant::now();
    let summary = collector.run().await.unwrap();

    // 1s then 2s with jitter disabled
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(summary.retries, 2);
    assert_eq!(collector.source().calls_for(date(1), None), 3);
    assert_eq!(summary.records_written, 2);
    assert!(summary.is_clean());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_skip_date_and_continue() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::new()
        .with_generated(date(1), 1, 1)
        .with_generated(date(2), 1, 1)
        .with_generated(date(3), 1, 1)
        .failing(date(2), None, vec![Fail::Transient; 5]);

    let collector = Collector::new(source, common::config(dir.path(), date(1), date(3))).unwrap();
    let summary = collector.run().await.unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(collector.source().calls_for(date(2), None), 5);
    assert_eq!(summary.retries, 4);
    assert_eq!(summary.skipped(), 1);
    assert_eq!(summary.dates_completed as usize + summary.skipped(), summary.dates_total as usize);
    assert!(!summary.is_clean());

    let gap = &summary.gaps[0];
    assert_eq!(gap.date, date(2));
    assert_eq!(gap.cursor, None);
    assert_eq!(gap.attempts, 5);
    assert!(gap.reason.contains("max attempts"), "reason: {}", gap.reason);

    // Later dates were still collected and the gap is in the manifest
    assert_eq!(common::written_ids(dir.path()), vec!["01-0-0", "03-0-0"]);
    let manifest = common::manifest(dir.path()).unwrap();
    assert_eq!(manifest.gaps, summary.gaps);
}

#[tokio::test(start_paused = true)]
async fn test_auth_failure_aborts_run() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::new()
        .with_generated(date(1), 1, 2)
        .with_generated(date(2), 1, 2)
        .failing(date(2), None, vec![Fail::Auth]);

    let collector = Collector::new(source, common::config(dir.path(), date(1), date(3))).unwrap();
    let err = collector.run().await.unwrap_err();

    assert!(matches!(err, CollectorError::Auth { date: d, .. } if d == date(2)));
    assert!(!err.is_conflict());
    assert_eq!(collector.source().calls_for(date(2), None), 1);
    assert_eq!(collector.source().calls_for(date(3), None), 0);

    assert_eq!(common::manifest(dir.path()).unwrap().status, RunStatus::Failed);
    let checkpoint = CheckpointStore::new(dir.path().join("checkpoints"))
        .load("test-run")
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.last_completed_date(), Some(date(1)));
    assert_eq!(checkpoint.total_records_written(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_hint_is_honored() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::new().with_generated(date(1), 1, 1).failing(
        date(1),
        None,
        vec![Fail::RateLimited(Some(Duration::from_secs(45)))],
    );

    let collector = Collector::new(source, common::config(dir.path(), date(1), date(1))).unwrap();
    let started = Instant::now();
    let summary = collector.run().await.unwrap();

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(45), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(46), "elapsed {elapsed:?}");
    assert_eq!(summary.retries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_without_hint_uses_backoff() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::new()
        .with_generated(date(1), 1, 1)
        .failing(date(1), None, vec![Fail::RateLimited(None)]);

    let collector = Collector::new(source, common::config(dir.path(), date(1), date(1))).unwrap();
    let started = Instant::now();
    collector.run().await.unwrap();

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_request_skips_without_retrying() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::new()
        .with_generated(date(1), 2, 1)
        .failing(date(1), Some("c1"), vec![Fail::InvalidRequest]);

    let collector = Collector::new(source, common::config(dir.path(), date(1), date(2))).unwrap();
    let summary = collector.run().await.unwrap();

    assert_eq!(collector.source().calls_for(date(1), Some("c1")), 1);
    assert_eq!(summary.retries, 0);
    assert_eq!(summary.gaps.len(), 1);
    assert_eq!(summary.gaps[0].cursor.as_deref(), Some("c1"));
    // First page of the date was committed before the skip
    assert_eq!(common::written_ids(dir.path()), vec!["01-0-0"]);
    assert_eq!(collector.source().calls_for(date(2), None), 1);
}

#[test]
fn test_jittered_backoff_is_monotone_and_capped() {
    let policy = RetryPolicy::default()
        .with_delays(Duration::from_millis(500), Duration::from_secs(30))
        .with_jitter(0.3);

    for _ in 0..200 {
        let delays: Vec<_> = (0..10).map(|retry| policy.backoff_delay(retry)).collect();
        for pair in delays.windows(2) {
            assert!(pair[0] <= pair[1], "{delays:?}");
        }
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(30)));
        assert!(delays[0] >= Duration::from_millis(350));
    }
}
