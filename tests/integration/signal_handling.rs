//! Graceful interruption

use crate::common::{self, date, Fail, ScriptedSource};
use ad_collector::collector::{Collector, RetryPolicy};
use ad_collector::output::RunStatus;
use ad_collector::resume::CheckpointStore;
use ad_collector::shutdown::{ShutdownCoordinator, StopReason};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_shutdown_before_start_fetches_nothing() {
    let dir = TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let collector = Collector::new(
        ScriptedSource::new().with_generated(date(1), 1, 1),
        common::config(dir.path(), date(1), date(2)),
    )
    .unwrap()
    .with_shutdown(shutdown);
    let err = collector.run().await.unwrap_err();

    assert!(err.is_interrupted());
    assert!(collector.source().calls().is_empty());
    assert_eq!(common::manifest(dir.path()).unwrap().status, RunStatus::Interrupted);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_backoff_stops_waiting() {
    let dir = TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();
    let source = ScriptedSource::new()
        .with_generated(date(1), 1, 1)
        .failing(date(1), None, vec![Fail::Transient; 3]);
    let config = common::config(dir.path(), date(1), date(1)).with_retry(
        RetryPolicy::default()
            .with_jitter(0.0)
            .with_delays(Duration::from_secs(30), Duration::from_secs(60)),
    );

    let collector = Collector::new(source, config)
        .unwrap()
        .with_shutdown(shutdown.clone());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown.request_shutdown();
    });

    let started = Instant::now();
    let err = collector.run().await.unwrap_err();

    assert!(err.is_interrupted());
    assert!(started.elapsed() < Duration::from_secs(30));
    assert_eq!(collector.source().calls_for(date(1), None), 1);
    assert_eq!(common::manifest(dir.path()).unwrap().status, RunStatus::Interrupted);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_while_throttled_stops_waiting() {
    let dir = TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();
    // One request per minute, a single token of burst
    let config = common::config(dir.path(), date(1), date(1)).with_rate_limit(1, 1);

    let collector = Collector::new(ScriptedSource::new().with_generated(date(1), 3, 1), config)
        .unwrap()
        .with_shutdown(shutdown.clone());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        shutdown.request_shutdown();
    });

    let started = Instant::now();
    let err = collector.run().await.unwrap_err();

    assert!(err.is_interrupted());
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(collector.source().calls().len(), 1);

    // The first page was committed before the interrupt
    assert_eq!(common::written_ids(dir.path()), vec!["01-0-0"]);
}

#[tokio::test(start_paused = true)]
async fn test_termination_mid_run_closes_open_batch_into_manifest() {
    let dir = TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();
    // One page per second after the first
    let config = common::config(dir.path(), date(1), date(2)).with_rate_limit(60, 1);
    let collector = Collector::new(ScriptedSource::new().with_generated(date(1), 4, 2), config)
        .unwrap()
        .with_shutdown(shutdown.clone());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        shutdown.request(StopReason::Terminate);
    });

    let err = collector.run().await.unwrap_err();
    assert!(err.is_interrupted());
    assert_eq!(collector.source().calls().len(), 2);

    let manifest = common::manifest(dir.path()).unwrap();
    assert_eq!(manifest.status, RunStatus::Interrupted);
    assert!(manifest.finished_at.is_some());
    assert_eq!(manifest.batches.len(), 1);
    assert_eq!(manifest.batches[0].record_count, 4);
    assert_eq!(manifest.total_records, 4);

    // Every batch file on disk is listed
    let files = common::batch_files(dir.path());
    assert_eq!(files.len(), 1);
    assert_eq!(
        manifest.batches[0].path,
        files[0].file_name().unwrap().to_string_lossy()
    );

    let checkpoint = CheckpointStore::new(dir.path().join("checkpoints"))
        .load("test-run")
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.last_cursor(), Some("c2"));
    assert_eq!(checkpoint.total_records_written(), 4);
}
