//! Batch rotation, dry run and cursor guards

use crate::common::{self, date, ScriptedSource};
use ad_collector::collector::Collector;
use ad_collector::collector::config::DEFAULT_BATCH_MAX_BYTES;
use ad_collector::output::RunStatus;
use tempfile::TempDir;

#[tokio::test(start_paused = true)]
async fn test_batches_rotate_at_record_limit() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::new()
        .with_generated(date(1), 1, 4)
        .with_generated(date(2), 1, 2);
    let config = common::config(dir.path(), date(1), date(2))
        .with_batch_limits(5, DEFAULT_BATCH_MAX_BYTES);

    Collector::new(source, config).unwrap().run().await.unwrap();

    let files = common::batch_files(dir.path());
    assert_eq!(files.len(), 2);

    let manifest = common::manifest(dir.path()).unwrap();
    let counts: Vec<_> = manifest.batches.iter().map(|b| b.record_count).collect();
    assert_eq!(counts, vec![5, 1]);
    assert_eq!(manifest.batches[0].first_date, Some(date(1)));
    assert_eq!(manifest.batches[0].last_date, Some(date(2)));
    assert_eq!(manifest.batches[1].first_date, Some(date(2)));
    assert_eq!(manifest.batches[1].sequence, 2);

    for (batch, file) in manifest.batches.iter().zip(&files) {
        assert_eq!(
            batch.path,
            file.file_name().unwrap().to_string_lossy().to_string()
        );
        assert_eq!(batch.byte_size, std::fs::metadata(file).unwrap().len());
    }
}

#[tokio::test(start_paused = true)]
async fn test_batches_rotate_at_byte_limit() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::new().with_generated(date(1), 1, 6);
    // Roughly two records per batch
    let config = common::config(dir.path(), date(1), date(1)).with_batch_limits(1_000, 300);

    Collector::new(source, config).unwrap().run().await.unwrap();

    let manifest = common::manifest(dir.path()).unwrap();
    assert!(manifest.batches.len() >= 2);
    assert_eq!(manifest.total_records, 6);
    for batch in &manifest.batches {
        // A single oversized record still gets its own batch
        assert!(batch.byte_size <= 300 || batch.record_count == 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_dry_run_writes_nothing_and_counts_like_real_run() {
    let source = || {
        ScriptedSource::new()
            .with_generated(date(1), 2, 3)
            .with_generated(date(2), 1, 2)
    };

    let dry_dir = TempDir::new().unwrap();
    let dry = Collector::new(
        source(),
        common::config(dry_dir.path(), date(1), date(2)).with_dry_run(true),
    )
    .unwrap();
    let dry_summary = dry.run().await.unwrap();

    let real_dir = TempDir::new().unwrap();
    let real_summary = Collector::new(source(), common::config(real_dir.path(), date(1), date(2)))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(dry_summary.dry_run);
    assert_eq!(dry_summary.status, RunStatus::Completed);
    assert_eq!(dry_summary.pages_fetched, real_summary.pages_fetched);
    assert_eq!(dry_summary.records_written, real_summary.records_written);
    assert_eq!(dry_summary.records_written, 8);

    assert_eq!(common::file_count(&dry_dir.path().join("data")), 0);
    assert!(!dry_dir.path().join("checkpoints").exists());
}

#[tokio::test(start_paused = true)]
async fn test_dry_run_ignores_existing_checkpoint() {
    let dir = TempDir::new().unwrap();
    let source = || ScriptedSource::new().with_generated(date(1), 1, 2);

    // Leave a failed run's namespace behind
    let failing = source().failing(date(1), None, vec![crate::common::Fail::Auth]);
    Collector::new(failing, common::config(dir.path(), date(1), date(1)))
        .unwrap()
        .run()
        .await
        .unwrap_err();
    let before = common::manifest(dir.path()).unwrap();

    let dry = Collector::new(
        source(),
        common::config(dir.path(), date(1), date(1))
            .with_dry_run(true)
            .with_resume(true),
    )
    .unwrap();
    let summary = dry.run().await.unwrap();

    assert_eq!(summary.records_written, 2);
    assert_eq!(common::manifest(dir.path()).unwrap(), before);
    assert!(common::batch_files(dir.path()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_cursor_is_skipped_as_loop() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::new()
        .with_generated(date(1), 1, 1)
        .looping(date(2))
        .with_generated(date(3), 1, 1);

    let collector = Collector::new(source, common::config(dir.path(), date(1), date(3))).unwrap();
    let summary = collector.run().await.unwrap();

    assert_eq!(collector.source().calls_for(date(2), None), 1);
    assert_eq!(collector.source().calls_for(date(2), Some("c1")), 1);
    assert_eq!(summary.gaps.len(), 1);
    assert_eq!(summary.gaps[0].date, date(2));
    assert!(summary.gaps[0].reason.contains("cursor loop"));

    // Date 3 is still collected after the loop is cut
    assert_eq!(collector.source().calls_for(date(3), None), 1);
    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.records_written, 4);
}

#[tokio::test(start_paused = true)]
async fn test_page_ceiling_per_date() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::new().with_generated(date(1), 5, 1);
    let config = common::config(dir.path(), date(1), date(1)).with_max_pages_per_date(3);

    let collector = Collector::new(source, config).unwrap();
    let summary = collector.run().await.unwrap();

    assert_eq!(summary.pages_fetched, 3);
    assert_eq!(summary.records_written, 3);
    assert_eq!(summary.gaps.len(), 1);
    assert_eq!(summary.gaps[0].cursor.as_deref(), Some("c3"));
    assert_eq!(collector.source().calls_for(date(1), Some("c3")), 0);
}
