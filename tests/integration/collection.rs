//! End-to-end collection runs

use crate::common::{self, date, RawAd, ScriptedSource};
use ad_collector::collector::Collector;
use ad_collector::output::RunStatus;
use ad_collector::source::replay::ReplaySource;
use tempfile::TempDir;

#[tokio::test(start_paused = true)]
async fn test_full_run_writes_every_date_in_order() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::new()
        .with_generated(date(1), 2, 3)
        // Second date has no ads at all
        .with_generated(date(3), 1, 2);

    let collector = Collector::new(source, common::config(dir.path(), date(1), date(3))).unwrap();
    let summary = collector.run().await.unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.dates_total, 3);
    assert_eq!(summary.dates_completed, 3);
    assert_eq!(summary.pages_fetched, 4);
    assert_eq!(summary.records_written, 8);
    assert_eq!(summary.total_records_written, 8);
    assert!(summary.is_clean());

    let ids = common::written_ids(dir.path());
    assert_eq!(
        ids,
        vec!["01-0-0", "01-0-1", "01-0-2", "01-1-0", "01-1-1", "01-1-2", "03-0-0", "03-0-1"]
    );

    let manifest = common::manifest(dir.path()).unwrap();
    assert_eq!(manifest.status, RunStatus::Completed);
    assert_eq!(manifest.total_records, 8);
    assert!(manifest.finished_at.is_some());
    assert_eq!(manifest.batches[0].first_date, Some(date(1)));
    assert_eq!(manifest.batches[0].last_date, Some(date(3)));

    // Live checkpoint is archived on success
    let checkpoints = dir.path().join("checkpoints");
    assert!(!checkpoints.join("test-run.checkpoint.json").exists());
    assert!(checkpoints.join("test-run.checkpoint.completed.json").exists());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_records_are_counted_and_dropped() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::new().with_pages(
        date(1),
        vec![vec![
            RawAd::valid("a"),
            RawAd::invalid("b"),
            RawAd::broken("c"),
            RawAd::valid("d"),
        ]],
    );

    let collector = Collector::new(source, common::config(dir.path(), date(1), date(1))).unwrap();
    let summary = collector.run().await.unwrap();

    assert_eq!(summary.records_fetched, 4);
    assert_eq!(summary.records_written, 2);
    assert_eq!(summary.records_invalid, 2);
    // Invalid records are not gaps
    assert_eq!(summary.skipped(), 0);
    assert_eq!(common::written_ids(dir.path()), vec!["a", "d"]);
}

#[tokio::test(start_paused = true)]
async fn test_derived_run_id_addresses_the_same_namespace() {
    let dir = TempDir::new().unwrap();
    let config = common::config(dir.path(), date(1), date(2));
    let mut config = config.with_country("pl");
    config.run_id = None;

    let collector = Collector::new(ScriptedSource::new(), config.clone()).unwrap();
    assert_eq!(collector.run_id(), "test_pl_20241201_20241202");

    let again = Collector::new(ScriptedSource::new(), config).unwrap();
    assert_eq!(again.run_id(), collector.run_id());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_config_is_rejected_before_running() {
    let dir = TempDir::new().unwrap();
    let config = common::config(dir.path(), date(3), date(1));
    let err = Collector::new(ScriptedSource::new(), config).err().unwrap();
    assert!(err.to_string().contains("before start date"));
}

#[tokio::test]
async fn test_replay_source_end_to_end() {
    let dir = TempDir::new().unwrap();
    let fixtures = dir.path().join("fixtures").join("PL");
    std::fs::create_dir_all(&fixtures).unwrap();
    std::fs::write(
        fixtures.join("2024-12-01.json"),
        r#"[
            {"records": [{"id": "1", "page_name": "Fundacja", "spend_min": 100.0, "spend_max": 199.0}]},
            {"records": [{"ad_id": "2", "advertiser_name": "Partia"}]}
        ]"#,
    )
    .unwrap();
    std::fs::write(
        fixtures.join("2024-12-02.json"),
        r#"[{"records": [{"ad_id": "3", "advertiser_name": "Komitet"}]}]"#,
    )
    .unwrap();

    let source = ReplaySource::new(dir.path().join("fixtures"), "meta");
    let collector = Collector::new(source, common::config(dir.path(), date(1), date(3))).unwrap();
    let summary = collector.run().await.unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.pages_fetched, 4);
    assert_eq!(summary.records_written, 3);
    assert_eq!(common::written_ids(dir.path()), vec!["1", "2", "3"]);

    let first = std::fs::read_to_string(&common::batch_files(dir.path())[0]).unwrap();
    let record: serde_json::Value = serde_json::from_str(first.lines().next().unwrap()).unwrap();
    assert_eq!(record["platform"], "meta");
    assert_eq!(record["advertiser_name"], "Fundacja");
}
