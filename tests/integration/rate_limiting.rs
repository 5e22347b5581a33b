//! Token-bucket throttling under concurrent and sequential load

use crate::common::{self, date, ScriptedSource};
use ad_collector::collector::{Collector, RateLimiter};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_grants_never_exceed_capacity_plus_refill() {
    let capacity = 5.0;
    let rate = 10.0;
    let limiter = RateLimiter::new(5, rate);
    let grants = Arc::new(Mutex::new(Vec::new()));
    let started = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let limiter = limiter.clone();
        let grants = grants.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..10 {
                limiter.acquire(1).await;
                grants.lock().await.push(Instant::now());
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut grants = grants.lock().await.clone();
    grants.sort();
    assert_eq!(grants.len(), 40);

    for (i, granted_at) in grants.iter().enumerate() {
        let window = granted_at.duration_since(started).as_secs_f64();
        let count = (i + 1) as f64;
        assert!(
            count <= capacity + rate * window + 1e-6,
            "grant {count} at {window:.3}s exceeds bound"
        );
    }

    // 40 tokens, 5 up front, the rest at 10/s
    assert!(started.elapsed() >= Duration::from_millis(3_500));
}

#[tokio::test(start_paused = true)]
async fn test_orchestrator_fetches_are_throttled() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::new().with_generated(date(1), 12, 1);
    let config = common::config(dir.path(), date(1), date(1)).with_rate_limit(60, 2);

    let collector = Collector::new(source, config).unwrap();
    let started = Instant::now();
    let summary = collector.run().await.unwrap();

    // Two requests from the burst, ten more at one per second
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(9_900), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(12), "elapsed {elapsed:?}");
    assert_eq!(summary.pages_fetched, 12);
    assert_eq!(summary.records_written, 12);
}

#[tokio::test(start_paused = true)]
async fn test_shared_limiter_bounds_two_collectors() {
    let first_dir = TempDir::new().unwrap();
    let second_dir = TempDir::new().unwrap();
    let shared = RateLimiter::per_minute(120, 1);

    let first = Collector::new(
        ScriptedSource::new().with_generated(date(1), 5, 1),
        common::config(first_dir.path(), date(1), date(1)),
    )
    .unwrap()
    .with_rate_limiter(shared.clone());
    let second = Collector::new(
        ScriptedSource::new().with_generated(date(1), 5, 1),
        common::config(second_dir.path(), date(1), date(1)),
    )
    .unwrap()
    .with_rate_limiter(shared);

    let started = Instant::now();
    let (a, b) = tokio::join!(first.run(), second.run());
    a.unwrap();
    b.unwrap();

    // Ten requests through one bucket of 2/s with a single token of burst
    assert!(started.elapsed() >= Duration::from_millis(4_400));
}
