//! Shared helpers for integration tests

#![allow(dead_code)]

use ad_collector::collector::{CollectorConfig, RetryPolicy};
use ad_collector::output::{path, Manifest};
use ad_collector::shutdown::SharedShutdown;
use ad_collector::source::{AdSource, Page, SourceError, SourceResult};
use ad_collector::AdRecord;
use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

pub fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 12, day).unwrap()
}

/// Raw record as the scripted provider returns it
#[derive(Debug, Clone)]
pub struct RawAd {
    pub id: String,
    pub advertiser: String,
}

impl RawAd {
    pub fn valid(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            advertiser: "Komitet Wyborczy".to_string(),
        }
    }

    /// Fails validation (blank advertiser)
    pub fn invalid(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            advertiser: " ".to_string(),
        }
    }

    /// Fails transform
    pub fn broken(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            advertiser: "!broken".to_string(),
        }
    }
}

/// Failure to inject before a page succeeds
#[derive(Debug, Clone)]
pub enum Fail {
    Transient,
    ServerError,
    RateLimited(Option<Duration>),
    Auth,
    InvalidRequest,
}

impl Fail {
    fn to_error(&self) -> SourceError {
        match self {
            Fail::Transient => SourceError::Timeout("read timed out".into()),
            Fail::ServerError => SourceError::Server {
                status: 503,
                message: "service unavailable".into(),
            },
            Fail::RateLimited(retry_after) => SourceError::RateLimited {
                retry_after: *retry_after,
            },
            Fail::Auth => SourceError::Auth("access token expired".into()),
            Fail::InvalidRequest => SourceError::InvalidRequest("unsupported country".into()),
        }
    }
}

type Key = (NaiveDate, Option<String>);

/// In-memory provider serving scripted pages
///
/// Pages of a date are addressed by cursors `c1`, `c2`, ...; the first page
/// has no cursor.
#[derive(Default)]
pub struct ScriptedSource {
    pages: HashMap<NaiveDate, Vec<Vec<RawAd>>>,
    failures: Mutex<HashMap<Key, VecDeque<Fail>>>,
    calls: Mutex<Vec<Key>>,
    looping_dates: Vec<NaiveDate>,
    interrupt: Option<(usize, SharedShutdown)>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `pages` for `date`
    pub fn with_pages(mut self, date: NaiveDate, pages: Vec<Vec<RawAd>>) -> Self {
        self.pages.insert(date, pages);
        self
    }

    /// `pages` pages of `per_page` valid records, ids `<day>-<page>-<n>`
    pub fn with_generated(self, date: NaiveDate, pages: usize, per_page: usize) -> Self {
        let day = date.format("%d").to_string();
        let generated = (0..pages)
            .map(|p| {
                (0..per_page)
                    .map(|n| RawAd::valid(format!("{day}-{p}-{n}")))
                    .collect()
            })
            .collect();
        self.with_pages(date, generated)
    }

    /// Fail the page at `cursor` of `date` with each of `failures` before serving it
    pub fn failing(self, date: NaiveDate, cursor: Option<&str>, failures: Vec<Fail>) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert((date, cursor.map(str::to_string)), failures.into());
        self
    }

    /// Hand out the same cursor forever for `date`
    pub fn looping(mut self, date: NaiveDate) -> Self {
        self.looping_dates.push(date);
        self
    }

    /// Request shutdown once `calls` successful fetches have been served
    pub fn interrupt_after(mut self, calls: usize, shutdown: SharedShutdown) -> Self {
        self.interrupt = Some((calls, shutdown));
        self
    }

    /// Every fetch made, in order
    pub fn calls(&self) -> Vec<Key> {
        self.calls.lock().unwrap().clone()
    }

    /// Fetches made for one page
    pub fn calls_for(&self, date: NaiveDate, cursor: Option<&str>) -> usize {
        let cursor = cursor.map(str::to_string);
        self.calls()
            .iter()
            .filter(|(d, c)| *d == date && *c == cursor)
            .count()
    }
}

fn page_index(cursor: Option<&str>) -> usize {
    cursor
        .and_then(|c| c.strip_prefix('c'))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl AdSource for ScriptedSource {
    type Raw = RawAd;

    fn platform(&self) -> &str {
        "test"
    }

    async fn fetch_page(
        &self,
        date: NaiveDate,
        _country_code: &str,
        cursor: Option<&str>,
    ) -> SourceResult<Page<RawAd>> {
        let key = (date, cursor.map(str::to_string));
        self.calls.lock().unwrap().push(key.clone());

        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front);
        if let Some(failure) = failure {
            return Err(failure.to_error());
        }

        if self.looping_dates.contains(&date) {
            return Ok(Page::more(vec![RawAd::valid(format!("loop-{date}"))], "c1"));
        }

        let pages = self.pages.get(&date).cloned().unwrap_or_default();
        let index = page_index(cursor);
        let records = pages.get(index).cloned().unwrap_or_default();
        let page = if index + 1 < pages.len() {
            Page::more(records, format!("c{}", index + 1))
        } else {
            Page::last(records)
        };

        if let Some((after, shutdown)) = &self.interrupt {
            let served = self.calls.lock().unwrap().len();
            if served >= *after {
                shutdown.request_shutdown();
            }
        }
        Ok(page)
    }

    fn transform(&self, raw: RawAd) -> SourceResult<AdRecord> {
        if raw.advertiser.starts_with('!') {
            return Err(SourceError::Transform(format!("unmappable record {}", raw.id)));
        }
        let mut record = AdRecord::new(raw.id, "test", raw.advertiser);
        record.extracted_at = Utc.with_ymd_and_hms(2024, 12, 8, 12, 0, 0).unwrap();
        Ok(record)
    }
}

/// Config rooted in `dir`, generous rate limit, default retry shape
pub fn config(dir: &Path, start: NaiveDate, end: NaiveDate) -> CollectorConfig {
    CollectorConfig::new(start, end)
        .with_run_id("test-run")
        .with_rate_limit(6_000, 100)
        .with_retry(RetryPolicy::default().with_jitter(0.0))
        .with_output_dir(dir.join("data"))
        .with_checkpoint_dir(dir.join("checkpoints"))
}

pub fn run_dir(dir: &Path) -> std::path::PathBuf {
    path::run_dir(&dir.join("data"), "test-run")
}

pub fn manifest(dir: &Path) -> Option<Manifest> {
    Manifest::load(&path::manifest_path(&run_dir(dir), "test-run")).unwrap()
}

/// Every `.ndjson` file in the run directory
pub fn batch_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let run_dir = run_dir(dir);
    if !run_dir.exists() {
        return Vec::new();
    }
    let mut files: Vec<_> = std::fs::read_dir(run_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "ndjson"))
        .collect();
    // Sequence numbers are zero-padded at the end of the name
    files.sort_by_key(|p| {
        let name = p.file_name().unwrap().to_string_lossy().to_string();
        name[name.len() - "00001.ndjson".len()..].to_string()
    });
    files
}

/// Ad ids across all batch files, in write order
pub fn written_ids(dir: &Path) -> Vec<String> {
    batch_files(dir)
        .iter()
        .flat_map(|file| {
            std::fs::read_to_string(file)
                .unwrap()
                .lines()
                .map(|line| {
                    let value: serde_json::Value = serde_json::from_str(line).unwrap();
                    value["ad_id"].as_str().unwrap().to_string()
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Number of files in a directory, 0 if it does not exist
pub fn file_count(dir: &Path) -> usize {
    if !dir.exists() {
        return 0;
    }
    std::fs::read_dir(dir).unwrap().count()
}
