//! Replay source backed by recorded API pages on disk
//!
//! Layout: `<root>/<COUNTRY>/<YYYY-MM-DD>.json`, each file a JSON array of
//! pages (`[{"records": [...]}, ...]`). Page `n` is addressed by the cursor
//! `page-<n>`; the first page has no cursor. A date without a file is an
//! empty date.

use super::{AdSource, Page, SourceError, SourceResult};
use crate::AdRecord;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

const CURSOR_PREFIX: &str = "page-";

#[derive(Debug, Deserialize)]
struct RecordedPage {
    #[serde(default)]
    records: Vec<serde_json::Value>,
}

/// Source that replays recorded pages from a fixture directory
#[derive(Debug, Clone)]
pub struct ReplaySource {
    root: PathBuf,
    platform: String,
}

impl ReplaySource {
    /// Create a replay source rooted at `root`
    ///
    /// # Arguments
    /// * `root` - Fixture directory containing one sub-directory per country
    /// * `platform` - Platform name stamped on records that do not carry one
    pub fn new(root: impl Into<PathBuf>, platform: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            platform: platform.into(),
        }
    }

    /// Fixture directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn date_path(&self, date: NaiveDate, country_code: &str) -> PathBuf {
        self.root
            .join(country_code.to_uppercase())
            .join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    fn load_pages(&self, path: &Path) -> SourceResult<Vec<RecordedPage>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SourceError::Other(format!("Failed to read {}: {e}", path.display())))?;
        serde_json::from_str(&contents).map_err(|e| {
            SourceError::InvalidRequest(format!("Malformed fixture {}: {e}", path.display()))
        })
    }
}

/// Parse a `page-<n>` cursor into its page index
pub fn parse_cursor(cursor: &str) -> SourceResult<usize> {
    cursor
        .strip_prefix(CURSOR_PREFIX)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| SourceError::InvalidRequest(format!("Unrecognized cursor: {cursor}")))
}

#[async_trait]
impl AdSource for ReplaySource {
    type Raw = serde_json::Value;

    fn platform(&self) -> &str {
        &self.platform
    }

    async fn fetch_page(
        &self,
        date: NaiveDate,
        country_code: &str,
        cursor: Option<&str>,
    ) -> SourceResult<Page<Self::Raw>> {
        let path = self.date_path(date, country_code);
        let index = cursor.map(parse_cursor).transpose()?.unwrap_or(0);

        if !path.exists() {
            debug!(path = %path.display(), "No recorded pages for date");
            return Ok(Page::last(Vec::new()));
        }

        let mut pages = self.load_pages(&path)?;
        if index >= pages.len() {
            if index == 0 {
                return Ok(Page::last(Vec::new()));
            }
            return Err(SourceError::InvalidRequest(format!(
                "Cursor {CURSOR_PREFIX}{index} is past the last recorded page ({})",
                pages.len()
            )));
        }

        let has_more = index + 1 < pages.len();
        let records = std::mem::take(&mut pages[index].records);
        debug!(
            date = %date,
            page = index,
            records = records.len(),
            "Replaying recorded page"
        );

        if has_more {
            Ok(Page::more(records, format!("{CURSOR_PREFIX}{}", index + 1)))
        } else {
            Ok(Page::last(records))
        }
    }

    fn transform(&self, raw: Self::Raw) -> SourceResult<AdRecord> {
        let mut record: AdRecord = serde_json::from_value(raw.clone())
            .map_err(|e| SourceError::Transform(e.to_string()))?;
        if record.platform.is_empty() {
            record.platform = self.platform.clone();
        }
        record.raw_response = raw;
        record.extracted_at = Utc::now();
        Ok(record)
    }
}
