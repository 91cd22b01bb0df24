//! Persisted records: sites, tracked URLs and discovery runs

use crate::error::{Error, ErrorCategory, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

fn default_active() -> bool {
    true
}

fn default_frequency() -> u32 {
    crate::config::default_frequency_minutes()
}

fn default_cooldown() -> u32 {
    crate::config::default_reextract_cooldown_days()
}

/// How a site's pages are retrieved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStrategy {
    /// Plain HTTP request, markup is server rendered
    #[default]
    Static,
    /// Headless browser, links only appear after scripts run
    Rendered,
}

impl std::fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchStrategy::Static => write!(f, "static"),
            FetchStrategy::Rendered => write!(f, "rendered"),
        }
    }
}

impl FromStr for FetchStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "static" => Ok(FetchStrategy::Static),
            "rendered" | "browser" => Ok(FetchStrategy::Rendered),
            _ => Err(Error::Config(format!("Unknown fetch strategy: {}", s))),
        }
    }
}

/// Selectors used on a listing page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingSelectors {
    /// Elements carrying (or containing) article links
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Selectors used on an article page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentSelectors {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
}

/// A monitored outlet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub base_url: String,
    pub listing_url: String,
    /// Article page used when calibrating content selectors
    #[serde(default)]
    pub test_url: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub listing: ListingSelectors,
    #[serde(default)]
    pub content: ContentSelectors,
    #[serde(default = "default_frequency")]
    pub frequency_minutes: u32,
    #[serde(default)]
    pub fetch_strategy: FetchStrategy,
    /// Selector a rendered fetch waits for before reading the DOM
    #[serde(default)]
    pub wait_for_selector: Option<String>,
    #[serde(default)]
    pub reextract_allowed: bool,
    #[serde(default = "default_cooldown")]
    pub reextract_cooldown_days: u32,
    /// Only advanced after a discovery run completes
    #[serde(default)]
    pub last_successful_run: Option<DateTime<Utc>>,
}

impl SiteConfig {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>, listing_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            base_url: base_url.into(),
            listing_url: listing_url.into(),
            test_url: None,
            active: true,
            listing: ListingSelectors::default(),
            content: ContentSelectors::default(),
            frequency_minutes: default_frequency(),
            fetch_strategy: FetchStrategy::Static,
            wait_for_selector: None,
            reextract_allowed: false,
            reextract_cooldown_days: default_cooldown(),
            last_successful_run: None,
        }
    }

    pub fn frequency(&self) -> Duration {
        Duration::minutes(i64::from(self.frequency_minutes))
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Raw `sites` row
#[derive(Debug, Clone, FromRow)]
pub struct SiteRow {
    pub id: String,
    pub name: Option<String>,
    pub base_url: String,
    pub listing_url: String,
    pub test_url: Option<String>,
    pub active: bool,
    pub listing_selectors_json: String,
    pub content_selectors_json: String,
    pub frequency_minutes: i64,
    pub fetch_strategy: String,
    pub wait_for_selector: Option<String>,
    pub reextract_allowed: bool,
    pub reextract_cooldown_days: i64,
    pub last_successful_run: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<SiteRow> for SiteConfig {
    type Error = Error;

    fn try_from(row: SiteRow) -> Result<Self> {
        Ok(SiteConfig {
            listing: serde_json::from_str(&row.listing_selectors_json)?,
            content: serde_json::from_str(&row.content_selectors_json)?,
            fetch_strategy: row.fetch_strategy.parse()?,
            last_successful_run: row.last_successful_run.as_deref().map(parse_timestamp).transpose()?,
            frequency_minutes: u32::try_from(row.frequency_minutes)
                .map_err(|_| Error::Config(format!("Invalid frequency for site {}", row.id)))?,
            reextract_cooldown_days: u32::try_from(row.reextract_cooldown_days).unwrap_or(0),
            id: row.id,
            name: row.name,
            base_url: row.base_url,
            listing_url: row.listing_url,
            test_url: row.test_url,
            active: row.active,
            wait_for_selector: row.wait_for_selector,
            reextract_allowed: row.reextract_allowed,
        })
    }
}

/// Parse an RFC 3339 timestamp column
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Parsing(format!("Invalid timestamp '{}': {}", value, e)))
}

/// Lifecycle of a tracked URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingStatus {
    Discovered,
    Queued,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl TrackingStatus {
    pub const ALL: [TrackingStatus; 6] = [
        TrackingStatus::Discovered,
        TrackingStatus::Queued,
        TrackingStatus::Processing,
        TrackingStatus::Completed,
        TrackingStatus::Failed,
        TrackingStatus::Skipped,
    ];

    /// Records in these states are already on their way downstream
    pub fn is_in_flight(self) -> bool {
        matches!(self, TrackingStatus::Queued | TrackingStatus::Processing)
    }
}

impl std::fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackingStatus::Discovered => write!(f, "discovered"),
            TrackingStatus::Queued => write!(f, "queued"),
            TrackingStatus::Processing => write!(f, "processing"),
            TrackingStatus::Completed => write!(f, "completed"),
            TrackingStatus::Failed => write!(f, "failed"),
            TrackingStatus::Skipped => write!(f, "skipped"),
        }
    }
}

impl FromStr for TrackingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "discovered" => Ok(TrackingStatus::Discovered),
            "queued" => Ok(TrackingStatus::Queued),
            "processing" => Ok(TrackingStatus::Processing),
            "completed" => Ok(TrackingStatus::Completed),
            "failed" => Ok(TrackingStatus::Failed),
            "skipped" => Ok(TrackingStatus::Skipped),
            _ => Err(Error::Config(format!("Unknown tracking status: {}", s))),
        }
    }
}

/// One URL ever discovered for a site
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UrlTrackingRecord {
    pub id: String,
    pub site_id: String,
    pub url: String,
    pub url_hash: String,
    pub domain: String,
    pub status: String,
    pub first_discovered_at: String,
    pub last_seen_at: String,
    pub times_discovered: i64,
    pub title: Option<String>,
    pub image_url: Option<String>,
    pub reextract_allowed: bool,
    pub reextract_cooldown_days: i64,
    pub next_reextract_at: Option<String>,
    pub content_id: Option<String>,
    pub attempts: i64,
    pub last_failure: Option<String>,
    pub updated_at: String,
}

impl UrlTrackingRecord {
    pub fn get_status(&self) -> Result<TrackingStatus> {
        self.status.parse()
    }

    /// Whether the re-extraction policy lets this record go back on the queue
    pub fn reextraction_due(&self, now: DateTime<Utc>) -> bool {
        if !self.reextract_allowed {
            return false;
        }
        if self.get_status().map(TrackingStatus::is_in_flight).unwrap_or(true) {
            return false;
        }
        match self.next_reextract_at.as_deref().map(parse_timestamp) {
            Some(Ok(next)) => now >= next,
            Some(Err(_)) => false,
            None => true,
        }
    }
}

/// Values needed to create a tracking record on first sighting
#[derive(Debug, Clone)]
pub struct NewTrackingRecord {
    pub site_id: String,
    pub url: String,
    pub url_hash: String,
    pub domain: String,
    pub title: Option<String>,
    pub image_url: Option<String>,
    pub reextract_allowed: bool,
    pub reextract_cooldown_days: u32,
}

impl NewTrackingRecord {
    pub fn into_record(self, now: DateTime<Utc>) -> UrlTrackingRecord {
        let stamp = now.to_rfc3339();
        let next_reextract_at = self
            .reextract_allowed
            .then(|| (now + Duration::days(i64::from(self.reextract_cooldown_days))).to_rfc3339());
        UrlTrackingRecord {
            id: Uuid::new_v4().to_string(),
            site_id: self.site_id,
            url: self.url,
            url_hash: self.url_hash,
            domain: self.domain,
            status: TrackingStatus::Discovered.to_string(),
            first_discovered_at: stamp.clone(),
            last_seen_at: stamp.clone(),
            times_discovered: 1,
            title: self.title,
            image_url: self.image_url,
            reextract_allowed: self.reextract_allowed,
            reextract_cooldown_days: i64::from(self.reextract_cooldown_days),
            next_reextract_at,
            content_id: None,
            attempts: 0,
            last_failure: None,
            updated_at: stamp,
        }
    }
}

/// Result of an idempotent tracking upsert
#[derive(Debug, Clone)]
pub enum TrackingUpsert {
    /// First sighting, the record was just created
    Created(UrlTrackingRecord),
    /// Already tracked, `last_seen_at` and the discovery count were bumped
    Existing(UrlTrackingRecord),
}

/// Outcome of a discovery run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Success,
    Partial,
    Failed,
}

impl RunOutcome {
    /// Success and partial runs both count as completed
    pub fn is_completed(self) -> bool {
        !matches!(self, RunOutcome::Failed)
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Success => write!(f, "success"),
            RunOutcome::Partial => write!(f, "partial"),
            RunOutcome::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunOutcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "success" => Ok(RunOutcome::Success),
            "partial" => Ok(RunOutcome::Partial),
            "failed" => Ok(RunOutcome::Failed),
            _ => Err(Error::Config(format!("Unknown run outcome: {}", s))),
        }
    }
}

/// One scheduler execution, never mutated after insert
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DiscoveryRunLog {
    pub id: String,
    pub site_id: String,
    pub listing_url: String,
    pub outcome: String,
    pub found: i64,
    pub new_count: i64,
    pub duplicate: i64,
    pub skipped: i64,
    pub queued: i64,
    pub fetch_ms: i64,
    pub parse_ms: i64,
    pub total_ms: i64,
    pub fetch_method: Option<String>,
    pub http_status: Option<i64>,
    pub sample_urls_json: Option<String>,
    pub error_category: Option<String>,
    pub error_message: Option<String>,
    pub started_at: String,
    pub finished_at: String,
}

impl DiscoveryRunLog {
    pub fn new(site_id: &str, listing_url: &str, outcome: RunOutcome, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            site_id: site_id.to_string(),
            listing_url: listing_url.to_string(),
            outcome: outcome.to_string(),
            found: 0,
            new_count: 0,
            duplicate: 0,
            skipped: 0,
            queued: 0,
            fetch_ms: 0,
            parse_ms: 0,
            total_ms: 0,
            fetch_method: None,
            http_status: None,
            sample_urls_json: None,
            error_category: None,
            error_message: None,
            started_at: started_at.to_rfc3339(),
            finished_at: Utc::now().to_rfc3339(),
        }
    }

    /// A failed run carrying the error and its category
    pub fn failed(site_id: &str, listing_url: &str, started_at: DateTime<Utc>, error: &Error) -> Self {
        let mut log = Self::new(site_id, listing_url, RunOutcome::Failed, started_at);
        log.error_category = Some(error.category().to_string());
        log.error_message = Some(error.to_string());
        log.total_ms = (Utc::now() - started_at).num_milliseconds().max(0);
        log
    }

    pub fn get_outcome(&self) -> Result<RunOutcome> {
        self.outcome.parse()
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        self.error_category
            .as_deref()
            .and_then(|c| serde_json::from_value(serde_json::Value::String(c.to_string())).ok())
    }

    pub fn sample_urls(&self) -> Vec<String> {
        self.sample_urls_json
            .as_ref()
            .and_then(|j| serde_json::from_str(j).ok())
            .unwrap_or_default()
    }
}

/// Page request for list endpoints (1-based)
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, per_page: 20 }
    }
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, 500),
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page.max(1) - 1) * i64::from(self.per_page)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.per_page)
    }
}

/// One page of results plus the total count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u32 {
        if self.per_page == 0 {
            return 0;
        }
        ((self.total.max(0) as u64).div_ceil(u64::from(self.per_page))) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_from_toml_defaults() {
        let site: SiteConfig = toml::from_str(
            r#"
id = "daily"
base_url = "https://daily.example"
listing_url = "https://daily.example/news"

[listing]
link = "article a"
"#,
        )
        .unwrap();

        assert!(site.active);
        assert_eq!(site.fetch_strategy, FetchStrategy::Static);
        assert_eq!(site.listing.link, "article a");
        assert_eq!(site.frequency_minutes, 60);
        assert!(site.last_successful_run.is_none());
    }

    #[test]
    fn test_reextraction_due_guards_in_flight() {
        let now = Utc::now();
        let mut record = NewTrackingRecord {
            site_id: "s".to_string(),
            url: "https://a.example/1".to_string(),
            url_hash: "h".to_string(),
            domain: "a.example".to_string(),
            title: None,
            image_url: None,
            reextract_allowed: true,
            reextract_cooldown_days: 0,
        }
        .into_record(now - Duration::days(1));

        record.status = TrackingStatus::Completed.to_string();
        assert!(record.reextraction_due(now));

        record.status = TrackingStatus::Processing.to_string();
        assert!(!record.reextraction_due(now));

        record.status = TrackingStatus::Completed.to_string();
        record.next_reextract_at = Some((now + Duration::days(2)).to_rfc3339());
        assert!(!record.reextraction_due(now));

        record.reextract_allowed = false;
        record.next_reextract_at = None;
        assert!(!record.reextraction_due(now));
    }

    #[test]
    fn test_page_math() {
        let req = PageRequest::new(3, 10);
        assert_eq!(req.offset(), 20);
        let page: Page<u8> = Page { items: vec![], total: 21, page: 3, per_page: 10 };
        assert_eq!(page.total_pages(), 3);
    }
}
