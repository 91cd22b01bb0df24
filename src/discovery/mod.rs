//! URL discovery and reconciliation against the tracking store
//!
//! One run fetches a site's listing page, extracts article links with the
//! declared selector and reconciles every link against the tracking store:
//! unseen URLs are created and queued, known URLs are bumped and optionally
//! re-queued once their re-extraction cooldown elapsed. Per-URL failures are
//! counted as skipped; whole-batch failures produce a failed run log. The
//! tracker never retries.

mod url;

pub use self::url::*;

use crate::config::{Config, DiscoveryConfig, FetchConfig};
use crate::error::{Error, Result};
use crate::fetch::{FetchOptions, FetchedPage, PageFetcher};
use crate::meta::{
    DiscoveryRunLog, MetaDb, NewTrackingRecord, RunOutcome, SiteConfig, TrackingStatus, TrackingUpsert,
};
use ::url::Url;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Summary of one discovery run
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryReport {
    pub site_id: String,
    pub success: bool,
    pub found: usize,
    pub new: usize,
    pub duplicate: usize,
    pub skipped: usize,
    pub queued: usize,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub outcome: Option<RunOutcome>,
    pub run_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reconciled {
    New,
    Duplicate,
    Requeued,
}

#[derive(Debug, Default)]
struct Tally {
    found: usize,
    new: usize,
    duplicate: usize,
    skipped: usize,
    queued: usize,
    sample_urls: Vec<String>,
}

/// Listing-page discovery for one site at a time
#[derive(Clone)]
pub struct DiscoveryTracker {
    db: MetaDb,
    fetcher: Arc<dyn PageFetcher>,
    fetch: FetchConfig,
    discovery: DiscoveryConfig,
}

impl DiscoveryTracker {
    pub fn new(db: MetaDb, fetcher: Arc<dyn PageFetcher>, config: &Config) -> Self {
        Self {
            db,
            fetcher,
            fetch: config.fetch.clone(),
            discovery: config.discovery.clone(),
        }
    }

    /// Run discovery and append one run log.
    ///
    /// A whole-batch failure is reported with `success == false`; `Err` is
    /// only returned when the run log itself cannot be written.
    pub async fn discover(&self, site: &SiteConfig) -> Result<DiscoveryReport> {
        let started_at = Utc::now();
        let timer = Instant::now();
        info!("Discovering {} from {}", site.id, site.listing_url);

        match self.run(site, started_at, timer).await {
            Ok((log, report)) => {
                self.db.insert_run(&log).await?;
                info!(
                    "Discovery for {} finished ({}): found={} new={} duplicate={} skipped={} queued={}",
                    site.id, log.outcome, report.found, report.new, report.duplicate, report.skipped, report.queued
                );
                Ok(report)
            }
            Err(e) => {
                error!("Discovery for {} failed: {}", site.id, e);
                let log = DiscoveryRunLog::failed(&site.id, &site.listing_url, started_at, &e);
                self.db.insert_run(&log).await?;
                Ok(DiscoveryReport {
                    site_id: site.id.clone(),
                    success: false,
                    duration_ms: timer.elapsed().as_millis() as u64,
                    error: Some(e.to_string()),
                    outcome: Some(RunOutcome::Failed),
                    run_id: log.id,
                    ..DiscoveryReport::default()
                })
            }
        }
    }

    async fn run(
        &self,
        site: &SiteConfig,
        started_at: DateTime<Utc>,
        timer: Instant,
    ) -> Result<(DiscoveryRunLog, DiscoveryReport)> {
        let base = Url::parse(&site.base_url)
            .map_err(|e| Error::Parsing(format!("Invalid base URL '{}': {}", site.base_url, e)))?;

        let opts = FetchOptions::for_site(&self.fetch, site);
        let page: FetchedPage = self
            .fetcher
            .fetch(&site.listing_url, site.fetch_strategy, &opts)
            .await?;

        let parse_timer = Instant::now();
        let extract = extract_listing_links(&page.html, &site.listing)?;
        if extract.matched == 0 {
            return Err(Error::Selector(format!(
                "link selector '{}' matched no elements on {}",
                site.listing.link, site.listing_url
            )));
        }
        debug!("Selector '{}' matched {} elements", site.listing.link, extract.matched);

        let now = Utc::now();
        let mut tally = Tally::default();
        let mut seen: HashSet<String> = HashSet::new();

        for link in extract.links {
            let Some(href) = link.href else {
                debug!("Matched element without href");
                tally.found += 1;
                tally.skipped += 1;
                continue;
            };

            let resolved = match resolve_href(&base, &href) {
                Ok(url) => url,
                Err(e) => {
                    debug!("Skipping href '{}': {}", href, e);
                    tally.found += 1;
                    tally.skipped += 1;
                    continue;
                }
            };

            let canonical = canonicalize_url(&resolved);
            if !seen.insert(canonical.clone()) {
                continue;
            }
            tally.found += 1;

            match self.reconcile(site, &resolved, &canonical, link.title, link.image, now).await {
                Ok(outcome) => {
                    if tally.sample_urls.len() < self.discovery.sample_urls {
                        tally.sample_urls.push(canonical.clone());
                    }
                    match outcome {
                        Reconciled::New => {
                            tally.new += 1;
                            tally.queued += 1;
                        }
                        Reconciled::Duplicate => tally.duplicate += 1,
                        Reconciled::Requeued => {
                            tally.duplicate += 1;
                            tally.queued += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!("Skipping {}: {}", canonical, e);
                    tally.skipped += 1;
                }
            }
        }

        let parse_ms = parse_timer.elapsed().as_millis() as i64;
        let total_ms = timer.elapsed().as_millis() as i64;
        let outcome = if tally.skipped > 0 {
            RunOutcome::Partial
        } else {
            RunOutcome::Success
        };

        let mut log = DiscoveryRunLog::new(&site.id, &site.listing_url, outcome, started_at);
        log.found = tally.found as i64;
        log.new_count = tally.new as i64;
        log.duplicate = tally.duplicate as i64;
        log.skipped = tally.skipped as i64;
        log.queued = tally.queued as i64;
        log.fetch_ms = page.elapsed_ms as i64;
        log.parse_ms = parse_ms;
        log.total_ms = total_ms;
        log.fetch_method = Some(page.method.to_string());
        log.http_status = page.status.map(i64::from);
        log.sample_urls_json = Some(serde_json::to_string(&tally.sample_urls)?);

        let report = DiscoveryReport {
            site_id: site.id.clone(),
            success: outcome.is_completed(),
            found: tally.found,
            new: tally.new,
            duplicate: tally.duplicate,
            skipped: tally.skipped,
            queued: tally.queued,
            duration_ms: total_ms.max(0) as u64,
            error: None,
            outcome: Some(outcome),
            run_id: log.id.clone(),
        };

        Ok((log, report))
    }

    async fn reconcile(
        &self,
        site: &SiteConfig,
        resolved: &Url,
        canonical: &str,
        title: Option<String>,
        image: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Reconciled> {
        let reextract_allowed = site.reextract_allowed || self.discovery.reextract_allowed;
        let candidate = NewTrackingRecord {
            site_id: site.id.clone(),
            url: canonical.to_string(),
            url_hash: url_hash(canonical),
            domain: resolved.host_str().unwrap_or_default().to_string(),
            title,
            image_url: image.and_then(|src| resolved.join(&src).ok().map(|u| u.to_string())),
            reextract_allowed,
            reextract_cooldown_days: site.reextract_cooldown_days,
        };

        match self.db.upsert_tracking(candidate, now).await? {
            TrackingUpsert::Created(record) => {
                self.db.mark_queued(&record.id).await?;
                debug!("New URL queued: {}", canonical);
                Ok(Reconciled::New)
            }
            TrackingUpsert::Existing(record) => {
                // A record whose first queueing failed is still waiting
                if matches!(record.get_status(), Ok(TrackingStatus::Discovered)) {
                    self.db.mark_queued(&record.id).await?;
                    debug!("Queued previously stranded URL: {}", canonical);
                    return Ok(Reconciled::Requeued);
                }
                if record.reextraction_due(now)
                    && self
                        .db
                        .requeue_tracking(&record.id, now, site.reextract_cooldown_days)
                        .await?
                {
                    debug!("Re-queued for re-extraction: {}", canonical);
                    return Ok(Reconciled::Requeued);
                }
                Ok(Reconciled::Duplicate)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::PageRequest;
    use crate::test_support::{eight_article_listing, StaticPages};
    use tempfile::TempDir;

    const LISTING_URL: &str = "https://daily.example/news";

    async fn setup(pages: StaticPages) -> (DiscoveryTracker, MetaDb, Arc<StaticPages>, SiteConfig, TempDir) {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));

        let db = MetaDb::connect(&config).await.unwrap();
        db.init_schema().await.unwrap();

        let mut site = SiteConfig::new("daily", "https://daily.example", LISTING_URL);
        site.listing.link = "article a".to_string();
        db.upsert_site(&site).await.unwrap();

        let pages = Arc::new(pages);
        let tracker = DiscoveryTracker::new(db.clone(), pages.clone(), &config);
        (tracker, db, pages, site, tmp)
    }

    #[tokio::test]
    async fn test_discovery_is_idempotent() {
        let (tracker, db, _pages, site, _tmp) =
            setup(StaticPages::new().with_page(LISTING_URL, &eight_article_listing())).await;

        let first = tracker.discover(&site).await.unwrap();
        assert!(first.success);
        assert_eq!(first.found, 8);
        assert_eq!(first.new, 8);
        assert_eq!(first.queued, 8);
        assert_eq!(first.duplicate, 0);

        let second = tracker.discover(&site).await.unwrap();
        assert!(second.success);
        assert_eq!(second.new, 0);
        assert_eq!(second.duplicate, 8);
        assert_eq!(second.queued, 0);

        assert_eq!(db.count_tracking("daily").await.unwrap(), 8);
        let counts = db.tracking_status_counts("daily").await.unwrap();
        assert_eq!(counts["queued"], 8);

        let record = db
            .get_tracking("daily", &url_hash("https://daily.example/a1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.times_discovered, 2);
        assert_eq!(record.title.as_deref(), Some("Story number 1"));

        let runs = db.list_runs(Some("daily"), PageRequest::default()).await.unwrap();
        assert_eq!(runs.total, 2);
        assert_eq!(runs.items[0].fetch_method.as_deref(), Some("static"));
        assert_eq!(runs.items[0].sample_urls().len(), 5);
    }

    #[tokio::test]
    async fn test_bad_hrefs_are_skipped_not_fatal() {
        let html = r##"<main>
            <article><a href="/a1">One</a></article>
            <article><a href="javascript:void(0)">Two</a></article>
            <article><a href="/a1#comments">One again</a></article>
            <article><a href="mailto:desk@daily.example">Mail</a></article>
            <article><a href="https://daily.example/a3">Three</a></article>
        </main>"##;
        let (tracker, db, _pages, site, _tmp) = setup(StaticPages::new().with_page(LISTING_URL, html)).await;

        let report = tracker.discover(&site).await.unwrap();
        assert!(report.success);
        assert_eq!(report.outcome, Some(RunOutcome::Partial));
        assert_eq!(report.new, 2);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.found, 4);

        let latest = db.latest_run("daily").await.unwrap().unwrap();
        assert_eq!(latest.outcome, "partial");
    }

    #[tokio::test]
    async fn test_zero_matches_is_a_failed_run() {
        let (tracker, db, _pages, site, _tmp) =
            setup(StaticPages::new().with_page(LISTING_URL, "<main><p>Nothing here</p></main>")).await;

        let report = tracker.discover(&site).await.unwrap();
        assert!(!report.success);
        assert!(report.error.unwrap().contains("matched no elements"));

        let latest = db.latest_run("daily").await.unwrap().unwrap();
        assert_eq!(latest.outcome, "failed");
        assert_eq!(latest.error_category.as_deref(), Some("selector-not-found"));
        assert_eq!(db.count_tracking("daily").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_listing_records_category() {
        let (tracker, db, _pages, site, _tmp) = setup(StaticPages::new().with_timeout(LISTING_URL)).await;

        let report = tracker.discover(&site).await.unwrap();
        assert!(!report.success);

        let latest = db.latest_run("daily").await.unwrap().unwrap();
        assert_eq!(latest.error_category.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_reextraction_requeues_finished_records_only() {
        let (tracker, db, _pages, mut site, _tmp) =
            setup(StaticPages::new().with_page(LISTING_URL, &eight_article_listing())).await;
        site.reextract_allowed = true;
        site.reextract_cooldown_days = 0;

        tracker.discover(&site).await.unwrap();

        // Downstream finished one record; the rest remain queued
        let a1 = db
            .get_tracking("daily", &url_hash("https://daily.example/a1"))
            .await
            .unwrap()
            .unwrap();
        db.mark_tracking_status(&a1.id, TrackingStatus::Completed, None)
            .await
            .unwrap();

        let second = tracker.discover(&site).await.unwrap();
        assert_eq!(second.new, 0);
        assert_eq!(second.duplicate, 8);
        assert_eq!(second.queued, 1);

        let a1 = db.get_tracking_by_id(&a1.id).await.unwrap().unwrap();
        assert_eq!(a1.status, "queued");
        assert!(a1.next_reextract_at.is_some());
    }

    #[tokio::test]
    async fn test_stranded_discovered_record_is_queued_on_next_sighting() {
        let (tracker, db, _pages, site, _tmp) =
            setup(StaticPages::new().with_page(LISTING_URL, &eight_article_listing())).await;

        // Created by an earlier run that failed before queueing it
        let canonical = "https://daily.example/a1";
        let stranded = NewTrackingRecord {
            site_id: "daily".to_string(),
            url: canonical.to_string(),
            url_hash: url_hash(canonical),
            domain: "daily.example".to_string(),
            title: None,
            image_url: None,
            reextract_allowed: false,
            reextract_cooldown_days: 7,
        };
        db.upsert_tracking(stranded, Utc::now()).await.unwrap();
        let before = db.get_tracking("daily", &url_hash(canonical)).await.unwrap().unwrap();
        assert_eq!(before.status, "discovered");

        let report = tracker.discover(&site).await.unwrap();
        assert_eq!(report.new, 7);
        assert_eq!(report.duplicate, 1);
        assert_eq!(report.queued, 8);

        let after = db.get_tracking_by_id(&before.id).await.unwrap().unwrap();
        assert_eq!(after.status, "queued");

        // Once queued it is an ordinary duplicate
        let again = tracker.discover(&site).await.unwrap();
        assert_eq!(again.queued, 0);
        assert_eq!(again.duplicate, 8);
    }

    #[tokio::test]
    async fn test_concurrent_runs_create_each_record_once() {
        let (tracker, db, _pages, site, _tmp) =
            setup(StaticPages::new().with_page(LISTING_URL, &eight_article_listing())).await;

        let (a, b) = tokio::join!(tracker.discover(&site), tracker.discover(&site));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.new + b.new, 8);
        assert_eq!(a.duplicate + b.duplicate, 8);
        assert_eq!(db.count_tracking("daily").await.unwrap(), 8);
    }
}
