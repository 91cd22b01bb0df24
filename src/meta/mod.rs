//! Metadata storage using SQLite
//!
//! This module handles all durable state:
//! - Sites (monitored outlets, declared selectors, last successful run)
//! - URL tracking records (one per site and URL hash)
//! - Discovery run logs (append-only)

mod models;
mod schema;

pub use models::*;
pub use schema::*;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::validate::{ValidatedContentSelectors, ValidatedListingSelector};
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Metadata database handle
#[derive(Clone)]
pub struct MetaDb {
    pool: SqlitePool,
}

impl MetaDb {
    /// Connect to the metadata database
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::open(&config.paths.db_file).await
    }

    /// Create database with path directly, initializing the schema if needed
    pub async fn new(db_path: &Path) -> Result<Self> {
        let db = Self::open(db_path).await?;
        if !db.is_initialized().await? {
            db.init_schema().await?;
        }
        Ok(db)
    }

    async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type='table' AND name='sites'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(result.is_some())
    }

    // ===== Site Operations =====

    /// Insert a site or update its declared fields.
    ///
    /// On conflict `active` and `last_successful_run` keep their stored
    /// values; pause, resume and completed runs own them.
    pub async fn upsert_site(&self, site: &SiteConfig) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO sites (id, name, base_url, listing_url, test_url, active,
                listing_selectors_json, content_selectors_json, frequency_minutes,
                fetch_strategy, wait_for_selector, reextract_allowed, reextract_cooldown_days,
                last_successful_run, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                base_url = excluded.base_url,
                listing_url = excluded.listing_url,
                test_url = excluded.test_url,
                listing_selectors_json = excluded.listing_selectors_json,
                content_selectors_json = excluded.content_selectors_json,
                frequency_minutes = excluded.frequency_minutes,
                fetch_strategy = excluded.fetch_strategy,
                wait_for_selector = excluded.wait_for_selector,
                reextract_allowed = excluded.reextract_allowed,
                reextract_cooldown_days = excluded.reextract_cooldown_days,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&site.id)
        .bind(&site.name)
        .bind(&site.base_url)
        .bind(&site.listing_url)
        .bind(&site.test_url)
        .bind(site.active)
        .bind(serde_json::to_string(&site.listing)?)
        .bind(serde_json::to_string(&site.content)?)
        .bind(i64::from(site.frequency_minutes))
        .bind(site.fetch_strategy.to_string())
        .bind(&site.wait_for_selector)
        .bind(site.reextract_allowed)
        .bind(i64::from(site.reextract_cooldown_days))
        .bind(site.last_successful_run.map(|t| t.to_rfc3339()))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get site by ID
    pub async fn get_site(&self, id: &str) -> Result<Option<SiteConfig>> {
        let row = sqlx::query_as::<_, SiteRow>("SELECT * FROM sites WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(SiteConfig::try_from).transpose()
    }

    /// Get site by ID, failing when it does not exist
    pub async fn require_site(&self, id: &str) -> Result<SiteConfig> {
        self.get_site(id)
            .await?
            .ok_or_else(|| Error::SiteNotFound(id.to_string()))
    }

    /// List all sites
    pub async fn list_sites(&self) -> Result<Vec<SiteConfig>> {
        let rows = sqlx::query_as::<_, SiteRow>("SELECT * FROM sites ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(SiteConfig::try_from).collect()
    }

    /// List sites with the active flag set
    pub async fn list_active_sites(&self) -> Result<Vec<SiteConfig>> {
        let rows = sqlx::query_as::<_, SiteRow>("SELECT * FROM sites WHERE active = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(SiteConfig::try_from).collect()
    }

    /// Set or clear the active flag
    pub async fn set_site_active(&self, id: &str, active: bool) -> Result<()> {
        let result = sqlx::query("UPDATE sites SET active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::SiteNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Record a completed discovery run
    pub async fn mark_site_success(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE sites SET last_successful_run = ?, updated_at = ? WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist a listing selector that passed live validation
    pub async fn apply_listing_selector(
        &self,
        id: &str,
        validated: &ValidatedListingSelector,
    ) -> Result<()> {
        let mut site = self.require_site(id).await?;
        site.listing.link = validated.selector().to_string();
        self.upsert_site(&site).await?;
        info!("Site {} now uses listing selector '{}'", id, validated.selector());
        Ok(())
    }

    /// Persist content selectors that passed live validation
    pub async fn apply_content_selectors(
        &self,
        id: &str,
        validated: &ValidatedContentSelectors,
    ) -> Result<()> {
        let mut site = self.require_site(id).await?;
        site.content = validated.selectors().clone();
        self.upsert_site(&site).await?;
        info!("Site {} content selectors updated", id);
        Ok(())
    }

    // ===== URL Tracking Operations =====

    /// Create the record on first sighting, otherwise bump `last_seen_at` and the count.
    ///
    /// An existing record takes the candidate's re-extraction policy. When
    /// the policy is switched on for a record that never had a cooldown, the
    /// cooldown starts now.
    ///
    /// Creation is exactly-once per (site, hash): concurrent callers race on the
    /// unique index and only one insert lands.
    pub async fn upsert_tracking(
        &self,
        candidate: NewTrackingRecord,
        now: DateTime<Utc>,
    ) -> Result<TrackingUpsert> {
        let site_id = candidate.site_id.clone();
        let url_hash = candidate.url_hash.clone();
        let title = candidate.title.clone();
        let image_url = candidate.image_url.clone();
        let record = candidate.into_record(now);

        let inserted = sqlx::query(
            r#"
            INSERT INTO url_tracking (id, site_id, url, url_hash, domain, status,
                first_discovered_at, last_seen_at, times_discovered, title, image_url,
                reextract_allowed, reextract_cooldown_days, next_reextract_at, content_id,
                attempts, last_failure, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(site_id, url_hash) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(&record.site_id)
        .bind(&record.url)
        .bind(&record.url_hash)
        .bind(&record.domain)
        .bind(&record.status)
        .bind(&record.first_discovered_at)
        .bind(&record.last_seen_at)
        .bind(record.times_discovered)
        .bind(&record.title)
        .bind(&record.image_url)
        .bind(record.reextract_allowed)
        .bind(record.reextract_cooldown_days)
        .bind(&record.next_reextract_at)
        .bind(&record.content_id)
        .bind(record.attempts)
        .bind(&record.last_failure)
        .bind(&record.updated_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(TrackingUpsert::Created(record));
        }

        let stamp = now.to_rfc3339();
        sqlx::query(
            r#"
            UPDATE url_tracking SET
                last_seen_at = ?,
                times_discovered = times_discovered + 1,
                title = COALESCE(title, ?),
                image_url = COALESCE(image_url, ?),
                reextract_allowed = ?,
                reextract_cooldown_days = ?,
                next_reextract_at = CASE
                    WHEN ? AND next_reextract_at IS NULL THEN ?
                    ELSE next_reextract_at
                END,
                updated_at = ?
            WHERE site_id = ? AND url_hash = ?
            "#,
        )
        .bind(&stamp)
        .bind(&title)
        .bind(&image_url)
        .bind(record.reextract_allowed)
        .bind(record.reextract_cooldown_days)
        .bind(record.reextract_allowed)
        .bind(&record.next_reextract_at)
        .bind(&stamp)
        .bind(&site_id)
        .bind(&url_hash)
        .execute(&self.pool)
        .await?;

        let existing = self
            .get_tracking(&site_id, &url_hash)
            .await?
            .ok_or_else(|| Error::Other(format!("Tracking record {} vanished", url_hash)))?;
        Ok(TrackingUpsert::Existing(existing))
    }

    /// Get tracking record by site and URL hash
    pub async fn get_tracking(&self, site_id: &str, url_hash: &str) -> Result<Option<UrlTrackingRecord>> {
        let record = sqlx::query_as::<_, UrlTrackingRecord>(
            "SELECT * FROM url_tracking WHERE site_id = ? AND url_hash = ?",
        )
        .bind(site_id)
        .bind(url_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Get tracking record by ID
    pub async fn get_tracking_by_id(&self, id: &str) -> Result<Option<UrlTrackingRecord>> {
        let record = sqlx::query_as::<_, UrlTrackingRecord>("SELECT * FROM url_tracking WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Hand a freshly discovered record to the extraction queue
    pub async fn mark_queued(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE url_tracking SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(TrackingStatus::Queued.to_string())
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .bind(TrackingStatus::Discovered.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Re-open a record for extraction once its cooldown elapsed.
    ///
    /// Returns false when the record is already queued or processing.
    pub async fn requeue_tracking(&self, id: &str, now: DateTime<Utc>, cooldown_days: u32) -> Result<bool> {
        let next = now + Duration::days(i64::from(cooldown_days));
        let result = sqlx::query(
            r#"
            UPDATE url_tracking SET status = ?, next_reextract_at = ?, updated_at = ?
            WHERE id = ? AND status NOT IN ('queued', 'processing')
            "#,
        )
        .bind(TrackingStatus::Queued.to_string())
        .bind(next.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Atomically move up to `limit` queued records to processing
    pub async fn claim_queued(&self, limit: u32) -> Result<Vec<UrlTrackingRecord>> {
        let claimed = sqlx::query_as::<_, UrlTrackingRecord>(
            r#"
            UPDATE url_tracking SET status = 'processing', attempts = attempts + 1, updated_at = ?
            WHERE id IN (
                SELECT id FROM url_tracking WHERE status = 'queued'
                ORDER BY first_discovered_at LIMIT ?
            )
            RETURNING *
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(claimed)
    }

    /// Advance a record after downstream extraction
    pub async fn mark_tracking_status(
        &self,
        id: &str,
        status: TrackingStatus,
        failure: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE url_tracking SET status = ?, last_failure = COALESCE(?, last_failure), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.to_string())
        .bind(failure)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::Other(format!("Tracking record not found: {}", id)));
        }
        Ok(())
    }

    /// Attach the downstream content record
    pub async fn link_content(&self, id: &str, content_id: &str) -> Result<()> {
        sqlx::query("UPDATE url_tracking SET content_id = ?, updated_at = ? WHERE id = ?")
            .bind(content_id)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Count tracking records for a site
    pub async fn count_tracking(&self, site_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM url_tracking WHERE site_id = ?")
            .bind(site_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Paginated tracking records, newest first, optionally filtered by status
    pub async fn list_tracking(
        &self,
        site_id: &str,
        status: Option<TrackingStatus>,
        page: PageRequest,
    ) -> Result<Page<UrlTrackingRecord>> {
        let status = status.map(|s| s.to_string());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM url_tracking WHERE site_id = ? AND (? IS NULL OR status = ?)",
        )
        .bind(site_id)
        .bind(&status)
        .bind(&status)
        .fetch_one(&self.pool)
        .await?;

        let items = sqlx::query_as::<_, UrlTrackingRecord>(
            r#"
            SELECT * FROM url_tracking
            WHERE site_id = ? AND (? IS NULL OR status = ?)
            ORDER BY first_discovered_at DESC, url
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(site_id)
        .bind(&status)
        .bind(&status)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items,
            total,
            page: page.page,
            per_page: page.per_page,
        })
    }

    /// Per-status record counts for a site; every status is present
    pub async fn tracking_status_counts(&self, site_id: &str) -> Result<BTreeMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM url_tracking WHERE site_id = ? GROUP BY status",
        )
        .bind(site_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts: BTreeMap<String, i64> = TrackingStatus::ALL
            .iter()
            .map(|s| (s.to_string(), 0))
            .collect();
        for (status, count) in rows {
            counts.insert(status, count);
        }
        Ok(counts)
    }

    // ===== Discovery Run Operations =====

    /// Append a run log
    pub async fn insert_run(&self, run: &DiscoveryRunLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO discovery_runs (id, site_id, listing_url, outcome, found, new_count,
                duplicate, skipped, queued, fetch_ms, parse_ms, total_ms, fetch_method,
                http_status, sample_urls_json, error_category, error_message, started_at, finished_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.site_id)
        .bind(&run.listing_url)
        .bind(&run.outcome)
        .bind(run.found)
        .bind(run.new_count)
        .bind(run.duplicate)
        .bind(run.skipped)
        .bind(run.queued)
        .bind(run.fetch_ms)
        .bind(run.parse_ms)
        .bind(run.total_ms)
        .bind(&run.fetch_method)
        .bind(run.http_status)
        .bind(&run.sample_urls_json)
        .bind(&run.error_category)
        .bind(&run.error_message)
        .bind(&run.started_at)
        .bind(&run.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Paginated run logs, newest first
    pub async fn list_runs(&self, site_id: Option<&str>, page: PageRequest) -> Result<Page<DiscoveryRunLog>> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM discovery_runs WHERE (? IS NULL OR site_id = ?)")
                .bind(site_id)
                .bind(site_id)
                .fetch_one(&self.pool)
                .await?;

        let items = sqlx::query_as::<_, DiscoveryRunLog>(
            r#"
            SELECT * FROM discovery_runs
            WHERE (? IS NULL OR site_id = ?)
            ORDER BY started_at DESC, finished_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(site_id)
        .bind(site_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items,
            total,
            page: page.page,
            per_page: page.per_page,
        })
    }

    /// Get latest run for a site
    pub async fn latest_run(&self, site_id: &str) -> Result<Option<DiscoveryRunLog>> {
        let run = sqlx::query_as::<_, DiscoveryRunLog>(
            "SELECT * FROM discovery_runs WHERE site_id = ? ORDER BY started_at DESC, finished_at DESC LIMIT 1",
        )
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(run)
    }
}
