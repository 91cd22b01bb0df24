//! Run-log and tracking-record listings

use crate::error::Result;
use crate::meta::{DiscoveryRunLog, MetaDb, Page, PageRequest, TrackingStatus, UrlTrackingRecord};
use serde::Serialize;
use std::collections::BTreeMap;

/// One page of tracking records with per-status totals for the site
#[derive(Debug, Clone, Serialize)]
pub struct UrlListing {
    pub site_id: String,
    pub counts: BTreeMap<String, i64>,
    #[serde(flatten)]
    pub page: Page<UrlTrackingRecord>,
}

pub async fn cmd_runs(db: &MetaDb, site_id: Option<&str>, page: PageRequest) -> Result<Page<DiscoveryRunLog>> {
    if let Some(id) = site_id {
        db.require_site(id).await?;
    }
    db.list_runs(site_id, page).await
}

pub async fn cmd_urls(
    db: &MetaDb,
    site_id: &str,
    status: Option<TrackingStatus>,
    page: PageRequest,
) -> Result<UrlListing> {
    db.require_site(site_id).await?;
    let counts = db.tracking_status_counts(site_id).await?;
    let page = db.list_tracking(site_id, status, page).await?;
    Ok(UrlListing {
        site_id: site_id.to_string(),
        counts,
        page,
    })
}

pub fn print_runs(runs: &Page<DiscoveryRunLog>) {
    println!("\n📜 Discovery Runs (page {}/{}, {} total)\n", runs.page, runs.total_pages().max(1), runs.total);

    if runs.items.is_empty() {
        println!("No runs recorded yet.");
        return;
    }

    for run in &runs.items {
        println!("• {} {} [{}]", run.started_at, run.site_id, run.outcome);
        println!(
            "  Found: {}, New: {}, Duplicate: {}, Skipped: {}, Queued: {}",
            run.found, run.new_count, run.duplicate, run.skipped, run.queued
        );
        println!(
            "  Timing: fetch {}ms, parse {}ms, total {}ms{}",
            run.fetch_ms,
            run.parse_ms,
            run.total_ms,
            run.fetch_method
                .as_deref()
                .map(|m| format!(" ({})", m))
                .unwrap_or_default()
        );
        if let Some(message) = &run.error_message {
            println!(
                "  Error [{}]: {}",
                run.error_category.as_deref().unwrap_or("unknown"),
                message
            );
        }
    }
}

pub fn print_urls(listing: &UrlListing) {
    let page = &listing.page;
    println!(
        "\n🔗 {} URLs (page {}/{}, {} matching)\n",
        listing.site_id,
        page.page,
        page.total_pages().max(1),
        page.total
    );

    let summary: Vec<String> = listing
        .counts
        .iter()
        .map(|(status, count)| format!("{} {}", count, status))
        .collect();
    println!("{}\n", summary.join(", "));

    for record in &page.items {
        println!("• [{}] {}", record.status, record.url);
        if let Some(title) = &record.title {
            println!("  {}", title);
        }
        println!(
            "  Seen {} times, first {}, last {}",
            record.times_discovered, record.first_discovered_at, record.last_seen_at
        );
        if let Some(failure) = &record.last_failure {
            println!("  Last failure: {}", failure);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::Error;
    use crate::meta::{NewTrackingRecord, RunOutcome, SiteConfig};
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_urls_filter_and_counts() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        let db = MetaDb::connect(&config).await.unwrap();
        db.init_schema().await.unwrap();
        db.upsert_site(&SiteConfig::new("daily", "https://daily.example", "https://daily.example/news"))
            .await
            .unwrap();

        for i in 0..5 {
            let url = format!("https://daily.example/a{}", i);
            let candidate = NewTrackingRecord {
                site_id: "daily".to_string(),
                url_hash: crate::discovery::url_hash(&url),
                url,
                domain: "daily.example".to_string(),
                title: None,
                image_url: None,
                reextract_allowed: false,
                reextract_cooldown_days: 7,
            };
            if let crate::meta::TrackingUpsert::Created(record) =
                db.upsert_tracking(candidate, Utc::now()).await.unwrap()
            {
                if i < 3 {
                    db.mark_queued(&record.id).await.unwrap();
                }
            }
        }

        let listing = cmd_urls(&db, "daily", Some(TrackingStatus::Queued), PageRequest::new(1, 2))
            .await
            .unwrap();
        assert_eq!(listing.page.total, 3);
        assert_eq!(listing.page.items.len(), 2);
        assert_eq!(listing.page.total_pages(), 2);
        assert_eq!(listing.counts["queued"], 3);
        assert_eq!(listing.counts["discovered"], 2);

        db.insert_run(&crate::meta::DiscoveryRunLog::new(
            "daily",
            "https://daily.example/news",
            RunOutcome::Success,
            Utc::now(),
        ))
        .await
        .unwrap();
        assert_eq!(cmd_runs(&db, Some("daily"), PageRequest::default()).await.unwrap().total, 1);
        assert_eq!(cmd_runs(&db, None, PageRequest::default()).await.unwrap().total, 1);
        assert!(matches!(
            cmd_runs(&db, Some("nope"), PageRequest::default()).await,
            Err(Error::SiteNotFound(_))
        ));
    }
}
