//! Discover command implementation

use crate::discovery::DiscoveryReport;
use crate::error::Result;
use crate::meta::MetaDb;
use crate::progress::discovery_bar;
use crate::scheduler::Scheduler;
use futures::future::join_all;
use tracing::info;

/// Which sites a discover invocation covers
#[derive(Debug, Clone)]
pub enum DiscoverTarget {
    Site(String),
    AllActive,
}

/// Run discovery now for one site or every active site.
///
/// Runs go through the scheduler so a success advances the site's last
/// run exactly as a timed run would. Sites run concurrently.
pub async fn cmd_discover(db: &MetaDb, scheduler: &Scheduler, target: DiscoverTarget) -> Result<Vec<DiscoveryReport>> {
    let site_ids: Vec<String> = match target {
        DiscoverTarget::Site(id) => vec![db.require_site(&id).await?.id],
        DiscoverTarget::AllActive => db
            .list_active_sites()
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect(),
    };

    if site_ids.is_empty() {
        info!("No active sites to discover");
        return Ok(Vec::new());
    }

    let bar = discovery_bar(site_ids.len() as u64);
    let runs = site_ids.iter().map(|id| {
        let bar = bar.clone();
        async move {
            let report = scheduler.trigger_now(id).await;
            bar.inc(1);
            bar.set_message(id.clone());
            report
        }
    });
    let results = join_all(runs).await;
    bar.finish_and_clear();

    results.into_iter().collect()
}

pub fn print_discovery_reports(reports: &[DiscoveryReport]) {
    if reports.is_empty() {
        println!("No active sites. Use 'newshound sites import <file>' or 'newshound resume <site>'.");
        return;
    }

    println!("\n🔎 Discovery Results\n");
    for report in reports {
        let outcome = report
            .outcome
            .map(|o| o.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let mark = if report.success { "✓" } else { "✗" };
        println!("{} {} [{}] in {}ms", mark, report.site_id, outcome, report.duration_ms);
        if report.success {
            println!(
                "  Found: {}, New: {}, Duplicate: {}, Skipped: {}, Queued: {}",
                report.found, report.new, report.duplicate, report.skipped, report.queued
            );
        }
        if let Some(error) = &report.error {
            println!("  Error: {}", error);
        }
    }

    let failed = reports.iter().filter(|r| !r.success).count();
    if failed > 0 {
        println!("\n{} of {} runs failed; see 'newshound runs' for details.", failed, reports.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::discovery::DiscoveryTracker;
    use crate::meta::SiteConfig;
    use crate::test_support::{eight_article_listing, StaticPages};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_discover_all_active_sites() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        let db = MetaDb::connect(&config).await.unwrap();
        db.init_schema().await.unwrap();

        let mut pages = StaticPages::new();
        for id in ["one", "two", "three"] {
            let listing = format!("https://{}.example/news", id);
            let mut site = SiteConfig::new(id, format!("https://{}.example", id), listing.as_str());
            site.listing.link = "article a".to_string();
            site.active = id != "three";
            db.upsert_site(&site).await.unwrap();
            pages = pages.with_page(&listing, &eight_article_listing());
        }

        let tracker = Arc::new(DiscoveryTracker::new(db.clone(), Arc::new(pages), &config));
        let scheduler = Scheduler::new(db.clone(), tracker, &config);

        let reports = cmd_discover(&db, &scheduler, DiscoverTarget::AllActive).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.success && r.new == 8));
        assert_eq!(db.count_tracking("three").await.unwrap(), 0);

        // An explicit target runs even when paused
        let reports = cmd_discover(&db, &scheduler, DiscoverTarget::Site("three".to_string()))
            .await
            .unwrap();
        assert_eq!(reports[0].new, 8);

        scheduler.shutdown().await;
    }
}
