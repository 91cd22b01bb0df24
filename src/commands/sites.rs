//! Site management commands

use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::{DiscoveryRunLog, MetaDb, SiteConfig};
use clap_complete::Shell;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::info;
use url::Url;

/// A TOML file of `[[sites]]` tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SitesFile {
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

/// One `[[sites]]` table as written; unset cadence fields come from config
#[derive(Debug, Deserialize)]
struct SiteEntry {
    #[serde(default)]
    frequency_minutes: Option<u32>,
    #[serde(default)]
    reextract_cooldown_days: Option<u32>,
    #[serde(flatten)]
    site: SiteConfig,
}

impl SiteEntry {
    fn resolve(self, config: &Config) -> SiteConfig {
        let mut site = self.site;
        site.frequency_minutes = self
            .frequency_minutes
            .unwrap_or(config.scheduler.default_frequency_minutes);
        site.reextract_cooldown_days = self
            .reextract_cooldown_days
            .unwrap_or(config.discovery.reextract_cooldown_days);
        site
    }
}

#[derive(Debug, Deserialize)]
struct SiteEntries {
    #[serde(default)]
    sites: Vec<SiteEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportStats {
    pub imported: usize,
    pub created: usize,
    pub updated: usize,
    pub site_ids: Vec<String>,
}

/// Site information with tracking counts and the latest run
#[derive(Debug, Clone, Serialize)]
pub struct SiteInfo {
    #[serde(flatten)]
    pub site: SiteConfig,
    pub tracked_urls: i64,
    pub status_counts: BTreeMap<String, i64>,
    pub latest_run: Option<DiscoveryRunLog>,
}

fn check_site(site: &SiteConfig) -> Result<()> {
    let id_ok = !site.id.is_empty()
        && site
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !id_ok {
        return Err(Error::Config(format!(
            "Site id '{}' must be non-empty and use only letters, digits, '-' or '_'",
            site.id
        )));
    }

    for (field, value) in [("base_url", &site.base_url), ("listing_url", &site.listing_url)] {
        let url = Url::parse(value)
            .map_err(|e| Error::Config(format!("Site {}: invalid {} '{}': {}", site.id, field, value, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "Site {}: {} must be http or https",
                site.id, field
            )));
        }
    }

    if site.frequency_minutes == 0 {
        return Err(Error::Config(format!(
            "Site {}: frequency_minutes must be positive",
            site.id
        )));
    }
    Ok(())
}

/// Parse and check a sites file without touching the database.
///
/// Sites that omit `frequency_minutes` or `reextract_cooldown_days` take
/// the configured defaults.
pub fn load_sites_file(path: &Path, config: &Config) -> Result<Vec<SiteConfig>> {
    let content = std::fs::read_to_string(path)?;
    let file: SiteEntries = toml::from_str(&content)?;
    let sites: Vec<SiteConfig> = file.sites.into_iter().map(|e| e.resolve(config)).collect();

    let mut seen = HashSet::new();
    for site in &sites {
        check_site(site)?;
        if !seen.insert(site.id.clone()) {
            return Err(Error::Config(format!("Duplicate site id '{}'", site.id)));
        }
    }
    Ok(sites)
}

/// Import (create or update) sites from a TOML file.
///
/// An existing site keeps its active flag and last successful run.
pub async fn cmd_import_sites(db: &MetaDb, path: &Path, config: &Config) -> Result<ImportStats> {
    info!("Importing sites from {:?}", path);
    let sites = load_sites_file(path, config)?;

    let mut stats = ImportStats {
        imported: 0,
        created: 0,
        updated: 0,
        site_ids: Vec::with_capacity(sites.len()),
    };

    for site in sites {
        if db.get_site(&site.id).await?.is_some() {
            stats.updated += 1;
        } else {
            stats.created += 1;
        }
        db.upsert_site(&site).await?;
        stats.imported += 1;
        stats.site_ids.push(site.id);
    }

    info!("Imported {} sites", stats.imported);
    Ok(stats)
}

async fn site_info(db: &MetaDb, site: SiteConfig) -> Result<SiteInfo> {
    let tracked_urls = db.count_tracking(&site.id).await?;
    let status_counts = db.tracking_status_counts(&site.id).await?;
    let latest_run = db.latest_run(&site.id).await?;
    Ok(SiteInfo {
        site,
        tracked_urls,
        status_counts,
        latest_run,
    })
}

pub async fn cmd_list_sites(db: &MetaDb) -> Result<Vec<SiteInfo>> {
    info!("Listing sites");
    let sites = db.list_sites().await?;
    let mut result = Vec::with_capacity(sites.len());
    for site in sites {
        result.push(site_info(db, site).await?);
    }
    Ok(result)
}

pub async fn cmd_show_site(db: &MetaDb, site_id: &str) -> Result<SiteInfo> {
    let site = db.require_site(site_id).await?;
    site_info(db, site).await
}

pub fn print_import_stats(stats: &ImportStats) {
    println!(
        "✓ Imported {} sites ({} new, {} updated)",
        stats.imported, stats.created, stats.updated
    );
    for id in &stats.site_ids {
        println!("  • {}", id);
    }
}

pub fn print_sites(sites: &[SiteInfo]) {
    println!("\n📰 Monitored Sites\n");

    if sites.is_empty() {
        println!("No sites registered. Use 'newshound sites import <file>' to add sites.");
        return;
    }

    for info in sites {
        let site = &info.site;
        let state = if site.active { "active" } else { "paused" };
        println!("• {} [{}, {}]", site.display_name(), site.fetch_strategy, state);
        println!("  ID: {}", site.id);
        println!("  Listing: {}", site.listing_url);
        println!(
            "  Every {} min, last success: {}",
            site.frequency_minutes,
            site.last_successful_run
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string())
        );
        println!(
            "  URLs: {} tracked, {} queued",
            info.tracked_urls,
            info.status_counts.get("queued").copied().unwrap_or(0)
        );
        println!();
    }
}

pub fn print_site(info: &SiteInfo) {
    let site = &info.site;
    println!("\n📰 {}\n", site.display_name());
    println!("ID: {}", site.id);
    println!("Base URL: {}", site.base_url);
    println!("Listing URL: {}", site.listing_url);
    if let Some(test_url) = &site.test_url {
        println!("Test URL: {}", test_url);
    }
    println!("Active: {}", if site.active { "yes" } else { "no" });
    println!("Fetch strategy: {}", site.fetch_strategy);
    if let Some(wait) = &site.wait_for_selector {
        println!("Wait for: {}", wait);
    }
    println!("Frequency: every {} min", site.frequency_minutes);
    println!(
        "Re-extraction: {} (cooldown {} days)",
        if site.reextract_allowed { "on" } else { "off" },
        site.reextract_cooldown_days
    );

    println!("\nListing selectors:");
    println!("  link: {}", if site.listing.link.is_empty() { "(none)" } else { &site.listing.link });
    for (name, value) in [
        ("title", &site.listing.title),
        ("image", &site.listing.image),
        ("date", &site.listing.date),
        ("category", &site.listing.category),
    ] {
        if let Some(value) = value {
            println!("  {}: {}", name, value);
        }
    }

    println!("\nContent selectors:");
    let content = [
        ("title", &site.content.title),
        ("body", &site.content.body),
        ("image", &site.content.image),
        ("date", &site.content.date),
        ("author", &site.content.author),
        ("category", &site.content.category),
        ("tags", &site.content.tags),
    ];
    if content.iter().all(|(_, v)| v.is_none()) {
        println!("  (none)");
    }
    for (name, value) in content {
        if let Some(value) = value {
            println!("  {}: {}", name, value);
        }
    }

    println!("\nTracked URLs: {}", info.tracked_urls);
    for (status, count) in &info.status_counts {
        println!("  {}: {}", status, count);
    }

    if let Some(run) = &info.latest_run {
        println!(
            "\nLatest run: {} at {} (found {}, new {}, skipped {})",
            run.outcome, run.started_at, run.found, run.new_count, run.skipped
        );
        if let Some(message) = &run.error_message {
            println!("  Error: {}", message);
        }
    }
}

/// Print site IDs with descriptions for shell completions
pub fn print_site_completions(sites: &[SiteInfo], shell: Shell) {
    for info in sites {
        let description = format!("{} ({})", info.site.display_name(), info.site.listing_url)
            .replace('\n', " ");

        match shell {
            Shell::Zsh => println!("{}:{}", info.site.id, description.replace(':', "\\:")),
            Shell::Fish => println!("{}\t{}", info.site.id, description.replace('\t', " ")),
            _ => println!("{}", info.site.id),
        }
    }
}
