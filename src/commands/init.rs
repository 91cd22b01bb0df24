//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::MetaDb;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

/// Where init put things
#[derive(Debug, Clone, Serialize)]
pub struct InitSummary {
    pub config_path: PathBuf,
    pub db_path: PathBuf,
    pub sites_template: PathBuf,
}

const SITES_TEMPLATE: &str = r#"# Sites to monitor. Import with: newshound sites import sites.toml

[[sites]]
id = "example-daily"
name = "Example Daily"
base_url = "https://news.example.com"
listing_url = "https://news.example.com/latest"
frequency_minutes = 60
fetch_strategy = "static"

[sites.listing]
link = "article h2 a"
"#;

/// Initialize newshound configuration and database
pub async fn cmd_init(base_dir: Option<PathBuf>, force: bool) -> Result<InitSummary> {
    let mut config = Config::default();
    config.init_paths(base_dir);

    if config.paths.config_file.exists() && !force {
        return Err(Error::AlreadyInitialized(
            config.paths.base_dir.display().to_string(),
        ));
    }

    std::fs::create_dir_all(&config.paths.base_dir)?;

    config.validate()?;
    config.save()?;
    info!("Created config at {:?}", config.paths.config_file);

    let db = MetaDb::connect(&config).await?;
    db.init_schema().await?;
    info!("Created database at {:?}", config.paths.db_file);

    let sites_template = config.paths.base_dir.join("sites.example.toml");
    if !sites_template.exists() {
        if let Err(e) = std::fs::write(&sites_template, SITES_TEMPLATE) {
            warn!("Could not write {:?}: {}", sites_template, e);
        }
    }

    Ok(InitSummary {
        config_path: config.paths.config_file,
        db_path: config.paths.db_file,
        sites_template,
    })
}

pub fn print_init(summary: &InitSummary) {
    println!("✓ newshound initialized successfully");
    println!("  Config:   {}", summary.config_path.display());
    println!("  Database: {}", summary.db_path.display());
    println!("\nNext steps:");
    println!("  1. Describe your sites, see {}", summary.sites_template.display());
    println!("  2. Import them: newshound sites import sites.toml");
    println!("  3. Run discovery: newshound discover --all");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::SitesFile;
    use crate::meta::SiteConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_creates_config_db_and_template() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("nh");

        let summary = cmd_init(Some(base.clone()), false).await.unwrap();
        assert!(summary.config_path.exists());
        assert!(summary.db_path.exists());

        let template = std::fs::read_to_string(&summary.sites_template).unwrap();
        let parsed: SitesFile = toml::from_str(&template).unwrap();
        let site: &SiteConfig = &parsed.sites[0];
        assert_eq!(site.listing.link, "article h2 a");

        let config = Config::load_from(Some(base.clone())).unwrap();
        assert!(config.is_initialized());

        assert!(matches!(
            cmd_init(Some(base.clone()), false).await,
            Err(Error::AlreadyInitialized(_))
        ));
        assert!(cmd_init(Some(base), true).await.is_ok());
    }
}
