//! CLI commands implementation

pub mod discover;
pub mod history;
pub mod init;
pub mod onboard;
pub mod queue;
pub mod schedule;
pub mod sites;

pub use discover::*;
pub use history::*;
pub use init::*;
pub use onboard::*;
pub use queue::*;
pub use schedule::*;
pub use sites::*;

use crate::config::Config;
use crate::discovery::DiscoveryTracker;
use crate::error::Result;
use crate::fetch::HttpFetcher;
use crate::meta::MetaDb;
use crate::scheduler::Scheduler;
use std::sync::Arc;

/// Long-lived handles shared by commands
pub struct AppContext {
    pub config: Config,
    pub db: MetaDb,
    pub fetcher: Arc<HttpFetcher>,
}

impl AppContext {
    pub async fn open(config: Config) -> Result<Self> {
        let db = MetaDb::new(&config.paths.db_file).await?;
        let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);
        Ok(Self { config, db, fetcher })
    }

    pub fn tracker(&self) -> Arc<DiscoveryTracker> {
        Arc::new(DiscoveryTracker::new(
            self.db.clone(),
            self.fetcher.clone(),
            &self.config,
        ))
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.db.clone(), self.tracker(), &self.config)
    }

    /// Release the browser session, if one was launched
    pub async fn close(&self) -> Result<()> {
        self.fetcher.close().await
    }
}
