//! Scheduling commands: pause, resume, reschedule, status and serve
//!
//! Except for `serve`, these run in a short-lived process and only change
//! the store. A serving process applies the change on its next sync.

use crate::error::Result;
use crate::meta::MetaDb;
use crate::scheduler::{ScheduleStatus, Scheduler};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

pub async fn cmd_pause(db: &MetaDb, site_id: &str) -> Result<ScheduleStatus> {
    db.set_site_active(site_id, false).await?;
    info!("Paused {}", site_id);
    cmd_schedule_status(db, site_id).await
}

pub async fn cmd_resume(db: &MetaDb, site_id: &str) -> Result<ScheduleStatus> {
    db.set_site_active(site_id, true).await?;
    info!("Resumed {}", site_id);
    cmd_schedule_status(db, site_id).await
}

/// Recompute the due time from the stored last successful run
pub async fn cmd_reschedule(db: &MetaDb, site_id: &str) -> Result<ScheduleStatus> {
    let status = cmd_schedule_status(db, site_id).await?;
    info!("Rescheduled {}", site_id);
    Ok(status)
}

pub async fn cmd_schedule_status(db: &MetaDb, site_id: &str) -> Result<ScheduleStatus> {
    let site = db.require_site(site_id).await?;
    Ok(ScheduleStatus::from_site(&site, Utc::now()))
}

/// Arm every active site and run until Ctrl-C, syncing with the store
/// every `sync_interval`
pub async fn cmd_serve(scheduler: &Scheduler, sync_interval: Duration) -> Result<()> {
    let armed = scheduler.schedule_all_active().await?;
    println!("⏱  Scheduling {} active sites. Press Ctrl-C to stop.", armed);

    let mut sync = tokio::time::interval(sync_interval);
    sync.set_missed_tick_behavior(MissedTickBehavior::Delay);
    sync.tick().await;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Shutdown requested");
                break;
            }
            _ = sync.tick() => {
                if let Err(e) = scheduler.sync_with_store().await {
                    warn!("Store sync failed: {}", e);
                }
            }
        }
    }

    scheduler.shutdown().await;
    let stats = scheduler.stats();
    println!(
        "Stopped after {} runs ({} failed).",
        stats.executions, stats.failures
    );
    Ok(())
}

fn format_time(time: Option<DateTime<Utc>>, none: &str) -> String {
    time.map(|t| t.to_rfc3339()).unwrap_or_else(|| none.to_string())
}

pub fn print_schedule_status(status: &ScheduleStatus) {
    println!("\n⏱  {}\n", status.site_id);
    println!("Active: {}", if status.active { "yes" } else { "no (paused)" });
    println!(
        "Scheduled: {}",
        if status.is_scheduled { "yes, by 'newshound serve'" } else { "no" }
    );
    println!("Frequency: every {} min", status.frequency_minutes);
    println!("Last successful run: {}", format_time(status.last_run, "never"));

    let next = match status.next_due {
        Some(due) if due <= Utc::now() => format!("{} (due now)", due.to_rfc3339()),
        Some(due) => due.to_rfc3339(),
        None => "not scheduled".to_string(),
    };
    println!("Next due: {}", next);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::Error;
    use crate::meta::SiteConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_pause_and_resume_go_through_the_store() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        let db = MetaDb::connect(&config).await.unwrap();
        db.init_schema().await.unwrap();
        db.upsert_site(&SiteConfig::new("daily", "https://daily.example", "https://daily.example/news"))
            .await
            .unwrap();
        let last_run = Utc::now();
        db.mark_site_success("daily", last_run).await.unwrap();

        let paused = cmd_pause(&db, "daily").await.unwrap();
        assert!(!paused.active);
        assert!(!paused.is_scheduled);
        assert!(paused.next_due.is_none());
        assert!(db.list_active_sites().await.unwrap().is_empty());

        let resumed = cmd_resume(&db, "daily").await.unwrap();
        assert!(resumed.is_scheduled);
        assert_eq!(resumed.next_due, Some(last_run + chrono::Duration::minutes(60)));

        let rescheduled = cmd_reschedule(&db, "daily").await.unwrap();
        assert_eq!(rescheduled.next_due, resumed.next_due);

        assert!(matches!(cmd_pause(&db, "nope").await, Err(Error::SiteNotFound(_))));
    }
}
