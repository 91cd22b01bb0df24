//! Downstream extraction queue commands

use crate::error::{Error, Result};
use crate::meta::{MetaDb, TrackingStatus, UrlTrackingRecord};
use tracing::info;

/// Move up to `limit` queued URLs to processing and return them
pub async fn cmd_queue_claim(db: &MetaDb, limit: u32) -> Result<Vec<UrlTrackingRecord>> {
    let claimed = db.claim_queued(limit).await?;
    info!("Claimed {} queued URLs", claimed.len());
    Ok(claimed)
}

/// Record the outcome of downstream extraction for one URL
pub async fn cmd_queue_mark(
    db: &MetaDb,
    id: &str,
    status: TrackingStatus,
    failure: Option<&str>,
    content_id: Option<&str>,
) -> Result<UrlTrackingRecord> {
    if !matches!(
        status,
        TrackingStatus::Completed | TrackingStatus::Failed | TrackingStatus::Skipped
    ) {
        return Err(Error::Config(format!(
            "Cannot mark a record as '{}'; use completed, failed or skipped",
            status
        )));
    }

    db.mark_tracking_status(id, status, failure).await?;
    if let Some(content_id) = content_id {
        db.link_content(id, content_id).await?;
    }

    db.get_tracking_by_id(id)
        .await?
        .ok_or_else(|| Error::Other(format!("Tracking record not found: {}", id)))
}

pub fn print_claimed(records: &[UrlTrackingRecord]) {
    if records.is_empty() {
        println!("Queue is empty.");
        return;
    }
    for record in records {
        println!("{}\t{}\t{}", record.id, record.site_id, record.url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::meta::{NewTrackingRecord, SiteConfig, TrackingUpsert};
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_claim_then_mark() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        let db = MetaDb::connect(&config).await.unwrap();
        db.init_schema().await.unwrap();
        db.upsert_site(&SiteConfig::new("daily", "https://daily.example", "https://daily.example/news"))
            .await
            .unwrap();

        let url = "https://daily.example/a1".to_string();
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
        let TrackingUpsert::Created(record) = db.upsert_tracking(candidate, Utc::now()).await.unwrap() else {
            panic!("expected a new record");
        };
        db.mark_queued(&record.id).await.unwrap();

        let claimed = cmd_queue_claim(&db, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, "processing");
        assert!(cmd_queue_claim(&db, 10).await.unwrap().is_empty());

        assert!(cmd_queue_mark(&db, &record.id, TrackingStatus::Queued, None, None)
            .await
            .is_err());

        let done = cmd_queue_mark(&db, &record.id, TrackingStatus::Completed, None, Some("article-42"))
            .await
            .unwrap();
        assert_eq!(done.status, "completed");
        assert_eq!(done.content_id.as_deref(), Some("article-42"));
    }
}
