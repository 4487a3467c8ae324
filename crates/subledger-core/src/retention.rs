//! Purging of expired processed-message records.
//!
//! Records carry their own expiry, fixed when they are written. Purging
//! never touches subscriptions; their link from a purged record simply
//! disappears with the record.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::Result;
use crate::ingest::ProcessedMessageRepository;
use crate::store::Database;

/// Default number of days a processed-message record is kept.
pub const RETENTION_DAYS: i64 = 30;

/// Deletes processed-message records past their retention expiry.
#[derive(Debug, Clone)]
pub struct RetentionEnforcer {
    records: ProcessedMessageRepository,
}

impl RetentionEnforcer {
    /// Create an enforcer on a shared database.
    #[must_use]
    pub fn new(db: &Database) -> Self {
        Self {
            records: ProcessedMessageRepository::new(db),
        }
    }

    /// Purge records that have expired by now.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn purge_expired(&self) -> Result<u64> {
        self.purge_expired_at(Utc::now()).await
    }

    /// Purge records whose expiry is at or before `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<u64> {
        let purged = self.records.delete_expired(now).await?;
        if purged > 0 {
            info!(purged, "Purged expired processed-message records");
        }
        Ok(purged)
    }

    /// Run [`Self::purge_expired`] every `interval` on a background task.
    ///
    /// The first sweep runs immediately. Failures are logged and the loop
    /// keeps going; abort the returned handle to stop it.
    pub fn spawn_sweeper(self: Arc<Self>, interval: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.purge_expired().await {
                    warn!("Retention sweep failed: {e}");
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::UserId;
    use crate::ingest::NewProcessedMessage;
    use chrono::{Duration, TimeZone};

    async fn seeded() -> (Database, DateTime<Utc>) {
        let db = Database::in_memory().await.unwrap();
        let processed_at = Utc.with_ymd_and_hms(2026, 1, 10, 8, 30, 0).unwrap();
        let record = NewProcessedMessage::fetch_failed(
            "m1",
            "boom".into(),
            processed_at,
            Duration::days(RETENTION_DAYS),
        );
        ProcessedMessageRepository::new(&db)
            .record_failure(UserId::new(1), &record)
            .await
            .unwrap();
        (db, processed_at)
    }

    #[tokio::test]
    async fn test_record_survives_one_second_before_expiry() {
        let (db, processed_at) = seeded().await;
        let enforcer = RetentionEnforcer::new(&db);
        let boundary = processed_at + Duration::days(RETENTION_DAYS);

        assert_eq!(enforcer.purge_expired_at(boundary - Duration::seconds(1)).await.unwrap(), 0);
        assert_eq!(enforcer.purge_expired_at(boundary + Duration::seconds(1)).await.unwrap(), 1);
        assert_eq!(enforcer.purge_expired_at(boundary + Duration::days(1)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweeper_purges_in_background() {
        let db = Database::in_memory().await.unwrap();
        let record = NewProcessedMessage::fetch_failed(
            "m1",
            "boom".into(),
            Utc::now() - Duration::days(RETENTION_DAYS + 1),
            Duration::days(RETENTION_DAYS),
        );
        let repo = ProcessedMessageRepository::new(&db);
        repo.record_failure(UserId::new(1), &record).await.unwrap();

        let handle = Arc::new(RetentionEnforcer::new(&db))
            .spawn_sweeper(std::time::Duration::from_secs(3600));
        for _ in 0..50 {
            if !repo.exists(UserId::new(1), "m1").await.unwrap() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        handle.abort();

        assert!(!repo.exists(UserId::new(1), "m1").await.unwrap());
    }
}
