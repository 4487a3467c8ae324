//! Processed-message storage repository.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};

use super::model::{NewProcessedMessage, ParseOutcome, ProcessedMessageRecord};
use crate::store::{Database, timestamp_from_db, timestamp_to_db};
use crate::subscription::{NewSubscription, SubscriptionId, insert_subscription};
use crate::{Result, UserId};

/// Repository for processed-message records.
#[derive(Debug, Clone)]
pub struct ProcessedMessageRepository {
    pool: SqlitePool,
}

impl ProcessedMessageRepository {
    /// Create a repository on a shared database.
    #[must_use]
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Create the records table. `(user_id, message_id)` is unique.
    pub(crate) async fn initialize(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS processed_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                message_id TEXT NOT NULL,
                sender TEXT NOT NULL DEFAULT '',
                subject TEXT NOT NULL DEFAULT '',
                received_at TEXT NOT NULL,
                snippet TEXT NOT NULL DEFAULT '',
                outcome TEXT NOT NULL CHECK (outcome IN ('success', 'failed')),
                extracted_data TEXT,
                subscription_id INTEGER REFERENCES subscriptions(id) ON DELETE SET NULL,
                error_reason TEXT,
                processed_at TEXT NOT NULL,
                retention_expires_at TEXT NOT NULL,
                UNIQUE(user_id, message_id)
            )
            ",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_processed_expiry ON processed_messages(retention_expires_at)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Whether a message was already processed for the user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn exists(&self, user_id: UserId, message_id: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM processed_messages WHERE user_id = ? AND message_id = ?",
        )
        .bind(user_id.0)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    /// Get the record for one message.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(
        &self,
        user_id: UserId,
        message_id: &str,
    ) -> Result<Option<ProcessedMessageRecord>> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, message_id, sender, subject, received_at, snippet, outcome,
                   extracted_data, subscription_id, error_reason, processed_at, retention_expires_at
            FROM processed_messages
            WHERE user_id = ? AND message_id = ?
            ",
        )
        .bind(user_id.0)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_record))
    }

    /// Number of records held for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn count(&self, user_id: UserId) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM processed_messages WHERE user_id = ?")
            .bind(user_id.0)
            .fetch_one(&self.pool)
            .await?;

        #[allow(clippy::cast_sign_loss)]
        Ok(row.get::<i64, _>("total") as u64)
    }

    /// Store a failed record. Returns `false` if the message was already recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn record_failure(&self, user_id: UserId, record: &NewProcessedMessage) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        insert_record(&mut *conn, user_id, record).await
    }

    /// Store a successful record and its subscription atomically.
    ///
    /// Returns the new subscription id, or `None` if the message was already
    /// recorded (nothing is written in that case).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if the subscription fails
    /// validation, or a database error; the transaction is rolled back.
    pub async fn record_success(
        &self,
        user_id: UserId,
        record: &NewProcessedMessage,
        subscription: NewSubscription,
    ) -> Result<Option<SubscriptionId>> {
        let subscription = subscription.validate()?;
        let mut tx = self.pool.begin().await?;

        if !insert_record(&mut *tx, user_id, record).await? {
            tx.rollback().await?;
            return Ok(None);
        }

        let subscription_id = insert_subscription(&mut *tx, user_id, &subscription).await?;
        sqlx::query(
            "UPDATE processed_messages SET subscription_id = ? WHERE user_id = ? AND message_id = ?",
        )
        .bind(subscription_id.0)
        .bind(user_id.0)
        .bind(&record.message_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(subscription_id))
    }

    /// Delete every record whose retention expiry is at or before `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM processed_messages WHERE retention_expires_at <= ?")
            .bind(timestamp_to_db(now))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

async fn insert_record(
    conn: &mut sqlx::SqliteConnection,
    user_id: UserId,
    record: &NewProcessedMessage,
) -> Result<bool> {
    let (extracted, error_reason) = match &record.result {
        Ok(draft) => (Some(serde_json::to_string(draft)?), None),
        Err(reason) => (None, Some(reason.as_str())),
    };

    let result = sqlx::query(
        r"
        INSERT INTO processed_messages
            (user_id, message_id, sender, subject, received_at, snippet, outcome,
             extracted_data, error_reason, processed_at, retention_expires_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id, message_id) DO NOTHING
        ",
    )
    .bind(user_id.0)
    .bind(&record.message_id)
    .bind(&record.sender)
    .bind(&record.subject)
    .bind(timestamp_to_db(record.received_at))
    .bind(&record.snippet)
    .bind(record.outcome().as_str())
    .bind(extracted)
    .bind(error_reason)
    .bind(timestamp_to_db(record.processed_at))
    .bind(timestamp_to_db(record.retention_expires_at))
    .execute(conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

fn row_to_record(row: &SqliteRow) -> ProcessedMessageRecord {
    let received_at: String = row.get("received_at");
    let processed_at: String = row.get("processed_at");
    let expires_at: String = row.get("retention_expires_at");
    let outcome: String = row.get("outcome");
    let extracted: Option<String> = row.get("extracted_data");

    ProcessedMessageRecord {
        id: row.get("id"),
        user_id: UserId(row.get("user_id")),
        message_id: row.get("message_id"),
        sender: row.get("sender"),
        subject: row.get("subject"),
        received_at: timestamp_from_db(&received_at).unwrap_or_else(Utc::now),
        snippet: row.get("snippet"),
        outcome: ParseOutcome::parse(&outcome),
        extracted: extracted.and_then(|json| serde_json::from_str(&json).ok()),
        subscription_id: row.get::<Option<i64>, _>("subscription_id").map(SubscriptionId),
        error_reason: row.get("error_reason"),
        processed_at: timestamp_from_db(&processed_at).unwrap_or_else(Utc::now),
        retention_expires_at: timestamp_from_db(&expires_at).unwrap_or_else(Utc::now),
    }
}
