//! Credential storage repository.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};

use super::model::MailboxCredential;
use crate::store::{Database, timestamp_from_db, timestamp_to_db};
use crate::{Result, UserId};

/// Repository for sealed mailbox credentials, one row per user.
#[derive(Debug, Clone)]
pub struct CredentialRepository {
    pool: SqlitePool,
}

impl CredentialRepository {
    /// Create a repository on a shared database.
    #[must_use]
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Create the credential table.
    ///
    /// A connected row must carry a non-empty refresh token.
    pub(crate) async fn initialize(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS mailbox_credentials (
                user_id INTEGER PRIMARY KEY,
                refresh_token TEXT,
                access_token TEXT,
                access_token_expires_at TEXT,
                connected INTEGER NOT NULL DEFAULT 0,
                last_scan_at TEXT,
                updated_at TEXT NOT NULL,
                CHECK (connected = 0 OR (refresh_token IS NOT NULL AND refresh_token != ''))
            )
            ",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Get a user's credential row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, user_id: UserId) -> Result<Option<MailboxCredential>> {
        let row = sqlx::query(
            r"
            SELECT user_id, refresh_token, access_token, access_token_expires_at,
                   connected, last_scan_at, updated_at
            FROM mailbox_credentials
            WHERE user_id = ?
            ",
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_credential))
    }

    /// Store a freshly granted connection. The watermark of a previous
    /// connection is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn upsert_connected(
        &self,
        user_id: UserId,
        refresh_token: &str,
        access_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO mailbox_credentials
                (user_id, refresh_token, access_token, access_token_expires_at, connected, updated_at)
            VALUES (?, ?, ?, ?, 1, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                refresh_token = excluded.refresh_token,
                access_token = excluded.access_token,
                access_token_expires_at = excluded.access_token_expires_at,
                connected = 1,
                updated_at = excluded.updated_at
            ",
        )
        .bind(user_id.0)
        .bind(refresh_token)
        .bind(access_token)
        .bind(expires_at.map(timestamp_to_db))
        .bind(timestamp_to_db(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Replace the access token after a refresh, and the refresh token if it rotated.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn update_access_token(
        &self,
        user_id: UserId,
        access_token: &str,
        expires_at: Option<DateTime<Utc>>,
        rotated_refresh_token: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE mailbox_credentials SET
                access_token = ?,
                access_token_expires_at = ?,
                refresh_token = COALESCE(?, refresh_token),
                updated_at = ?
            WHERE user_id = ?
            ",
        )
        .bind(access_token)
        .bind(expires_at.map(timestamp_to_db))
        .bind(rotated_refresh_token)
        .bind(timestamp_to_db(Utc::now()))
        .bind(user_id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Drop a cached access token the mailbox API rejected, if it is still
    /// the stored one. The refresh token and connection flag are kept.
    ///
    /// Returns whether a token was dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn clear_access_token(&self, user_id: UserId, sealed_access: &str) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE mailbox_credentials SET
                access_token = NULL,
                access_token_expires_at = NULL,
                updated_at = ?
            WHERE user_id = ? AND access_token = ?
            ",
        )
        .bind(timestamp_to_db(Utc::now()))
        .bind(user_id.0)
        .bind(sealed_access)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark the connection unusable after the provider rejected the refresh token.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn mark_disconnected(&self, user_id: UserId) -> Result<()> {
        sqlx::query(
            r"
            UPDATE mailbox_credentials SET
                access_token = NULL,
                access_token_expires_at = NULL,
                connected = 0,
                updated_at = ?
            WHERE user_id = ?
            ",
        )
        .bind(timestamp_to_db(Utc::now()))
        .bind(user_id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Remove every token for a user. The watermark is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn clear_tokens(&self, user_id: UserId) -> Result<()> {
        sqlx::query(
            r"
            UPDATE mailbox_credentials SET
                refresh_token = NULL,
                access_token = NULL,
                access_token_expires_at = NULL,
                connected = 0,
                updated_at = ?
            WHERE user_id = ?
            ",
        )
        .bind(timestamp_to_db(Utc::now()))
        .bind(user_id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Move the watermark forward. Earlier or equal values are ignored.
    ///
    /// Returns whether the watermark changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn advance_watermark(&self, user_id: UserId, to: DateTime<Utc>) -> Result<bool> {
        let to = timestamp_to_db(to);
        let result = sqlx::query(
            r"
            UPDATE mailbox_credentials SET last_scan_at = ?, updated_at = ?
            WHERE user_id = ? AND (last_scan_at IS NULL OR last_scan_at < ?)
            ",
        )
        .bind(&to)
        .bind(timestamp_to_db(Utc::now()))
        .bind(user_id.0)
        .bind(&to)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn row_to_credential(row: &SqliteRow) -> MailboxCredential {
    let expires_at: Option<String> = row.get("access_token_expires_at");
    let last_scan_at: Option<String> = row.get("last_scan_at");
    let updated_at: String = row.get("updated_at");

    MailboxCredential {
        user_id: UserId(row.get("user_id")),
        refresh_token: row.get("refresh_token"),
        access_token: row.get("access_token"),
        access_token_expires_at: expires_at.as_deref().and_then(timestamp_from_db),
        connected: row.get("connected"),
        last_scan_at: last_scan_at.as_deref().and_then(timestamp_from_db),
        updated_at: timestamp_from_db(&updated_at).unwrap_or_else(Utc::now),
    }
}
