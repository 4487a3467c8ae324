//! Stored mailbox credential.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// A user's mailbox connection, with tokens sealed by the vault cipher.
#[derive(Clone, PartialEq, Eq)]
pub struct MailboxCredential {
    /// Owner.
    pub user_id: UserId,
    /// Sealed refresh token; `None` once disconnected.
    pub refresh_token: Option<String>,
    /// Sealed access token.
    pub access_token: Option<String>,
    /// Access token expiry.
    pub access_token_expires_at: Option<DateTime<Utc>>,
    /// Whether the connection is usable.
    pub connected: bool,
    /// Watermark: start of the last successful scan.
    pub last_scan_at: Option<DateTime<Utc>>,
    /// Last modification.
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for MailboxCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxCredential")
            .field("user_id", &self.user_id)
            .field("connected", &self.connected)
            .field("access_token_expires_at", &self.access_token_expires_at)
            .field("last_scan_at", &self.last_scan_at)
            .finish_non_exhaustive()
    }
}

/// Connection state reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Whether a usable mailbox connection exists.
    pub connected: bool,
    /// Start of the last successful scan, if any.
    pub last_scan: Option<DateTime<Utc>>,
}

impl From<Option<&MailboxCredential>> for ConnectionStatus {
    fn from(credential: Option<&MailboxCredential>) -> Self {
        credential.map_or(
            Self {
                connected: false,
                last_scan: None,
            },
            |c| Self {
                connected: c.connected,
                last_scan: c.last_scan_at,
            },
        )
    }
}
