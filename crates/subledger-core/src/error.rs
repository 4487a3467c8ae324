//! Error types for the core library.

use thiserror::Error;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid configuration (secrets, client ids). Not retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The mailbox refresh token was rejected; the user must reconnect.
    #[error("Mailbox authorization expired for user {0}; reconnect required")]
    AuthExpired(crate::UserId),

    /// A requested entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Database operation failed. Safe to retry.
    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// The remote mailbox provider is temporarily unreachable. Safe to retry.
    #[error("Mailbox provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// OAuth callback did not match a pending authorization.
    #[error("Unknown or expired authorization state")]
    InvalidState,

    /// Caller supplied invalid data.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Token encryption or decryption failed.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// `OAuth2` protocol error.
    #[error("OAuth error: {0}")]
    OAuth(#[from] subledger_oauth::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System keyring error.
    #[error("Keyring error: {0}")]
    Credential(#[from] keyring::Error),
}

impl Error {
    /// Returns true if the user has to reconnect their mailbox.
    #[must_use]
    pub const fn requires_reconnect(&self) -> bool {
        matches!(self, Self::AuthExpired(_))
    }

    /// Returns true if the failed operation can simply be tried again later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_) | Self::Persistence(_))
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
