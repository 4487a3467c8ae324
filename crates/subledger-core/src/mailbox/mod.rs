//! Mailbox access.
//!
//! The ingestion pipeline only talks to a mailbox through the
//! [`MailboxProvider`] capability: token refresh/revocation, listing
//! candidate messages since a watermark, and fetching message content.
//! [`GmailClient`] implements it against the Gmail REST API.

mod gmail;
mod query;

pub use gmail::GmailClient;
pub use query::{BILLING_KEYWORDS, candidate_query};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use subledger_oauth::PkceChallenge;
use url::Url;

use crate::{Error, UserId};

/// Errors reported by a mailbox provider.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    /// The message disappeared between listing and fetching.
    #[error("Message {0} not found")]
    NotFound(String),

    /// The access token was rejected by the mailbox API.
    #[error("Access token rejected: {0}")]
    Unauthorized(String),

    /// The refresh token (or authorization code) was rejected.
    #[error("Grant rejected by provider")]
    InvalidGrant,

    /// Network failure, rate limiting or server error.
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// The provider answered with something we could not interpret.
    #[error("Malformed provider response: {0}")]
    Malformed(String),

    /// Any other `OAuth2` failure.
    #[error(transparent)]
    OAuth(#[from] subledger_oauth::Error),
}

impl MailboxError {
    /// Convert into a core error on behalf of `user`.
    #[must_use]
    pub fn into_error(self, user: UserId) -> Error {
        match self {
            Self::NotFound(id) => Error::NotFound(format!("message {id}")),
            Self::Unauthorized(reason) => {
                Error::ProviderUnavailable(format!("access token rejected: {reason}"))
            }
            Self::InvalidGrant => Error::AuthExpired(user),
            Self::Unavailable(reason) => Error::ProviderUnavailable(reason),
            Self::Malformed(reason) => Error::ProviderUnavailable(format!("malformed response: {reason}")),
            Self::OAuth(subledger_oauth::Error::InvalidConfig(reason)) => {
                Error::Configuration(reason)
            }
            Self::OAuth(e) => Error::OAuth(e),
        }
    }

    /// Returns true when the failure concerns the whole mailbox session, not a single message.
    #[must_use]
    pub const fn is_session_failure(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized(_) | Self::InvalidGrant | Self::Unavailable(_)
        )
    }
}

/// Map an `OAuth2` error onto the mailbox taxonomy.
pub(crate) fn classify_oauth_error(err: subledger_oauth::Error) -> MailboxError {
    if err.is_invalid_grant() {
        MailboxError::InvalidGrant
    } else if err.is_transient() {
        MailboxError::Unavailable(err.to_string())
    } else {
        MailboxError::OAuth(err)
    }
}

/// A short-lived bearer token for the mailbox API.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a raw token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token value, for the `Authorization` header.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Tokens returned by a code exchange or refresh.
#[derive(Clone)]
pub struct TokenGrant {
    /// New access token.
    pub access_token: String,
    /// When the access token expires, if the provider said.
    pub expires_at: Option<DateTime<Utc>>,
    /// Refresh token, when the provider issued or rotated one.
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("expires_at", &self.expires_at)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

impl From<subledger_oauth::Token> for TokenGrant {
    fn from(token: subledger_oauth::Token) -> Self {
        Self {
            access_token: token.access_token,
            expires_at: token.expires_at,
            refresh_token: token.refresh_token,
        }
    }
}

/// A fetched message, reduced to what the parser needs.
#[derive(Debug, Clone)]
pub struct MailMessage {
    /// Provider message identifier.
    pub id: String,
    /// Raw `From` header, e.g. `Netflix <info@account.netflix.com>`.
    pub sender: String,
    /// Subject line.
    pub subject: String,
    /// When the provider received the message.
    pub received_at: DateTime<Utc>,
    /// Plain-text body (HTML bodies are converted).
    pub body: String,
    /// Short preview text.
    pub snippet: String,
}

/// Lazy, finite stream of candidate message ids.
pub type CandidateStream<'a> = BoxStream<'a, Result<String, MailboxError>>;

/// Capability the pipeline needs from a remote mailbox.
#[async_trait]
pub trait MailboxProvider: Send + Sync {
    /// Consent URL for connecting a mailbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider is misconfigured.
    fn authorization_url(&self, state: &str, pkce: &PkceChallenge) -> Result<Url, MailboxError>;

    /// Exchange an authorization code for tokens.
    async fn exchange_code(&self, code: &str, pkce_verifier: &str)
    -> Result<TokenGrant, MailboxError>;

    /// Exchange a refresh token for a new access token.
    ///
    /// Returns [`MailboxError::InvalidGrant`] when the refresh token was rejected.
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenGrant, MailboxError>;

    /// Revoke a token at the provider. Best effort.
    async fn revoke_token(&self, token: &str) -> Result<(), MailboxError>;

    /// Ids of messages that look subscription related.
    ///
    /// `since` is the scan watermark; `None` means a first scan, bounded to
    /// the provider's historical lookback.
    fn list_candidates<'a>(
        &'a self,
        access_token: &'a AccessToken,
        since: Option<DateTime<Utc>>,
    ) -> CandidateStream<'a>;

    /// Fetch one message.
    ///
    /// Returns [`MailboxError::NotFound`] if the message was deleted after listing.
    async fn fetch_message(
        &self,
        access_token: &AccessToken,
        id: &str,
    ) -> Result<MailMessage, MailboxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let user = UserId::new(3);
        assert!(matches!(
            MailboxError::InvalidGrant.into_error(user),
            Error::AuthExpired(u) if u == user
        ));
        assert!(matches!(
            MailboxError::Unavailable("503".into()).into_error(user),
            Error::ProviderUnavailable(_)
        ));
        assert!(matches!(
            MailboxError::NotFound("abc".into()).into_error(user),
            Error::NotFound(_)
        ));
        let refused = MailboxError::Unauthorized("401".into()).into_error(user);
        assert!(refused.is_retryable());
        assert!(!refused.requires_reconnect());
    }

    #[test]
    fn test_oauth_classification() {
        let err = subledger_oauth::Error::oauth_error("invalid_grant", "revoked");
        assert!(matches!(classify_oauth_error(err), MailboxError::InvalidGrant));

        let err = subledger_oauth::Error::Status(502);
        assert!(matches!(classify_oauth_error(err), MailboxError::Unavailable(_)));

        let err = subledger_oauth::Error::oauth_error("invalid_client", "bad secret");
        assert!(matches!(classify_oauth_error(err), MailboxError::OAuth(_)));
    }

    #[test]
    fn test_access_token_debug_redacted() {
        let token = AccessToken::new("ya29.secret");
        assert_eq!(format!("{token:?}"), "AccessToken(***)");
        assert_eq!(token.secret(), "ya29.secret");
    }
}
