//! The `SubLedger` service: the single entry point the outer layers use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::RngCore;
use subledger_oauth::{OAuthClient, PkceChallenge, Provider};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use crate::config::{Config, ScanSettings};
use crate::ingest::{IngestionCoordinator, ScanSummary};
use crate::mailbox::{GmailClient, MailboxError, MailboxProvider};
use crate::retention::RetentionEnforcer;
use crate::stats::{CostAggregator, Stats};
use crate::store::Database;
use crate::subscription::{
    NewSubscription, Subscription, SubscriptionFilter, SubscriptionId, SubscriptionRepository,
    SubscriptionUpdate,
};
use crate::vault::{ConnectionStatus, TokenCipher, TokenVault};
use crate::{Error, Result, UserId};

/// How long a `connect` authorization stays redeemable.
pub const PENDING_AUTHORIZATION_TTL_SECS: i64 = 600;

struct PendingAuthorization {
    user_id: UserId,
    pkce: PkceChallenge,
    created_at: DateTime<Utc>,
}

/// Subscription tracking for many users over one database.
pub struct SubLedger {
    vault: Arc<TokenVault>,
    provider: Arc<dyn MailboxProvider>,
    coordinator: IngestionCoordinator,
    subscriptions: SubscriptionRepository,
    aggregator: CostAggregator,
    retention: Arc<RetentionEnforcer>,
    pending: Mutex<HashMap<String, PendingAuthorization>>,
}

impl std::fmt::Debug for SubLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubLedger")
            .field("vault", &self.vault)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl SubLedger {
    /// Open the service described by `config`, backed by Gmail.
    ///
    /// The OAuth client id is only required once a mailbox operation runs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for invalid settings or an unreadable
    /// encryption key, or an error if the database cannot be opened.
    pub async fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        if let Some(parent) = config.database_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let db = Database::open(&config.database_path.to_string_lossy()).await?;
        let cipher = TokenCipher::from_config(config)?;
        let provider = Arc::new(gmail_client(config)?);
        Ok(Self::new(&db, provider, cipher, config.scan, config.retention_days))
    }

    /// Assemble the service from its parts.
    #[must_use]
    pub fn new(
        db: &Database,
        provider: Arc<dyn MailboxProvider>,
        cipher: Option<TokenCipher>,
        scan: ScanSettings,
        retention_days: i64,
    ) -> Self {
        let vault = Arc::new(TokenVault::new(db, cipher, Arc::clone(&provider)));
        let coordinator = IngestionCoordinator::new(
            db,
            Arc::clone(&vault),
            Arc::clone(&provider),
            scan.batch_size,
            Duration::days(retention_days),
        );
        Self {
            vault,
            provider,
            coordinator,
            subscriptions: SubscriptionRepository::new(db),
            aggregator: CostAggregator::new(db),
            retention: Arc::new(RetentionEnforcer::new(db)),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Start connecting a mailbox. Returns the consent URL to send the user to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the provider is not configured.
    pub fn connect(&self, user_id: UserId) -> Result<Url> {
        let state = random_state();
        let pkce = PkceChallenge::generate();
        let url = self
            .provider
            .authorization_url(&state, &pkce)
            .map_err(|e| e.into_error(user_id))?;

        let now = Utc::now();
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|_, p| !is_expired(p, now));
        pending.insert(
            state,
            PendingAuthorization {
                user_id,
                pkce,
                created_at: now,
            },
        );
        debug!(user = %user_id, "Authorization started");
        Ok(url)
    }

    /// Finish connecting: redeem the code the provider redirected back with.
    ///
    /// Each `state` can be redeemed once.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] for an unknown, used or expired state
    /// - [`Error::InvalidInput`] if the provider rejected the code
    /// - [`Error::OAuth`] if the provider issued no refresh token
    pub async fn handle_callback(&self, code: &str, state: &str) -> Result<UserId> {
        let authorization = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(state)
            .filter(|p| !is_expired(p, Utc::now()))
            .ok_or(Error::InvalidState)?;
        let user_id = authorization.user_id;

        let grant = match self
            .provider
            .exchange_code(code, authorization.pkce.verifier())
            .await
        {
            Ok(grant) => grant,
            Err(MailboxError::InvalidGrant) => {
                return Err(Error::InvalidInput(
                    "authorization code was rejected".to_string(),
                ));
            }
            Err(e) => return Err(e.into_error(user_id)),
        };
        let refresh_token = grant
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(Error::OAuth(subledger_oauth::Error::NoRefreshToken))?;

        self.vault
            .store_credential(
                user_id,
                refresh_token,
                Some(&grant.access_token),
                grant.expires_at,
            )
            .await?;
        info!(user = %user_id, "Mailbox connected");
        Ok(user_id)
    }

    /// Disconnect the user's mailbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored tokens cannot be deleted.
    pub async fn disconnect(&self, user_id: UserId) -> Result<()> {
        self.vault.revoke(user_id).await
    }

    /// Mailbox connection state.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn status(&self, user_id: UserId) -> Result<ConnectionStatus> {
        self.vault.status(user_id).await
    }

    /// Scan the user's mailbox. See [`IngestionCoordinator::run_scan`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthExpired`] when the user must reconnect, or a
    /// retryable error for provider and database failures.
    pub async fn scan(&self, user_id: UserId) -> Result<ScanSummary> {
        self.coordinator.run_scan(user_id).await
    }

    /// Subscriptions matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_subscriptions(
        &self,
        user_id: UserId,
        filter: &SubscriptionFilter,
    ) -> Result<Vec<Subscription>> {
        self.subscriptions.list(user_id, filter).await
    }

    /// Add a subscription by hand.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if validation fails.
    pub async fn create_subscription(
        &self,
        user_id: UserId,
        new: NewSubscription,
    ) -> Result<Subscription> {
        self.subscriptions.create(user_id, new).await
    }

    /// Edit a subscription.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or [`Error::InvalidInput`].
    pub async fn update_subscription(
        &self,
        user_id: UserId,
        id: SubscriptionId,
        update: SubscriptionUpdate,
    ) -> Result<Subscription> {
        self.subscriptions.update(user_id, id, update).await
    }

    /// Delete a subscription.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if it does not exist for the user.
    pub async fn delete_subscription(&self, user_id: UserId, id: SubscriptionId) -> Result<()> {
        self.subscriptions.delete(user_id, id).await
    }

    /// Mark a subscription cancelled, as of `on` or today.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if it does not exist for the user.
    pub async fn cancel_subscription(
        &self,
        user_id: UserId,
        id: SubscriptionId,
        on: Option<NaiveDate>,
    ) -> Result<Subscription> {
        let on = on.unwrap_or_else(|| Utc::now().date_naive());
        self.subscriptions.cancel(user_id, id, on).await
    }

    /// Spending statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn stats(&self, user_id: UserId) -> Result<Stats> {
        self.aggregator.compute_stats(user_id).await
    }

    /// Purge processed-message records past their retention expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn purge_expired(&self) -> Result<u64> {
        self.retention.purge_expired().await
    }

    /// Purge expired records every `interval` in the background.
    #[must_use]
    pub fn spawn_retention_sweeper(&self, interval: std::time::Duration) -> JoinHandle<()> {
        Arc::clone(&self.retention).spawn_sweeper(interval)
    }
}

fn gmail_client(config: &Config) -> Result<GmailClient> {
    let mut oauth = OAuthClient::new(config.oauth.client_id.clone(), Provider::google_readonly()?)
        .with_redirect_uri(config.oauth.redirect_uri.clone());
    if let Some(secret) = &config.oauth.client_secret {
        oauth = oauth.with_client_secret(secret.clone());
    }
    Ok(GmailClient::new(oauth).with_lookback_days(config.scan.lookback_days))
}

fn random_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn is_expired(pending: &PendingAuthorization, now: DateTime<Utc>) -> bool {
    now - pending.created_at >= Duration::seconds(PENDING_AUTHORIZATION_TTL_SECS)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_states_are_unique_and_url_safe() {
        let a = random_state();
        let b = random_state();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_pending_authorization_expiry() {
        let created_at = Utc::now();
        let pending = PendingAuthorization {
            user_id: UserId::new(1),
            pkce: PkceChallenge::generate(),
            created_at,
        };
        assert!(!is_expired(&pending, created_at + Duration::seconds(599)));
        assert!(is_expired(&pending, created_at + Duration::seconds(600)));
    }

    #[tokio::test]
    async fn test_open_without_client_id_defers_error() {
        let dir = std::env::temp_dir().join(format!("subledger-test-{}", random_state()));
        let config = Config {
            database_path: dir.join("ledger.db"),
            token_key: Some(crate::vault::generate_key()),
            ..Config::default()
        };

        let ledger = SubLedger::open(&config).await.unwrap();
        let user = UserId::new(1);
        assert!(ledger.list_subscriptions(user, &SubscriptionFilter::default()).await.unwrap().is_empty());
        assert!(matches!(ledger.connect(user), Err(Error::Configuration(_))));

        drop(ledger);
        let _ = std::fs::remove_dir_all(dir);
    }
}
