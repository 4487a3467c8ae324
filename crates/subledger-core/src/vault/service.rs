//! Token vault: sealed storage plus single-flight refresh.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use subledger_oauth::token::expires_soon;
use tracing::{debug, info, warn};

use super::cipher::TokenCipher;
use super::model::{ConnectionStatus, MailboxCredential};
use super::repository::CredentialRepository;
use crate::mailbox::{AccessToken, MailboxError, MailboxProvider, TokenGrant};
use crate::store::Database;
use crate::{Error, Result, UserId};

/// Owns every user's mailbox tokens.
///
/// Tokens are sealed before they reach the database. Concurrent callers that
/// find an expired access token for the same user share one refresh.
pub struct TokenVault {
    repo: CredentialRepository,
    cipher: Option<TokenCipher>,
    provider: Arc<dyn MailboxProvider>,
    refresh_locks: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for TokenVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVault")
            .field("has_cipher", &self.cipher.is_some())
            .finish_non_exhaustive()
    }
}

impl TokenVault {
    /// Create a vault. Without a cipher every token operation fails with
    /// [`Error::Configuration`].
    #[must_use]
    pub fn new(
        db: &Database,
        cipher: Option<TokenCipher>,
        provider: Arc<dyn MailboxProvider>,
    ) -> Self {
        Self {
            repo: CredentialRepository::new(db),
            cipher,
            provider,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    fn cipher(&self) -> Result<&TokenCipher> {
        self.cipher.as_ref().ok_or_else(|| {
            Error::Configuration("token encryption key is not configured".to_string())
        })
    }

    /// Store tokens for a newly connected mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty refresh token,
    /// [`Error::Configuration`] without an encryption key, or a persistence error.
    pub async fn store_credential(
        &self,
        user_id: UserId,
        refresh_token: &str,
        access_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if refresh_token.is_empty() {
            return Err(Error::InvalidInput("refresh token is empty".to_string()));
        }
        let cipher = self.cipher()?;
        let sealed_refresh = cipher.encrypt(refresh_token)?;
        let sealed_access = access_token.map(|t| cipher.encrypt(t)).transpose()?;

        self.repo
            .upsert_connected(user_id, &sealed_refresh, sealed_access.as_deref(), expires_at)
            .await?;
        info!(user = %user_id, "Stored mailbox credential");
        Ok(())
    }

    /// Return a usable access token, refreshing it when it is missing or
    /// expires within the safety margin.
    ///
    /// # Errors
    ///
    /// - [`Error::AuthExpired`] if the user is not connected or the provider
    ///   rejected the refresh token (the credential is then marked disconnected)
    /// - [`Error::ProviderUnavailable`] on transient provider failures
    pub async fn get_valid_access_token(&self, user_id: UserId) -> Result<AccessToken> {
        let lock = self.refresh_lock(user_id);
        let _guard = lock.lock().await;

        // Re-read under the lock: a concurrent caller may have refreshed already.
        let credential = self
            .repo
            .get(user_id)
            .await?
            .filter(|c| c.connected)
            .ok_or(Error::AuthExpired(user_id))?;
        let cipher = self.cipher()?;

        if let Some(token) = Self::cached_access_token(&credential, cipher, Utc::now())? {
            return Ok(token);
        }

        let sealed_refresh = credential
            .refresh_token
            .as_deref()
            .ok_or(Error::AuthExpired(user_id))?;
        let refresh_token = cipher.decrypt(sealed_refresh)?;

        debug!(user = %user_id, "Refreshing access token");
        match self.provider.refresh_access_token(&refresh_token).await {
            Ok(grant) => self.persist_refresh(user_id, cipher, grant).await,
            Err(MailboxError::InvalidGrant) => {
                warn!(user = %user_id, "Refresh token rejected; marking mailbox disconnected");
                self.repo.mark_disconnected(user_id).await?;
                Err(Error::AuthExpired(user_id))
            }
            Err(e) => Err(e.into_error(user_id)),
        }
    }

    fn cached_access_token(
        credential: &MailboxCredential,
        cipher: &TokenCipher,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessToken>> {
        let Some(sealed) = credential.access_token.as_deref() else {
            return Ok(None);
        };
        if expires_soon(credential.access_token_expires_at, now) {
            return Ok(None);
        }
        cipher.decrypt(sealed).map(|t| Some(AccessToken::new(t)))
    }

    async fn persist_refresh(
        &self,
        user_id: UserId,
        cipher: &TokenCipher,
        grant: TokenGrant,
    ) -> Result<AccessToken> {
        let sealed_access = cipher.encrypt(&grant.access_token)?;
        let rotated = grant
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(|t| cipher.encrypt(t))
            .transpose()?;

        self.repo
            .update_access_token(user_id, &sealed_access, grant.expires_at, rotated.as_deref())
            .await?;
        info!(user = %user_id, rotated = rotated.is_some(), "Access token refreshed");
        Ok(AccessToken::new(grant.access_token))
    }

    /// Drop a cached access token the mailbox API refused, so the next
    /// [`Self::get_valid_access_token`] refreshes it. The connection is kept.
    ///
    /// A token that was already replaced by a concurrent refresh is left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential cannot be read or updated.
    pub async fn invalidate_access_token(
        &self,
        user_id: UserId,
        rejected: &AccessToken,
    ) -> Result<()> {
        let lock = self.refresh_lock(user_id);
        let _guard = lock.lock().await;

        let Some(credential) = self.repo.get(user_id).await? else {
            return Ok(());
        };
        let Some(sealed) = credential.access_token.as_deref() else {
            return Ok(());
        };
        if self.cipher()?.decrypt(sealed)? != rejected.secret() {
            return Ok(());
        }
        if self.repo.clear_access_token(user_id, sealed).await? {
            info!(user = %user_id, "Rejected access token dropped");
        }
        Ok(())
    }

    fn refresh_lock(&self, user_id: UserId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .refresh_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(user_id).or_default())
    }

    fn forget_refresh_lock(&self, user_id: UserId) {
        self.refresh_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user_id);
    }

    /// Disconnect a mailbox: revoke at the provider (best effort) and delete
    /// the stored tokens. The watermark is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the local deletion fails. Provider failures are logged only.
    pub async fn revoke(&self, user_id: UserId) -> Result<()> {
        let lock = self.refresh_lock(user_id);
        let _guard = lock.lock().await;

        let Some(credential) = self.repo.get(user_id).await? else {
            debug!(user = %user_id, "No credential to revoke");
            self.forget_refresh_lock(user_id);
            return Ok(());
        };

        if let (Some(sealed), Some(cipher)) = (credential.refresh_token.as_deref(), &self.cipher) {
            match cipher.decrypt(sealed) {
                Ok(token) => {
                    if let Err(e) = self.provider.revoke_token(&token).await {
                        warn!(user = %user_id, "Provider revocation failed: {e}");
                    }
                }
                Err(e) => warn!(user = %user_id, "Could not open refresh token for revocation: {e}"),
            }
        }

        self.repo.clear_tokens(user_id).await?;
        self.forget_refresh_lock(user_id);
        info!(user = %user_id, "Mailbox disconnected");
        Ok(())
    }

    /// Watermark of the last successful scan.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn watermark(&self, user_id: UserId) -> Result<Option<DateTime<Utc>>> {
        Ok(self.repo.get(user_id).await?.and_then(|c| c.last_scan_at))
    }

    /// Move the watermark forward; never backward.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn advance_watermark(&self, user_id: UserId, to: DateTime<Utc>) -> Result<()> {
        if self.repo.advance_watermark(user_id, to).await? {
            debug!(user = %user_id, watermark = %to, "Watermark advanced");
        }
        Ok(())
    }

    /// Connection state.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn status(&self, user_id: UserId) -> Result<ConnectionStatus> {
        let credential = self.repo.get(user_id).await?;
        Ok(ConnectionStatus::from(credential.as_ref()))
    }
}
