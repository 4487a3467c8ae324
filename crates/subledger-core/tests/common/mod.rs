//! Shared fixtures: a scripted in-memory mailbox provider.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::StreamExt;
use futures::stream;
use subledger_core::mailbox::{AccessToken, CandidateStream, TokenGrant};
use subledger_core::vault::TokenCipher;
use subledger_core::{Database, MailMessage, MailboxError, MailboxProvider, TokenVault, UserId};
use subledger_oauth::PkceChallenge;
use url::Url;

/// Authorization code the fake accepts.
pub const GOOD_CODE: &str = "good-code";
/// Authorization code answered without a refresh token.
pub const NO_REFRESH_CODE: &str = "no-refresh-code";

/// How a scripted fetch fails.
#[derive(Debug, Clone, Copy)]
pub enum FetchFailure {
    NotFound,
    Unavailable,
    Unauthorized,
    Malformed,
}

/// How the fake answers refresh requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshBehavior {
    Succeed,
    InvalidGrant,
    Unavailable,
}

/// In-memory mailbox with scripted failures and call counters.
pub struct FakeMailbox {
    messages: Mutex<Vec<MailMessage>>,
    fetch_failures: Mutex<HashMap<String, FetchFailure>>,
    refresh_behavior: Mutex<RefreshBehavior>,
    refresh_delay: StdDuration,
    refresh_calls: AtomicUsize,
    revoke_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    listed_since: Mutex<Vec<Option<DateTime<Utc>>>>,
}

impl Default for FakeMailbox {
    fn default() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fetch_failures: Mutex::new(HashMap::new()),
            refresh_behavior: Mutex::new(RefreshBehavior::Succeed),
            refresh_delay: StdDuration::ZERO,
            refresh_calls: AtomicUsize::new(0),
            revoke_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            listed_since: Mutex::new(Vec::new()),
        }
    }
}

impl FakeMailbox {
    pub fn with_refresh_delay(delay: StdDuration) -> Self {
        Self {
            refresh_delay: delay,
            ..Self::default()
        }
    }

    pub fn add_message(&self, message: MailMessage) {
        self.messages.lock().unwrap().push(message);
    }

    pub fn fail_fetch(&self, id: &str, failure: FetchFailure) {
        self.fetch_failures
            .lock()
            .unwrap()
            .insert(id.to_string(), failure);
    }

    pub fn clear_fetch_failures(&self) {
        self.fetch_failures.lock().unwrap().clear();
    }

    pub fn set_refresh_behavior(&self, behavior: RefreshBehavior) {
        *self.refresh_behavior.lock().unwrap() = behavior;
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn revoke_calls(&self) -> usize {
        self.revoke_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn listed_since(&self) -> Vec<Option<DateTime<Utc>>> {
        self.listed_since.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailboxProvider for FakeMailbox {
    fn authorization_url(&self, state: &str, pkce: &PkceChallenge) -> Result<Url, MailboxError> {
        let mut url = Url::parse("https://auth.example.test/authorize").unwrap();
        url.query_pairs_mut()
            .append_pair("state", state)
            .append_pair("code_challenge", pkce.challenge());
        Ok(url)
    }

    async fn exchange_code(
        &self,
        code: &str,
        _pkce_verifier: &str,
    ) -> Result<TokenGrant, MailboxError> {
        match code {
            GOOD_CODE => Ok(TokenGrant {
                access_token: "access-initial".to_string(),
                expires_at: Some(Utc::now() + Duration::hours(1)),
                refresh_token: Some("refresh-initial".to_string()),
            }),
            NO_REFRESH_CODE => Ok(TokenGrant {
                access_token: "access-initial".to_string(),
                expires_at: Some(Utc::now() + Duration::hours(1)),
                refresh_token: None,
            }),
            _ => Err(MailboxError::InvalidGrant),
        }
    }

    async fn refresh_access_token(&self, _refresh_token: &str) -> Result<TokenGrant, MailboxError> {
        let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        let behavior = *self.refresh_behavior.lock().unwrap();
        match behavior {
            RefreshBehavior::Succeed => Ok(TokenGrant {
                access_token: format!("access-{call}"),
                expires_at: Some(Utc::now() + Duration::hours(1)),
                refresh_token: None,
            }),
            RefreshBehavior::InvalidGrant => Err(MailboxError::InvalidGrant),
            RefreshBehavior::Unavailable => Err(MailboxError::Unavailable("503".to_string())),
        }
    }

    async fn revoke_token(&self, _token: &str) -> Result<(), MailboxError> {
        self.revoke_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn list_candidates<'a>(
        &'a self,
        _access_token: &'a AccessToken,
        since: Option<DateTime<Utc>>,
    ) -> CandidateStream<'a> {
        self.listed_since.lock().unwrap().push(since);
        let ids: Vec<_> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.id.clone())
            .collect();
        stream::iter(ids.into_iter().map(Ok)).boxed()
    }

    async fn fetch_message(
        &self,
        _access_token: &AccessToken,
        id: &str,
    ) -> Result<MailMessage, MailboxError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.fetch_failures.lock().unwrap().get(id).copied() {
            return Err(match failure {
                FetchFailure::NotFound => MailboxError::NotFound(id.to_string()),
                FetchFailure::Unavailable => MailboxError::Unavailable("503".to_string()),
                FetchFailure::Unauthorized => MailboxError::Unauthorized("401".to_string()),
                FetchFailure::Malformed => MailboxError::Malformed("no payload".to_string()),
            });
        }
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| MailboxError::NotFound(id.to_string()))
    }
}

pub fn cipher() -> TokenCipher {
    TokenCipher::new([7u8; 32])
}

pub fn message(id: &str, sender: &str, subject: &str, body: &str) -> MailMessage {
    MailMessage {
        id: id.to_string(),
        sender: sender.to_string(),
        subject: subject.to_string(),
        received_at: Utc.with_ymd_and_hms(2026, 2, 14, 9, 0, 0).unwrap(),
        body: body.to_string(),
        snippet: String::new(),
    }
}

/// The three-message inbox: a clear receipt, an ambiguous payment notice
/// and a promotion.
pub fn fixture_inbox(mailbox: &FakeMailbox) {
    mailbox.add_message(message(
        "msg-receipt",
        "Acme Streaming <billing@acmestreaming.com>",
        "Your Acme Streaming receipt",
        "Thanks for your payment.\nTotal: $9.99\nBilled monthly.",
    ));
    mailbox.add_message(message(
        "msg-ambiguous",
        "Gadget Cloud <payments@gadgetcloud.io>",
        "Payment received",
        "We have received your payment.\nAmount charged: $12.50\nThank you!",
    ));
    mailbox.add_message(message(
        "msg-promo",
        "Shop <news@shop.example.com>",
        "Summer sale: 20% off everything",
        "Big savings this weekend only.",
    ));
}

/// A vault holding a connected credential with a fresh access token.
pub async fn connected_vault(
    db: &Database,
    provider: std::sync::Arc<FakeMailbox>,
    user: UserId,
) -> TokenVault {
    let vault = TokenVault::new(db, Some(cipher()), provider);
    vault
        .store_credential(
            user,
            "refresh-initial",
            Some("access-initial"),
            Some(Utc::now() + Duration::hours(1)),
        )
        .await
        .unwrap();
    vault
}
