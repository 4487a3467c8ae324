//! Scan orchestration.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::model::NewProcessedMessage;
use super::repository::ProcessedMessageRepository;
use crate::mailbox::{AccessToken, MailMessage, MailboxError, MailboxProvider};
use crate::parser::{ParseResult, parse};
use crate::store::{Database, now};
use crate::subscription::NewSubscription;
use crate::vault::TokenVault;
use crate::{Error, Result, UserId};

/// Where a scan currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Not started.
    Idle,
    /// Enumerating candidate messages.
    Listing,
    /// Fetching a batch.
    Fetching,
    /// Parsing a batch.
    Parsing,
    /// Writing a batch.
    Persisting,
    /// Finished; the watermark was advanced.
    Done,
    /// Aborted; the watermark is untouched.
    Failed,
}

impl std::fmt::Display for ScanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listing => "listing",
            Self::Fetching => "fetching",
            Self::Parsing => "parsing",
            Self::Persisting => "persisting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Counts reported by a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// Distinct candidate ids listed by the provider.
    pub total_candidates: usize,
    /// Records written by this scan.
    pub processed: usize,
    /// Subscriptions created by this scan.
    pub new_subscriptions: usize,
    /// Records written with outcome `failed`.
    pub failed: usize,
    /// Candidates already recorded or gone before they could be fetched.
    pub skipped: usize,
}

enum Examined {
    Parsed(MailMessage, ParseResult),
    FetchFailed(String, String),
}

/// Runs inbox scans for users.
pub struct IngestionCoordinator {
    vault: Arc<TokenVault>,
    provider: Arc<dyn MailboxProvider>,
    records: ProcessedMessageRepository,
    batch_size: usize,
    retention: Duration,
}

impl std::fmt::Debug for IngestionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionCoordinator")
            .field("batch_size", &self.batch_size)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl IngestionCoordinator {
    /// Create a coordinator. A `batch_size` of zero is treated as one.
    #[must_use]
    pub fn new(
        db: &Database,
        vault: Arc<TokenVault>,
        provider: Arc<dyn MailboxProvider>,
        batch_size: usize,
        retention: Duration,
    ) -> Self {
        Self {
            vault,
            provider,
            records: ProcessedMessageRepository::new(db),
            batch_size: batch_size.max(1),
            retention,
        }
    }

    /// Scan the user's mailbox for new subscription emails.
    ///
    /// The watermark moves to the instant the scan started, and only once
    /// every batch has been written.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::AuthExpired`] if no usable token can be obtained
    /// - [`crate::Error::ProviderUnavailable`] on provider outages, or when the
    ///   API refuses the access token mid-scan (the token is dropped so the
    ///   next attempt refreshes it)
    /// - [`crate::Error::Persistence`] if a write fails
    ///
    /// In every error case the watermark is left where it was.
    pub async fn run_scan(&self, user_id: UserId) -> Result<ScanSummary> {
        let started_at = now();
        let mut state = ScanState::Idle;
        info!(user = %user_id, "Scan started");

        match self.scan(user_id, started_at, &mut state).await {
            Ok(summary) => {
                transition(user_id, &mut state, ScanState::Done);
                info!(
                    user = %user_id,
                    candidates = summary.total_candidates,
                    processed = summary.processed,
                    new = summary.new_subscriptions,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "Scan finished"
                );
                Ok(summary)
            }
            Err(e) => {
                let during = state;
                transition(user_id, &mut state, ScanState::Failed);
                warn!(user = %user_id, state = %during, "Scan aborted: {e}");
                Err(e)
            }
        }
    }

    async fn scan(
        &self,
        user_id: UserId,
        started_at: DateTime<Utc>,
        state: &mut ScanState,
    ) -> Result<ScanSummary> {
        let token = self.vault.get_valid_access_token(user_id).await?;
        let since = self.vault.watermark(user_id).await?;
        let mut summary = ScanSummary::default();

        transition(user_id, state, ScanState::Listing);
        let pending = self.new_candidates(user_id, &token, since, &mut summary).await?;
        debug!(user = %user_id, pending = pending.len(), "Candidates to examine");

        for batch in pending.chunks(self.batch_size) {
            transition(user_id, state, ScanState::Fetching);
            let fetched = self.fetch_batch(&token, batch).await;

            transition(user_id, state, ScanState::Parsing);
            let mut examined = Vec::with_capacity(fetched.len());
            for (id, result) in fetched {
                match result {
                    Ok(message) => {
                        let parsed = parse(
                            &message.subject,
                            &message.sender,
                            &message.body,
                            &message.snippet,
                        );
                        examined.push(Examined::Parsed(message, parsed));
                    }
                    Err(MailboxError::NotFound(_)) => {
                        debug!(user = %user_id, message = %id, "Message vanished before fetch");
                        summary.skipped += 1;
                    }
                    Err(e) if e.is_session_failure() => {
                        return Err(self.abort(user_id, &token, e).await);
                    }
                    Err(e) => {
                        debug!(user = %user_id, message = %id, "Fetch failed: {e}");
                        examined.push(Examined::FetchFailed(id, e.to_string()));
                    }
                }
            }

            transition(user_id, state, ScanState::Persisting);
            for item in examined {
                self.persist(user_id, item, &mut summary).await?;
            }
        }

        self.vault.advance_watermark(user_id, started_at).await?;
        Ok(summary)
    }

    /// List candidates, dropping ids already recorded or listed twice.
    async fn new_candidates(
        &self,
        user_id: UserId,
        token: &AccessToken,
        since: Option<DateTime<Utc>>,
        summary: &mut ScanSummary,
    ) -> Result<Vec<String>> {
        let mut listed = self.provider.list_candidates(token, since);
        let mut seen = HashSet::new();
        let mut pending = Vec::new();

        loop {
            let id = match listed.try_next().await {
                Ok(Some(id)) => id,
                Ok(None) => break,
                Err(e) => return Err(self.abort(user_id, token, e).await),
            };
            if !seen.insert(id.clone()) {
                continue;
            }
            summary.total_candidates += 1;
            if self.records.exists(user_id, &id).await? {
                summary.skipped += 1;
            } else {
                pending.push(id);
            }
        }

        Ok(pending)
    }

    /// Turn a session-wide provider failure into the scan's error. A token the
    /// API refused is dropped first so the next scan refreshes it.
    async fn abort(&self, user_id: UserId, token: &AccessToken, err: MailboxError) -> Error {
        if matches!(err, MailboxError::Unauthorized(_)) {
            if let Err(e) = self.vault.invalidate_access_token(user_id, token).await {
                warn!(user = %user_id, "Could not drop rejected access token: {e}");
            }
        }
        err.into_error(user_id)
    }

    async fn fetch_batch(
        &self,
        token: &AccessToken,
        ids: &[String],
    ) -> Vec<(String, std::result::Result<MailMessage, MailboxError>)> {
        stream::iter(ids)
            .map(|id| async move { (id.clone(), self.provider.fetch_message(token, id).await) })
            .buffered(self.batch_size)
            .collect()
            .await
    }

    async fn persist(
        &self,
        user_id: UserId,
        item: Examined,
        summary: &mut ScanSummary,
    ) -> Result<()> {
        let processed_at = now();
        match item {
            Examined::Parsed(message, ParseResult::Success(draft)) => {
                let subscription =
                    NewSubscription::detected(&draft, message.received_at.date_naive());
                let record = NewProcessedMessage::from_message(
                    &message,
                    Ok(draft),
                    processed_at,
                    self.retention,
                );
                match self.records.record_success(user_id, &record, subscription).await? {
                    Some(id) => {
                        debug!(user = %user_id, message = %message.id, subscription = %id, "Subscription detected");
                        summary.processed += 1;
                        summary.new_subscriptions += 1;
                    }
                    None => summary.skipped += 1,
                }
            }
            Examined::Parsed(message, ParseResult::Failed { reason }) => {
                debug!(user = %user_id, message = %message.id, reason = %reason, "Not a subscription");
                let record = NewProcessedMessage::from_message(
                    &message,
                    Err(reason),
                    processed_at,
                    self.retention,
                );
                self.record_failure(user_id, &record, summary).await?;
            }
            Examined::FetchFailed(id, reason) => {
                let record =
                    NewProcessedMessage::fetch_failed(&id, reason, processed_at, self.retention);
                self.record_failure(user_id, &record, summary).await?;
            }
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        user_id: UserId,
        record: &NewProcessedMessage,
        summary: &mut ScanSummary,
    ) -> Result<()> {
        if self.records.record_failure(user_id, record).await? {
            summary.processed += 1;
            summary.failed += 1;
        } else {
            summary.skipped += 1;
        }
        Ok(())
    }
}

fn transition(user_id: UserId, state: &mut ScanState, next: ScanState) {
    if *state != next {
        debug!(user = %user_id, from = %state, to = %next, "Scan state changed");
        *state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_updates_state() {
        let mut state = ScanState::Idle;
        transition(UserId::new(1), &mut state, ScanState::Listing);
        assert_eq!(state, ScanState::Listing);
        assert_eq!(state.to_string(), "listing");
    }
}
