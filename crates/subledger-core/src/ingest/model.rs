//! Processed-message records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;
use crate::mailbox::MailMessage;
use crate::parser::SubscriptionDraft;
use crate::subscription::SubscriptionId;

/// Longest snippet kept per message, in characters.
pub const SNIPPET_MAX_CHARS: usize = 500;

/// Whether a message produced a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseOutcome {
    /// A subscription was extracted.
    Success,
    /// Parsing or fetching failed.
    Failed,
}

impl ParseOutcome {
    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            _ => Self::Failed,
        }
    }

    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// Audit record of one examined message. Doubles as the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedMessageRecord {
    /// Row id.
    pub id: i64,
    /// Owner.
    pub user_id: UserId,
    /// Provider message id; unique per user.
    pub message_id: String,
    /// Raw sender.
    pub sender: String,
    /// Subject line.
    pub subject: String,
    /// When the provider received the message.
    pub received_at: DateTime<Utc>,
    /// Truncated preview.
    pub snippet: String,
    /// Parse outcome.
    pub outcome: ParseOutcome,
    /// Extracted fields, on success.
    pub extracted: Option<SubscriptionDraft>,
    /// Subscription created from this message; cleared if it is deleted.
    pub subscription_id: Option<SubscriptionId>,
    /// Failure reason.
    pub error_reason: Option<String>,
    /// When the message was processed.
    pub processed_at: DateTime<Utc>,
    /// When the record is purged.
    pub retention_expires_at: DateTime<Utc>,
}

/// Fields for a new record.
#[derive(Debug, Clone)]
pub struct NewProcessedMessage {
    /// Provider message id.
    pub message_id: String,
    /// Raw sender.
    pub sender: String,
    /// Subject line.
    pub subject: String,
    /// When the provider received the message.
    pub received_at: DateTime<Utc>,
    /// Preview, at most [`SNIPPET_MAX_CHARS`] characters.
    pub snippet: String,
    /// Extracted fields on success, failure reason otherwise.
    pub result: Result<SubscriptionDraft, String>,
    /// Processing time.
    pub processed_at: DateTime<Utc>,
    /// Purge time.
    pub retention_expires_at: DateTime<Utc>,
}

impl NewProcessedMessage {
    /// Record for a fetched message.
    #[must_use]
    pub fn from_message(
        message: &MailMessage,
        result: Result<SubscriptionDraft, String>,
        processed_at: DateTime<Utc>,
        retention: Duration,
    ) -> Self {
        let preview = if message.snippet.trim().is_empty() {
            &message.body
        } else {
            &message.snippet
        };
        Self {
            message_id: message.id.clone(),
            sender: message.sender.clone(),
            subject: message.subject.clone(),
            received_at: message.received_at,
            snippet: truncate_snippet(preview),
            result,
            processed_at,
            retention_expires_at: processed_at + retention,
        }
    }

    /// Record for a message that could not be fetched.
    #[must_use]
    pub fn fetch_failed(
        message_id: &str,
        reason: String,
        processed_at: DateTime<Utc>,
        retention: Duration,
    ) -> Self {
        Self {
            message_id: message_id.to_string(),
            sender: String::new(),
            subject: String::new(),
            received_at: processed_at,
            snippet: String::new(),
            result: Err(reason),
            processed_at,
            retention_expires_at: processed_at + retention,
        }
    }

    /// Outcome implied by the result.
    #[must_use]
    pub const fn outcome(&self) -> ParseOutcome {
        match self.result {
            Ok(_) => ParseOutcome::Success,
            Err(_) => ParseOutcome::Failed,
        }
    }
}

fn truncate_snippet(text: &str) -> String {
    text.trim().chars().take(SNIPPET_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_truncated_by_chars() {
        let message = MailMessage {
            id: "m1".into(),
            sender: "a@b.com".into(),
            subject: "s".into(),
            received_at: Utc::now(),
            body: String::new(),
            snippet: "é".repeat(SNIPPET_MAX_CHARS + 20),
        };
        let now = Utc::now();
        let record =
            NewProcessedMessage::from_message(&message, Err("x".into()), now, Duration::days(30));
        assert_eq!(record.snippet.chars().count(), SNIPPET_MAX_CHARS);
        assert_eq!(record.retention_expires_at, now + Duration::days(30));
        assert_eq!(record.outcome(), ParseOutcome::Failed);
    }

    #[test]
    fn test_body_used_when_snippet_empty() {
        let message = MailMessage {
            id: "m1".into(),
            sender: String::new(),
            subject: String::new(),
            received_at: Utc::now(),
            body: "  Total $5  ".into(),
            snippet: String::new(),
        };
        let record = NewProcessedMessage::from_message(
            &message,
            Err("x".into()),
            Utc::now(),
            Duration::days(30),
        );
        assert_eq!(record.snippet, "Total $5");
    }
}
