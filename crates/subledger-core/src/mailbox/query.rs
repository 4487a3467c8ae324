//! Candidate search query.

use chrono::{DateTime, Utc};

/// Words that mark an email as possibly billing related.
///
/// The same list drives the provider-side search and the parser's billing gate.
pub const BILLING_KEYWORDS: &[&str] = &[
    "receipt",
    "invoice",
    "subscription",
    "renewal",
    "renews",
    "billing",
    "payment",
    "charged",
    "trial",
    "membership",
    "order",
];

const SENDER_HINTS: &[&str] = &["billing", "receipts", "invoice", "payments", "noreply"];

/// Build a Gmail search query for billing-looking messages received after `since`.
///
/// Gmail's `after:` accepts epoch seconds; the bound is exclusive at second
/// resolution, so messages in the same second as the watermark are re-listed
/// and filtered by the dedup store.
#[must_use]
pub fn candidate_query(since: DateTime<Utc>) -> String {
    let subjects = BILLING_KEYWORDS
        .iter()
        .map(|k| format!("subject:{k}"))
        .chain(SENDER_HINTS.iter().map(|s| format!("from:{s}")))
        .collect::<Vec<_>>()
        .join(" OR ");

    format!("({subjects}) after:{} -in:chats", since.timestamp() - 1)
}
