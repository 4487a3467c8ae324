//! Subscription extraction from email text.
//!
//! [`parse`] is a pure function: the same message always yields the same
//! [`ParseResult`]. Rules run in a fixed order:
//!
//! 1. Billing-language gate on sender and subject
//! 2. Merchant (brand table, display name, domain label, subject)
//! 3. Amount and currency
//! 4. Billing cycle (monthly when unstated)
//! 5. Renewal, first-charge and trial-end dates
//! 6. Confidence from the number of inferred fields
//! 7. Category from the merchant table
//!
//! Plan name, lifecycle status and a cancellation link are picked up along the way.

mod extract;
mod tables;

pub use extract::{KEYWORD_WINDOW, Sender, parse_date};
pub use tables::{brand_for_domain, category_for_merchant};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::subscription::{BillingCycle, Confidence, SubscriptionStatus};

/// Failure reason for messages without billing language.
pub const NOT_BILLING: &str = "not a billing message";
/// Failure reason when no merchant could be identified.
pub const NO_MERCHANT: &str = "no merchant identified";
/// Failure reason when no amount was found.
pub const NO_AMOUNT: &str = "no monetary amount found";

/// Outcome of a single extraction rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction<T> {
    /// Read directly from the message.
    Matched(T),
    /// Guessed from weaker evidence or a default.
    Inferred(T),
    /// Not found.
    Missing,
}

impl<T> Extraction<T> {
    /// The extracted value, if any.
    pub fn value(self) -> Option<T> {
        match self {
            Self::Matched(v) | Self::Inferred(v) => Some(v),
            Self::Missing => None,
        }
    }

    /// Whether the value was guessed.
    pub const fn is_inferred(&self) -> bool {
        matches!(self, Self::Inferred(_))
    }
}

/// Confidence from the number of inferred fields.
#[must_use]
pub const fn confidence_for(inferred_fields: usize) -> Confidence {
    match inferred_fields {
        0 => Confidence::High,
        1 => Confidence::Medium,
        _ => Confidence::Low,
    }
}

/// A subscription extracted from one email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionDraft {
    /// Merchant name.
    pub merchant: String,
    /// Plan or tier.
    pub plan: Option<String>,
    /// Amount per cycle in minor units.
    pub amount_cents: i64,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Billing cadence.
    pub billing_cycle: BillingCycle,
    /// Date of the charge this message reports.
    pub first_billing_date: Option<NaiveDate>,
    /// Date of the next charge.
    pub next_billing_date: Option<NaiveDate>,
    /// End of a trial.
    pub trial_end_date: Option<NaiveDate>,
    /// Lifecycle state implied by the message.
    pub status: SubscriptionStatus,
    /// Spending category.
    pub category: Option<String>,
    /// How much of the draft was guessed.
    pub confidence: Confidence,
    /// Link for managing or cancelling.
    pub cancellation_url: Option<String>,
}

/// Result of parsing one message. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult {
    /// A subscription was extracted.
    Success(SubscriptionDraft),
    /// The message could not be turned into a subscription.
    Failed {
        /// Human-readable reason.
        reason: String,
    },
}

impl ParseResult {
    fn failed(reason: &str) -> Self {
        Self::Failed {
            reason: reason.to_string(),
        }
    }
}

/// Parse an email into a subscription draft.
#[must_use]
pub fn parse(subject: &str, sender: &str, body: &str, snippet: &str) -> ParseResult {
    if !extract::is_billing_message(sender, subject) {
        return ParseResult::failed(NOT_BILLING);
    }

    let from = Sender::parse(sender);
    let merchant = extract::merchant(&from, subject);

    // Fall back to the snippet when the body is empty (e.g. image-only mail).
    let content = if body.trim().is_empty() { snippet } else { body };
    let text = format!("{subject}\n{content}");

    let amount = extract::amount(&text);
    let cycle = extract::billing_cycle(&text);

    let inferred = [
        merchant.is_inferred(),
        amount.is_inferred(),
        cycle.is_inferred(),
    ]
    .into_iter()
    .filter(|i| *i)
    .count();

    let Some(merchant) = merchant.value() else {
        return ParseResult::failed(NO_MERCHANT);
    };
    let Some((amount_cents, currency)) = amount.value() else {
        return ParseResult::failed(NO_AMOUNT);
    };
    let billing_cycle = cycle.value().unwrap_or_default();

    let dates = extract::billing_dates(&text);
    let category = category_for_merchant(&merchant).map(str::to_string);

    ParseResult::Success(SubscriptionDraft {
        plan: extract::plan(&text),
        amount_cents,
        currency,
        billing_cycle,
        first_billing_date: dates.first,
        next_billing_date: dates.next,
        trial_end_date: dates.trial_end,
        status: extract::status(&text, dates.trial_end),
        category,
        confidence: confidence_for(inferred),
        cancellation_url: extract::cancellation_url(&text),
        merchant,
    })
}
