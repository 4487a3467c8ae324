//! Subscription data models.
//!
//! Amounts are `i64` hundredths of the currency's major unit for every
//! currency, whatever its ISO 4217 exponent: `¥1,200` is stored as `120000`
//! and shown as `1200.00 JPY`. [`format_amount`] and the stats totals rely
//! on this single scale.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::parser::SubscriptionDraft;
use crate::{Error, Result, UserId};

/// Database identifier of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub i64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How often a subscription bills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    /// Every week.
    Weekly,
    /// Every month.
    #[default]
    Monthly,
    /// Every three months.
    Quarterly,
    /// Every year.
    Annual,
}

impl BillingCycle {
    /// Every cycle, shortest first.
    pub const ALL: [Self; 4] = [Self::Weekly, Self::Monthly, Self::Quarterly, Self::Annual];

    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            "quarterly" => Some(Self::Quarterly),
            "annual" | "yearly" => Some(Self::Annual),
            _ => None,
        }
    }

    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Annual => "annual",
        }
    }
}

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    /// Billing normally.
    #[default]
    Active,
    /// In a free or discounted trial.
    Trial,
    /// Cancelled by the user.
    Cancelled,
    /// Temporarily paused.
    Paused,
}

impl SubscriptionStatus {
    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "trial" => Some(Self::Trial),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }

    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trial => "trial",
            Self::Cancelled => "cancelled",
            Self::Paused => "paused",
        }
    }
}

/// How sure the parser was about an extracted subscription.
///
/// Ordered: `Low < Medium < High`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Two or more fields were guessed.
    Low,
    /// One field was guessed.
    Medium,
    /// Every field was read from the message, or the user entered it.
    #[default]
    High,
}

impl Confidence {
    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Where a subscription came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Extracted from an email.
    Detected,
    /// Entered by the user.
    #[default]
    Manual,
}

impl Origin {
    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "detected" => Some(Self::Detected),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }

    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::Manual => "manual",
        }
    }
}

/// A tracked recurring charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Identifier.
    pub id: SubscriptionId,
    /// Owner.
    pub user_id: UserId,
    /// Merchant name.
    pub merchant: String,
    /// Plan or tier name.
    pub plan: Option<String>,
    /// Price per cycle in hundredths of the major unit.
    pub amount_cents: i64,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Billing cadence.
    pub billing_cycle: BillingCycle,
    /// Spending category.
    pub category: Option<String>,
    /// Date of the first charge.
    pub first_billing_date: Option<NaiveDate>,
    /// Date of the next charge.
    pub next_billing_date: Option<NaiveDate>,
    /// End of the trial period.
    pub trial_end_date: Option<NaiveDate>,
    /// Lifecycle state.
    pub status: SubscriptionStatus,
    /// When the user cancelled.
    pub cancellation_date: Option<NaiveDate>,
    /// Last day the service stays usable after cancelling.
    pub access_end_date: Option<NaiveDate>,
    /// Extraction certainty.
    pub confidence: Confidence,
    /// Detected or manual.
    pub origin: Origin,
    /// Free-text notes.
    pub notes: String,
    /// Where to cancel.
    pub cancellation_url: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Amount formatted with two decimals and the currency code.
    #[must_use]
    pub fn display_amount(&self) -> String {
        format!("{} {}", format_amount(self.amount_cents), self.currency)
    }
}

/// Fields for creating a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSubscription {
    /// Merchant name.
    pub merchant: String,
    /// Plan or tier name.
    pub plan: Option<String>,
    /// Price per cycle in minor units.
    pub amount_cents: i64,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Billing cadence.
    pub billing_cycle: BillingCycle,
    /// Spending category.
    pub category: Option<String>,
    /// Date of the first charge.
    pub first_billing_date: Option<NaiveDate>,
    /// Date of the next charge.
    pub next_billing_date: Option<NaiveDate>,
    /// End of the trial period.
    pub trial_end_date: Option<NaiveDate>,
    /// Lifecycle state.
    pub status: SubscriptionStatus,
    /// Extraction certainty.
    pub confidence: Confidence,
    /// Detected or manual.
    pub origin: Origin,
    /// Free-text notes.
    pub notes: String,
    /// Where to cancel.
    pub cancellation_url: Option<String>,
}

impl NewSubscription {
    /// A user-entered subscription: manual origin, high confidence.
    #[must_use]
    pub fn manual(
        merchant: impl Into<String>,
        amount_cents: i64,
        currency: impl Into<String>,
        billing_cycle: BillingCycle,
    ) -> Self {
        Self {
            merchant: merchant.into(),
            plan: None,
            amount_cents,
            currency: currency.into(),
            billing_cycle,
            category: None,
            first_billing_date: None,
            next_billing_date: None,
            trial_end_date: None,
            status: SubscriptionStatus::Active,
            confidence: Confidence::High,
            origin: Origin::Manual,
            notes: String::new(),
            cancellation_url: None,
        }
    }

    /// A subscription detected in an email received on `received_on`.
    ///
    /// Without a stated first charge, the receipt date stands in for it.
    #[must_use]
    pub fn detected(draft: &SubscriptionDraft, received_on: NaiveDate) -> Self {
        Self {
            merchant: draft.merchant.clone(),
            plan: draft.plan.clone(),
            amount_cents: draft.amount_cents,
            currency: draft.currency.clone(),
            billing_cycle: draft.billing_cycle,
            category: draft.category.clone(),
            first_billing_date: draft.first_billing_date.or(Some(received_on)),
            next_billing_date: draft.next_billing_date,
            trial_end_date: draft.trial_end_date,
            status: draft.status,
            confidence: draft.confidence,
            origin: Origin::Detected,
            notes: String::new(),
            cancellation_url: draft.cancellation_url.clone(),
        }
    }

    /// Check field constraints and normalize the currency code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty merchant, a negative
    /// amount or a malformed currency code.
    pub fn validate(mut self) -> Result<Self> {
        self.merchant = self.merchant.trim().to_string();
        self.currency = normalize_currency(&self.currency)?;
        validate_fields(&self.merchant, self.amount_cents)?;
        Ok(self)
    }
}

/// Partial update; `None` leaves a field unchanged.
///
/// Nullable fields take `Some(None)` to clear them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionUpdate {
    /// New merchant name.
    pub merchant: Option<String>,
    /// New plan name.
    pub plan: Option<Option<String>>,
    /// New amount in minor units.
    pub amount_cents: Option<i64>,
    /// New currency.
    pub currency: Option<String>,
    /// New billing cycle.
    pub billing_cycle: Option<BillingCycle>,
    /// New category.
    pub category: Option<Option<String>>,
    /// New next billing date.
    pub next_billing_date: Option<Option<NaiveDate>>,
    /// New trial end date.
    pub trial_end_date: Option<Option<NaiveDate>>,
    /// New status.
    pub status: Option<SubscriptionStatus>,
    /// New notes.
    pub notes: Option<String>,
    /// New cancellation URL.
    pub cancellation_url: Option<Option<String>>,
}

impl SubscriptionUpdate {
    /// Returns true if the update changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply to an existing subscription and re-validate it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the result violates a field constraint.
    pub fn apply(self, subscription: &mut Subscription) -> Result<()> {
        if let Some(merchant) = self.merchant {
            subscription.merchant = merchant.trim().to_string();
        }
        if let Some(plan) = self.plan {
            subscription.plan = plan;
        }
        if let Some(amount) = self.amount_cents {
            subscription.amount_cents = amount;
        }
        if let Some(currency) = self.currency {
            subscription.currency = normalize_currency(&currency)?;
        }
        if let Some(cycle) = self.billing_cycle {
            subscription.billing_cycle = cycle;
        }
        if let Some(category) = self.category {
            subscription.category = category;
        }
        if let Some(date) = self.next_billing_date {
            subscription.next_billing_date = date;
        }
        if let Some(date) = self.trial_end_date {
            subscription.trial_end_date = date;
        }
        if let Some(status) = self.status {
            subscription.status = status;
        }
        if let Some(notes) = self.notes {
            subscription.notes = notes;
        }
        if let Some(url) = self.cancellation_url {
            subscription.cancellation_url = url;
        }
        validate_fields(&subscription.merchant, subscription.amount_cents)
    }
}

/// Criteria for listing subscriptions. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    /// Only this status.
    pub status: Option<SubscriptionStatus>,
    /// Only this category (case-insensitive).
    pub category: Option<String>,
    /// Only this origin.
    pub origin: Option<Origin>,
    /// Merchant name contains this text (case-insensitive).
    pub merchant: Option<String>,
}

fn validate_fields(merchant: &str, amount_cents: i64) -> Result<()> {
    if merchant.is_empty() {
        return Err(Error::InvalidInput("merchant must not be empty".to_string()));
    }
    if amount_cents < 0 {
        return Err(Error::InvalidInput("amount must not be negative".to_string()));
    }
    Ok(())
}

fn normalize_currency(code: &str) -> Result<String> {
    let code = code.trim().to_uppercase();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code)
    } else {
        Err(Error::InvalidInput(format!("invalid currency code: {code:?}")))
    }
}

/// Parse a decimal amount such as `19.99`, `1,299.00` or `5` into hundredths.
///
/// At most two fractional digits are accepted.
#[must_use]
pub fn parse_amount_cents(text: &str) -> Option<i64> {
    let cleaned: String = text.trim().chars().filter(|c| *c != ',').collect();
    let (whole, frac) = cleaned.split_once('.').unwrap_or((cleaned.as_str(), ""));
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if frac.len() > 2 {
        return None;
    }

    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };
    whole.checked_mul(100)?.checked_add(frac)
}

/// Format minor units as a decimal string with two places.
#[must_use]
pub fn format_amount(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}
