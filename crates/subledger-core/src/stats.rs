//! Spending statistics.
//!
//! Costs are normalized per cycle, summed over active subscriptions in
//! minor units and rounded to cents once at the end. Amounts in different
//! currencies are summed as-is; [`Stats::currencies`] lets callers detect
//! that case.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::store::Database;
use crate::subscription::{
    BillingCycle, Subscription, SubscriptionFilter, SubscriptionRepository, SubscriptionStatus,
};
use crate::{Result, UserId};

/// Average weeks per month.
pub const WEEKS_PER_MONTH: f64 = 4.33;

/// Months per quarter.
pub const MONTHS_PER_QUARTER: f64 = 3.0;

/// Category under which uncategorized subscriptions are counted.
pub const UNCATEGORIZED: &str = "other";

/// Aggregate view of a user's subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stats {
    /// All subscriptions, whatever their status.
    pub total_subscriptions: usize,
    /// Monthly cost of active subscriptions, in major units.
    pub total_monthly_cost: f64,
    /// Annual cost of active subscriptions, in major units.
    pub total_annual_cost: f64,
    /// Subscription count per category.
    pub by_category: BTreeMap<String, usize>,
    /// Subscription count per status.
    pub by_status: BTreeMap<SubscriptionStatus, usize>,
    /// Currency codes of active subscriptions.
    pub currencies: BTreeSet<String>,
}

/// Monthly equivalent factor for a cycle.
#[must_use]
pub const fn monthly_factor(cycle: BillingCycle) -> f64 {
    match cycle {
        BillingCycle::Weekly => WEEKS_PER_MONTH,
        BillingCycle::Monthly => 1.0,
        BillingCycle::Quarterly => 1.0 / MONTHS_PER_QUARTER,
        BillingCycle::Annual => 1.0 / 12.0,
    }
}

/// Charges per year for a cycle.
#[must_use]
pub const fn annual_factor(cycle: BillingCycle) -> f64 {
    match cycle {
        BillingCycle::Weekly => 52.0,
        BillingCycle::Monthly => 12.0,
        BillingCycle::Quarterly => 4.0,
        BillingCycle::Annual => 1.0,
    }
}

/// Compute statistics over a set of subscriptions.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn compute_stats(subscriptions: &[Subscription]) -> Stats {
    let mut stats = Stats {
        total_subscriptions: subscriptions.len(),
        ..Stats::default()
    };
    let mut monthly_cents = 0.0;
    let mut annual_cents = 0.0;

    for s in subscriptions {
        let category = s
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(UNCATEGORIZED);
        *stats.by_category.entry(category.to_string()).or_default() += 1;
        *stats.by_status.entry(s.status).or_default() += 1;

        if s.status == SubscriptionStatus::Active {
            let cents = s.amount_cents as f64;
            monthly_cents += cents * monthly_factor(s.billing_cycle);
            annual_cents += cents * annual_factor(s.billing_cycle);
            stats.currencies.insert(s.currency.clone());
        }
    }

    stats.total_monthly_cost = cents_to_major(monthly_cents);
    stats.total_annual_cost = cents_to_major(annual_cents);
    stats
}

fn cents_to_major(cents: f64) -> f64 {
    cents.round() / 100.0
}

/// Computes [`Stats`] for stored subscriptions.
#[derive(Debug, Clone)]
pub struct CostAggregator {
    subscriptions: SubscriptionRepository,
}

impl CostAggregator {
    /// Create an aggregator on a shared database.
    #[must_use]
    pub fn new(db: &Database) -> Self {
        Self {
            subscriptions: SubscriptionRepository::new(db),
        }
    }

    /// Statistics over every subscription the user owns.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn compute_stats(&self, user_id: UserId) -> Result<Stats> {
        let all = self
            .subscriptions
            .list(user_id, &SubscriptionFilter::default())
            .await?;
        Ok(compute_stats(&all))
    }
}
