//! Tracked subscriptions.

mod model;
mod repository;

pub use model::{
    BillingCycle, Confidence, NewSubscription, Origin, Subscription, SubscriptionFilter,
    SubscriptionId, SubscriptionStatus, SubscriptionUpdate, format_amount, parse_amount_cents,
};
pub use repository::SubscriptionRepository;
pub(crate) use repository::insert_subscription;
