//! # subledger-core
//!
//! Core logic for `SubLedger`, which finds recurring charges in a user's
//! mailbox and keeps a ledger of them.
//!
//! This crate provides:
//! - **Token vault** - encrypted `OAuth2` tokens with single-flight refresh
//! - **Mailbox access** - the [`MailboxProvider`] capability and a Gmail client
//! - **Subscription parser** - heuristic extraction from receipts and invoices
//! - **Ingestion** - incremental, idempotent inbox scans
//! - **Retention** - time-bounded storage of processed-message records
//! - **Statistics** - monthly and annual cost rollups
//!
//! [`SubLedger`] ties these together over one `SQLite` database.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
mod error;
pub mod ingest;
pub mod mailbox;
pub mod parser;
pub mod retention;
pub mod service;
pub mod stats;
pub mod store;
pub mod subscription;
mod user;
pub mod vault;

pub use config::{Config, OAuthSettings, ScanSettings};
pub use error::{Error, Result};
pub use ingest::{IngestionCoordinator, ProcessedMessageRecord, ProcessedMessageRepository, ScanSummary};
pub use mailbox::{GmailClient, MailMessage, MailboxError, MailboxProvider};
pub use parser::{ParseResult, SubscriptionDraft, parse};
pub use retention::{RETENTION_DAYS, RetentionEnforcer};
pub use service::SubLedger;
pub use stats::{CostAggregator, Stats, compute_stats};
pub use store::Database;
pub use subscription::{
    BillingCycle, Confidence, NewSubscription, Origin, Subscription, SubscriptionFilter,
    SubscriptionId, SubscriptionRepository, SubscriptionStatus, SubscriptionUpdate,
};
pub use user::UserId;
pub use vault::{ConnectionStatus, TokenCipher, TokenVault};
