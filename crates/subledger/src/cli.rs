//! Command-line arguments.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use subledger_core::subscription::parse_amount_cents;
use subledger_core::{BillingCycle, Origin, SubscriptionStatus};

/// Track recurring charges found in your mailbox.
#[derive(Debug, Parser)]
#[command(name = "subledger", version, about)]
pub struct Cli {
    /// User the command acts for.
    #[arg(long, global = true, env = "SUBLEDGER_USER", default_value_t = 1)]
    pub user: i64,

    /// Configuration file (defaults to the platform config directory).
    #[arg(long, global = true, env = "SUBLEDGER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a token encryption key and store it in the system keyring.
    InitKey {
        /// Print the key instead of storing it (for `SUBLEDGER_TOKEN_KEY`).
        #[arg(long)]
        print: bool,
    },
    /// Connect a mailbox through the provider's consent screen.
    Connect {
        /// Do not try to open a browser.
        #[arg(long)]
        no_browser: bool,
    },
    /// Disconnect the mailbox and revoke its tokens.
    Disconnect,
    /// Show the mailbox connection state.
    Status,
    /// Scan the mailbox for new subscription emails.
    Scan,
    /// List subscriptions.
    List(ListArgs),
    /// Add a subscription by hand.
    Add(AddArgs),
    /// Change fields of a subscription.
    Update(UpdateArgs),
    /// Mark a subscription cancelled.
    Cancel {
        /// Subscription id.
        id: i64,
        /// Cancellation date (YYYY-MM-DD); today when omitted.
        #[arg(long, value_parser = parse_date)]
        on: Option<NaiveDate>,
    },
    /// Delete a subscription.
    Delete {
        /// Subscription id.
        id: i64,
    },
    /// Show spending statistics.
    Stats,
    /// Delete processed-message records past their retention period.
    Purge,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Only this status.
    #[arg(long, value_parser = parse_status)]
    pub status: Option<SubscriptionStatus>,
    /// Only this category.
    #[arg(long)]
    pub category: Option<String>,
    /// Only detected or manual entries.
    #[arg(long, value_parser = parse_origin)]
    pub origin: Option<Origin>,
    /// Merchant name contains this text.
    #[arg(long)]
    pub merchant: Option<String>,
    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Merchant name.
    pub merchant: String,
    /// Price per cycle, e.g. `9.99`.
    #[arg(value_parser = parse_amount)]
    pub amount: i64,
    /// ISO 4217 currency code.
    #[arg(long, default_value = "USD")]
    pub currency: String,
    /// Billing cycle.
    #[arg(long, value_parser = parse_cycle, default_value = "monthly")]
    pub cycle: BillingCycle,
    /// Plan or tier.
    #[arg(long)]
    pub plan: Option<String>,
    /// Spending category.
    #[arg(long)]
    pub category: Option<String>,
    /// Next charge (YYYY-MM-DD).
    #[arg(long, value_parser = parse_date)]
    pub next_billing: Option<NaiveDate>,
    /// Free-text notes.
    #[arg(long)]
    pub notes: Option<String>,
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    /// Subscription id.
    pub id: i64,
    /// New merchant name.
    #[arg(long)]
    pub merchant: Option<String>,
    /// New price per cycle.
    #[arg(long, value_parser = parse_amount)]
    pub amount: Option<i64>,
    /// New currency code.
    #[arg(long)]
    pub currency: Option<String>,
    /// New billing cycle.
    #[arg(long, value_parser = parse_cycle)]
    pub cycle: Option<BillingCycle>,
    /// New status.
    #[arg(long, value_parser = parse_status)]
    pub status: Option<SubscriptionStatus>,
    /// New category; an empty value clears it.
    #[arg(long)]
    pub category: Option<String>,
    /// New next charge date (YYYY-MM-DD).
    #[arg(long, value_parser = parse_date)]
    pub next_billing: Option<NaiveDate>,
    /// New notes.
    #[arg(long)]
    pub notes: Option<String>,
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

fn parse_amount(s: &str) -> Result<i64, String> {
    parse_amount_cents(s).ok_or_else(|| format!("expected an amount like 9.99, got {s}"))
}

fn parse_cycle(s: &str) -> Result<BillingCycle, String> {
    BillingCycle::parse(s).ok_or_else(|| format!("unknown billing cycle: {s}"))
}

fn parse_status(s: &str) -> Result<SubscriptionStatus, String> {
    SubscriptionStatus::parse(s).ok_or_else(|| format!("unknown status: {s}"))
}

fn parse_origin(s: &str) -> Result<Origin, String> {
    Origin::parse(s).ok_or_else(|| format!("unknown origin: {s}"))
}
