//! `SubLedger` command-line interface.

mod cli;

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use subledger_core::subscription::format_amount;
use subledger_core::vault::{generate_key, store_key_in_keyring};
use subledger_core::{
    Config, NewSubscription, SubLedger, Subscription, SubscriptionFilter, SubscriptionId,
    SubscriptionUpdate, UserId,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use cli::{AddArgs, Cli, Command, ListArgs, UpdateArgs};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "subledger=info,subledger_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let user = UserId::new(cli.user);

    if let Command::InitKey { print } = cli.command {
        return init_key(print);
    }

    let config = Config::load(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    let ledger = SubLedger::open(&config)
        .await
        .context("Failed to open the subscription ledger")?;

    match cli.command {
        Command::InitKey { print } => init_key(print)?,
        Command::Connect { no_browser } => {
            config.validate_oauth()?;
            connect(&ledger, user, no_browser).await?;
        }
        Command::Disconnect => {
            ledger.disconnect(user).await?;
            println!("Mailbox disconnected.");
        }
        Command::Status => {
            let status = ledger.status(user).await?;
            let last_scan = status
                .last_scan
                .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
            println!("Connected: {}", if status.connected { "yes" } else { "no" });
            println!("Last scan: {last_scan}");
        }
        Command::Scan => {
            let summary = ledger.scan(user).await.map_err(|e| {
                if e.requires_reconnect() {
                    anyhow!("{e}. Run `subledger connect` again.")
                } else {
                    e.into()
                }
            })?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::List(args) => list(&ledger, user, args).await?,
        Command::Add(args) => {
            let created = ledger.create_subscription(user, new_subscription(args)).await?;
            println!("Added subscription {}", created.id);
        }
        Command::Update(args) => {
            let id = SubscriptionId(args.id);
            let updated = ledger
                .update_subscription(user, id, subscription_update(args))
                .await?;
            print_row(&updated);
        }
        Command::Cancel { id, on } => {
            let cancelled = ledger
                .cancel_subscription(user, SubscriptionId(id), on)
                .await?;
            let until = cancelled
                .access_end_date
                .map_or_else(String::new, |d| format!(", access until {d}"));
            println!("Cancelled {}{until}", cancelled.merchant);
        }
        Command::Delete { id } => {
            ledger.delete_subscription(user, SubscriptionId(id)).await?;
            println!("Deleted subscription {id}");
        }
        Command::Stats => {
            let stats = ledger.stats(user).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Purge => {
            let purged = ledger.purge_expired().await?;
            println!("Purged {purged} expired records");
        }
    }

    Ok(())
}

fn init_key(print: bool) -> Result<()> {
    let key = generate_key();
    if print {
        println!("{key}");
    } else {
        store_key_in_keyring(&key).context("Failed to store the key in the system keyring")?;
        info!("Token key stored in the system keyring");
        println!("Token encryption key stored in the system keyring.");
    }
    Ok(())
}

async fn connect(ledger: &SubLedger, user: UserId, no_browser: bool) -> Result<()> {
    let url = ledger.connect(user)?;
    println!("Open this URL to grant read access to your mailbox:\n\n  {url}\n");
    if !no_browser && let Err(e) = opener::open(url.as_str()) {
        warn!("Could not open a browser: {e}");
    }

    print!("Paste the URL you were redirected to: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;

    let (code, state) = callback_params(line.trim())?;
    ledger.handle_callback(&code, &state).await?;
    println!("Mailbox connected. Run `subledger scan` to look for subscriptions.");
    Ok(())
}

/// Pull `code` and `state` out of the redirect URL.
fn callback_params(redirect: &str) -> Result<(String, String)> {
    let url = Url::parse(redirect).context("Not a valid URL")?;
    let param = |name: &str| {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    };
    if let Some(error) = param("error") {
        bail!("Authorization was refused: {error}");
    }
    let code = param("code").context("Redirect URL has no `code` parameter")?;
    let state = param("state").context("Redirect URL has no `state` parameter")?;
    Ok((code, state))
}

async fn list(ledger: &SubLedger, user: UserId, args: ListArgs) -> Result<()> {
    let filter = SubscriptionFilter {
        status: args.status,
        category: args.category,
        origin: args.origin,
        merchant: args.merchant,
    };
    let subscriptions = ledger.list_subscriptions(user, &filter).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&subscriptions)?);
        return Ok(());
    }
    if subscriptions.is_empty() {
        println!("No subscriptions.");
        return Ok(());
    }
    println!(
        "{:>5}  {:<24} {:>12} {:<4} {:<10} {:<10} {:<8} {:<10}",
        "ID", "MERCHANT", "AMOUNT", "CUR", "CYCLE", "STATUS", "CONF", "NEXT"
    );
    for s in &subscriptions {
        print_row(s);
    }
    Ok(())
}

fn print_row(s: &Subscription) {
    let next = s
        .next_billing_date
        .map_or_else(|| "-".to_string(), |d| d.to_string());
    println!(
        "{:>5}  {:<24} {:>12} {:<4} {:<10} {:<10} {:<8} {:<10}",
        s.id.0,
        truncate(&s.merchant, 24),
        format_amount(s.amount_cents),
        s.currency,
        s.billing_cycle.as_str(),
        s.status.as_str(),
        s.confidence.as_str(),
        next
    );
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max - 1).collect();
        cut.push('…');
        cut
    }
}

fn new_subscription(args: AddArgs) -> NewSubscription {
    let mut new = NewSubscription::manual(args.merchant, args.amount, args.currency, args.cycle);
    new.plan = args.plan;
    new.category = args.category;
    new.next_billing_date = args.next_billing;
    new.notes = args.notes.unwrap_or_default();
    new
}

fn subscription_update(args: UpdateArgs) -> SubscriptionUpdate {
    SubscriptionUpdate {
        merchant: args.merchant,
        amount_cents: args.amount,
        currency: args.currency,
        billing_cycle: args.cycle,
        status: args.status,
        category: args
            .category
            .map(|c| Some(c.trim().to_string()).filter(|c| !c.is_empty())),
        next_billing_date: args.next_billing.map(Some),
        notes: args.notes,
        ..SubscriptionUpdate::default()
    }
}
