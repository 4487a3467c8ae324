//! Individual extraction rules.
//!
//! Each rule looks at one aspect of a message and reports whether the value
//! was read from the text ([`Extraction::Matched`]), guessed
//! ([`Extraction::Inferred`]) or not found.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use super::Extraction;
use super::tables::{
    COMPOUND_SLDS, GENERIC_SENDER_WORDS, PROCESSOR_DOMAINS, WEBMAIL_DOMAINS, brand_for_domain,
};
use crate::mailbox::BILLING_KEYWORDS;
use crate::subscription::{BillingCycle, SubscriptionStatus, parse_amount_cents};

/// Maximum distance between a billing keyword and the amount it labels.
pub const KEYWORD_WINDOW: usize = 40;

#[allow(clippy::expect_used)]
fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static pattern must compile")
}

const MONTHS: &str = "jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec";

/// A number with optional thousands grouping and a one or two digit
/// fraction, in either `1,299.00` or `1.299,00` style.
const NUMBER: &str =
    r"\d{1,3}(?:,\d{3})+(?:\.\d{1,2})?|\d{1,3}(?:\.\d{3})+(?:,\d{1,2})?|\d+(?:[.,]\d{1,2})?";

static MONEY_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    regex(
        &[
            r"(?i)(?P<cur>CA\$|A\$|US\$|\$|€|£|¥|₹|\b(?:USD|EUR|GBP|CAD|AUD|JPY|CHF|INR)\b)\s?(?P<num>",
            NUMBER,
            ")",
        ]
        .concat(),
    )
});

static MONEY_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    regex(
        &[
            r"(?i)\b(?P<num>",
            NUMBER,
            r")\s?(?P<cur>€|£|\b(?:USD|EUR|GBP|CAD|AUD|JPY|CHF)\b)",
        ]
        .concat(),
    )
});

static AMOUNT_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"(?i)\b(?:total|amount due|amount|charged|you paid|billed|price)\b")
});

static CYCLE_PATTERNS: LazyLock<Vec<(Regex, BillingCycle)>> = LazyLock::new(|| {
    vec![
        (
            regex(r"(?i)\bweekly\b|/\s?(?:wk|week)\b|\b(?:per|a|every) week\b"),
            BillingCycle::Weekly,
        ),
        (
            regex(r"(?i)\bmonthly\b|/\s?(?:mo|mth|month)\b|\b(?:per|a|every) month\b"),
            BillingCycle::Monthly,
        ),
        (
            regex(r"(?i)\bquarterly\b|\bevery (?:3|three) months\b|\bper quarter\b|/\s?(?:qtr|quarter)\b"),
            BillingCycle::Quarterly,
        ),
        (
            regex(r"(?i)\bannual(?:ly)?\b|\byearly\b|/\s?(?:yr|year)\b|\b(?:per|a|every) year\b"),
            BillingCycle::Annual,
        ),
    ]
});

fn date_pattern() -> String {
    format!(
        r"(?P<date>\d{{4}}-\d{{2}}-\d{{2}}|(?:{MONTHS})[a-z]*\.?\s+\d{{1,2}}(?:st|nd|rd|th)?,?\s+\d{{4}}|\d{{1,2}}(?:st|nd|rd|th)?\s+(?:{MONTHS})[a-z]*\.?,?\s+\d{{4}}|\d{{1,2}}/\d{{1,2}}/\d{{4}})"
    )
}

fn anchored_date(anchors: &str) -> Regex {
    regex(&format!(
        r"(?i)(?P<next>next\s+)?(?:{anchors})[\s:,\-]{{0,3}}(?:on\s+|is\s+|of\s+)?{}",
        date_pattern()
    ))
}

static NEXT_BILLING_DATE: LazyLock<Regex> = LazyLock::new(|| {
    anchored_date(
        r"will renew on|renews on|renewal date|renews|next charge date|next charge|next billing date|next payment date|next payment|next bill",
    )
});

static TRIAL_END_DATE: LazyLock<Regex> = LazyLock::new(|| {
    anchored_date(
        r"free trial ends on|free trial ends|trial ends on|trial ends|trial will end on|trial period ends|trial expires on|trial expires",
    )
});

static FIRST_BILLING_DATE: LazyLock<Regex> = LazyLock::new(|| {
    anchored_date(r"charged on|billing date|billed on|payment date|date of purchase|invoice date|order date")
});

static ORDINAL: LazyLock<Regex> = LazyLock::new(|| regex(r"(?i)(\d)(?:st|nd|rd|th)\b"));

static CANCELLED: LazyLock<Regex> = LazyLock::new(|| {
    regex(
        r"(?i)\b(?:has been|have been|was|is now) cancel+ed\b|\bcancel+ation (?:is )?confirmed\b|\bsubscription cancel+ed\b|\byou(?:'ve| have) cancel+ed\b|\bsorry to see you go\b",
    )
});

static TRIAL: LazyLock<Regex> =
    LazyLock::new(|| regex(r"(?i)\bfree trial\b|\btrial (?:ends|period|expires|will end)\b|\byour trial\b"));

static PLAN_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"(?i)\b(?:plan|tier)\s*:\s*(?P<plan>[A-Za-z0-9+][A-Za-z0-9+ ]{0,29}?)\s*(?:$|[\n|,.;(])")
});

static PLAN_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    regex(
        r"\b(?:[Tt]he|[Yy]our)\s+(?P<plan>[A-Z][A-Za-z0-9+]*(?:\s+[A-Z][A-Za-z0-9+]*){0,2})\s+(?:[Pp]lan|[Tt]ier)\b",
    )
});

static URL: LazyLock<Regex> = LazyLock::new(|| regex(r#"https?://[^\s<>"'()\[\]]+"#));

static SUBJECT_MERCHANT_FROM: LazyLock<Regex> = LazyLock::new(|| {
    regex(
        r"(?i)\b(?:receipt|invoice|payment|order|subscription|membership)\s+(?:from|to|for|with)\s+(?P<name>[A-Za-z0-9][A-Za-z0-9&.+' ]{0,40}?)\s*(?:$|[-:|!,(#]|\s+(?:for|on|is|has|was)\b)",
    )
});

static SUBJECT_MERCHANT_YOUR: LazyLock<Regex> = LazyLock::new(|| {
    regex(
        r"(?i)^\s*your\s+(?P<name>[A-Za-z0-9][A-Za-z0-9&.+' ]{0,40}?)\s+(?:subscription|membership|receipt|invoice|plan|order|trial)\b",
    )
});

/// Parsed `From` header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sender {
    /// Display name, quotes stripped.
    pub display_name: Option<String>,
    /// Lowercased domain of the address.
    pub domain: Option<String>,
}

impl Sender {
    /// Split `Name <local@domain>` or a bare address.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let (display, address) = match (raw.rfind('<'), raw.rfind('>')) {
            (Some(open), Some(close)) if open < close => {
                (Some(&raw[..open]), Some(&raw[open + 1..close]))
            }
            _ if raw.contains('@') => (None, Some(raw)),
            _ => (Some(raw), None),
        };

        let display_name = display
            .map(|d| d.trim().trim_matches(|c| c == '"' || c == '\'').trim().to_string())
            .filter(|d| !d.is_empty());
        let domain = address
            .and_then(|a| a.trim().rsplit_once('@'))
            .map(|(_, d)| d.trim().to_lowercase())
            .filter(|d| d.contains('.'));

        Self {
            display_name,
            domain,
        }
    }

    /// Registrable part of the domain (`account.netflix.com` → `netflix.com`).
    #[must_use]
    pub fn registrable_domain(&self) -> Option<String> {
        let domain = self.domain.as_deref()?;
        let labels: Vec<&str> = domain.split('.').filter(|l| !l.is_empty()).collect();
        let n = labels.len();
        if n < 2 {
            return None;
        }
        let take = if n >= 3 && labels[n - 1].len() == 2 && COMPOUND_SLDS.contains(&labels[n - 2])
        {
            3
        } else {
            2
        };
        Some(labels[n - take..].join("."))
    }
}

/// Whether the sender or subject uses billing language.
#[must_use]
pub fn is_billing_message(sender: &str, subject: &str) -> bool {
    let haystack = format!("{sender} {subject}").to_lowercase();
    BILLING_KEYWORDS.iter().any(|k| haystack.contains(k))
        || haystack.contains("your plan")
        || MONEY_PREFIX.is_match(subject)
}

/// Merchant name: brand table, display name, domain label, then subject.
#[must_use]
pub fn merchant(sender: &Sender, subject: &str) -> Extraction<String> {
    let registrable = sender.registrable_domain();
    let usable_domain = registrable.as_deref().filter(|d| {
        !PROCESSOR_DOMAINS.contains(d) && !WEBMAIL_DOMAINS.contains(d)
    });

    if let Some(brand) = usable_domain.and_then(brand_for_domain) {
        return Extraction::Matched(brand.to_string());
    }
    if let Some(name) = sender.display_name.as_deref().and_then(clean_display_name) {
        return Extraction::Matched(name);
    }
    if let Some(label) = usable_domain.and_then(|d| d.split('.').next()).and_then(capitalize) {
        return Extraction::Inferred(label);
    }
    subject_merchant(subject).map_or(Extraction::Missing, Extraction::Inferred)
}

fn clean_display_name(name: &str) -> Option<String> {
    let name = name.split(" via ").next().unwrap_or(name);
    let mut words: Vec<&str> = name.split_whitespace().collect();
    while let Some(last) = words.last() {
        if GENERIC_SENDER_WORDS.contains(&last.to_lowercase().as_str()) {
            words.pop();
        } else {
            break;
        }
    }
    let cleaned = words.join(" ");
    let generic = cleaned
        .split_whitespace()
        .all(|w| GENERIC_SENDER_WORDS.contains(&w.to_lowercase().as_str()));
    if cleaned.is_empty() || generic || cleaned.contains('@') {
        None
    } else {
        Some(cleaned)
    }
}

fn capitalize(label: &str) -> Option<String> {
    let mut chars = label.chars();
    let first = chars.next()?;
    if !first.is_alphanumeric() {
        return None;
    }
    Some(first.to_uppercase().chain(chars).collect())
}

fn subject_merchant(subject: &str) -> Option<String> {
    [&*SUBJECT_MERCHANT_FROM, &*SUBJECT_MERCHANT_YOUR]
        .iter()
        .find_map(|re| re.captures(subject))
        .and_then(|c| c.name("name"))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| {
            !name.is_empty()
                && !matches!(name.to_lowercase().as_str(), "your" | "the" | "a" | "an" | "our")
        })
}

/// A monetary token found in text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MoneyToken {
    start: usize,
    cents: i64,
    currency: &'static str,
}

fn currency_code(token: &str) -> Option<&'static str> {
    match token.to_uppercase().as_str() {
        "$" | "US$" | "USD" => Some("USD"),
        "CA$" | "CAD" => Some("CAD"),
        "A$" | "AUD" => Some("AUD"),
        "€" | "EUR" => Some("EUR"),
        "£" | "GBP" => Some("GBP"),
        "¥" | "JPY" => Some("JPY"),
        "₹" | "INR" => Some("INR"),
        "CHF" => Some("CHF"),
        _ => None,
    }
}

/// Rewrite a matched number as `1299.00`: the last separator is the decimal
/// point when one or two digits follow it, every other separator groups thousands.
fn normalize_number(num: &str) -> String {
    match num.rfind([',', '.']) {
        Some(i) if num.len() - i - 1 <= 2 => {
            format!("{}.{}", num[..i].replace([',', '.'], ""), &num[i + 1..])
        }
        _ => num.replace([',', '.'], ""),
    }
}

/// Whether a match starts in the middle of a longer number (`1,2|99`).
fn continues_number(text: &str, start: usize) -> bool {
    let mut before = text[..start].chars().rev();
    match before.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some(',' | '.') => before.next().is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}

fn money_tokens(text: &str) -> Vec<MoneyToken> {
    let tokens = [&*MONEY_PREFIX, &*MONEY_SUFFIX].into_iter().flat_map(move |re| {
        re.captures_iter(text).filter_map(move |c| {
            let whole = c.get(0)?;
            let num = c.name("num")?;
            if continues_number(text, num.start()) {
                return None;
            }
            Some(MoneyToken {
                start: whole.start(),
                cents: parse_amount_cents(&normalize_number(num.as_str()))?,
                currency: currency_code(c.name("cur")?.as_str())?,
            })
        })
    });

    let mut tokens: Vec<_> = tokens.collect();
    tokens.sort_by_key(|t| t.start);
    tokens.dedup_by_key(|t| t.start);
    tokens
}

/// Amount in minor units and currency code.
///
/// The first amount within [`KEYWORD_WINDOW`] characters after a billing
/// keyword is read as matched; otherwise the first amount anywhere is inferred.
#[must_use]
pub fn amount(text: &str) -> Extraction<(i64, String)> {
    let tokens = money_tokens(text);
    let keyword_ends: Vec<usize> = AMOUNT_KEYWORD.find_iter(text).map(|m| m.end()).collect();

    let anchored = tokens.iter().find(|t| {
        keyword_ends
            .iter()
            .any(|&end| end <= t.start && t.start - end <= KEYWORD_WINDOW)
    });

    match (anchored, tokens.first()) {
        (Some(t), _) => Extraction::Matched((t.cents, t.currency.to_string())),
        (None, Some(t)) => Extraction::Inferred((t.cents, t.currency.to_string())),
        (None, None) => Extraction::Missing,
    }
}

/// Billing cycle from the earliest cadence phrase; monthly when none is present.
#[must_use]
pub fn billing_cycle(text: &str) -> Extraction<BillingCycle> {
    CYCLE_PATTERNS
        .iter()
        .filter_map(|(re, cycle)| re.find(text).map(|m| (m.start(), *cycle)))
        .min_by_key(|(start, _)| *start)
        .map_or(Extraction::Inferred(BillingCycle::Monthly), |(_, cycle)| {
            Extraction::Matched(cycle)
        })
}

/// Dates mentioned next to billing anchors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BillingDates {
    /// Date of the charge this message reports.
    pub first: Option<NaiveDate>,
    /// Date of the upcoming charge.
    pub next: Option<NaiveDate>,
    /// End of the trial.
    pub trial_end: Option<NaiveDate>,
}

/// Extract billing, renewal and trial dates.
#[must_use]
pub fn billing_dates(text: &str) -> BillingDates {
    BillingDates {
        first: find_date(&FIRST_BILLING_DATE, text, true),
        next: find_date(&NEXT_BILLING_DATE, text, false),
        trial_end: find_date(&TRIAL_END_DATE, text, false),
    }
}

fn find_date(re: &Regex, text: &str, reject_next: bool) -> Option<NaiveDate> {
    re.captures_iter(text)
        .filter(|c| !(reject_next && c.name("next").is_some()))
        .find_map(|c| c.name("date").and_then(|d| parse_date(d.as_str())))
}

/// Parse the date formats common in receipts.
#[must_use]
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let cleaned = ORDINAL.replace_all(text.trim(), "$1");
    let cleaned: String = cleaned
        .replace(['.', ','], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    ["%Y-%m-%d", "%B %d %Y", "%b %d %Y", "%d %B %Y", "%d %b %Y", "%m/%d/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok())
}

/// Lifecycle state: cancelled confirmations win over trial language.
#[must_use]
pub fn status(text: &str, trial_end: Option<NaiveDate>) -> SubscriptionStatus {
    if CANCELLED.is_match(text) {
        SubscriptionStatus::Cancelled
    } else if trial_end.is_some() || TRIAL.is_match(text) {
        SubscriptionStatus::Trial
    } else {
        SubscriptionStatus::Active
    }
}

/// Plan or tier name.
#[must_use]
pub fn plan(text: &str) -> Option<String> {
    [&*PLAN_LABEL, &*PLAN_PHRASE]
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|c| c.name("plan"))
        .map(|m| m.as_str().trim().to_string())
        .filter(|p| !p.is_empty() && !matches!(p.to_lowercase().as_str(), "current" | "new" | "subscription"))
}

/// Link for managing or cancelling the subscription.
#[must_use]
pub fn cancellation_url(text: &str) -> Option<String> {
    const HINTS: &[&str] = &["cancel", "manage", "subscription", "membership", "billing", "account"];
    URL.find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';']))
        .find(|url| {
            let lower = url.to_lowercase();
            HINTS.iter().any(|h| lower.contains(h))
        })
        .map(str::to_string)
}
