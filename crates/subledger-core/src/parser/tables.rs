//! Static lookup tables for merchant and category detection.

/// Registrable sender domain to canonical merchant name.
pub const BRANDS: &[(&str, &str)] = &[
    ("netflix.com", "Netflix"),
    ("spotify.com", "Spotify"),
    ("hulu.com", "Hulu"),
    ("disneyplus.com", "Disney+"),
    ("max.com", "Max"),
    ("hbomax.com", "Max"),
    ("paramountplus.com", "Paramount+"),
    ("peacocktv.com", "Peacock"),
    ("youtube.com", "YouTube"),
    ("apple.com", "Apple"),
    ("amazon.com", "Amazon"),
    ("audible.com", "Audible"),
    ("google.com", "Google"),
    ("microsoft.com", "Microsoft"),
    ("adobe.com", "Adobe"),
    ("dropbox.com", "Dropbox"),
    ("github.com", "GitHub"),
    ("openai.com", "OpenAI"),
    ("notion.so", "Notion"),
    ("slack.com", "Slack"),
    ("zoom.us", "Zoom"),
    ("canva.com", "Canva"),
    ("nytimes.com", "The New York Times"),
    ("wsj.com", "The Wall Street Journal"),
    ("patreon.com", "Patreon"),
    ("duolingo.com", "Duolingo"),
    ("peloton.com", "Peloton"),
    ("strava.com", "Strava"),
    ("xbox.com", "Xbox"),
    ("playstation.com", "PlayStation"),
    ("nintendo.com", "Nintendo"),
];

/// Payment processors that send receipts on behalf of merchants. Their
/// domain says nothing about the merchant.
pub const PROCESSOR_DOMAINS: &[&str] = &[
    "stripe.com",
    "paypal.com",
    "paddle.com",
    "fastspring.com",
    "chargebee.com",
    "recurly.com",
    "gumroad.com",
    "squareup.com",
];

/// Personal mail domains; a sender there is not a merchant.
pub const WEBMAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "outlook.com",
    "hotmail.com",
    "live.com",
    "yahoo.com",
    "icloud.com",
    "me.com",
    "proton.me",
    "protonmail.com",
    "aol.com",
];

/// Display-name words that describe a mailbox rather than a merchant.
pub const GENERIC_SENDER_WORDS: &[&str] = &[
    "billing",
    "receipts",
    "receipt",
    "invoices",
    "invoice",
    "payments",
    "payment",
    "team",
    "support",
    "accounts",
    "account",
    "notifications",
    "notification",
    "no-reply",
    "noreply",
    "do-not-reply",
    "info",
    "customer",
    "service",
    "services",
    "store",
    "orders",
];

/// Second-level labels under which the registrable domain has three labels
/// (`example.co.uk`).
pub const COMPOUND_SLDS: &[&str] = &["co", "com", "org", "net", "ac", "gov"];

/// Lowercase merchant name to spending category.
pub const CATEGORIES: &[(&str, &str)] = &[
    ("netflix", "Streaming"),
    ("hulu", "Streaming"),
    ("disney+", "Streaming"),
    ("max", "Streaming"),
    ("paramount+", "Streaming"),
    ("peacock", "Streaming"),
    ("youtube", "Streaming"),
    ("spotify", "Music"),
    ("tidal", "Music"),
    ("pandora", "Music"),
    ("apple", "Software"),
    ("microsoft", "Software"),
    ("adobe", "Software"),
    ("github", "Software"),
    ("openai", "Software"),
    ("notion", "Software"),
    ("slack", "Software"),
    ("zoom", "Software"),
    ("canva", "Software"),
    ("dropbox", "Cloud Storage"),
    ("google", "Cloud Storage"),
    ("the new york times", "News"),
    ("the wall street journal", "News"),
    ("audible", "Books"),
    ("patreon", "Memberships"),
    ("amazon", "Shopping"),
    ("duolingo", "Education"),
    ("peloton", "Fitness"),
    ("strava", "Fitness"),
    ("xbox", "Gaming"),
    ("playstation", "Gaming"),
    ("nintendo", "Gaming"),
];

/// Look up a brand by registrable domain.
#[must_use]
pub fn brand_for_domain(domain: &str) -> Option<&'static str> {
    BRANDS
        .iter()
        .find(|(d, _)| *d == domain)
        .map(|(_, name)| *name)
}

/// Look up a category by merchant name (case-insensitive).
#[must_use]
pub fn category_for_merchant(merchant: &str) -> Option<&'static str> {
    let key = merchant.trim().to_lowercase();
    CATEGORIES
        .iter()
        .find(|(m, _)| *m == key)
        .map(|(_, category)| *category)
}
