//! Mailbox token vault.
//!
//! Stores each user's `OAuth2` tokens sealed at rest, hands out valid access
//! tokens (refreshing at most once per user at a time) and tracks the scan
//! watermark.

mod cipher;
mod model;
mod repository;
mod service;

pub use cipher::{TokenCipher, generate_key, store_key_in_keyring};
pub use model::{ConnectionStatus, MailboxCredential};
pub use repository::CredentialRepository;
pub use service::TokenVault;
