//! # subledger-oauth
//!
//! `OAuth2` support for granting `SubLedger` read access to a mailbox.
//!
//! ## Features
//!
//! - **Authorization Code Flow** with PKCE (RFC 7636)
//! - **Token management**: refresh, expiry checks with a safety margin
//! - **Revocation** (RFC 7009) for disconnecting a mailbox
//! - **Provider configurations**: Gmail read-only out of the box, custom providers
//!
//! ## Quick Start
//!
//! ```ignore
//! use subledger_oauth::{AuthorizationCodeFlow, OAuthClient, PkceChallenge, Provider};
//!
//! let client = OAuthClient::new("client_id", Provider::google_readonly()?)
//!     .with_client_secret("secret")
//!     .with_redirect_uri("http://127.0.0.1:8765/callback");
//!
//! let pkce = PkceChallenge::generate();
//! let flow = AuthorizationCodeFlow::new(&client);
//! let url = flow.authorization_url(None, "opaque-state", Some(&pkce))?;
//!
//! // ...user consents, provider redirects back with ?code=...&state=...
//! let token = client.exchange_code("code", None, Some(pkce.verifier())).await?;
//!
//! // Later, when the access token is about to expire:
//! let refreshed = client.refresh(token.refresh_token()?).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
pub mod flow;
pub mod provider;
pub mod token;

pub use error::{Error, Result};
pub use flow::{AuthorizationCodeFlow, OAuthClient, PkceChallenge};
pub use provider::Provider;
pub use token::Token;
