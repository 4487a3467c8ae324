//! Authorization Code Flow implementation.

use super::{OAuthClient, PkceChallenge};
use crate::error::Result;
use url::Url;

/// Authorization Code Flow for `OAuth2`.
///
/// The flow itself is stateless: the caller keeps the `state` value and the
/// PKCE verifier between building the consent URL and handling the redirect.
#[derive(Debug)]
pub struct AuthorizationCodeFlow<'a> {
    client: &'a OAuthClient,
}

impl<'a> AuthorizationCodeFlow<'a> {
    /// Creates a new authorization code flow.
    #[must_use]
    pub const fn new(client: &'a OAuthClient) -> Self {
        Self { client }
    }

    /// Builds the authorization URL for user consent.
    ///
    /// # Arguments
    ///
    /// * `scopes` - Optional scopes to request (uses provider defaults if None)
    /// * `state` - Opaque value echoed back on redirect, for CSRF protection
    /// * `pkce` - PKCE challenge whose verifier is sent on code exchange
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be constructed.
    pub fn authorization_url(
        &self,
        scopes: Option<&[String]>,
        state: &str,
        pkce: Option<&PkceChallenge>,
    ) -> Result<Url> {
        self.client.provider.validate()?;
        let mut url = self.client.provider.auth_url.clone();

        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("client_id", &self.client.client_id)
                .append_pair("response_type", "code")
                .append_pair("state", state);

            if let Some(redirect_uri) = &self.client.redirect_uri {
                pairs.append_pair("redirect_uri", redirect_uri);
            }

            let scope_str = scopes.map_or_else(
                || self.client.provider.default_scopes.join(" "),
                |s| s.join(" "),
            );
            if !scope_str.is_empty() {
                pairs.append_pair("scope", &scope_str);
            }

            if let Some(pkce) = pkce {
                pairs
                    .append_pair("code_challenge", pkce.challenge())
                    .append_pair("code_challenge_method", pkce.method());
            }

            for (key, value) in &self.client.provider.extra_auth_params {
                pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }
}
