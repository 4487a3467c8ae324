//! `OAuth2` authorization flows.

mod code;
mod pkce;

pub use code::AuthorizationCodeFlow;
pub use pkce::PkceChallenge;

use crate::error::{Error, Result};
use crate::provider::Provider;
use crate::token::{ErrorResponse, Token, TokenResponse};
use reqwest::{Client, Response};
use std::collections::HashMap;
use tracing::debug;

/// Common `OAuth2` client configuration.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    /// Client ID from provider.
    pub client_id: String,
    /// Client secret (optional for public clients).
    pub client_secret: Option<String>,
    /// Redirect URI for authorization code flow.
    pub redirect_uri: Option<String>,
    /// Provider configuration.
    pub provider: Provider,
    /// HTTP client.
    http_client: Client,
}

impl OAuthClient {
    /// Creates a new OAuth client.
    #[must_use]
    pub fn new(client_id: impl Into<String>, provider: Provider) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: None,
            provider,
            http_client: Client::new(),
        }
    }

    /// Sets the client secret.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Sets the redirect URI.
    #[must_use]
    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }

    /// Uses a preconfigured HTTP client (shared connection pool, timeouts).
    #[must_use]
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http_client = client;
        self
    }

    /// Exchanges a refresh token for a fresh access token.
    ///
    /// If the server does not rotate the refresh token, the one passed in is
    /// carried over to the returned token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OAuth`] with `invalid_grant` when the refresh token was
    /// rejected, or a transport error.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Token> {
        if refresh_token.is_empty() {
            return Err(Error::NoRefreshToken);
        }

        let mut params = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", refresh_token);
        params.insert("client_id", &self.client_id);

        if let Some(secret) = &self.client_secret {
            params.insert("client_secret", secret);
        }

        let response = self
            .http_client
            .post(self.provider.token_url.clone())
            .form(&params)
            .send()
            .await?;

        let token_response: TokenResponse = read_json(response).await?;
        let mut new_token = Token::from_response(token_response);

        // Preserve refresh token if not returned
        if new_token.refresh_token.is_none() {
            new_token.refresh_token = Some(refresh_token.to_string());
        }

        debug!(provider = %self.provider.name, "Refreshed access token");
        Ok(new_token)
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
    ) -> Result<Token> {
        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("client_id", &self.client_id);

        if let Some(uri) = redirect_uri.or(self.redirect_uri.as_deref()) {
            params.insert("redirect_uri", uri);
        }

        if let Some(secret) = &self.client_secret {
            params.insert("client_secret", secret);
        }

        if let Some(verifier) = code_verifier {
            params.insert("code_verifier", verifier);
        }

        let response = self
            .http_client
            .post(self.provider.token_url.clone())
            .form(&params)
            .send()
            .await?;

        let token_response: TokenResponse = read_json(response).await?;
        Ok(Token::from_response(token_response))
    }

    /// Revokes a refresh or access token (RFC 7009).
    ///
    /// # Errors
    ///
    /// Returns an error if the provider has no revocation endpoint or the
    /// request fails.
    pub async fn revoke(&self, token: &str) -> Result<()> {
        let url = self
            .provider
            .revoke_url
            .clone()
            .ok_or_else(|| Error::RevocationUnsupported(self.provider.name.clone()))?;

        let response = self
            .http_client
            .post(url)
            .form(&[("token", token)])
            .send()
            .await?;

        if response.status().is_success() {
            debug!(provider = %self.provider.name, "Revoked token");
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }
}

/// Decodes a successful JSON body or turns the response into an [`Error`].
async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}

async fn error_from_response(response: Response) -> Error {
    let status = response.status().as_u16();
    match response.text().await {
        Ok(body) => serde_json::from_str::<ErrorResponse>(&body)
            .map_or(Error::Status(status), ErrorResponse::into_error),
        Err(e) => Error::Http(e),
    }
}
