//! `OAuth2` provider configurations.

use crate::error::{Error, Result};
use url::Url;

/// Read-only Gmail scope; enough to list and read messages.
pub const GMAIL_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

/// `OAuth2` provider configuration.
#[derive(Debug, Clone)]
pub struct Provider {
    /// Provider name (e.g., "Google").
    pub name: String,
    /// Authorization endpoint URL.
    pub auth_url: Url,
    /// Token endpoint URL.
    pub token_url: Url,
    /// Revocation endpoint (RFC 7009), if the provider has one.
    pub revoke_url: Option<Url>,
    /// Default scopes.
    pub default_scopes: Vec<String>,
    /// Extra query parameters appended to the authorization URL.
    pub extra_auth_params: Vec<(String, String)>,
}

impl Provider {
    /// Creates a new provider configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if URLs are invalid.
    pub fn new(
        name: impl Into<String>,
        auth_url: impl AsRef<str>,
        token_url: impl AsRef<str>,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            auth_url: Url::parse(auth_url.as_ref())?,
            token_url: Url::parse(token_url.as_ref())?,
            revoke_url: None,
            default_scopes: Vec::new(),
            extra_auth_params: Vec::new(),
        })
    }

    /// Sets the revocation URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn with_revoke_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.revoke_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Sets the default scopes.
    #[must_use]
    pub fn with_default_scopes(mut self, scopes: Vec<String>) -> Self {
        self.default_scopes = scopes;
        self
    }

    /// Adds a provider-specific authorization parameter.
    #[must_use]
    pub fn with_auth_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_auth_params.push((key.into(), value.into()));
        self
    }

    /// Google `OAuth2` provider with read-only Gmail access.
    ///
    /// Requests offline access with forced consent so that a refresh token
    /// is issued on every authorization, not only the first one.
    ///
    /// # Errors
    ///
    /// Returns an error if URL parsing fails.
    pub fn google_readonly() -> Result<Self> {
        Ok(Self::new(
            "Google",
            "https://accounts.google.com/o/oauth2/v2/auth",
            "https://oauth2.googleapis.com/token",
        )?
        .with_revoke_url("https://oauth2.googleapis.com/revoke")?
        .with_default_scopes(vec![
            GMAIL_READONLY_SCOPE.to_string(),
            "email".to_string(),
        ])
        .with_auth_param("access_type", "offline")
        .with_auth_param("prompt", "consent"))
    }

    /// Validates that required URLs are set.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.auth_url.as_str().is_empty() {
            return Err(Error::InvalidConfig("auth_url is empty".into()));
        }
        if self.token_url.as_str().is_empty() {
            return Err(Error::InvalidConfig("token_url is empty".into()));
        }
        if self.default_scopes.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "provider {} has no scopes",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_google_readonly_provider() {
        let provider = Provider::google_readonly().unwrap();
        assert_eq!(provider.name, "Google");
        assert!(provider.revoke_url.is_some());
        assert!(
            provider
                .default_scopes
                .iter()
                .any(|s| s == GMAIL_READONLY_SCOPE)
        );
        assert!(
            provider
                .extra_auth_params
                .contains(&("access_type".to_string(), "offline".to_string()))
        );
        provider.validate().unwrap();
    }

    #[test]
    fn test_custom_provider_requires_scopes() {
        let provider = Provider::new(
            "Custom",
            "https://auth.example.com/authorize",
            "https://auth.example.com/token",
        )
        .unwrap();
        assert!(provider.validate().is_err());

        let provider = provider.with_default_scopes(vec!["mail.read".to_string()]);
        provider.validate().unwrap();
        assert!(provider.revoke_url.is_none());
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(Provider::new("Broken", "not a url", "https://auth.example.com/token").is_err());
    }
}
