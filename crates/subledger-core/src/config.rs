//! Runtime configuration.
//!
//! Settings live in `<config dir>/subledger/config.json`; every field has a
//! default and selected values can be overridden through `SUBLEDGER_*`
//! environment variables. The token encryption key is never written to the
//! file by this crate: it comes from `SUBLEDGER_TOKEN_KEY` or the system
//! keyring (see [`crate::vault::TokenCipher::from_config`]).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Error, Result};

/// Environment variable holding the base64 token encryption key.
pub const TOKEN_KEY_ENV: &str = "SUBLEDGER_TOKEN_KEY";

const DATABASE_ENV: &str = "SUBLEDGER_DATABASE";
const CLIENT_ID_ENV: &str = "SUBLEDGER_CLIENT_ID";
const CLIENT_SECRET_ENV: &str = "SUBLEDGER_CLIENT_SECRET";
const REDIRECT_URI_ENV: &str = "SUBLEDGER_REDIRECT_URI";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path of the `SQLite` database.
    pub database_path: PathBuf,
    /// `OAuth2` client registration for the mailbox provider.
    pub oauth: OAuthSettings,
    /// Inbox scan tuning.
    pub scan: ScanSettings,
    /// Days a processed-message record is kept before it is purged.
    pub retention_days: i64,
    /// Base64 token encryption key; normally supplied through the environment.
    #[serde(skip_serializing)]
    pub token_key: Option<String>,
}

/// `OAuth2` client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    /// Client ID issued by the provider.
    pub client_id: String,
    /// Client secret, if the registration has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Redirect URI registered with the provider.
    pub redirect_uri: String,
}

/// Scan tuning knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Days of history examined on the first scan.
    pub lookback_days: i64,
    /// Messages fetched concurrently per batch.
    pub batch_size: usize,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            redirect_uri: "http://127.0.0.1:8765/oauth/callback".to_string(),
        }
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            lookback_days: 180,
            batch_size: 10,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_data_dir().join("subledger.db"),
            oauth: OAuthSettings::default(),
            scan: ScanSettings::default(),
            retention_days: 30,
            token_key: None,
        }
    }
}

impl Config {
    /// Default location of the configuration file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("subledger")
            .join("config.json")
    }

    /// Load configuration from `path` (or the default location), then apply
    /// environment overrides.
    ///
    /// A missing file is not an error; defaults are used.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut config = if tokio::fs::try_exists(&path).await? {
            let contents = tokio::fs::read_to_string(&path).await?;
            debug!("Loaded configuration from {}", path.display());
            serde_json::from_str(&contents)?
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Write the configuration to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, contents).await?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(path) = get(DATABASE_ENV) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(id) = get(CLIENT_ID_ENV) {
            self.oauth.client_id = id;
        }
        if let Some(secret) = get(CLIENT_SECRET_ENV) {
            self.oauth.client_secret = Some(secret);
        }
        if let Some(uri) = get(REDIRECT_URI_ENV) {
            self.oauth.redirect_uri = uri;
        }
        if let Some(key) = get(TOKEN_KEY_ENV) {
            self.token_key = Some(key);
        }
    }

    /// Check the scan and retention settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.scan.batch_size == 0 {
            return Err(Error::Configuration("scan.batch_size must be at least 1".into()));
        }
        if self.scan.lookback_days <= 0 {
            return Err(Error::Configuration("scan.lookback_days must be positive".into()));
        }
        if self.retention_days <= 0 {
            return Err(Error::Configuration("retention_days must be positive".into()));
        }
        Ok(())
    }

    /// Check the settings needed to talk to the mailbox provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the client id or redirect URI is missing.
    pub fn validate_oauth(&self) -> Result<()> {
        if self.oauth.client_id.is_empty() {
            return Err(Error::Configuration(format!(
                "OAuth client id is not set (config file or {CLIENT_ID_ENV})"
            )));
        }
        if self.oauth.redirect_uri.is_empty() {
            return Err(Error::Configuration("OAuth redirect URI is empty".into()));
        }
        Ok(())
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("subledger")
}
