//! Encryption of tokens at rest.
//!
//! Tokens are sealed with ChaCha20-Poly1305 under a 32-byte key and stored as
//! `enc:v1:<nonce>:<ciphertext>`, both parts URL-safe base64.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use keyring::Entry;
use rand::RngCore;
use tracing::{debug, warn};

use crate::config::Config;
use crate::{Error, Result};

const ENVELOPE_PREFIX: &str = "enc:v1:";
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Keyring service name.
const SERVICE_NAME: &str = "subledger";
/// Keyring entry holding the token key.
const TOKEN_KEY_ENTRY: &str = "token_key";

/// Symmetric cipher for stored tokens.
#[derive(Clone)]
pub struct TokenCipher {
    key: [u8; KEY_LEN],
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenCipher(***)")
    }
}

impl TokenCipher {
    /// Create a cipher from raw key material.
    #[must_use]
    pub const fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Create a cipher from a base64 key (URL-safe or standard alphabet).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the value is not base64 for exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let encoded = encoded.trim();
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .or_else(|_| STANDARD.decode(encoded))
            .map_err(|e| Error::Configuration(format!("token key is not base64: {e}")))?;

        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            Error::Configuration(format!(
                "token key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::new(key))
    }

    /// Resolve the key from configuration, falling back to the system keyring.
    ///
    /// Returns `Ok(None)` when no key is configured anywhere.
    ///
    /// # Errors
    ///
    /// Returns an error if a key is present but invalid, or the keyring fails.
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        if let Some(key) = config.token_key.as_deref() {
            return Self::from_base64(key).map(Some);
        }
        load_key_from_keyring()?
            .map(|key| Self::from_base64(&key))
            .transpose()
    }

    /// Seal a plaintext token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if encryption fails.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .aead()
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| Error::Crypto(format!("failed to encrypt token: {e}")))?;

        Ok(format!(
            "{ENVELOPE_PREFIX}{}:{}",
            URL_SAFE_NO_PAD.encode(nonce),
            URL_SAFE_NO_PAD.encode(ciphertext)
        ))
    }

    /// Open a sealed token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if the envelope is malformed, was sealed under
    /// another key, or was tampered with.
    pub fn decrypt(&self, sealed: &str) -> Result<String> {
        let payload = sealed
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or_else(|| Error::Crypto("token envelope is invalid".to_string()))?;
        let (nonce_b64, ciphertext_b64) = payload
            .split_once(':')
            .ok_or_else(|| Error::Crypto("token envelope is invalid".to_string()))?;

        let nonce = URL_SAFE_NO_PAD
            .decode(nonce_b64)
            .map_err(|e| Error::Crypto(format!("failed to decode token nonce: {e}")))?;
        if nonce.len() != NONCE_LEN {
            return Err(Error::Crypto("token nonce length is invalid".to_string()));
        }
        let ciphertext = URL_SAFE_NO_PAD
            .decode(ciphertext_b64)
            .map_err(|e| Error::Crypto(format!("failed to decode token payload: {e}")))?;

        let plaintext = self
            .aead()
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|e| Error::Crypto(format!("failed to decrypt token: {e}")))?;
        String::from_utf8(plaintext)
            .map_err(|e| Error::Crypto(format!("token plaintext is invalid utf8: {e}")))
    }

    fn aead(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.key))
    }
}

/// Generate a fresh random key, base64 encoded.
#[must_use]
pub fn generate_key() -> String {
    let mut key = [0u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    URL_SAFE_NO_PAD.encode(key)
}

/// Store a token key in the system keyring.
///
/// # Errors
///
/// Returns an error if the keyring operation fails.
pub fn store_key_in_keyring(key: &str) -> Result<()> {
    let entry = Entry::new(SERVICE_NAME, TOKEN_KEY_ENTRY)?;
    entry.set_password(key)?;
    debug!("Stored token key in keyring");
    Ok(())
}

fn load_key_from_keyring() -> Result<Option<String>> {
    let entry = Entry::new(SERVICE_NAME, TOKEN_KEY_ENTRY)?;
    match entry.get_password() {
        Ok(key) => Ok(Some(key)),
        Err(keyring::Error::NoEntry) => {
            debug!("No token key in keyring");
            Ok(None)
        }
        Err(e @ (keyring::Error::PlatformFailure(_) | keyring::Error::NoStorageAccess(_))) => {
            warn!("System keyring unavailable, no token key loaded: {e}");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn cipher() -> TokenCipher {
        TokenCipher::new([7u8; KEY_LEN])
    }

    #[test]
    fn test_seal_and_open() {
        let sealed = cipher().encrypt("1//refresh-token").unwrap();
        assert!(sealed.starts_with(ENVELOPE_PREFIX));
        assert!(!sealed.contains("refresh-token"));
        assert_eq!(cipher().decrypt(&sealed).unwrap(), "1//refresh-token");
    }

    #[test]
    fn test_nonce_is_fresh() {
        let a = cipher().encrypt("same").unwrap();
        let b = cipher().encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = cipher().encrypt("secret").unwrap();
        let other = TokenCipher::new([8u8; KEY_LEN]);
        assert!(matches!(other.decrypt(&sealed), Err(Error::Crypto(_))));
    }

    #[test]
    fn test_tampered_envelope_fails() {
        let sealed = cipher().encrypt("secret").unwrap();
        let mut tampered = sealed.clone();
        tampered.push('A');
        assert!(cipher().decrypt(&tampered).is_err());
        assert!(cipher().decrypt("plaintext").is_err());
        assert!(cipher().decrypt("enc:v1:onlyonepart").is_err());
    }

    #[test]
    fn test_key_parsing() {
        let key = generate_key();
        assert!(TokenCipher::from_base64(&key).is_ok());
        assert!(TokenCipher::from_base64(&STANDARD.encode([1u8; KEY_LEN])).is_ok());
        assert!(matches!(
            TokenCipher::from_base64("c2hvcnQ"),
            Err(Error::Configuration(_))
        ));
        assert!(TokenCipher::from_base64("not base64!").is_err());
    }

    #[test]
    fn test_from_config_prefers_explicit_key() {
        let config = Config {
            token_key: Some(generate_key()),
            ..Config::default()
        };
        assert!(TokenCipher::from_config(&config).unwrap().is_some());
    }
}
