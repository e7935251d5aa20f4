//! Root key configuration from the process environment.
//!
//! The key is accepted either as 64 hex characters or as `base64:`-prefixed
//! standard base64, both decoding to 32 bytes. There is no default key: an
//! unset or empty variable is a configuration error.

use crate::error::KeyProviderError;
use crate::key_provider::{KeyMaterial, KeyProvider};
use base64::Engine as _;
use zeroize::Zeroizing;

/// Environment variable holding the root key.
pub const ROOT_KEY_ENV: &str = "WARDSEAL_ROOT_KEY";

const BASE64_PREFIX: &str = "base64:";

/// Decodes root key text (hex, or `base64:` prefixed) into key material.
///
/// # Errors
///
/// Returns `KeyProviderError::NotConfigured` for blank text and
/// `KeyProviderError::InvalidKey` for undecodable or wrongly sized keys.
pub fn parse_key_text(text: &str) -> Result<KeyMaterial, KeyProviderError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(KeyProviderError::NotConfigured("root key is empty".to_string()));
    }

    let bytes = if let Some(encoded) = text.strip_prefix(BASE64_PREFIX) {
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| KeyProviderError::InvalidKey(format!("invalid base64: {e}")))?
    } else {
        hex::decode(text).map_err(|e| KeyProviderError::InvalidKey(format!("invalid hex: {e}")))?
    };

    KeyMaterial::from_bytes(bytes)
}

/// Reads the root key from an environment variable.
#[derive(Debug, Clone)]
pub struct EnvKeyProvider {
    var: String,
}

impl EnvKeyProvider {
    /// Provider reading [`ROOT_KEY_ENV`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_var(ROOT_KEY_ENV)
    }

    /// Provider reading a custom variable name.
    #[must_use]
    pub fn with_var(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    /// Name of the variable this provider reads.
    #[must_use]
    pub fn var(&self) -> &str {
        &self.var
    }
}

impl Default for EnvKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyProvider for EnvKeyProvider {
    fn root_key(&self) -> Result<KeyMaterial, KeyProviderError> {
        let value = std::env::var(&self.var).map(Zeroizing::new).map_err(|e| match e {
            std::env::VarError::NotPresent => {
                KeyProviderError::NotConfigured(format!("{} is not set", self.var))
            }
            std::env::VarError::NotUnicode(_) => {
                KeyProviderError::InvalidKey(format!("{} is not valid unicode", self.var))
            }
        })?;
        parse_key_text(&value).map_err(|e| match e {
            KeyProviderError::NotConfigured(_) => {
                KeyProviderError::NotConfigured(format!("{} is empty", self.var))
            }
            other => other,
        })
    }
}
