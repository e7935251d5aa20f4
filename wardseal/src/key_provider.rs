//! Key provider abstraction and the root key material it yields.

use crate::error::KeyProviderError;
use secrecy::{ExposeSecret, SecretVec};
use std::fmt;

/// Root key size in bytes (256 bits).
pub const ROOT_KEY_SIZE: usize = 32;

/// The process-wide root secret.
///
/// Constructed once at startup and passed explicitly to every derivation. The
/// bytes live in a `SecretVec` and are zeroized on drop; `Debug` never prints them.
pub struct KeyMaterial {
    key: SecretVec<u8>,
}

impl KeyMaterial {
    /// Wraps raw root key bytes.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::InvalidKey` unless exactly 32 bytes are given,
    /// or if every byte is zero.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, KeyProviderError> {
        let key = SecretVec::new(bytes);
        let raw = key.expose_secret();
        if raw.len() != ROOT_KEY_SIZE {
            return Err(KeyProviderError::InvalidKey(format!(
                "expected {ROOT_KEY_SIZE} bytes, got {}",
                raw.len()
            )));
        }
        if raw.iter().all(|b| *b == 0) {
            return Err(KeyProviderError::InvalidKey("all-zero key".to_string()));
        }
        Ok(Self { key })
    }

    pub(crate) fn expose(&self) -> &[u8] {
        self.key.expose_secret()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial([REDACTED])")
    }
}

/// Supplies the root key.
///
/// Implementations must be thread-safe (`Send + Sync`) and must fail rather
/// than fall back to an empty or hard-coded key.
///
/// # Example
///
/// ```rust,ignore
/// use wardseal::key_provider::{KeyMaterial, KeyProvider};
///
/// struct VaultProvider;
///
/// impl KeyProvider for VaultProvider {
///     fn root_key(&self) -> Result<KeyMaterial, KeyProviderError> {
///         // fetch from the secret manager
///     }
/// }
/// ```
pub trait KeyProvider: Send + Sync {
    /// Returns the root key.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::NotConfigured` if no key is available and
    /// `KeyProviderError::InvalidKey` if the configured key is malformed.
    fn root_key(&self) -> Result<KeyMaterial, KeyProviderError>;
}

/// Key provider over bytes already held in memory.
pub struct StaticKeyProvider {
    key: SecretVec<u8>,
}

impl StaticKeyProvider {
    /// Creates a provider for the given root key bytes.
    #[must_use]
    pub fn new(key: Vec<u8>) -> Self {
        Self { key: SecretVec::new(key) }
    }
}

impl KeyProvider for StaticKeyProvider {
    fn root_key(&self) -> Result<KeyMaterial, KeyProviderError> {
        KeyMaterial::from_bytes(self.key.expose_secret().clone())
    }
}
