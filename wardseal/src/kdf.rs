//! Per-field key derivation using HKDF (HMAC-based Key Derivation Function).
//!
//! Every field gets two independent keys derived from the root key: one for
//! encryption and one for blind indexing. The HKDF `info` parameter binds the
//! purpose, entity type and field name:
//! `wardseal/v1/{purpose}/{entity_type_len}:{entity_type}|{field_name}`
//!
//! The byte length of the entity type keeps the encoding unambiguous even for
//! names that contain the separator.

use crate::context::FieldContext;
use crate::error::Error;
use crate::key_provider::KeyMaterial;
use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretVec};
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroizing;

/// Derived key size in bytes (256 bits).
pub const DERIVED_KEY_SIZE: usize = 32;

const INFO_PREFIX: &str = "wardseal/v1";

/// What a derived key may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    /// Field encryption (AEAD)
    Encryption,
    /// Blind index computation (HMAC)
    Indexing,
}

impl KeyPurpose {
    /// Label used in the derivation info string.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Encryption => "encryption",
            Self::Indexing => "indexing",
        }
    }
}

impl fmt::Display for KeyPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A key derived for one field and one purpose.
pub struct DerivedKey {
    key: SecretVec<u8>,
    purpose: KeyPurpose,
}

impl DerivedKey {
    /// Returns the purpose this key was derived for.
    #[must_use]
    pub const fn purpose(&self) -> KeyPurpose {
        self.purpose
    }

    /// Fails unless the key was derived for `expected`.
    pub(crate) fn require(&self, expected: KeyPurpose) -> Result<&[u8], Error> {
        if self.purpose != expected {
            return Err(Error::KeyPurposeMismatch {
                expected: expected.label(),
                actual: self.purpose.label(),
            });
        }
        Ok(self.key.expose_secret())
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey").field("purpose", &self.purpose).finish_non_exhaustive()
    }
}

/// Derives the key for one field and purpose from the root key.
///
/// Derivation is deterministic: the same root key, context and purpose always
/// yield the same key. Encryption and indexing keys for the same field are
/// independent.
///
/// # Errors
///
/// Returns `Error::KeyDerivation` if the HKDF expansion fails.
///
/// # Example
///
/// ```
/// use wardseal::context::FieldContext;
/// use wardseal::kdf::{derive_field_key, KeyPurpose};
/// use wardseal::key_provider::KeyMaterial;
///
/// let root = KeyMaterial::from_bytes(vec![7u8; 32]).unwrap();
/// let ctx = FieldContext::new("Patient", "first_name");
/// let key = derive_field_key(&root, &ctx, KeyPurpose::Encryption).unwrap();
/// assert_eq!(key.purpose(), KeyPurpose::Encryption);
/// ```
pub fn derive_field_key(
    root: &KeyMaterial,
    context: &FieldContext,
    purpose: KeyPurpose,
) -> Result<DerivedKey, Error> {
    let hkdf = Hkdf::<Sha256>::new(None, root.expose());

    let info = format!("{INFO_PREFIX}/{purpose}/{}:{context}", context.entity_type().len());

    let mut okm = Zeroizing::new([0u8; DERIVED_KEY_SIZE]);
    hkdf.expand(info.as_bytes(), &mut okm[..]).map_err(|_| Error::KeyDerivation)?;

    Ok(DerivedKey { key: SecretVec::new(okm.to_vec()), purpose })
}
