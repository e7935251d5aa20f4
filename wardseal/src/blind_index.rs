//! Blind index generation for searchable encryption.
//!
//! Blind indexes allow equality queries on encrypted data without revealing
//! the plaintext value. They use HMAC with a per-field indexing key.

use crate::context::FieldContext;
use crate::error::Error;
use crate::kdf::{DerivedKey, KeyPurpose};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::ops::RangeInclusive;

type HmacSha256 = Hmac<Sha256>;

/// Default blind index width in bytes.
pub const DEFAULT_INDEX_BYTES: usize = 16;

/// Allowed blind index widths in bytes.
///
/// Narrow indexes collide on purpose and leak less about the plaintext
/// distribution; callers then confirm candidates by decrypting.
pub const INDEX_BYTES_RANGE: RangeInclusive<usize> = 4..=32;

/// How a value is canonicalized before it is indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Index the value byte for byte.
    #[default]
    Exact,
    /// Trim surrounding whitespace and lowercase before indexing.
    CaseFold,
}

impl Normalization {
    /// Applies the normalization to a value.
    #[must_use]
    pub fn apply(self, value: &str) -> String {
        match self {
            Self::Exact => value.to_string(),
            Self::CaseFold => value.trim().to_lowercase(),
        }
    }

    /// Compares two values under this normalization.
    #[must_use]
    pub fn matches(self, a: &str, b: &str) -> bool {
        match self {
            Self::Exact => a == b,
            Self::CaseFold => self.apply(a) == self.apply(b),
        }
    }
}

/// A deterministic blind index token, rendered as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlindToken(String);

impl BlindToken {
    /// Wraps an already computed token (e.g. one read back from storage).
    #[must_use]
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlindToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computes a blind index token.
///
/// The token is computed as:
/// `hex(HMAC-SHA256(index_key, len(context) || context || value)[..width])`
///
/// # Arguments
///
/// * `key` - Indexing key derived for this field
/// * `context` - Field context for domain separation
/// * `value` - The plaintext value to index
/// * `width` - Output width in bytes, within [`INDEX_BYTES_RANGE`]
///
/// # Errors
///
/// Returns `Error::KeyPurposeMismatch` for a non-indexing key and
/// `Error::IndexGenerationFailed` for an out-of-range width.
///
/// # Example
///
/// ```
/// use wardseal::blind_index::compute_index;
/// use wardseal::context::FieldContext;
/// use wardseal::kdf::{derive_field_key, KeyPurpose};
/// use wardseal::key_provider::KeyMaterial;
///
/// let root = KeyMaterial::from_bytes(vec![7u8; 32]).unwrap();
/// let ctx = FieldContext::new("Patient", "first_name");
/// let key = derive_field_key(&root, &ctx, KeyPurpose::Indexing).unwrap();
///
/// let t1 = compute_index(&key, &ctx, b"Maria", 16).unwrap();
/// let t2 = compute_index(&key, &ctx, b"Maria", 16).unwrap();
/// assert_eq!(t1, t2);
/// assert_eq!(t1.as_str().len(), 32);
/// ```
pub fn compute_index(
    key: &DerivedKey,
    context: &FieldContext,
    value: &[u8],
    width: usize,
) -> Result<BlindToken, Error> {
    if !INDEX_BYTES_RANGE.contains(&width) {
        return Err(Error::IndexGenerationFailed(format!(
            "index width {width} outside {}..={}",
            INDEX_BYTES_RANGE.start(),
            INDEX_BYTES_RANGE.end()
        )));
    }

    let key_bytes = key.require(KeyPurpose::Indexing)?;
    let mut mac = HmacSha256::new_from_slice(key_bytes)
        .map_err(|e| Error::IndexGenerationFailed(format!("invalid index key: {e}")))?;

    // Length prefix keeps (context, value) pairs unambiguous
    let context_str = context.to_string();
    let context_len = u64::try_from(context_str.len())
        .map_err(|_| Error::IndexGenerationFailed("context too long".to_string()))?;
    mac.update(&context_len.to_be_bytes());
    mac.update(context_str.as_bytes());
    mac.update(value);

    let digest = mac.finalize().into_bytes();
    Ok(BlindToken(hex::encode(&digest[..width])))
}
