//! Error types for `WardSeal` operations.

use std::fmt;

/// Main error type for `WardSeal` operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key material is missing or invalid. Fatal: nothing is encrypted without a key.
    #[error("configuration error: {0}")]
    Configuration(#[from] KeyProviderError),

    /// Entity schema is invalid or does not describe the requested entity/field
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Key derivation failed
    #[error("key derivation failed")]
    KeyDerivation,

    /// A derived key was used for the wrong purpose
    #[error("key purpose mismatch: expected {expected} key, got {actual} key")]
    KeyPurposeMismatch {
        /// Purpose the operation requires
        expected: &'static str,
        /// Purpose the key was derived for
        actual: &'static str,
    },

    /// Encryption operation failed
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Blind index generation failed
    #[error("blind index generation failed: {0}")]
    IndexGenerationFailed(String),

    /// A single value could not be decrypted
    #[error(transparent)]
    Decryption(#[from] DecryptionError),

    /// A record field could not be decrypted
    #[error("failed to decrypt field `{field}` of {entity_type}#{entity_id}: {source}")]
    FieldDecryption {
        /// Entity type of the record
        entity_type: String,
        /// Identifier of the record
        entity_id: String,
        /// Field that failed
        field: String,
        /// Underlying decryption failure
        #[source]
        source: DecryptionError,
    },

    /// A blind index entry references an entity that does not match the stored record
    #[error("blind index `{index_name}` for {entity_type}#{entity_id} is inconsistent: {reason}")]
    IndexConsistency {
        /// Entity type of the entry
        entity_type: String,
        /// Entity id the entry points at
        entity_id: String,
        /// Index name of the entry
        index_name: String,
        /// What is wrong with it
        reason: String,
    },

    /// Underlying storage failed
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Decryption failures. Never masked as missing data.
#[derive(Debug, thiserror::Error)]
pub enum DecryptionError {
    /// Envelope text or bytes are malformed
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Unsupported envelope version
    #[error("unsupported envelope version: {version} (supported: {supported})")]
    UnsupportedVersion {
        /// The version found in the envelope
        version: u8,
        /// Supported versions
        supported: String,
    },

    /// Unknown cipher algorithm identifier
    #[error("unknown cipher algorithm: {0:#04x}")]
    UnknownAlgorithm(u8),

    /// Authentication tag verification failed (wrong key, wrong field, or tampered data)
    #[error("authentication failed: ciphertext may be corrupted or tampered")]
    AuthenticationFailed,

    /// Plaintext is not valid UTF-8
    #[error("decrypted value is not valid UTF-8")]
    InvalidUtf8,
}

/// Errors raised while validating or consulting the entity schema.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// No schema registered for the entity type
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// Field is not declared on the entity type
    #[error("unknown field `{field}` on {entity_type}")]
    UnknownField {
        /// Entity type
        entity_type: String,
        /// Field name
        field: String,
    },

    /// Search was requested on a field without a blind index
    #[error("field `{field}` on {entity_type} has no blind index")]
    NotIndexed {
        /// Entity type
        entity_type: String,
        /// Field name
        field: String,
    },

    /// Schema definition is invalid
    #[error("invalid schema for {entity_type}: {reason}")]
    Invalid {
        /// Entity type
        entity_type: String,
        /// Validation failure
        reason: String,
    },

    /// Schema JSON could not be parsed
    #[error("schema parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors from the record and blind index stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// SQLite failure
    #[cfg(feature = "sqlite")]
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Stored field map could not be (de)serialized
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored timestamp is out of range
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),
}

/// Errors specific to key provider operations.
#[derive(Debug)]
pub enum KeyProviderError {
    /// No root key configured
    NotConfigured(String),

    /// Root key text or bytes are invalid
    InvalidKey(String),

    /// Key generation failed
    CreationFailed(String),

    /// I/O operation failed
    Io(std::io::Error),
}

impl fmt::Display for KeyProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured(msg) => write!(f, "root key not configured: {msg}"),
            Self::InvalidKey(msg) => write!(f, "invalid root key: {msg}"),
            Self::CreationFailed(msg) => write!(f, "root key creation failed: {msg}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for KeyProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for KeyProviderError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl Error {
    /// Returns `true` for missing or invalid key material.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns `true` for any decryption failure, per value or per field.
    #[must_use]
    pub const fn is_decryption(&self) -> bool {
        matches!(self, Self::Decryption(_) | Self::FieldDecryption { .. })
    }
}

/// Convenience result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;
