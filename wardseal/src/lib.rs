//! # `Wardseal`
//!
//! Searchable field-level encryption for record stores.
//!
//! Sensitive fields are encrypted with an AEAD cipher under keys derived per
//! `(entity type, field)` from a single root key. Fields that must be
//! searchable by equality also get a keyed blind index token, stored in a
//! side table so lookups never decrypt the whole table.
//!
//! ## Features
//!
//! - ChaCha20-Poly1305 / XChaCha20-Poly1305 field encryption with versioned envelopes
//! - HKDF-SHA256 per-field key separation for encryption and indexing
//! - HMAC-SHA256 blind indexes with optional case folding
//! - Declarative schema, in code or JSON
//! - In-memory and SQLite stores with atomic row + index commits
//!
//! ## Example
//!
//! ```rust,ignore
//! use wardseal::prelude::*;
//!
//! let schema = SchemaRegistry::new().with_entity(EntitySchema::new(
//!     "Patient",
//!     vec![FieldSpec::indexed("first_name"), FieldSpec::encrypted("medical_history")],
//! )?)?;
//! let mapper = RecordMapper::from_provider(&EnvKeyProvider::new(), Arc::new(schema), FieldCipher::default())?;
//! let repo = EncryptedRepository::new(mapper, SqliteStore::open("hospital.db")?);
//!
//! repo.save(&PlainRecord::new("Patient", "1").with_field("first_name", "Maria"))?;
//! let ids = repo.search_by_field("Patient", "first_name", "Maria")?;
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod blind_index;
pub mod cipher;
pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod key_provider;
pub mod mapper;
pub mod record;
pub mod repository;
pub mod schema;
pub mod store;

pub mod prelude {
    //! Convenience re-exports for common use.
    pub use crate::blind_index::{BlindToken, Normalization};
    pub use crate::cipher::{CipherMode, FieldCipher};
    pub use crate::config::EnvKeyProvider;
    pub use crate::context::FieldContext;
    pub use crate::error::{DecryptionError, Error, KeyProviderError};
    pub use crate::key_provider::{KeyMaterial, KeyProvider, StaticKeyProvider};
    pub use crate::mapper::RecordMapper;
    pub use crate::record::{PlainRecord, StoredRecord};
    pub use crate::repository::{EncryptedRepository, IndexReport, RecordRow};
    pub use crate::schema::{EntitySchema, FieldSpec, SchemaRegistry};
    pub use crate::store::{BlindIndexStore, MemoryStore, RecordStore};
    #[cfg(feature = "sqlite")]
    pub use crate::store::SqliteStore;
    pub use std::sync::Arc;
}
