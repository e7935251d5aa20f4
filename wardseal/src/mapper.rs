//! Encrypted record mapper.
//!
//! The mapper is called explicitly by the data-access layer at its write and
//! read boundaries: [`RecordMapper::seal`] before a row is persisted and
//! [`RecordMapper::open`] after it is loaded. It never touches storage itself.

use crate::blind_index::{compute_index, BlindToken};
use crate::cipher::FieldCipher;
use crate::context::FieldContext;
use crate::envelope::Envelope;
use crate::error::{DecryptionError, Error};
use crate::kdf::{derive_field_key, KeyPurpose};
use crate::key_provider::{KeyMaterial, KeyProvider};
use crate::record::{FieldMap, PlainRecord, SealedRecord, StoredRecord};
use crate::schema::{EntitySchema, FieldSpec, SchemaRegistry};
use std::sync::Arc;

/// Applies the schema to records: encrypts, indexes and decrypts fields.
#[derive(Debug, Clone)]
pub struct RecordMapper {
    keys: Arc<KeyMaterial>,
    schema: Arc<SchemaRegistry>,
    cipher: FieldCipher,
}

impl RecordMapper {
    /// Creates a mapper over already loaded key material.
    #[must_use]
    pub fn new(keys: Arc<KeyMaterial>, schema: Arc<SchemaRegistry>, cipher: FieldCipher) -> Self {
        Self { keys, schema, cipher }
    }

    /// Loads the root key from `provider` once and builds a mapper around it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the provider has no usable key.
    pub fn from_provider<P: KeyProvider + ?Sized>(
        provider: &P,
        schema: Arc<SchemaRegistry>,
        cipher: FieldCipher,
    ) -> Result<Self, Error> {
        let keys = provider.root_key()?;
        tracing::info!(
            entity_types = schema.entity_types().count(),
            "root key loaded for record mapper"
        );
        Ok(Self::new(Arc::new(keys), schema, cipher))
    }

    /// Returns the schema registry.
    #[must_use]
    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// Encrypts configured fields and computes blind index tokens.
    ///
    /// Null values are neither encrypted nor indexed; an indexed field that is
    /// null or absent lands in `cleared_indexes` so its old entry is removed.
    /// Fields not declared in the schema are stored as-is.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` for an unknown entity type and crypto errors
    /// from the cipher or index calculator.
    pub fn seal(&self, record: &PlainRecord) -> Result<SealedRecord, Error> {
        let schema = self.schema.entity(record.entity_type())?;

        let mut fields = FieldMap::new();
        for (name, value) in record.fields() {
            let stored = match (schema.field(name), value) {
                (Some(spec), Some(plaintext)) if spec.is_encrypted() => {
                    Some(self.encrypt_field(record.entity_type(), name, plaintext)?)
                }
                _ => value.clone(),
            };
            fields.insert(name.clone(), stored);
        }

        let (index_entries, cleared_indexes) = self.index_changes(schema, record)?;

        Ok(SealedRecord {
            stored: StoredRecord {
                entity_type: record.entity_type().to_string(),
                entity_id: record.entity_id().to_string(),
                fields,
            },
            index_entries,
            cleared_indexes,
        })
    }

    /// Decrypts every encrypted field of a stored row.
    ///
    /// # Errors
    ///
    /// Returns `Error::FieldDecryption` naming the first field that fails; a
    /// partially decrypted record is never returned.
    pub fn open(&self, stored: &StoredRecord) -> Result<PlainRecord, Error> {
        let schema = self.schema.entity(&stored.entity_type)?;

        let mut fields = FieldMap::new();
        for (name, value) in &stored.fields {
            let plain = match (schema.field(name), value) {
                (Some(spec), Some(text)) if spec.is_encrypted() => Some(
                    self.decrypt_field(&stored.entity_type, name, text).map_err(|e| match e {
                        Error::Decryption(source) => Error::FieldDecryption {
                            entity_type: stored.entity_type.clone(),
                            entity_id: stored.entity_id.clone(),
                            field: name.clone(),
                            source,
                        },
                        other => other,
                    })?,
                ),
                _ => value.clone(),
            };
            fields.insert(name.clone(), plain);
        }

        Ok(PlainRecord::from_parts(stored.entity_type.clone(), stored.entity_id.clone(), fields))
    }

    /// Computes the index entries a record should have, without encrypting it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` for an unknown entity type.
    pub fn index_entries(&self, record: &PlainRecord) -> Result<Vec<(String, BlindToken)>, Error> {
        let schema = self.schema.entity(record.entity_type())?;
        Ok(self.index_changes(schema, record)?.0)
    }

    /// Computes the blind index token for a candidate value of an indexed field.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` if the field is unknown or not indexed.
    pub fn index_token(
        &self,
        entity_type: &str,
        field: &str,
        plaintext: &str,
    ) -> Result<BlindToken, Error> {
        let spec = self.schema.entity(entity_type)?.indexed_field(field)?;
        self.token_for(entity_type, spec, plaintext)
    }

    /// Encrypts one value of a field into envelope text.
    ///
    /// # Errors
    ///
    /// Returns crypto errors from key derivation or the cipher.
    pub fn encrypt_field(
        &self,
        entity_type: &str,
        field: &str,
        plaintext: &str,
    ) -> Result<String, Error> {
        let ctx = FieldContext::new(entity_type, field);
        let key = derive_field_key(&self.keys, &ctx, KeyPurpose::Encryption)?;
        Ok(self.cipher.encrypt_value(&key, plaintext.as_bytes(), &ctx)?.to_text())
    }

    /// Decrypts envelope text stored for a field.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decryption` for malformed, tampered or foreign envelopes.
    pub fn decrypt_field(
        &self,
        entity_type: &str,
        field: &str,
        envelope_text: &str,
    ) -> Result<String, Error> {
        let ctx = FieldContext::new(entity_type, field);
        let key = derive_field_key(&self.keys, &ctx, KeyPurpose::Encryption)?;
        let envelope = Envelope::from_text(envelope_text)?;
        let bytes = self.cipher.decrypt_value(&key, &envelope, &ctx)?;
        String::from_utf8(bytes).map_err(|_| DecryptionError::InvalidUtf8.into())
    }

    fn index_changes(
        &self,
        schema: &EntitySchema,
        record: &PlainRecord,
    ) -> Result<(Vec<(String, BlindToken)>, Vec<String>), Error> {
        let mut entries = Vec::new();
        let mut cleared = Vec::new();
        for spec in schema.indexed_fields() {
            let Some(index_name) = spec.index_name() else { continue };
            match record.get(spec.name()) {
                Some(plaintext) => {
                    let token = self.token_for(record.entity_type(), spec, plaintext)?;
                    entries.push((index_name.to_string(), token));
                }
                None => cleared.push(index_name.to_string()),
            }
        }
        Ok((entries, cleared))
    }

    fn token_for(
        &self,
        entity_type: &str,
        spec: &FieldSpec,
        plaintext: &str,
    ) -> Result<BlindToken, Error> {
        let ctx = FieldContext::new(entity_type, spec.name());
        let key = derive_field_key(&self.keys, &ctx, KeyPurpose::Indexing)?;
        let normalized = spec.normalization().apply(plaintext);
        compute_index(&key, &ctx, normalized.as_bytes(), spec.index_bytes())
    }
}
