//! Record shapes on either side of the mapper.

use crate::blind_index::BlindToken;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field name to optional value. `None` is a null column.
pub type FieldMap = BTreeMap<String, Option<String>>;

/// A record with every field in plaintext, as callers see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainRecord {
    entity_type: String,
    entity_id: String,
    fields: FieldMap,
}

impl PlainRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self { entity_type: entity_type.into(), entity_id: entity_id.into(), fields: FieldMap::new() }
    }

    /// Builder-style [`set`](Self::set).
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, Some(value.into()));
        self
    }

    /// Builder-style null field.
    #[must_use]
    pub fn with_null(mut self, name: impl Into<String>) -> Self {
        self.set(name, None);
        self
    }

    /// Sets a field value (`None` for null).
    pub fn set(&mut self, name: impl Into<String>, value: Option<String>) {
        self.fields.insert(name.into(), value);
    }

    /// Returns the value of a field; `None` when absent or null.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Option::as_deref)
    }

    /// Returns the entity type.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Returns the entity id.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Returns all fields.
    #[must_use]
    pub const fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub(crate) fn from_parts(entity_type: String, entity_id: String, fields: FieldMap) -> Self {
        Self { entity_type, entity_id, fields }
    }
}

/// A record as persisted: encrypted fields hold envelope text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Entity type
    pub entity_type: String,
    /// Entity id
    pub entity_id: String,
    /// Stored column values
    pub fields: FieldMap,
}

/// The output of sealing a record: the row to write and the index changes
/// that must be committed with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedRecord {
    /// Row to persist
    pub stored: StoredRecord,
    /// `(index_name, token)` pairs to upsert
    pub index_entries: Vec<(String, BlindToken)>,
    /// Index names whose field is now null; their entries are removed
    pub cleared_indexes: Vec<String>,
}

/// One persisted blind index row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlindIndexEntry {
    /// Row id assigned by the store
    pub id: i64,
    /// Owning entity type
    pub entity_type: String,
    /// Owning entity id
    pub entity_id: String,
    /// Index name, e.g. `first_name_index`
    pub name: String,
    /// Token value
    pub value: BlindToken,
    /// First write
    pub created_at: DateTime<Utc>,
    /// Last write
    pub updated_at: DateTime<Utc>,
}
