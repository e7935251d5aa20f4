//! Static per-entity field configuration.
//!
//! A [`SchemaRegistry`] maps each entity type to the fields that are stored
//! encrypted and the subset that also carries a blind index. It is built once
//! at startup, in code or from JSON, and then only read.
//!
//! ```json
//! {
//!   "entities": [
//!     {
//!       "entity_type": "Patient",
//!       "fields": [
//!         { "name": "first_name", "encrypted": true, "indexed": true },
//!         { "name": "email", "encrypted": true, "indexed": true, "normalize": "case_fold" },
//!         { "name": "medical_history", "encrypted": true },
//!         { "name": "room_id" }
//!       ]
//!     }
//!   ]
//! }
//! ```

use crate::blind_index::{Normalization, DEFAULT_INDEX_BYTES, INDEX_BYTES_RANGE};
use crate::context::CONTEXT_SEPARATOR;
use crate::error::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const fn default_index_bytes() -> usize {
    DEFAULT_INDEX_BYTES
}

/// How one field is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    name: String,
    #[serde(default)]
    encrypted: bool,
    #[serde(default)]
    indexed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    index_name: Option<String>,
    #[serde(default)]
    normalize: Normalization,
    #[serde(default = "default_index_bytes")]
    index_bytes: usize,
}

impl FieldSpec {
    fn base(name: impl Into<String>, encrypted: bool, indexed: bool) -> Self {
        Self {
            name: name.into(),
            encrypted,
            indexed,
            index_name: None,
            normalize: Normalization::Exact,
            index_bytes: DEFAULT_INDEX_BYTES,
        }
    }

    /// A field stored as-is.
    #[must_use]
    pub fn plain(name: impl Into<String>) -> Self {
        Self::base(name, false, false)
    }

    /// A field stored encrypted, without a blind index.
    #[must_use]
    pub fn encrypted(name: impl Into<String>) -> Self {
        Self::base(name, true, false)
    }

    /// A field stored encrypted with a blind index.
    #[must_use]
    pub fn indexed(name: impl Into<String>) -> Self {
        Self::base(name, true, true)
    }

    /// Overrides the index name (default `<field>_index`).
    #[must_use]
    pub fn with_index_name(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    /// Sets the normalization applied before indexing.
    #[must_use]
    pub const fn with_normalization(mut self, normalize: Normalization) -> Self {
        self.normalize = normalize;
        self
    }

    /// Sets the blind index width in bytes.
    #[must_use]
    pub const fn with_index_bytes(mut self, index_bytes: usize) -> Self {
        self.index_bytes = index_bytes;
        self
    }

    /// Returns the field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the field is stored encrypted.
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Whether the field carries a blind index.
    #[must_use]
    pub const fn is_indexed(&self) -> bool {
        self.indexed
    }

    /// Returns the index name for indexed fields.
    #[must_use]
    pub fn index_name(&self) -> Option<&str> {
        if self.indexed {
            self.index_name.as_deref()
        } else {
            None
        }
    }

    /// Returns the normalization used for indexing and confirmation.
    #[must_use]
    pub const fn normalization(&self) -> Normalization {
        self.normalize
    }

    /// Returns the blind index width in bytes.
    #[must_use]
    pub const fn index_bytes(&self) -> usize {
        self.index_bytes
    }
}

/// Field configuration of one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitySchema {
    entity_type: String,
    fields: Vec<FieldSpec>,
}

#[derive(Deserialize)]
struct EntitySchemaDef {
    entity_type: String,
    fields: Vec<FieldSpec>,
}

#[derive(Deserialize)]
struct RegistryDef {
    entities: Vec<EntitySchemaDef>,
}

impl EntitySchema {
    /// Validates and builds an entity schema.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::Invalid` if a name is empty or contains `|`, a
    /// field is indexed but not encrypted, a field or index name repeats, or
    /// an index width is out of range.
    pub fn new(
        entity_type: impl Into<String>,
        fields: Vec<FieldSpec>,
    ) -> Result<Self, SchemaError> {
        let entity_type = entity_type.into();
        let invalid = |reason: String| SchemaError::Invalid {
            entity_type: entity_type.clone(),
            reason,
        };

        if entity_type.is_empty() {
            return Err(invalid("entity type is empty".to_string()));
        }
        if entity_type.contains(CONTEXT_SEPARATOR) {
            return Err(invalid(format!("entity type contains `{CONTEXT_SEPARATOR}`")));
        }

        let mut names = BTreeSet::new();
        let mut index_names = BTreeSet::new();
        let mut resolved = Vec::with_capacity(fields.len());

        for mut field in fields {
            if field.name.is_empty() {
                return Err(invalid("field name is empty".to_string()));
            }
            if field.name.contains(CONTEXT_SEPARATOR) {
                return Err(invalid(format!(
                    "field `{}` contains `{CONTEXT_SEPARATOR}`",
                    field.name
                )));
            }
            if !names.insert(field.name.clone()) {
                return Err(invalid(format!("field `{}` declared twice", field.name)));
            }
            if field.indexed {
                if !field.encrypted {
                    return Err(invalid(format!(
                        "field `{}` is indexed but not encrypted",
                        field.name
                    )));
                }
                if !INDEX_BYTES_RANGE.contains(&field.index_bytes) {
                    return Err(invalid(format!(
                        "field `{}` index width {} outside {}..={}",
                        field.name,
                        field.index_bytes,
                        INDEX_BYTES_RANGE.start(),
                        INDEX_BYTES_RANGE.end()
                    )));
                }
                let index_name =
                    field.index_name.take().unwrap_or_else(|| format!("{}_index", field.name));
                if !index_names.insert(index_name.clone()) {
                    return Err(invalid(format!("index `{index_name}` declared twice")));
                }
                field.index_name = Some(index_name);
            } else {
                field.index_name = None;
            }
            resolved.push(field);
        }

        Ok(Self { entity_type, fields: resolved })
    }

    /// Returns the entity type.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Returns all configured fields.
    #[must_use]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Looks a field up by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns the fields carrying a blind index.
    pub fn indexed_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.indexed)
    }

    /// Looks up an indexed field, failing with a schema error otherwise.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::UnknownField` or `SchemaError::NotIndexed`.
    pub fn indexed_field(&self, name: &str) -> Result<&FieldSpec, SchemaError> {
        let field = self.field(name).ok_or_else(|| SchemaError::UnknownField {
            entity_type: self.entity_type.clone(),
            field: name.to_string(),
        })?;
        if !field.indexed {
            return Err(SchemaError::NotIndexed {
                entity_type: self.entity_type.clone(),
                field: name.to_string(),
            });
        }
        Ok(field)
    }
}

/// All entity schemas known to the process.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    entities: BTreeMap<String, EntitySchema>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity schema.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::Invalid` if the entity type is already registered.
    pub fn register(&mut self, schema: EntitySchema) -> Result<(), SchemaError> {
        if self.entities.contains_key(schema.entity_type()) {
            return Err(SchemaError::Invalid {
                entity_type: schema.entity_type.clone(),
                reason: "entity type registered twice".to_string(),
            });
        }
        self.entities.insert(schema.entity_type.clone(), schema);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::Invalid` if the entity type is already registered.
    pub fn with_entity(mut self, schema: EntitySchema) -> Result<Self, SchemaError> {
        self.register(schema)?;
        Ok(self)
    }

    /// Parses and validates a registry from JSON.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::Parse` for malformed JSON and
    /// `SchemaError::Invalid` for an invalid entity definition.
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        let def: RegistryDef = serde_json::from_str(json)?;
        let mut registry = Self::new();
        for entity in def.entities {
            registry.register(EntitySchema::new(entity.entity_type, entity.fields)?)?;
        }
        Ok(registry)
    }

    /// Looks an entity schema up.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::UnknownEntityType` if none is registered.
    pub fn entity(&self, entity_type: &str) -> Result<&EntitySchema, SchemaError> {
        self.entities
            .get(entity_type)
            .ok_or_else(|| SchemaError::UnknownEntityType(entity_type.to_string()))
    }

    /// Iterates over registered entity types.
    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }
}
