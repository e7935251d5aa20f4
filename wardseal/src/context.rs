//! Field context used for key derivation and domain separation.

use std::fmt;

/// Joins entity type and field name in the context string. Schemas reject
/// names containing it.
pub const CONTEXT_SEPARATOR: char = '|';

/// Identifies one field of one entity type.
///
/// The context ensures that:
/// - Different entity types produce different keys and tokens
/// - Different fields of the same entity produce different keys and tokens
/// - A ciphertext moved to another field fails authentication
///
/// # Example
///
/// ```
/// use wardseal::context::FieldContext;
///
/// let ctx = FieldContext::new("Patient", "first_name");
/// assert_eq!(ctx.to_string(), "Patient|first_name");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldContext {
    entity_type: String,
    field_name: String,
}

impl FieldContext {
    /// Creates a new field context.
    ///
    /// # Arguments
    ///
    /// * `entity_type` - Logical record kind (e.g. `Patient`)
    /// * `field_name` - Field name on that record
    #[must_use]
    pub fn new(entity_type: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self { entity_type: entity_type.into(), field_name: field_name.into() }
    }

    /// Returns the entity type.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Returns the field name.
    #[must_use]
    pub fn field_name(&self) -> &str {
        &self.field_name
    }
}

impl fmt::Display for FieldContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{CONTEXT_SEPARATOR}{}", self.entity_type, self.field_name)
    }
}
