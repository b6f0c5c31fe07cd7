use serde::Serialize;

use crate::engine::field::{Field, IdentifierField, PendingReference, ReferenceField};
use crate::shared::errors::{ImportError, ImportResult};

/// One persistable entity: an ordered collection of named slots.
///
/// The order of insertion is load-bearing; serialization walks the caller's
/// column list, and lookups are by name, so this is an explicit list of
/// pairs rather than a map.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportRow {
    fields: Vec<(String, Field)>,
}

impl ImportRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, field: impl Into<Field>) {
        self.fields.push((name.into(), field.into()));
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, f)| f)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, f)| f)
    }

    pub fn identifier_mut(&mut self, name: &str) -> ImportResult<&mut IdentifierField> {
        match self.field_mut(name) {
            Some(Field::Identifier(id)) => Ok(id),
            Some(_) => Err(ImportError::Configuration(format!(
                "Column '{}' is not an identifier slot",
                name
            ))),
            None => Err(ImportError::Configuration(format!(
                "Row has no column '{}'",
                name
            ))),
        }
    }

    /// All pending reference slots, with their column names.
    pub fn pending_references(&mut self) -> Vec<(&str, &mut ReferenceField)> {
        self.fields
            .iter_mut()
            .filter_map(|(name, field)| match field {
                Field::Reference(r) if r.as_pending().is_some() => {
                    Some((name.as_str(), r))
                }
                _ => None,
            })
            .collect()
    }

    /// Immutable view of the pending reference slots.
    pub fn pending_refs(&self) -> impl Iterator<Item = (&str, &PendingReference)> {
        self.fields.iter().filter_map(|(name, field)| match field {
            Field::Reference(r) => r.as_pending().map(|p| (name.as_str(), p)),
            _ => None,
        })
    }

    /// Text form of one named slot. Fails on unresolved slots; a missing
    /// column is a configuration error.
    pub fn text(&self, name: &str) -> ImportResult<Option<String>> {
        match self.field(name) {
            Some(field) => field.text().map_err(|e| match e {
                ImportError::EmptyField(_) => ImportError::EmptyField(name.to_string()),
                other => other,
            }),
            None => Err(ImportError::Configuration(format!(
                "Row has no column '{}'",
                name
            ))),
        }
    }

    /// Delimited string form of the named columns, in the given order.
    /// Null values render as the store's null sentinel.
    pub fn serialize(
        &self,
        columns: &[String],
        delimiter: char,
        null_token: &str,
    ) -> ImportResult<String> {
        let mut parts = Vec::with_capacity(columns.len());
        for column in columns {
            let text = self.text(column)?;
            parts.push(text.unwrap_or_else(|| null_token.to_string()));
        }
        Ok(parts.join(&delimiter.to_string()))
    }
}
