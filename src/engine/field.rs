use serde::Serialize;

use crate::engine::value::{Record, Scalar, StoredRecord};
use crate::shared::errors::{ImportError, ImportResult};

/// A column value with a fallback chain: value, else original value, else
/// default. Immutable after construction.
#[derive(Debug, Clone, Serialize)]
pub struct PlainField {
    mandatory: bool,
    default: Option<Scalar>,
    value: Option<Scalar>,
    original_value: Option<Scalar>,
}

impl PlainField {
    pub fn new(
        mandatory: bool,
        default: Option<Scalar>,
        value: Option<Scalar>,
        original_value: Option<Scalar>,
    ) -> ImportResult<Self> {
        if default.is_none() && value.is_none() && original_value.is_none() {
            return Err(ImportError::Configuration(
                "Plain field needs a value, an original value or a default".to_string(),
            ));
        }
        if mandatory && value.is_none() {
            return Err(ImportError::Configuration(
                "Mandatory plain field constructed without a value".to_string(),
            ));
        }
        Ok(Self {
            mandatory,
            default,
            value,
            original_value,
        })
    }

    /// The incoming -> stored -> default chain used by row constructors:
    /// take the incoming column if the batch supplied it, fall back to the
    /// stored snapshot, else rely on the default.
    pub fn from_sources(
        incoming: Option<&Record>,
        existing: Option<&StoredRecord>,
        column: &str,
        mandatory: bool,
        default: Option<Scalar>,
    ) -> ImportResult<Self> {
        let value = incoming.and_then(|r| r.get(column)).cloned();
        let original = existing.and_then(|r| r.columns.get(column)).cloned();
        Self::new(mandatory, default, value, original)
    }

    pub fn text(&self) -> Option<String> {
        self.value
            .as_ref()
            .or(self.original_value.as_ref())
            .or(self.default.as_ref())
            .and_then(Scalar::to_text)
    }

    pub const fn is_mandatory(&self) -> bool {
        self.mandatory
    }
}

/// A deferred or known primary key. Assigned exactly once by allocation.
#[derive(Debug, Clone, Serialize)]
pub struct IdentifierField {
    value: Option<i64>,
}

impl IdentifierField {
    /// An identifier for a row that does not exist yet.
    pub const fn pending() -> Self {
        Self { value: None }
    }

    /// An identifier known from the stored snapshot.
    pub const fn known(id: i64) -> Self {
        Self { value: Some(id) }
    }

    pub const fn is_pending(&self) -> bool {
        self.value.is_none()
    }

    pub fn set(&mut self, id: i64) -> ImportResult<()> {
        if let Some(current) = self.value {
            return Err(ImportError::Configuration(format!(
                "Identifier already assigned ({}), refusing to overwrite with {}",
                current, id
            )));
        }
        self.value = Some(id);
        Ok(())
    }

    pub const fn get(&self) -> Option<i64> {
        self.value
    }

    pub fn text(&self) -> ImportResult<Option<String>> {
        match self.value {
            Some(id) => Ok(Some(id.to_string())),
            None => Err(ImportError::EmptyField("identifier".to_string())),
        }
    }
}

/// The resolution parameters of a pending foreign key: which kind of entity
/// it points at, which field of the matched row to copy, and the natural-key
/// column/value pairs used to find that row.
#[derive(Debug, Clone, Serialize)]
pub struct PendingReference {
    pub kind: String,
    pub source_field: String,
    pub key: Vec<(String, Scalar)>,
}

/// A deferred or known foreign key. Resolved exactly once by the coordinator.
#[derive(Debug, Clone, Serialize)]
pub enum ReferenceField {
    Resolved(Scalar),
    Pending(PendingReference),
}

impl ReferenceField {
    /// A reference whose target is already known (e.g. an entity that
    /// existed before this batch).
    pub const fn direct(value: Scalar) -> Self {
        ReferenceField::Resolved(value)
    }

    /// A reference to an entity created in the same batch, to be resolved
    /// once the referenced type has allocated identifiers.
    pub fn pending(
        kind: impl Into<String>,
        source_field: impl Into<String>,
        key: Vec<(String, Scalar)>,
    ) -> ImportResult<Self> {
        let kind = kind.into();
        let source_field = source_field.into();
        if kind.is_empty() || source_field.is_empty() || key.is_empty() {
            return Err(ImportError::Configuration(
                "Pending reference needs a kind, a source field and at least one key pair"
                    .to_string(),
            ));
        }
        Ok(ReferenceField::Pending(PendingReference {
            kind,
            source_field,
            key,
        }))
    }

    pub const fn as_pending(&self) -> Option<&PendingReference> {
        match self {
            ReferenceField::Pending(p) => Some(p),
            ReferenceField::Resolved(_) => None,
        }
    }

    /// Copy the matched row's source-field value in. Resolving twice is a
    /// programmer error.
    pub fn resolve(&mut self, value: Scalar) -> ImportResult<()> {
        match self {
            ReferenceField::Resolved(_) => Err(ImportError::Configuration(
                "Reference already resolved".to_string(),
            )),
            ReferenceField::Pending(_) => {
                *self = ReferenceField::Resolved(value);
                Ok(())
            }
        }
    }

    pub fn text(&self) -> ImportResult<Option<String>> {
        match self {
            ReferenceField::Resolved(value) => Ok(value.to_text()),
            ReferenceField::Pending(p) => Err(ImportError::EmptyField(format!(
                "reference[{}]",
                p.kind
            ))),
        }
    }
}

/// One typed value slot of an import row.
#[derive(Debug, Clone, Serialize)]
pub enum Field {
    Plain(PlainField),
    Identifier(IdentifierField),
    Reference(ReferenceField),
}

impl Field {
    /// Text form for serialization. `Ok(None)` is a null value; unresolved
    /// identifier and reference slots fail instead of leaking placeholders.
    pub fn text(&self) -> ImportResult<Option<String>> {
        match self {
            Field::Plain(f) => Ok(f.text()),
            Field::Identifier(f) => f.text(),
            Field::Reference(f) => f.text(),
        }
    }
}

impl From<PlainField> for Field {
    fn from(f: PlainField) -> Self {
        Field::Plain(f)
    }
}

impl From<IdentifierField> for Field {
    fn from(f: IdentifierField) -> Self {
        Field::Identifier(f)
    }
}

impl From<ReferenceField> for Field {
    fn from(f: ReferenceField) -> Self {
        Field::Reference(f)
    }
}
