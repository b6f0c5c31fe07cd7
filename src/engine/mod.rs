pub mod coordinator;
pub mod entity;
pub mod field;
pub mod handler;
pub mod row;
pub mod value;

#[cfg(test)]
pub(crate) mod testkit;

// Re-export main types for public API
pub use coordinator::{ImportCoordinator, ImportSummary, TableMergeStats};
pub use entity::{EntityConfig, EntityType};
pub use field::{Field, IdentifierField, PendingReference, PlainField, ReferenceField};
pub use handler::{FailureReason, ImportAction, TypeHandler, ValidationFailure};
pub use row::ImportRow;
pub use value::{Record, Scalar, StoredRecord};
