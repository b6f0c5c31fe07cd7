//! stagemerge: a reconciliation and bulk-merge engine for multi-tenant
//! master data imports.
//!
//! Given a batch of externally supplied rows tagged with intended actions,
//! the engine computes the true delta against the tenant's stored entities,
//! allocates identifiers for new rows, resolves references between entities
//! created in the same batch, and loads the result through a staging + merge
//! protocol behind a single commit boundary.
//!
//! Rows arrive already parsed and schema-checked; transport, locking and
//! semantic validation live upstream.

pub mod engine;
pub mod shared;
pub mod store;

pub use engine::{
    EntityConfig, EntityType, FailureReason, Field, IdentifierField, ImportAction,
    ImportCoordinator, ImportRow, ImportSummary, PlainField, Record, ReferenceField, Scalar,
    StoredRecord, TableMergeStats, TypeHandler, ValidationFailure,
};
pub use shared::errors::{ImportError, ImportResult};
pub use shared::logger::init_logger;
pub use store::{Database, MergeOp, MergeStore, PgMergeStore, StateQuery, StoreConfig};
