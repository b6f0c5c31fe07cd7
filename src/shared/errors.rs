use serde::Serialize;
use thiserror::Error;

use crate::engine::handler::ValidationFailure;

pub type ImportResult<T> = Result<T, ImportError>;

#[derive(Error, Debug, Serialize)]
#[serde(tag = "type", content = "detail")]
pub enum ImportError {
    /// A field or entity type was misconstructed. Programmer/schema error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization was attempted on a slot that was never allocated or
    /// resolved. Indicates a missing allocate/resolve call before merge.
    #[error("Field '{0}' has no value yet")]
    EmptyField(String),

    /// Reconciliation mismatches collected for one entity type. The whole
    /// batch for that type is rejected before any write.
    #[error("Validation failed with {} error(s)", .0.len())]
    Validation(Vec<ValidationFailure>),

    /// A cross-entity reference could not be matched. Fatal for the job.
    #[error("Unresolved reference of kind '{kind}': {detail}")]
    ReferenceResolution { kind: String, detail: String },

    /// A store-side query produced something the engine cannot use.
    #[error("Store query error: {0}")]
    Query(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<diesel::result::Error> for ImportError {
    fn from(err: diesel::result::Error) -> Self {
        ImportError::Database(err.to_string())
    }
}

impl From<diesel::r2d2::PoolError> for ImportError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        ImportError::Database(format!("Database pool error: {}", err))
    }
}

impl From<std::env::VarError> for ImportError {
    fn from(err: std::env::VarError) -> Self {
        ImportError::Configuration(format!("Missing environment variable: {}", err))
    }
}

impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        ImportError::Query(format!("Row decode error: {}", err))
    }
}
