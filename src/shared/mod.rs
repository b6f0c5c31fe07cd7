pub mod errors;
pub mod logger;

pub use errors::{ImportError, ImportResult};
pub use logger::{init_logger, LogContext, TimedOperation};
