use log::{debug, info};
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize the logging system.
/// This should be called once at application startup.
pub fn init_logger() {
    INIT.call_once(|| {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info) // Default level
            .filter_module("stagemerge", log::LevelFilter::Debug) // More verbose for our crate
            .filter_module("diesel", log::LevelFilter::Warn) // Reduce diesel noise
            .format_timestamp_secs()
            .format_target(false)
            .format_module_path(false)
            .init();

        info!("Logging system initialized");
    });
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        log::info!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        log::debug!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        log::warn!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        log::error!($($arg)*)
    };
}

/// Structured logging helpers for common patterns
pub struct LogContext;

impl LogContext {
    /// Log staging/merge operations against one table
    pub fn merge_operation(operation: &str, table: &str, rows: usize) {
        info!("Merge: {} on {} ({} rows)", operation, table, rows);
    }

    /// Log reconciliation milestones per entity type
    pub fn reconcile_result(table: &str, inserts: usize, updates: usize, deletes: usize) {
        info!(
            "Reconcile: {} -> {} insert(s), {} update(s), {} delete(s)",
            table, inserts, updates, deletes
        );
    }

    /// Log errors with additional context
    pub fn error_with_context(error: &dyn std::fmt::Display, context: &str) {
        log::error!("{}: {}", context, error);
    }
}

/// Timed operation logger: logs the duration when finished or dropped.
pub struct TimedOperation {
    name: &'static str,
    start: std::time::Instant,
    finished: bool,
}

impl TimedOperation {
    pub fn new(name: &'static str) -> Self {
        debug!("Starting {}", name);
        Self {
            name,
            start: std::time::Instant::now(),
            finished: false,
        }
    }

    pub fn finish(mut self) {
        self.finished = true;
        info!(
            "{} completed in {}ms",
            self.name,
            self.start.elapsed().as_millis()
        );
    }
}

impl Drop for TimedOperation {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                "{} finished in {}ms",
                self.name,
                self.start.elapsed().as_millis()
            );
        }
    }
}
