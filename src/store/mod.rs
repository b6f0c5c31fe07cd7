pub mod postgres;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::engine::value::StoredRecord;
use crate::shared::errors::ImportResult;

pub use postgres::{Database, PgMergeStore, StoreConfig};

/// Delimiter between column values in a bulk-loaded row.
pub const FIELD_DELIMITER: char = '\t';

/// Sentinel token standing in for a null column value.
pub const NULL_TOKEN: &str = "/N";

/// The two staging operation kinds. Deletes are folded into updates
/// (alive -> false), never applied as physical deletions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MergeOp {
    Insert,
    Update,
}

impl MergeOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            MergeOp::Insert => "INSERT",
            MergeOp::Update => "UPDATE",
        }
    }
}

impl std::fmt::Display for MergeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column names for a current-state fetch, plus the tenant scope.
#[derive(Debug, Clone)]
pub struct StateQuery {
    pub id_column: String,
    pub natural_key_column: String,
    pub alive_column: String,
    pub tenant_column: String,
    pub tenant_id: i64,
}

/// Store-side primitives the engine requires. One implementation handle is
/// scoped to one import job and carries that job's connection/transaction;
/// every staging and merge call for the job goes through the same handle.
#[cfg_attr(test, mockall::automock)]
pub trait MergeStore {
    /// Reserve `count` fresh identifiers from a sequence. Atomic with
    /// respect to concurrent jobs sharing the sequence.
    fn reserve_sequence_values(
        &mut self,
        schema: &str,
        sequence: &str,
        count: usize,
    ) -> ImportResult<Vec<i64>>;

    /// An opaque id grouping one merge's staging relations.
    fn next_merge_run_id(&mut self) -> ImportResult<i64>;

    /// Create the staging relations for the requested operation kinds and
    /// return their names per kind.
    fn create_staging_relations(
        &mut self,
        schema: &str,
        table: &str,
        run_id: i64,
        ops: &[MergeOp],
        update_columns: &[String],
    ) -> ImportResult<HashMap<MergeOp, String>>;

    /// Bulk-load serialized rows into a staging relation. Null values use
    /// the given sentinel token.
    fn bulk_load(
        &mut self,
        relation: &str,
        columns: &[String],
        rows: &[String],
        delimiter: char,
        null_token: &str,
    ) -> ImportResult<u64>;

    /// Apply staged contents into the destination table; deletes are
    /// applied as alive=false updates. Returns per-kind row counts.
    fn merge(
        &mut self,
        schema: &str,
        table: &str,
        run_id: i64,
        dry_run: bool,
    ) -> ImportResult<HashMap<MergeOp, u64>>;

    /// Fetch the tenant's current state of one table for reconciliation.
    fn fetch_state(
        &mut self,
        schema: &str,
        table: &str,
        query: &StateQuery,
    ) -> ImportResult<Vec<StoredRecord>>;

    fn begin(&mut self) -> ImportResult<()>;
    fn commit(&mut self) -> ImportResult<()>;
    fn rollback(&mut self) -> ImportResult<()>;
}
