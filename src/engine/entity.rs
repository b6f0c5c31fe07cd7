use crate::engine::row::ImportRow;
use crate::engine::value::{Record, StoredRecord};
use crate::shared::errors::ImportResult;
use crate::store::{MergeStore, StateQuery};

/// Per-entity-type configuration: table and sequence names, the field names
/// reconciliation keys on, and the column lists used for staging.
#[derive(Debug, Clone)]
pub struct EntityConfig {
    /// Destination table name (unqualified; the coordinator owns the schema).
    pub table: String,
    /// Sequence new identifiers are reserved from.
    pub sequence: String,
    /// Incoming-record field carrying the stringified action code.
    pub action_field: String,
    /// Incoming-record field carrying the natural key.
    pub external_id_field: String,
    /// Incoming-record field carrying a human-readable label for error
    /// reporting.
    pub caption_field: String,
    /// Identifier slot name in built rows.
    pub id_column: String,
    /// Soft-delete column in the destination table.
    pub alive_column: String,
    /// Tenant scoping column in the destination table.
    pub tenant_column: String,
    /// Columns bulk-loaded into the insert staging relation, in order.
    pub insert_columns: Vec<String>,
    /// Columns bulk-loaded into the update staging relation, in order.
    pub update_columns: Vec<String>,
    /// Reference kind that rows of this type satisfy, if any.
    pub provides_kind: Option<String>,
}

impl EntityConfig {
    /// Conventional configuration: `id`/`active`/`tenant_id` columns and
    /// `ext_id`/`name`/`action` record fields. Adjust fields directly where
    /// an entity deviates.
    pub fn new(table: impl Into<String>, sequence: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            sequence: sequence.into(),
            action_field: "action".to_string(),
            external_id_field: "ext_id".to_string(),
            caption_field: "name".to_string(),
            id_column: "id".to_string(),
            alive_column: "active".to_string(),
            tenant_column: "tenant_id".to_string(),
            insert_columns: Vec::new(),
            update_columns: Vec::new(),
            provides_kind: None,
        }
    }

    pub(crate) fn state_query(&self, tenant_id: i64) -> StateQuery {
        StateQuery {
            id_column: self.id_column.clone(),
            natural_key_column: self.external_id_field.clone(),
            alive_column: self.alive_column.clone(),
            tenant_column: self.tenant_column.clone(),
            tenant_id,
        }
    }
}

/// The only entity-specific code in the engine: a configuration value and a
/// row constructor. Everything else is generic over this trait.
pub trait EntityType: Send + Sync {
    fn config(&self) -> &EntityConfig;

    /// Build one persistable row from an incoming record, the stored
    /// snapshot, or both. Per field the constructor decides whether to take
    /// the incoming value, fall back to the stored value, or apply a
    /// default; `alive` is false for delete rows.
    fn build_row(
        &self,
        incoming: Option<&Record>,
        tenant_id: i64,
        alive: bool,
        existing: Option<&StoredRecord>,
    ) -> ImportResult<ImportRow>;

    /// Fetch the tenant's currently stored entities of this type. The
    /// default queries the store with the configured column names; override
    /// for types with a non-standard state shape.
    fn fetch_current(
        &self,
        store: &mut dyn MergeStore,
        schema: &str,
        tenant_id: i64,
    ) -> ImportResult<Vec<StoredRecord>> {
        let cfg = self.config();
        store.fetch_state(schema, &cfg.table, &cfg.state_query(tenant_id))
    }
}
