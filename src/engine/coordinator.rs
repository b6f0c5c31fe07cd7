use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::engine::entity::EntityType;
use crate::engine::handler::TypeHandler;
use crate::engine::row::ImportRow;
use crate::engine::value::{Record, Scalar};
use crate::shared::errors::{ImportError, ImportResult};
use crate::shared::logger::{LogContext, TimedOperation};
use crate::store::{MergeOp, MergeStore, FIELD_DELIMITER, NULL_TOKEN};
use crate::{log_debug, log_info};

/// Per-table outcome of one merged job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableMergeStats {
    pub table: String,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub errors: usize,
}

/// Outcome of a fully merged job. Either this exists, or the job was not
/// applied at all; there is no partially committed state.
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub job_id: Uuid,
    pub tenant_id: i64,
    pub schema: String,
    /// False for dry runs, which roll back after reporting counts.
    pub applied: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tables: Vec<TableMergeStats>,
}

/// Orchestration for one import job: a registration-ordered list of type
/// handlers, identifier allocation, cross-entity reference resolution, and
/// the staging + merge protocol behind a single commit boundary.
///
/// The store handle is scoped to this job; `save` consumes the coordinator,
/// so one instance can never merge twice.
pub struct ImportCoordinator<S: MergeStore> {
    store: S,
    schema: String,
    tenant_id: i64,
    job_id: Uuid,
    dry_run: bool,
    started_at: DateTime<Utc>,
    handlers: Vec<TypeHandler>,
}

impl<S: MergeStore> ImportCoordinator<S> {
    pub fn new(store: S, schema: impl Into<String>, tenant_id: i64) -> Self {
        let job_id = Uuid::new_v4();
        let schema = schema.into();
        log_info!(
            "Import job {} started for tenant {} in schema {}",
            job_id,
            tenant_id,
            schema
        );
        Self {
            store,
            schema,
            tenant_id,
            job_id,
            dry_run: false,
            started_at: Utc::now(),
            handlers: Vec::new(),
        }
    }

    /// Run the full protocol but roll back instead of committing.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub const fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Reconcile one entity type's batch and allocate identifiers for its
    /// new rows. Referenced entity types must be registered before their
    /// dependents; merges later run in registration order.
    pub fn register(
        &mut self,
        entity: Arc<dyn EntityType>,
        batch: Vec<Record>,
    ) -> ImportResult<()> {
        let timer = TimedOperation::new("register_entity_type");
        let table = entity.config().table.clone();
        log_debug!(
            "Job {}: registering {} with {} incoming row(s)",
            self.job_id,
            table,
            batch.len()
        );

        let existing = entity.fetch_current(&mut self.store, &self.schema, self.tenant_id)?;
        let mut handler = TypeHandler::reconcile(entity, self.tenant_id, batch, existing)?;
        self.allocate_ids(&mut handler)?;

        self.handlers.push(handler);
        timer.finish();
        Ok(())
    }

    /// Reserve one contiguous block of fresh identifiers for the insert
    /// bucket and assign them in row order. Runs after the bucket split is
    /// final and before any reference resolution that depends on these ids.
    fn allocate_ids(&mut self, handler: &mut TypeHandler) -> ImportResult<()> {
        let needed = handler.inserts.len();
        if needed == 0 {
            return Ok(());
        }
        let (sequence, id_column) = {
            let cfg = handler.config();
            (cfg.sequence.clone(), cfg.id_column.clone())
        };

        let ids = self
            .store
            .reserve_sequence_values(&self.schema, &sequence, needed)?;
        if ids.len() != needed {
            return Err(ImportError::Query(format!(
                "Sequence {} returned {} id(s), needed {}",
                sequence,
                ids.len(),
                needed
            )));
        }

        for (row, id) in handler.inserts.iter_mut().zip(ids) {
            row.identifier_mut(&id_column)?.set(id)?;
        }
        log_debug!(
            "Job {}: allocated {} identifier(s) from {}",
            self.job_id,
            needed,
            sequence
        );
        Ok(())
    }

    /// Resolve every pending reference slot of `kind` across all insert
    /// buckets against the rows of the handler that provides that kind.
    /// Order-independent across kinds once the referenced types are
    /// allocated; a missing match fails the whole job.
    pub fn resolve_references(&mut self, kind: &str) -> ImportResult<()> {
        let provider_idx = self
            .handlers
            .iter()
            .position(|h| h.config().provides_kind.as_deref() == Some(kind))
            .ok_or_else(|| ImportError::ReferenceResolution {
                kind: kind.to_string(),
                detail: "no registered entity type provides this kind".to_string(),
            })?;

        // Columns the pending slots of this kind will look at.
        let mut needed: BTreeSet<String> = BTreeSet::new();
        for handler in &self.handlers {
            for row in handler.inserts() {
                for (_, pending) in row.pending_refs().filter(|(_, p)| p.kind == kind) {
                    needed.insert(pending.source_field.clone());
                    for (column, _) in &pending.key {
                        needed.insert(column.clone());
                    }
                }
            }
        }
        if needed.is_empty() {
            return Ok(());
        }

        // Snapshot the provider's referenceable rows (inserts and updates,
        // all with resolved identifiers by now) into plain text tuples so
        // the mutating pass below cannot alias them.
        let provider = &self.handlers[provider_idx];
        let mut snapshot: Vec<HashMap<String, Option<String>>> = Vec::new();
        for row in provider.inserts().iter().chain(provider.updates()) {
            let mut columns = HashMap::new();
            for column in &needed {
                if row.field(column).is_some() {
                    columns.insert(column.clone(), row.text(column)?);
                }
            }
            snapshot.push(columns);
        }

        // One lookup table per distinct key-column list; first match wins.
        let mut lookups: HashMap<Vec<String>, HashMap<Vec<Option<String>>, usize>> =
            HashMap::new();
        let mut resolved = 0usize;

        for handler in &mut self.handlers {
            let table = handler.config().table.clone();
            for row in &mut handler.inserts {
                for (column, slot) in row.pending_references() {
                    let Some(pending) = slot.as_pending() else {
                        continue;
                    };
                    if pending.kind != kind {
                        continue;
                    }
                    let key_columns: Vec<String> =
                        pending.key.iter().map(|(c, _)| c.clone()).collect();
                    let key_values: Vec<Option<String>> =
                        pending.key.iter().map(|(_, v)| v.to_text()).collect();
                    let source_field = pending.source_field.clone();

                    let lookup = lookups.entry(key_columns.clone()).or_insert_with(|| {
                        let mut map = HashMap::new();
                        for (idx, columns) in snapshot.iter().enumerate() {
                            if key_columns.iter().all(|c| columns.contains_key(c)) {
                                let tuple: Vec<Option<String>> = key_columns
                                    .iter()
                                    .map(|c| columns[c].clone())
                                    .collect();
                                map.entry(tuple).or_insert(idx);
                            }
                        }
                        map
                    });

                    let Some(&idx) = lookup.get(&key_values) else {
                        return Err(ImportError::ReferenceResolution {
                            kind: kind.to_string(),
                            detail: format!(
                                "{}.{}: no referenced row matches key {:?}",
                                table, column, key_values
                            ),
                        });
                    };
                    // A matched row without the source column is a
                    // misconfigured provider, not a null foreign key.
                    let value = match snapshot[idx].get(&source_field) {
                        Some(Some(text)) => Scalar::Text(text.clone()),
                        Some(None) => Scalar::Null,
                        None => {
                            return Err(ImportError::Configuration(format!(
                                "Referenced '{}' row has no '{}' column to resolve {}.{}",
                                kind, source_field, table, column
                            )));
                        }
                    };
                    slot.resolve(value)?;
                    resolved += 1;
                }
            }
        }

        log_debug!(
            "Job {}: resolved {} reference(s) of kind '{}'",
            self.job_id,
            resolved,
            kind
        );
        Ok(())
    }

    /// Every reference kind still pending across all insert buckets.
    fn pending_kinds(&self) -> BTreeSet<String> {
        let mut kinds = BTreeSet::new();
        for handler in &self.handlers {
            for row in handler.inserts() {
                for (_, pending) in row.pending_refs() {
                    kinds.insert(pending.kind.clone());
                }
            }
        }
        kinds
    }

    /// Stage and merge every registered handler in registration order, then
    /// commit once. Any failure rolls the whole job back uncommitted;
    /// reference resolution runs first so a missing match can never leave a
    /// table already merged.
    pub fn save(mut self) -> ImportResult<ImportSummary> {
        let timer = TimedOperation::new("import_job_save");

        for kind in self.pending_kinds() {
            self.resolve_references(&kind)?;
        }

        self.store.begin()?;
        match self.merge_all() {
            Ok(tables) => {
                if self.dry_run {
                    self.store.rollback()?;
                    log_info!("Job {}: dry run complete, rolled back", self.job_id);
                } else {
                    self.store.commit()?;
                }
                let summary = ImportSummary {
                    job_id: self.job_id,
                    tenant_id: self.tenant_id,
                    schema: self.schema,
                    applied: !self.dry_run,
                    started_at: self.started_at,
                    finished_at: Utc::now(),
                    tables,
                };
                log_info!(
                    "Job {} merged {} table(s) for tenant {}",
                    summary.job_id,
                    summary.tables.len(),
                    summary.tenant_id
                );
                timer.finish();
                Ok(summary)
            }
            Err(err) => {
                // Best-effort rollback; the original failure is what matters.
                if let Err(rollback_err) = self.store.rollback() {
                    LogContext::error_with_context(&rollback_err, "Rollback failed");
                }
                LogContext::error_with_context(&err, "Import job aborted, nothing applied");
                Err(err)
            }
        }
    }

    fn merge_all(&mut self) -> ImportResult<Vec<TableMergeStats>> {
        let Self {
            store,
            schema,
            dry_run,
            handlers,
            ..
        } = self;
        handlers
            .iter()
            .map(|handler| Self::merge_handler(store, schema, *dry_run, handler))
            .collect()
    }

    /// One table's staging + merge round trip: derive the operation kinds
    /// from the non-empty buckets (deletes travel as alive=false updates),
    /// bulk-load the staging relations and invoke the store-side merge.
    fn merge_handler(
        store: &mut S,
        schema: &str,
        dry_run: bool,
        handler: &TypeHandler,
    ) -> ImportResult<TableMergeStats> {
        let cfg = handler.config();
        let stats = TableMergeStats {
            table: cfg.table.clone(),
            inserted: handler.inserts().len(),
            updated: handler.updates().len(),
            deleted: handler.deletes().len(),
            errors: 0,
        };

        let mut ops = Vec::new();
        if !handler.inserts().is_empty() {
            ops.push(MergeOp::Insert);
        }
        if !handler.updates().is_empty() || !handler.deletes().is_empty() {
            ops.push(MergeOp::Update);
        }
        if ops.is_empty() {
            log_debug!("Nothing to merge for {}", cfg.table);
            return Ok(stats);
        }

        let run_id = store.next_merge_run_id()?;
        let staging =
            store.create_staging_relations(schema, &cfg.table, run_id, &ops, &cfg.update_columns)?;

        for op in &ops {
            let relation = staging.get(op).ok_or_else(|| {
                ImportError::Query(format!(
                    "Store returned no {} staging relation for {}",
                    op, cfg.table
                ))
            })?;
            let (rows, columns) = match op {
                MergeOp::Insert => (
                    serialize_bucket(handler.inserts(), &cfg.insert_columns)?,
                    &cfg.insert_columns,
                ),
                MergeOp::Update => {
                    let mut rows =
                        serialize_bucket(handler.updates(), &cfg.update_columns)?;
                    rows.extend(serialize_bucket(handler.deletes(), &cfg.update_columns)?);
                    (rows, &cfg.update_columns)
                }
            };
            store.bulk_load(relation, columns, &rows, FIELD_DELIMITER, NULL_TOKEN)?;
            LogContext::merge_operation(op.as_str(), &cfg.table, rows.len());
        }

        let counts = store.merge(schema, &cfg.table, run_id, dry_run)?;
        log_debug!("Store merge counts for {}: {:?}", cfg.table, counts);
        Ok(stats)
    }
}

fn serialize_bucket(rows: &[ImportRow], columns: &[String]) -> ImportResult<Vec<String>> {
    rows.iter()
        .map(|row| row.serialize(columns, FIELD_DELIMITER, NULL_TOKEN))
        .collect()
}
