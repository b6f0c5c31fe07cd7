use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::entity::{EntityConfig, EntityType};
use crate::engine::row::ImportRow;
use crate::engine::value::{Record, Scalar, StoredRecord};
use crate::log_warn;
use crate::shared::errors::{ImportError, ImportResult};
use crate::shared::logger::LogContext;

/// Intended action of an incoming row, parsed from its stringified code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportAction {
    Create,
    Update,
    Delete,
    /// Reserved code: the batch is the complete, authoritative set for the
    /// tenant. Only meaningful as the batch mode, never per row.
    ReplaceAll,
}

impl ImportAction {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "1" => Some(ImportAction::Create),
            "2" => Some(ImportAction::Update),
            "3" => Some(ImportAction::Delete),
            "4" => Some(ImportAction::ReplaceAll),
            _ => None,
        }
    }

    pub const fn code(self) -> &'static str {
        match self {
            ImportAction::Create => "1",
            ImportAction::Update => "2",
            ImportAction::Delete => "3",
            ImportAction::ReplaceAll => "4",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// Delete of an entity that is not currently stored and alive.
    NotFound,
    /// The action code could not be parsed, or replace-all appeared mid-batch.
    InvalidAction,
    /// The incoming row carries no natural key.
    MissingKey,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::NotFound => f.write_str("not found"),
            FailureReason::InvalidAction => f.write_str("invalid action"),
            FailureReason::MissingKey => f.write_str("missing natural key"),
        }
    }
}

/// One rejected row. A handler surfaces all of these together, before any
/// write for its entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub row_id: String,
    pub reason: FailureReason,
    pub table: String,
    pub caption: String,
    pub action: ImportAction,
}

/// Per-entity-type reconciliation: the batch plus the stored snapshot,
/// resolved into insert/update/delete buckets. Built once per batch,
/// consumed by one merge.
pub struct TypeHandler {
    entity: Arc<dyn EntityType>,
    pub(crate) inserts: Vec<ImportRow>,
    pub(crate) updates: Vec<ImportRow>,
    pub(crate) deletes: Vec<ImportRow>,
}

impl TypeHandler {
    /// Compute the true delta of `batch` against `existing`.
    ///
    /// Mode is selected by the first row's action code: the replace-all code
    /// switches the whole batch to full-replace, anything else runs explicit
    /// per-row actions. Construction is atomic: any validation failure
    /// rejects the whole batch for this entity type.
    pub fn reconcile(
        entity: Arc<dyn EntityType>,
        tenant_id: i64,
        batch: Vec<Record>,
        existing: Vec<StoredRecord>,
    ) -> ImportResult<Self> {
        let cfg = entity.config().clone();

        let mut handler = Self {
            entity,
            inserts: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
        };

        if batch.is_empty() {
            return Ok(handler);
        }

        let full_replace = batch[0]
            .text(&cfg.action_field)
            .as_deref()
            .and_then(ImportAction::from_code)
            == Some(ImportAction::ReplaceAll);

        let alive: HashMap<String, &StoredRecord> = existing
            .iter()
            .filter(|r| r.alive)
            .map(|r| (r.natural_key.clone(), r))
            .collect();

        let failures = if full_replace {
            handler.reconcile_full_replace(&cfg, tenant_id, batch, &existing, &alive)?
        } else {
            handler.reconcile_explicit(&cfg, tenant_id, batch, &alive)?
        };

        if !failures.is_empty() {
            log_warn!(
                "Rejecting batch for {}: {} validation failure(s)",
                cfg.table,
                failures.len()
            );
            return Err(ImportError::Validation(failures));
        }

        LogContext::reconcile_result(
            &cfg.table,
            handler.inserts.len(),
            handler.updates.len(),
            handler.deletes.len(),
        );
        Ok(handler)
    }

    /// Full-replace: every row is create-or-update by natural key; alive
    /// existing rows absent from the batch become synthesized deletes.
    fn reconcile_full_replace(
        &mut self,
        cfg: &EntityConfig,
        tenant_id: i64,
        batch: Vec<Record>,
        existing: &[StoredRecord],
        alive: &HashMap<String, &StoredRecord>,
    ) -> ImportResult<Vec<ValidationFailure>> {
        let mut failures = Vec::new();
        let mut seen: HashSet<String> = HashSet::with_capacity(batch.len());

        for mut record in batch {
            let Some(key) = record.text(&cfg.external_id_field) else {
                failures.push(failure(
                    cfg,
                    &record,
                    FailureReason::MissingKey,
                    ImportAction::ReplaceAll,
                ));
                continue;
            };
            seen.insert(key.clone());

            match alive.get(&key) {
                Some(current) => {
                    record.set(&cfg.action_field, Scalar::from(ImportAction::Update.code()));
                    self.updates.push(self.entity.build_row(
                        Some(&record),
                        tenant_id,
                        true,
                        Some(current),
                    )?);
                }
                None => {
                    record.set(&cfg.action_field, Scalar::from(ImportAction::Create.code()));
                    self.inserts
                        .push(self.entity.build_row(Some(&record), tenant_id, true, None)?);
                }
            }
        }

        // Everything alive the batch did not mention is implicitly deleted.
        for current in existing.iter().filter(|r| r.alive) {
            if !seen.contains(&current.natural_key) {
                self.deletes
                    .push(self.entity.build_row(None, tenant_id, false, Some(current))?);
            }
        }

        Ok(failures)
    }

    /// Explicit per-row actions, with upsert correction: an update with no
    /// alive match becomes a create, a create with an alive match becomes an
    /// update, and a delete of a missing entity is a validation failure.
    fn reconcile_explicit(
        &mut self,
        cfg: &EntityConfig,
        tenant_id: i64,
        batch: Vec<Record>,
        alive: &HashMap<String, &StoredRecord>,
    ) -> ImportResult<Vec<ValidationFailure>> {
        let mut failures = Vec::new();

        for mut record in batch {
            let action = record
                .text(&cfg.action_field)
                .as_deref()
                .and_then(ImportAction::from_code);

            let Some(action) = action else {
                failures.push(failure(
                    cfg,
                    &record,
                    FailureReason::InvalidAction,
                    ImportAction::Create,
                ));
                continue;
            };

            let Some(key) = record.text(&cfg.external_id_field) else {
                failures.push(failure(cfg, &record, FailureReason::MissingKey, action));
                continue;
            };

            let matched = alive.get(&key).copied();

            match (action, matched) {
                (ImportAction::Delete, Some(current)) => {
                    self.deletes.push(self.entity.build_row(
                        Some(&record),
                        tenant_id,
                        false,
                        Some(current),
                    )?);
                }
                (ImportAction::Delete, None) => {
                    failures.push(failure(cfg, &record, FailureReason::NotFound, action));
                }
                (ImportAction::Create | ImportAction::Update, Some(current)) => {
                    record.set(&cfg.action_field, Scalar::from(ImportAction::Update.code()));
                    self.updates.push(self.entity.build_row(
                        Some(&record),
                        tenant_id,
                        true,
                        Some(current),
                    )?);
                }
                (ImportAction::Create | ImportAction::Update, None) => {
                    record.set(&cfg.action_field, Scalar::from(ImportAction::Create.code()));
                    self.inserts
                        .push(self.entity.build_row(Some(&record), tenant_id, true, None)?);
                }
                (ImportAction::ReplaceAll, _) => {
                    // Replace-all is a batch mode, not a row action.
                    failures.push(failure(cfg, &record, FailureReason::InvalidAction, action));
                }
            }
        }

        Ok(failures)
    }

    pub fn config(&self) -> &EntityConfig {
        self.entity.config()
    }

    pub fn entity(&self) -> &Arc<dyn EntityType> {
        &self.entity
    }

    pub fn inserts(&self) -> &[ImportRow] {
        &self.inserts
    }

    pub fn updates(&self) -> &[ImportRow] {
        &self.updates
    }

    pub fn deletes(&self) -> &[ImportRow] {
        &self.deletes
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

impl std::fmt::Debug for TypeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeHandler")
            .field("table", &self.config().table)
            .field("inserts", &self.inserts.len())
            .field("updates", &self.updates.len())
            .field("deletes", &self.deletes.len())
            .finish()
    }
}

fn failure(
    cfg: &EntityConfig,
    record: &Record,
    reason: FailureReason,
    action: ImportAction,
) -> ValidationFailure {
    ValidationFailure {
        row_id: record.text(&cfg.external_id_field).unwrap_or_default(),
        reason,
        table: cfg.table.clone(),
        caption: record.text(&cfg.caption_field).unwrap_or_default(),
        action,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testkit::{machine_entity, machine_record, stored_machine};

    fn reconcile(
        batch: Vec<Record>,
        existing: Vec<StoredRecord>,
    ) -> ImportResult<TypeHandler> {
        TypeHandler::reconcile(machine_entity(), 5, batch, existing)
    }

    #[test]
    fn update_with_alive_match_keeps_existing_identifier() {
        let handler = reconcile(
            vec![machine_record("A1", "Lobby", ImportAction::Update)],
            vec![stored_machine(7, "A1", true)],
        )
        .unwrap();

        assert_eq!(handler.inserts().len(), 0);
        assert_eq!(handler.updates().len(), 1);
        assert_eq!(
            handler.updates()[0].text("id").unwrap().as_deref(),
            Some("7")
        );
    }

    #[test]
    fn update_without_match_is_corrected_to_create() {
        let mut handler = reconcile(
            vec![machine_record("A1", "Lobby", ImportAction::Update)],
            vec![],
        )
        .unwrap();

        assert_eq!(handler.updates().len(), 0);
        assert_eq!(handler.inserts().len(), 1);

        // Pending until allocation; with a fresh id the row serializes it.
        assert!(matches!(
            handler.inserts()[0].text("id"),
            Err(ImportError::EmptyField(_))
        ));
        handler.inserts[0].identifier_mut("id").unwrap().set(42).unwrap();
        assert_eq!(
            handler.inserts()[0].text("id").unwrap().as_deref(),
            Some("42")
        );
    }

    #[test]
    fn create_with_alive_match_is_corrected_to_update() {
        let handler = reconcile(
            vec![machine_record("A1", "Lobby", ImportAction::Create)],
            vec![stored_machine(7, "A1", true)],
        )
        .unwrap();

        assert_eq!(handler.inserts().len(), 0);
        assert_eq!(handler.updates().len(), 1);
    }

    #[test]
    fn create_with_dead_match_stays_a_create() {
        let handler = reconcile(
            vec![machine_record("A1", "Lobby", ImportAction::Create)],
            vec![stored_machine(7, "A1", false)],
        )
        .unwrap();

        assert_eq!(handler.inserts().len(), 1);
        assert_eq!(handler.updates().len(), 0);
    }

    #[test]
    fn delete_routes_to_delete_bucket_as_dead_row() {
        let handler = reconcile(
            vec![machine_record("A1", "Lobby", ImportAction::Delete)],
            vec![stored_machine(7, "A1", true)],
        )
        .unwrap();

        assert_eq!(handler.deletes().len(), 1);
        let row = &handler.deletes()[0];
        assert_eq!(row.text("id").unwrap().as_deref(), Some("7"));
        assert_eq!(row.text("active").unwrap().as_deref(), Some("f"));
    }

    #[test]
    fn delete_of_missing_entity_is_reported_and_excluded() {
        let err = reconcile(
            vec![machine_record("B9", "Basement", ImportAction::Delete)],
            vec![],
        )
        .unwrap_err();

        let ImportError::Validation(failures) = err else {
            panic!("expected validation failure");
        };
        assert_eq!(
            failures,
            vec![ValidationFailure {
                row_id: "B9".to_string(),
                reason: FailureReason::NotFound,
                table: "machine".to_string(),
                caption: "Basement".to_string(),
                action: ImportAction::Delete,
            }]
        );
    }

    #[test]
    fn validation_failures_are_collected_and_reported_as_one_batch() {
        let err = reconcile(
            vec![
                machine_record("B9", "Basement", ImportAction::Delete),
                machine_record("C3", "Cellar", ImportAction::Delete),
                machine_record("A1", "Lobby", ImportAction::Update),
            ],
            vec![stored_machine(7, "A1", true)],
        )
        .unwrap_err();

        let ImportError::Validation(failures) = err else {
            panic!("expected validation failure");
        };
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].row_id, "B9");
        assert_eq!(failures[1].row_id, "C3");
    }

    #[test]
    fn invalid_action_code_rejects_the_batch() {
        let mut record = machine_record("A1", "Lobby", ImportAction::Create);
        record.set("action", Scalar::from("99"));

        let err = reconcile(vec![record], vec![]).unwrap_err();
        let ImportError::Validation(failures) = err else {
            panic!("expected validation failure");
        };
        assert_eq!(failures[0].reason, FailureReason::InvalidAction);
    }

    #[test]
    fn row_without_natural_key_is_rejected() {
        let mut record = Record::new();
        record.set("name", Scalar::from("Nameless"));
        record.set("action", Scalar::from(ImportAction::Create.code()));

        let err = reconcile(vec![record], vec![]).unwrap_err();
        let ImportError::Validation(failures) = err else {
            panic!("expected validation failure");
        };
        assert_eq!(failures[0].reason, FailureReason::MissingKey);
        assert_eq!(failures[0].caption, "Nameless");
    }

    #[test]
    fn full_replace_row_without_natural_key_is_rejected() {
        let mut record = Record::new();
        record.set("name", Scalar::from("Nameless"));
        record.set("action", Scalar::from(ImportAction::ReplaceAll.code()));

        let err = reconcile(vec![record], vec![stored_machine(1, "X", true)]).unwrap_err();
        let ImportError::Validation(failures) = err else {
            panic!("expected validation failure");
        };
        assert_eq!(failures[0].reason, FailureReason::MissingKey);
        assert_eq!(failures[0].action, ImportAction::ReplaceAll);
    }

    #[test]
    fn full_replace_synthesizes_deletes_for_absent_keys() {
        // Existing alive {X, Y, Z}; incoming {X, W}.
        let batch = vec![
            machine_record("X", "X name", ImportAction::ReplaceAll),
            machine_record("W", "W name", ImportAction::ReplaceAll),
        ];
        let existing = vec![
            stored_machine(1, "X", true),
            stored_machine(2, "Y", true),
            stored_machine(3, "Z", true),
        ];

        let handler = reconcile(batch, existing).unwrap();

        // X updates, W inserts, Y and Z become synthesized deletes.
        assert_eq!(handler.updates().len(), 1);
        assert_eq!(handler.inserts().len(), 1);
        assert_eq!(handler.deletes().len(), 2);

        let deleted_ids: Vec<_> = handler
            .deletes()
            .iter()
            .map(|r| r.text("id").unwrap().unwrap())
            .collect();
        assert_eq!(deleted_ids, vec!["2", "3"]);
        for row in handler.deletes() {
            assert_eq!(row.text("active").unwrap().as_deref(), Some("f"));
        }
    }

    #[test]
    fn full_replace_ignores_dead_existing_rows() {
        let batch = vec![machine_record("X", "X name", ImportAction::ReplaceAll)];
        let existing = vec![
            stored_machine(1, "X", true),
            stored_machine(2, "Y", false),
        ];

        let handler = reconcile(batch, existing).unwrap();
        assert_eq!(handler.updates().len(), 1);
        assert_eq!(handler.deletes().len(), 0);
    }

    #[test]
    fn empty_batch_builds_an_empty_handler() {
        let handler = reconcile(vec![], vec![stored_machine(1, "X", true)]).unwrap();
        assert!(handler.is_empty());
    }
}
