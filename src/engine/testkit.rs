//! Shared fixtures for engine tests: a machine entity referencing a machine
//! group and a site, mirroring the parent/child shape of real master-data
//! batches.

use std::sync::Arc;

use crate::engine::entity::{EntityConfig, EntityType};
use crate::engine::field::{IdentifierField, PlainField, ReferenceField};
use crate::engine::handler::ImportAction;
use crate::engine::row::ImportRow;
use crate::engine::value::{Record, Scalar, StoredRecord};
use crate::shared::errors::ImportResult;

fn cols(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn reference_slot(
    incoming: Option<&Record>,
    existing: Option<&StoredRecord>,
    kind: &str,
    key_column: &str,
    direct_column: &str,
) -> ImportResult<ReferenceField> {
    if let Some(key) = incoming.and_then(|r| r.get(key_column)) {
        ReferenceField::pending(kind, "id", vec![("ext_id".to_string(), key.clone())])
    } else {
        let direct = incoming
            .and_then(|r| r.get(direct_column))
            .or_else(|| existing.and_then(|e| e.columns.get(direct_column)))
            .cloned()
            .unwrap_or(Scalar::Null);
        Ok(ReferenceField::direct(direct))
    }
}

pub struct MachineEntity {
    config: EntityConfig,
}

impl MachineEntity {
    pub fn new() -> Self {
        let mut config = EntityConfig::new("machine", "machine_id_seq");
        config.insert_columns = cols(&[
            "id", "tenant_id", "ext_id", "name", "group_id", "site_id", "active",
        ]);
        config.update_columns = cols(&["id", "ext_id", "name", "group_id", "site_id", "active"]);
        Self { config }
    }
}

impl EntityType for MachineEntity {
    fn config(&self) -> &EntityConfig {
        &self.config
    }

    fn build_row(
        &self,
        incoming: Option<&Record>,
        tenant_id: i64,
        alive: bool,
        existing: Option<&StoredRecord>,
    ) -> ImportResult<ImportRow> {
        let mut row = ImportRow::new();
        row.push(
            "id",
            match existing {
                Some(current) => IdentifierField::known(current.id),
                None => IdentifierField::pending(),
            },
        );
        row.push(
            "tenant_id",
            PlainField::new(true, None, Some(Scalar::Int(tenant_id)), None)?,
        );
        row.push(
            "ext_id",
            PlainField::from_sources(incoming, existing, "ext_id", false, None)?,
        );
        row.push(
            "name",
            PlainField::from_sources(incoming, existing, "name", false, Some(Scalar::Null))?,
        );

        // Same-batch references arrive as the target's natural key;
        // otherwise fall back to a direct value or null.
        row.push(
            "group_id",
            reference_slot(incoming, existing, "group", "group_ext_id", "group_id")?,
        );
        row.push(
            "site_id",
            reference_slot(incoming, existing, "site", "site_ext_id", "site_id")?,
        );

        row.push(
            "active",
            PlainField::new(true, None, Some(Scalar::Bool(alive)), None)?,
        );
        Ok(row)
    }
}

pub struct GroupEntity {
    config: EntityConfig,
}

impl GroupEntity {
    pub fn new() -> Self {
        let mut config = EntityConfig::new("machine_group", "machine_group_id_seq");
        config.insert_columns = cols(&["id", "tenant_id", "ext_id", "name", "active"]);
        config.update_columns = cols(&["id", "ext_id", "name", "active"]);
        config.provides_kind = Some("group".to_string());
        Self { config }
    }
}

impl EntityType for GroupEntity {
    fn config(&self) -> &EntityConfig {
        &self.config
    }

    fn build_row(
        &self,
        incoming: Option<&Record>,
        tenant_id: i64,
        alive: bool,
        existing: Option<&StoredRecord>,
    ) -> ImportResult<ImportRow> {
        let mut row = ImportRow::new();
        row.push(
            "id",
            match existing {
                Some(current) => IdentifierField::known(current.id),
                None => IdentifierField::pending(),
            },
        );
        row.push(
            "tenant_id",
            PlainField::new(true, None, Some(Scalar::Int(tenant_id)), None)?,
        );
        row.push(
            "ext_id",
            PlainField::from_sources(incoming, existing, "ext_id", false, None)?,
        );
        row.push(
            "name",
            PlainField::from_sources(incoming, existing, "name", false, Some(Scalar::Null))?,
        );
        row.push(
            "active",
            PlainField::new(true, None, Some(Scalar::Bool(alive)), None)?,
        );
        Ok(row)
    }
}

pub struct SiteEntity {
    config: EntityConfig,
}

impl SiteEntity {
    pub fn new() -> Self {
        let mut config = EntityConfig::new("site", "site_id_seq");
        config.insert_columns = cols(&["id", "tenant_id", "ext_id", "name", "active"]);
        config.update_columns = cols(&["id", "ext_id", "name", "active"]);
        config.provides_kind = Some("site".to_string());
        Self { config }
    }
}

impl EntityType for SiteEntity {
    fn config(&self) -> &EntityConfig {
        &self.config
    }

    fn build_row(
        &self,
        incoming: Option<&Record>,
        tenant_id: i64,
        alive: bool,
        existing: Option<&StoredRecord>,
    ) -> ImportResult<ImportRow> {
        let mut row = ImportRow::new();
        row.push(
            "id",
            match existing {
                Some(current) => IdentifierField::known(current.id),
                None => IdentifierField::pending(),
            },
        );
        row.push(
            "tenant_id",
            PlainField::new(true, None, Some(Scalar::Int(tenant_id)), None)?,
        );
        row.push(
            "ext_id",
            PlainField::from_sources(incoming, existing, "ext_id", false, None)?,
        );
        row.push(
            "name",
            PlainField::from_sources(incoming, existing, "name", false, Some(Scalar::Null))?,
        );
        row.push(
            "active",
            PlainField::new(true, None, Some(Scalar::Bool(alive)), None)?,
        );
        Ok(row)
    }
}

pub fn machine_entity() -> Arc<dyn EntityType> {
    Arc::new(MachineEntity::new())
}

pub fn group_entity() -> Arc<dyn EntityType> {
    Arc::new(GroupEntity::new())
}

fn base_record(ext_id: &str, name: &str, action: ImportAction) -> Record {
    let mut record = Record::new();
    record.set("ext_id", Scalar::from(ext_id));
    record.set("name", Scalar::from(name));
    record.set("action", Scalar::from(action.code()));
    record
}

pub fn machine_record(ext_id: &str, name: &str, action: ImportAction) -> Record {
    base_record(ext_id, name, action)
}

/// A machine record referencing a group created in the same batch.
pub fn machine_record_in_group(
    ext_id: &str,
    name: &str,
    group_ext_id: &str,
    action: ImportAction,
) -> Record {
    let mut record = machine_record(ext_id, name, action);
    record.set("group_ext_id", Scalar::from(group_ext_id));
    record
}

pub fn site_entity() -> Arc<dyn EntityType> {
    Arc::new(SiteEntity::new())
}

/// A machine record referencing both a group and a site from the same batch.
pub fn machine_record_with_refs(
    ext_id: &str,
    name: &str,
    group_ext_id: &str,
    site_ext_id: &str,
    action: ImportAction,
) -> Record {
    let mut record = machine_record_in_group(ext_id, name, group_ext_id, action);
    record.set("site_ext_id", Scalar::from(site_ext_id));
    record
}

pub fn group_record(ext_id: &str, name: &str, action: ImportAction) -> Record {
    base_record(ext_id, name, action)
}

pub fn site_record(ext_id: &str, name: &str, action: ImportAction) -> Record {
    base_record(ext_id, name, action)
}

pub fn stored_machine(id: i64, ext_id: &str, alive: bool) -> StoredRecord {
    let columns = Record::from_iter([
        ("ext_id".to_string(), Scalar::from(ext_id)),
        ("name".to_string(), Scalar::from(format!("{} name", ext_id))),
        ("group_id".to_string(), Scalar::Null),
        ("site_id".to_string(), Scalar::Null),
        ("active".to_string(), Scalar::Bool(alive)),
    ]);
    StoredRecord {
        id,
        natural_key: ext_id.to_string(),
        alive,
        columns,
    }
}
