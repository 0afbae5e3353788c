//! Table registry
//!
//! Bookkeeping for every known table: identity, schema description,
//! residency (materialized in the engine, frozen on disk, or missing), and
//! the dirty flag driving Safe Save on freeze. The Single Active Table
//! policy is enforced by the workspace; the registry only records state.

use cleanslate_core::{Result, SnapshotId, TableId, TableInfo};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a table's data currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Residency {
    /// Live in the engine
    Materialized,
    /// Only the on-disk snapshot exists
    Frozen,
    /// Referenced by state but its snapshot is gone; re-ingest to recover
    Missing,
}

/// One registry entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEntry {
    /// Table description
    pub info: TableInfo,
    /// Residency state
    pub residency: Residency,
    /// True when the materialized table differs from its snapshot
    pub dirty: bool,
    /// The table's canonical snapshot id (its lowercased name)
    pub snapshot_id: SnapshotId,
}

impl TableEntry {
    /// Create an entry for a freshly ingested, materialized table
    pub fn materialized(info: TableInfo) -> Self {
        let snapshot_id = SnapshotId::new(&info.name);
        Self {
            info,
            residency: Residency::Materialized,
            dirty: false,
            snapshot_id,
        }
    }
}

/// The registry of all known tables
#[derive(Default)]
pub struct TableRegistry {
    tables: RwLock<BTreeMap<TableId, TableEntry>>,
}

impl TableRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry
    pub fn insert(&self, entry: TableEntry) {
        self.tables.write().insert(entry.info.id.clone(), entry);
    }

    /// Remove an entry, returning it
    pub fn remove(&self, id: &TableId) -> Option<TableEntry> {
        self.tables.write().remove(id)
    }

    /// Clone one entry
    pub fn get(&self, id: &TableId) -> Option<TableEntry> {
        self.tables.read().get(id).cloned()
    }

    /// Find an entry by table name
    pub fn find_by_name(&self, name: &str) -> Option<TableEntry> {
        self.tables
            .read()
            .values()
            .find(|e| e.info.name == name)
            .cloned()
    }

    /// All entries, ordered by table id
    pub fn list(&self) -> Vec<TableEntry> {
        self.tables.read().values().cloned().collect()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    /// True when no tables are registered
    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }

    /// Set the dirty flag
    pub fn set_dirty(&self, id: &TableId, dirty: bool) -> Result<()> {
        self.update(id, |e| e.dirty = dirty)
    }

    /// Set residency
    pub fn set_residency(&self, id: &TableId, residency: Residency) -> Result<()> {
        self.update(id, |e| e.residency = residency)
    }

    /// Replace the schema/row-count description
    pub fn set_info(&self, id: &TableId, info: TableInfo) -> Result<()> {
        self.update(id, |e| e.info = info)
    }

    /// True when any table is dirty
    pub fn any_dirty(&self) -> bool {
        self.tables.read().values().any(|e| e.dirty)
    }

    /// Apply a mutation to one entry
    pub fn update(&self, id: &TableId, f: impl FnOnce(&mut TableEntry)) -> Result<()> {
        let mut tables = self.tables.write();
        match tables.get_mut(id) {
            Some(entry) => {
                f(entry);
                Ok(())
            }
            None => Err(cleanslate_core::CoreError::table_missing(id.to_string())),
        }
    }

    /// Snapshot the entries for persistence
    pub fn to_entries(&self) -> Vec<TableEntry> {
        self.list()
    }

    /// Replace all entries from persisted state
    pub fn load_entries(&self, entries: Vec<TableEntry>) {
        let mut tables = self.tables.write();
        tables.clear();
        for entry in entries {
            tables.insert(entry.info.id.clone(), entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cleanslate_core::{ColumnInfo, ColumnType};

    fn entry(name: &str) -> TableEntry {
        TableEntry::materialized(TableInfo::new(
            TableId::new(),
            name,
            vec![ColumnInfo::new("v", ColumnType::Varchar)],
            0,
        ))
    }

    #[test]
    fn test_insert_get_remove() {
        let reg = TableRegistry::new();
        let e = entry("orders");
        let id = e.info.id.clone();
        reg.insert(e.clone());
        assert_eq!(reg.get(&id), Some(e));
        assert_eq!(reg.len(), 1);
        assert!(reg.remove(&id).is_some());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_canonical_snapshot_id_is_lowercased_name() {
        let e = TableEntry::materialized(TableInfo::new(TableId::new(), "Orders", vec![], 0));
        assert_eq!(e.snapshot_id.as_str(), "orders");
    }

    #[test]
    fn test_find_by_name() {
        let reg = TableRegistry::new();
        reg.insert(entry("a"));
        reg.insert(entry("b"));
        assert!(reg.find_by_name("b").is_some());
        assert!(reg.find_by_name("zzz").is_none());
    }

    #[test]
    fn test_flags() {
        let reg = TableRegistry::new();
        let e = entry("t");
        let id = e.info.id.clone();
        reg.insert(e);

        assert!(!reg.any_dirty());
        reg.set_dirty(&id, true).unwrap();
        assert!(reg.any_dirty());
        assert!(reg.get(&id).unwrap().dirty);

        reg.set_residency(&id, Residency::Frozen).unwrap();
        assert_eq!(reg.get(&id).unwrap().residency, Residency::Frozen);
    }

    #[test]
    fn test_update_missing_table_errors() {
        let reg = TableRegistry::new();
        assert!(reg.set_dirty(&TableId::new(), true).is_err());
    }

    #[test]
    fn test_persistence_roundtrip() {
        let reg = TableRegistry::new();
        reg.insert(entry("a"));
        reg.insert(entry("b"));
        let entries = reg.to_entries();

        let reg2 = TableRegistry::new();
        reg2.load_entries(entries.clone());
        assert_eq!(reg2.to_entries(), entries);
    }
}
