//! Audit trail
//!
//! Two entry shapes: Type A for structured transforms and merges (with an
//! optional row-level payload), Type B for manual cell edits carrying the
//! previous and new values. The executor emits entries as commands apply;
//! replays emit nothing.

use cleanslate_core::{TableId, Value};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEntry {
    /// Type A: a structured transform or merge
    Transform {
        /// Entry id
        id: String,
        /// Table the command ran against
        table_id: TableId,
        /// Command type, e.g. `transform:pad_zeros`
        command_type: String,
        /// Human-readable one-liner
        summary: String,
        /// Rows the command reported modified
        row_count: usize,
        /// True when `payload` carries row-level detail
        has_row_details: bool,
        /// Structured payload (per-row detail for merges)
        payload: serde_json::Value,
        /// Milliseconds since the epoch
        timestamp: i64,
    },
    /// Type B: one manual cell edit
    CellEdit {
        /// Entry id
        id: String,
        /// Table the edit ran against
        table_id: TableId,
        /// Row identity
        cs_id: i64,
        /// Column name
        column_name: String,
        /// Value before the edit
        previous_value: Value,
        /// Value after the edit
        new_value: Value,
        /// Milliseconds since the epoch
        timestamp: i64,
    },
}

impl AuditEntry {
    /// Build a Type A entry
    pub fn transform(
        table_id: TableId,
        command_type: impl Into<String>,
        summary: impl Into<String>,
        row_count: usize,
        payload: serde_json::Value,
    ) -> Self {
        let has_row_details = !payload.is_null();
        AuditEntry::Transform {
            id: Uuid::new_v4().to_string(),
            table_id,
            command_type: command_type.into(),
            summary: summary.into(),
            row_count,
            has_row_details,
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Build a Type B entry
    pub fn cell_edit(
        table_id: TableId,
        cs_id: i64,
        column_name: impl Into<String>,
        previous_value: Value,
        new_value: Value,
    ) -> Self {
        AuditEntry::CellEdit {
            id: Uuid::new_v4().to_string(),
            table_id,
            cs_id,
            column_name: column_name.into(),
            previous_value,
            new_value,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// The table this entry belongs to
    pub fn table_id(&self) -> &TableId {
        match self {
            AuditEntry::Transform { table_id, .. } => table_id,
            AuditEntry::CellEdit { table_id, .. } => table_id,
        }
    }
}

/// Append-only audit log
#[derive(Default)]
pub struct AuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl AuditLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry
    pub fn push(&self, entry: AuditEntry) {
        self.entries.write().push(entry);
    }

    /// All entries, oldest first
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().clone()
    }

    /// Entries for one table, oldest first
    pub fn entries_for(&self, table_id: &TableId) -> Vec<AuditEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.table_id() == table_id)
            .cloned()
            .collect()
    }

    /// Entry count
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when no entries exist
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
