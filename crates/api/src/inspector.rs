//! Store inspector
//!
//! A stable, side-effect-free projection of the workspace for external
//! test and automation harnesses. Everything is copied out at call time;
//! nothing here mutates. The only escape hatch is `run_query`, which the
//! harness uses for read-only assertions.

use crate::workspace::{PersistenceStatus, Workspace};
use cleanslate_core::{Result, TableId};
use cleanslate_engine::QueryResult;
use cleanslate_store::Residency;

/// Busy-flag snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlagsSnapshot {
    /// A transform command is executing
    pub transforming: bool,
    /// A match-merge is executing
    pub merging: bool,
    /// A stack is executing
    pub combining: bool,
    /// An undo replay is executing
    pub replaying: bool,
    /// A diff is executing
    pub diffing: bool,
}

/// One table's projection
#[derive(Debug, Clone, PartialEq)]
pub struct TableSummary {
    /// Table id
    pub id: TableId,
    /// Normalized name
    pub name: String,
    /// Rows at last refresh
    pub row_count: usize,
    /// User-visible column names only
    pub user_columns: Vec<String>,
    /// Residency state
    pub residency: Residency,
    /// Unsaved changes relative to the last snapshot
    pub dirty: bool,
    /// Timeline cursor (−1 = original)
    pub timeline_position: i64,
    /// Dirty-cell count
    pub dirty_cell_count: usize,
    /// An undo is available
    pub can_undo: bool,
    /// A redo is available
    pub can_redo: bool,
}

/// Whole-workspace projection
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot {
    /// Startup finished
    pub ready: bool,
    /// All tables, ordered by id
    pub tables: Vec<TableSummary>,
    /// The active table, if any
    pub active_table_id: Option<TableId>,
    /// Buffered (unflushed) edit count
    pub pending_edit_count: usize,
    /// Last app-state save status
    pub persistence_status: PersistenceStatus,
    /// Busy flags
    pub flags: FlagsSnapshot,
}

impl StoreSnapshot {
    /// Find one table's summary by name
    pub fn table(&self, name: &str) -> Option<&TableSummary> {
        self.tables.iter().find(|t| t.name == name)
    }
}

impl Workspace {
    /// Copy out the current state for inspection
    pub fn inspect(&self) -> StoreSnapshot {
        let flags = self.executor().flags();
        let tables = self
            .registry
            .list()
            .into_iter()
            .map(|entry| {
                let timeline = self.executor().timeline(&entry.info.id);
                TableSummary {
                    id: entry.info.id.clone(),
                    name: entry.info.name.clone(),
                    row_count: entry.info.row_count,
                    user_columns: entry
                        .info
                        .user_columns()
                        .iter()
                        .map(|c| c.name.clone())
                        .collect(),
                    residency: entry.residency,
                    dirty: entry.dirty,
                    timeline_position: timeline.current_position,
                    dirty_cell_count: timeline.dirty_cells.len(),
                    can_undo: timeline.can_undo(),
                    can_redo: timeline.can_redo(),
                }
            })
            .collect();

        StoreSnapshot {
            ready: self.is_ready(),
            tables,
            active_table_id: self.active_table_id(),
            pending_edit_count: self.pending_edit_count(),
            persistence_status: self.persistence_status(),
            flags: FlagsSnapshot {
                transforming: flags.is_transforming(),
                merging: flags.is_merging(),
                combining: flags.is_combining(),
                replaying: flags.is_replaying(),
                diffing: flags.is_diffing(),
            },
        }
    }

    /// List all tables (projection shorthand)
    pub fn list_tables(&self) -> Vec<TableSummary> {
        self.inspect().tables
    }
}

/// Read-only query escape hatch, re-exported at the inspector level
pub fn run_query(workspace: &Workspace, sql: &str) -> Result<QueryResult> {
    workspace.run_query(sql)
}
