//! The workspace facade
//!
//! One `Workspace` owns the engine, the snapshot store, the registry, the
//! executor, and the edit batch, and enforces the Single Active Table
//! policy: at most one user table is materialized; switching tables
//! freezes the outgoing one and thaws the incoming one.
//!
//! Every mutation flows through here so the boundaries hold: edits flush
//! before transforms, undos, table switches, and freezes; the app state
//! saves after anything durable changes.

use crate::state::{self, AppState, APP_STATE_VERSION};
use cleanslate_core::{
    filter_user_columns, is_internal_column, CoreError, Result, SnapshotId, TableId, TableInfo,
    Value, CS_ID, CS_ID_GAP, ORIGIN_ID,
};
use cleanslate_engine::{arrow_bridge, diff, identity, qident, schema, DiffSummary, Engine, QueryResult};
use cleanslate_formula::{transpile, ValidationReport};
use cleanslate_store::{Residency, SnapshotStore, TableEntry, TableRegistry};
use cleanslate_timeline::{CommandExecutor, CommandKind, EditBatch, RecordOutcome};
use cleanslate_vfs::StoreDir;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Where the last app-state save landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceStatus {
    /// Nothing saved yet this session
    Idle,
    /// A save is running
    Saving,
    /// The last save succeeded
    Saved,
    /// The last save failed
    Failed,
}

/// The top-level handle over one workspace directory
pub struct Workspace {
    pub(crate) engine: Arc<Engine>,
    pub(crate) store: Arc<SnapshotStore>,
    pub(crate) registry: Arc<TableRegistry>,
    pub(crate) executor: Arc<CommandExecutor>,
    pub(crate) edits: EditBatch,
    pub(crate) state_dir: StoreDir,
    pub(crate) active_table: Mutex<Option<TableId>>,
    pub(crate) preferences: Mutex<serde_json::Value>,
    pub(crate) persistence: Mutex<PersistenceStatus>,
    pub(crate) ready: AtomicBool,
}

impl Workspace {
    /// Open (and boot) a workspace rooted at `root`
    ///
    /// Runs the full startup sequence; see [`crate::startup`].
    pub fn open(root: impl AsRef<std::path::Path>) -> Result<Workspace> {
        crate::startup::boot(root.as_ref())
    }

    /// The engine handle (for collaborators that run their own reads)
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// True once startup completed
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// The executor (timelines, audit, busy flags)
    pub fn executor(&self) -> &Arc<CommandExecutor> {
        &self.executor
    }

    /// The snapshot store
    pub fn snapshot_store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// The active table id, if any
    pub fn active_table_id(&self) -> Option<TableId> {
        self.active_table.lock().clone()
    }

    /// Status of the most recent app-state save
    pub fn persistence_status(&self) -> PersistenceStatus {
        *self.persistence.lock()
    }

    /// True while the navigation-away guard must be armed
    ///
    /// Armed whenever dirty tables exist or pending edits are buffered.
    pub fn unsaved_changes(&self) -> bool {
        self.registry.any_dirty() || !self.edits.is_empty()
    }

    // =========================================================================
    // Ingest and table management
    // =========================================================================

    /// Ingest rows as a new table, stamp identity, export its original
    /// snapshot, and make it active
    pub fn ingest(
        &self,
        name: &str,
        columns: &[cleanslate_core::ColumnInfo],
        rows: &[Vec<Value>],
    ) -> Result<TableId> {
        let name = normalize_table_name(name)?;
        if self.registry.find_by_name(&name).is_some() {
            return Err(CoreError::invalid_input(format!(
                "table already exists: {name}"
            )));
        }

        // The incoming table becomes the single materialized one.
        self.freeze_active()?;

        arrow_bridge::create_table_from_rows(&self.engine, &name, columns, rows)?;
        identity::stamp_identity(&self.engine, &name)?;

        let stamped = schema::table_columns(&self.engine, &name)?;
        let row_count = schema::row_count(&self.engine, &name)?;
        let info = TableInfo::new(TableId::new(), &name, stamped, row_count);
        let table_id = info.id.clone();
        self.registry.insert(TableEntry::materialized(info));

        let original = SnapshotId::new(format!("original_{name}"));
        self.store
            .export_table_to_snapshot(&self.engine, &name, &original)?;
        self.executor
            .set_snapshot_marker(&table_id, "original", original);

        *self.active_table.lock() = Some(table_id.clone());
        self.save_state()?;
        info!(table = %name, rows = row_count, "ingested");
        Ok(table_id)
    }

    /// Switch the active table, freezing the outgoing and thawing the
    /// incoming one
    ///
    /// Returns false when the incoming table's snapshot is missing; the
    /// table entry stays so the data can be re-ingested.
    pub fn set_active_table(&self, table_id: &TableId) -> Result<bool> {
        self.flush_edits()?;
        let current = self.active_table.lock().clone();
        if current.as_ref() == Some(table_id) {
            // Re-selecting the active table still thaws it when frozen.
            return self.store.thaw(&self.engine, &self.registry, table_id);
        }
        if let Some(current) = current {
            self.store.freeze(&self.engine, &self.registry, &current)?;
        }
        let thawed = self.store.thaw(&self.engine, &self.registry, table_id)?;
        *self.active_table.lock() = Some(table_id.clone());
        self.save_state()?;
        Ok(thawed)
    }

    /// Freeze the active table (if any) without switching
    pub fn freeze_active(&self) -> Result<()> {
        self.flush_edits()?;
        let current = self.active_table.lock().clone();
        if let Some(current) = current {
            self.store.freeze(&self.engine, &self.registry, &current)?;
            self.save_state()?;
        }
        Ok(())
    }

    /// Drop a table: its live data, timeline, and snapshots
    pub fn drop_table(&self, table_id: &TableId) -> Result<()> {
        let entry = self
            .registry
            .get(table_id)
            .ok_or_else(|| CoreError::table_missing(table_id.to_string()))?;

        if self.edits.table_id().as_ref() == Some(table_id) {
            self.edits.discard();
        }
        {
            let mut active = self.active_table.lock();
            if active.as_ref() == Some(table_id) {
                *active = None;
            }
        }

        self.engine.drop_table_if_exists(&entry.info.name)?;
        for id in self.executor.timeline(table_id).referenced_snapshot_ids() {
            self.store.delete_snapshot(&id)?;
        }
        self.store.delete_snapshot(&entry.snapshot_id)?;
        self.executor.remove_timeline(table_id);
        self.registry.remove(table_id);
        self.save_state()?;
        info!(table = %entry.info.name, "dropped");
        Ok(())
    }

    // =========================================================================
    // Edits
    // =========================================================================

    /// Record one cell edit (debounced; flushes at boundaries)
    pub fn edit_cell(
        &self,
        table_id: &TableId,
        cs_id: i64,
        column: &str,
        new_value: Value,
    ) -> Result<()> {
        if is_internal_column(column) {
            return Err(CoreError::invalid_input(format!(
                "cannot edit internal column {column}"
            )));
        }
        let entry = self
            .registry
            .get(table_id)
            .ok_or_else(|| CoreError::table_missing(table_id.to_string()))?;

        let previous = self
            .engine
            .run_query(&format!(
                "SELECT {} FROM {} WHERE {} = {}",
                qident(column),
                qident(&entry.info.name),
                qident(CS_ID),
                cs_id
            ))?
            .rows
            .into_iter()
            .next()
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| CoreError::invalid_input(format!("no row with id {cs_id}")))?;

        if self.edits.record(table_id, cs_id, column, previous.clone(), new_value.clone())
            == RecordOutcome::TableMismatch
        {
            // Boundary: edits for another table flush before this one lands.
            self.flush_edits()?;
            self.edits.record(table_id, cs_id, column, previous, new_value);
        }
        Ok(())
    }

    /// Flush pending edits into one `edit:cell-batch` command
    ///
    /// Returns true when a batch was flushed. A batch against a table that
    /// no longer exists is dropped and its dirty flags cleared.
    pub fn flush_edits(&self) -> Result<bool> {
        let Some((table_id, edits)) = self.edits.take_for_flush() else {
            return Ok(false);
        };
        let count = edits.len();
        let result = self
            .executor
            .apply(&table_id, CommandKind::CellEditBatch { edits });
        self.edits.flush_done();
        match result {
            Ok(()) => {
                self.save_state()?;
                info!(table = %table_id, edits = count, "edit batch flushed");
                Ok(true)
            }
            Err(e) if e.is_missing() => {
                warn!(table = %table_id, "edit batch target gone, dropping pending edits");
                self.edits.discard();
                self.executor.clear_dirty_cells(&table_id);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Flush when the debounce window has elapsed
    pub fn flush_if_due(&self, now: Instant) -> Result<bool> {
        if self.edits.is_due(now) {
            self.flush_edits()
        } else {
            Ok(false)
        }
    }

    /// Pending (unflushed) edit count
    pub fn pending_edit_count(&self) -> usize {
        self.edits.pending_count()
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Apply a command to a table
    ///
    /// Issuing a transform is a flush boundary: pending edits become their
    /// own command first, so ordering in the timeline matches what the user
    /// saw.
    pub fn apply(&self, table_id: &TableId, kind: CommandKind) -> Result<()> {
        self.flush_edits()?;
        self.executor.apply(table_id, kind)?;
        self.save_state()
    }

    /// Validate a formula and, when valid, apply it as a transform
    ///
    /// The report comes back either way; an invalid formula applies
    /// nothing.
    pub fn apply_formula(
        &self,
        table_id: &TableId,
        column: &str,
        expression: &str,
    ) -> Result<ValidationReport> {
        let entry = self
            .registry
            .get(table_id)
            .ok_or_else(|| CoreError::table_missing(table_id.to_string()))?;
        let columns = schema::table_columns(&self.engine, &entry.info.name)?;
        let user_columns: Vec<_> = columns
            .into_iter()
            .filter(|c| !is_internal_column(&c.name))
            .collect();

        let out = transpile(expression, &user_columns);
        let Some(sql) = out.sql.filter(|_| out.report.is_valid) else {
            return Ok(out.report);
        };
        self.apply(
            table_id,
            CommandKind::Formula {
                column: column.to_string(),
                expression: expression.to_string(),
                sql,
            },
        )?;
        Ok(out.report)
    }

    /// Undo the last command on a table
    pub fn undo(&self, table_id: &TableId) -> Result<()> {
        self.flush_edits()?;
        self.executor.undo(table_id)?;
        self.save_state()
    }

    /// Redo the next command on a table
    pub fn redo(&self, table_id: &TableId) -> Result<()> {
        self.flush_edits()?;
        self.executor.redo(table_id)?;
        self.save_state()
    }

    /// Clear a stuck replay sentinel after the user resets
    pub fn reset_replay_sentinel(&self, table_id: &TableId) {
        self.executor.reset_replay_sentinel(table_id);
    }

    // =========================================================================
    // Cross-table operations
    // =========================================================================

    /// Row-key diff of two tables over their shared user columns
    pub fn diff_tables(
        &self,
        left_id: &TableId,
        right_id: &TableId,
        key_column: &str,
    ) -> Result<DiffSummary> {
        let _guard = self.executor.flags().guard_diffing();
        self.flush_edits()?;

        let left = self.materialize_for_read(left_id)?;
        let right = self.materialize_for_read(right_id)?;
        let summary = diff::diff_tables(&self.engine, &left.name, &right.name, key_column);
        self.release_read(left)?;
        self.release_read(right)?;
        summary
    }

    /// Stack two tables into a new one
    ///
    /// The new table takes the union of both tables' user columns, fresh
    /// gap-based `_cs_id`s over left rows then right rows, and the source
    /// rows' origin ids. It becomes the active table.
    pub fn stack_tables(
        &self,
        left_id: &TableId,
        right_id: &TableId,
        new_name: &str,
    ) -> Result<TableId> {
        let _guard = self.executor.flags().guard_combining();
        self.flush_edits()?;
        let new_name = normalize_table_name(new_name)?;
        if self.registry.find_by_name(&new_name).is_some() {
            return Err(CoreError::invalid_input(format!(
                "table already exists: {new_name}"
            )));
        }

        let left = self.materialize_for_read(left_id)?;
        let right = self.materialize_for_read(right_id)?;

        let result = self.build_stacked(&left.name, &right.name, &new_name);
        self.release_read(left)?;
        self.release_read(right)?;
        result?;

        let columns = schema::table_columns(&self.engine, &new_name)?;
        let row_count = schema::row_count(&self.engine, &new_name)?;
        let info = TableInfo::new(TableId::new(), &new_name, columns, row_count);
        let table_id = info.id.clone();
        self.registry.insert(TableEntry::materialized(info));

        let original = SnapshotId::new(format!("original_{new_name}"));
        self.store
            .export_table_to_snapshot(&self.engine, &new_name, &original)?;
        self.executor
            .set_snapshot_marker(&table_id, "original", original);

        // The stacked table becomes the single materialized one.
        let previous = self.active_table.lock().clone();
        if let Some(previous) = previous {
            self.store.freeze(&self.engine, &self.registry, &previous)?;
        }
        *self.active_table.lock() = Some(table_id.clone());
        self.save_state()?;
        info!(table = %new_name, rows = row_count, "stacked");
        Ok(table_id)
    }

    fn build_stacked(&self, left: &str, right: &str, new_name: &str) -> Result<()> {
        let left_cols = schema::table_columns(&self.engine, left)?;
        let right_cols = schema::table_columns(&self.engine, right)?;

        // Union of user columns: left order first, right-only appended.
        let mut union: Vec<cleanslate_core::ColumnInfo> = left_cols
            .iter()
            .filter(|c| !is_internal_column(&c.name))
            .cloned()
            .collect();
        for c in right_cols.iter().filter(|c| !is_internal_column(&c.name)) {
            if !union.iter().any(|u| u.name == c.name) {
                union.push(c.clone());
            }
        }
        if union.is_empty() {
            return Err(CoreError::invalid_input("nothing to stack"));
        }

        let select_for = |cols: &[cleanslate_core::ColumnInfo], src: usize| -> String {
            let list: Vec<String> = union
                .iter()
                .map(|u| {
                    if cols.iter().any(|c| c.name == u.name) {
                        qident(&u.name)
                    } else {
                        format!("CAST(NULL AS {}) AS {}", u.column_type.sql_decl(), qident(&u.name))
                    }
                })
                .collect();
            format!(
                "SELECT {src} AS __src, {id} AS __ord, {origin} AS __origin, {list} FROM {table}",
                id = qident(CS_ID),
                origin = qident(ORIGIN_ID),
                list = list.join(", "),
                table = qident(if src == 0 { left } else { right }),
            )
        };

        // Explicit declarations keep identity ordering numeric and every
        // user column's affinity intact.
        let mut decls = vec![
            format!("{} BIGINT NOT NULL", qident(CS_ID)),
            format!("{} VARCHAR NOT NULL", qident(ORIGIN_ID)),
        ];
        for u in &union {
            decls.push(format!("{} {}", qident(&u.name), u.column_type.sql_decl()));
        }
        let union_list: Vec<String> = union.iter().map(|u| qident(&u.name)).collect();
        let sql = format!(
            "CREATE TABLE {new} ({decls});\n\
             INSERT INTO {new} \
             SELECT ROW_NUMBER() OVER (ORDER BY __src, __ord) * {gap}, __origin, {cols} \
             FROM ({left_select} UNION ALL {right_select});",
            new = qident(new_name),
            decls = decls.join(", "),
            gap = CS_ID_GAP,
            cols = union_list.join(", "),
            left_select = select_for(&left_cols, 0),
            right_select = select_for(&right_cols, 1),
        );
        self.engine.execute_batch(&sql)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Run an arbitrary query (inspector escape hatch)
    pub fn run_query(&self, sql: &str) -> Result<QueryResult> {
        self.engine.run_query(sql)
    }

    /// A table's rows over user columns only, in canonical order
    pub fn user_rows(&self, table_id: &TableId) -> Result<QueryResult> {
        let entry = self
            .registry
            .get(table_id)
            .ok_or_else(|| CoreError::table_missing(table_id.to_string()))?;
        let columns = schema::table_columns(&self.engine, &entry.info.name)?;
        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let user = filter_user_columns(&names);
        if user.is_empty() {
            return Err(CoreError::invalid_input("table has no user columns"));
        }
        let order_by = schema::detect_order_by(&columns);
        let order_clause = if order_by.is_empty() {
            String::new()
        } else {
            format!(" ORDER BY {}", qident(&order_by))
        };
        let list: Vec<String> = user.iter().map(|n| qident(n)).collect();
        self.engine.run_query(&format!(
            "SELECT {} FROM {}{order_clause}",
            list.join(", "),
            qident(&entry.info.name)
        ))
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    fn materialize_for_read(&self, table_id: &TableId) -> Result<ReadLease> {
        let entry = self
            .registry
            .get(table_id)
            .ok_or_else(|| CoreError::table_missing(table_id.to_string()))?;
        let was_frozen = entry.residency != Residency::Materialized;
        if was_frozen && !self.store.thaw(&self.engine, &self.registry, table_id)? {
            return Err(CoreError::snapshot_missing(entry.snapshot_id.clone()));
        }
        Ok(ReadLease {
            table_id: table_id.clone(),
            name: entry.info.name,
            was_frozen,
        })
    }

    fn release_read(&self, lease: ReadLease) -> Result<()> {
        if lease.was_frozen {
            // The lease only read; the snapshot on disk is still current.
            self.engine.drop_table_if_exists(&lease.name)?;
            self.registry
                .set_residency(&lease.table_id, Residency::Frozen)?;
        }
        Ok(())
    }

    /// Persist the app state
    pub(crate) fn save_state(&self) -> Result<()> {
        *self.persistence.lock() = PersistenceStatus::Saving;
        let mut timelines = BTreeMap::new();
        for (id, timeline) in self.executor.timelines_for_persistence() {
            timelines.insert(id.to_string(), timeline);
        }
        let app_state = AppState {
            version: APP_STATE_VERSION,
            active_table_id: self.active_table.lock().clone(),
            tables: self.registry.to_entries(),
            timelines,
            preferences: self.preferences.lock().clone(),
        };
        match state::save(&self.state_dir, &app_state) {
            Ok(()) => {
                *self.persistence.lock() = PersistenceStatus::Saved;
                Ok(())
            }
            Err(e) => {
                *self.persistence.lock() = PersistenceStatus::Failed;
                Err(e)
            }
        }
    }
}

/// A table temporarily materialized for a cross-table read
struct ReadLease {
    table_id: TableId,
    name: String,
    was_frozen: bool,
}

/// Normalize a table name to its on-disk form
///
/// Lowercased; interior whitespace becomes underscores; must start with a
/// letter or underscore and contain only word characters.
pub fn normalize_table_name(raw: &str) -> Result<String> {
    let name: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();
    if name.is_empty() {
        return Err(CoreError::invalid_input("empty table name"));
    }
    let valid_start = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_start || !valid_rest {
        return Err(CoreError::invalid_input(format!(
            "invalid table name: {raw}"
        )));
    }
    Ok(name)
}
