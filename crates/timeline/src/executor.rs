//! The command executor
//!
//! Exactly one `CommandExecutor` exists process-wide. It owns every table's
//! timeline and is the only thing that applies, undoes, or redoes commands.
//!
//! ## Undo dispatch
//!
//! - Tier 1 projects the `{col}__base` shadow back through the remaining
//!   expression chain. When the shadow was refreshed by a newer (now
//!   redoable) chain, the projection would be stale, so the executor falls
//!   back to restore-and-replay.
//! - Tier 2 executes the inverse statements captured at apply time.
//! - Tier 3 restores the command's snapshot-before and replays any commands
//!   between the snapshot position and the undo target.
//!
//! ## Failure semantics
//!
//! A failed apply rolls its transaction back and appends nothing; a
//! snapshot-before taken for it stays on disk for retry (startup GC removes
//! it otherwise). A failed replay leaves `is_replaying` set as the
//! unrecoverable-state sentinel: further mutations are rejected until
//! [`CommandExecutor::reset_replay_sentinel`].

use crate::audit::{AuditEntry, AuditLog};
use crate::command::{
    forward_statements, inverse_statements, shadow_column, Command, CommandKind, Tier,
};
use crate::timeline::Timeline;
use cleanslate_core::{CellKey, ColumnInfo, CoreError, Result, SnapshotId, TableId, Value, CS_ID};
use cleanslate_engine::{qident, schema, Engine};
use cleanslate_store::{SnapshotStore, TableRegistry};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Completion flags polled by the inspector's wait helpers
#[derive(Debug, Default)]
pub struct BusyFlags {
    transforming: AtomicBool,
    merging: AtomicBool,
    combining: AtomicBool,
    replaying: AtomicBool,
    diffing: AtomicBool,
}

impl BusyFlags {
    /// A transform command is executing
    pub fn is_transforming(&self) -> bool {
        self.transforming.load(Ordering::SeqCst)
    }

    /// A match-merge command is executing
    pub fn is_merging(&self) -> bool {
        self.merging.load(Ordering::SeqCst)
    }

    /// A stack is executing
    pub fn is_combining(&self) -> bool {
        self.combining.load(Ordering::SeqCst)
    }

    /// An undo replay is executing
    pub fn is_replaying(&self) -> bool {
        self.replaying.load(Ordering::SeqCst)
    }

    /// A table diff is executing
    pub fn is_diffing(&self) -> bool {
        self.diffing.load(Ordering::SeqCst)
    }

    /// Raise the diff flag for the guard's lifetime (workspace diff path)
    pub fn guard_diffing(&self) -> FlagGuard<'_> {
        FlagGuard::raise(&self.diffing)
    }

    /// Raise the combine flag for the guard's lifetime (workspace stack path)
    pub fn guard_combining(&self) -> FlagGuard<'_> {
        FlagGuard::raise(&self.combining)
    }
}

/// RAII guard that lowers its busy flag on drop
pub struct FlagGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> FlagGuard<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self { flag }
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// The process-wide command executor
pub struct CommandExecutor {
    engine: Arc<Engine>,
    store: Arc<SnapshotStore>,
    registry: Arc<TableRegistry>,
    timelines: Mutex<FxHashMap<TableId, Timeline>>,
    audit: AuditLog,
    flags: BusyFlags,
}

impl CommandExecutor {
    /// Create the executor over the engine, store, and registry
    pub fn new(engine: Arc<Engine>, store: Arc<SnapshotStore>, registry: Arc<TableRegistry>) -> Self {
        Self {
            engine,
            store,
            registry,
            timelines: Mutex::new(FxHashMap::default()),
            audit: AuditLog::new(),
            flags: BusyFlags::default(),
        }
    }

    /// The audit log
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// The busy flags
    pub fn flags(&self) -> &BusyFlags {
        &self.flags
    }

    /// Clone one table's timeline
    pub fn timeline(&self, table_id: &TableId) -> Timeline {
        self.timelines
            .lock()
            .get(table_id)
            .cloned()
            .unwrap_or_else(Timeline::new)
    }

    /// All timelines, for app-state persistence
    pub fn timelines_for_persistence(&self) -> Vec<(TableId, Timeline)> {
        self.timelines
            .lock()
            .iter()
            .map(|(id, t)| (id.clone(), t.clone()))
            .collect()
    }

    /// Replace all timelines from persisted app state
    pub fn load_timelines(&self, entries: Vec<(TableId, Timeline)>) {
        let mut timelines = self.timelines.lock();
        timelines.clear();
        for (id, timeline) in entries {
            timelines.insert(id, timeline);
        }
    }

    /// Record a snapshot marker (e.g. `original`) on a table's timeline
    pub fn set_snapshot_marker(&self, table_id: &TableId, marker: &str, id: SnapshotId) {
        self.timelines
            .lock()
            .entry(table_id.clone())
            .or_insert_with(Timeline::new)
            .snapshots
            .insert(marker.to_string(), id);
    }

    /// Mark one cell dirty on a table's timeline
    pub fn mark_cell_dirty(&self, table_id: &TableId, key: CellKey) {
        self.timelines
            .lock()
            .entry(table_id.clone())
            .or_insert_with(Timeline::new)
            .mark_dirty(key);
    }

    /// Clear a table's dirty cells (after its snapshot captured the state)
    pub fn clear_dirty_cells(&self, table_id: &TableId) {
        if let Some(timeline) = self.timelines.lock().get_mut(table_id) {
            timeline.clear_dirty();
        }
    }

    /// Drop a table's timeline entirely (table dropped)
    pub fn remove_timeline(&self, table_id: &TableId) {
        self.timelines.lock().remove(table_id);
    }

    /// Clear a stuck replay sentinel after the user resets
    pub fn reset_replay_sentinel(&self, table_id: &TableId) {
        if let Some(timeline) = self.timelines.lock().get_mut(table_id) {
            timeline.is_replaying = false;
        }
    }

    // =========================================================================
    // Apply
    // =========================================================================

    /// Apply a command to a table
    pub fn apply(&self, table_id: &TableId, kind: CommandKind) -> Result<()> {
        let entry = self
            .registry
            .get(table_id)
            .ok_or_else(|| CoreError::table_missing(table_id.to_string()))?;
        let table = entry.info.name.clone();
        let tier = kind.tier();

        let _flag = match &kind {
            CommandKind::MatchMerge { .. } => FlagGuard::raise(&self.flags.merging),
            CommandKind::Stack { .. } => FlagGuard::raise(&self.flags.combining),
            _ => FlagGuard::raise(&self.flags.transforming),
        };

        let mut timelines = self.timelines.lock();
        let timeline = timelines.entry(table_id.clone()).or_insert_with(Timeline::new);
        if timeline.is_replaying {
            return Err(CoreError::ReplayInProgress);
        }

        // Discard the redoable branch; its snapshots become garbage unless
        // still referenced by what remains.
        let removed = timeline.truncate_forward();
        if !removed.is_empty() {
            let still_referenced = timeline.referenced_snapshot_ids();
            for command in &removed {
                if let Some(id) = &command.snapshot_id_before {
                    if !still_referenced.contains(id) {
                        let _ = self.store.delete_snapshot(id);
                    }
                }
            }
            debug!(table = %table, discarded = removed.len(), "forward branch truncated");
        }

        let mut command = Command::new(table_id.clone(), kind);

        // Tier 3: snapshot the pre-state; undo restores it.
        if tier == Tier::Snapshot {
            let snapshot_id = SnapshotId::new(format!(
                "{}_undo_{}",
                table,
                &command.id.replace('-', "")[..8]
            ));
            self.store
                .export_table_to_snapshot(&self.engine, &table, &snapshot_id)?;
            command.snapshot_id_before = Some(snapshot_id);
        }

        let columns = schema::table_columns(&self.engine, &table)?;
        if columns.is_empty() {
            return Err(CoreError::table_missing(table));
        }

        // Tier 2: capture the inverse against the pre-apply schema.
        if tier == Tier::InverseSql {
            command.inverse_sql = inverse_statements(&command.kind, &table, &columns)?;
        }

        // Tier 1: chain bookkeeping — a fresh chain refreshes the shadow.
        if tier == Tier::Expression {
            let column = command
                .kind
                .chained_column()
                .expect("tier-1 command has a column")
                .to_string();
            command.chain_restart = !chain_continues(timeline, &column);
        }

        let statements = self.forward_with_shadow(&command, &table, &columns)?;
        let counts = self.engine.execute_all_in_transaction(&statements)?;
        let affected: usize = counts.iter().sum();

        // Bookkeeping only after the transaction committed.
        self.emit_audit(&command, affected);
        self.stamp_dirty(timeline, &command, &table)?;
        timeline.commands.push(command);
        timeline.current_position = timeline.commands.len() as i64 - 1;
        drop(timelines);

        self.refresh_registry(table_id, &table)?;
        self.registry.set_dirty(table_id, true)?;
        info!(table = %table, affected, "command applied");
        Ok(())
    }

    // =========================================================================
    // Undo / redo
    // =========================================================================

    /// Undo the last applied command
    pub fn undo(&self, table_id: &TableId) -> Result<()> {
        let entry = self
            .registry
            .get(table_id)
            .ok_or_else(|| CoreError::table_missing(table_id.to_string()))?;
        let table = entry.info.name.clone();

        let mut timelines = self.timelines.lock();
        let timeline = timelines
            .get_mut(table_id)
            .ok_or_else(|| CoreError::invalid_input("nothing to undo"))?;
        if timeline.is_replaying {
            return Err(CoreError::ReplayInProgress);
        }
        if timeline.current_position < 0 {
            return Err(CoreError::invalid_input("nothing to undo"));
        }

        let pos = timeline.current_position as usize;
        let command = timeline.commands[pos].clone();
        debug!(table = %table, position = pos, kind = command.kind.command_type(), "undo");

        match command.tier() {
            Tier::InverseSql => {
                self.engine.execute_all_in_transaction(&command.inverse_sql)?;
            }
            Tier::Expression => {
                let column = command
                    .kind
                    .chained_column()
                    .expect("tier-1 command has a column")
                    .to_string();
                if shadow_is_stale(timeline, pos, &column) {
                    self.restore_to_position(timeline, &table, pos as i64 - 1)?;
                } else {
                    let sql = undo_chain_sql(timeline, pos, &table, &column);
                    self.engine.execute_all_in_transaction(&[sql])?;
                }
            }
            Tier::Snapshot => {
                self.restore_to_position(timeline, &table, pos as i64 - 1)?;
            }
        }

        timeline.current_position -= 1;
        drop(timelines);

        self.refresh_registry(table_id, &table)?;
        self.registry.set_dirty(table_id, true)?;
        Ok(())
    }

    /// Redo the next command
    pub fn redo(&self, table_id: &TableId) -> Result<()> {
        let entry = self
            .registry
            .get(table_id)
            .ok_or_else(|| CoreError::table_missing(table_id.to_string()))?;
        let table = entry.info.name.clone();

        let mut timelines = self.timelines.lock();
        let timeline = timelines
            .get_mut(table_id)
            .ok_or_else(|| CoreError::invalid_input("nothing to redo"))?;
        if timeline.is_replaying {
            return Err(CoreError::ReplayInProgress);
        }
        if !timeline.can_redo() {
            return Err(CoreError::invalid_input("nothing to redo"));
        }

        let next_pos = (timeline.current_position + 1) as usize;
        let command = timeline.commands[next_pos].clone();
        debug!(table = %table, position = next_pos, kind = command.kind.command_type(), "redo");

        // Tier 3 redoes from its snapshot-before: restore the base state,
        // then re-issue the forward SQL with the frozen params.
        if command.tier() == Tier::Snapshot {
            let base = command
                .snapshot_id_before
                .clone()
                .ok_or_else(|| CoreError::internal("tier-3 command without snapshot"))?;
            self.store
                .import_table_from_snapshot(&self.engine, &base, &table)?;
        }

        let columns = schema::table_columns(&self.engine, &table)?;
        let statements = self.forward_with_shadow(&command, &table, &columns)?;
        self.engine.execute_all_in_transaction(&statements)?;

        timeline.current_position += 1;
        drop(timelines);

        self.refresh_registry(table_id, &table)?;
        self.registry.set_dirty(table_id, true)?;
        Ok(())
    }

    /// Rebuild a table's current state from its timeline
    ///
    /// Used at startup when the table's canonical snapshot is absent:
    /// restores the nearest reachable snapshot (ultimately the `original`
    /// marker) and replays forward to the current position.
    pub fn restore_current_state(&self, table_id: &TableId) -> Result<()> {
        let entry = self
            .registry
            .get(table_id)
            .ok_or_else(|| CoreError::table_missing(table_id.to_string()))?;
        let table = entry.info.name.clone();

        let mut timelines = self.timelines.lock();
        let timeline = timelines
            .get_mut(table_id)
            .ok_or_else(|| CoreError::table_missing(table_id.to_string()))?;
        if timeline.is_replaying {
            return Err(CoreError::ReplayInProgress);
        }
        let target = timeline.current_position;
        self.restore_to_position(timeline, &table, target)?;
        drop(timelines);

        self.refresh_registry(table_id, &table)
    }

    // =========================================================================
    // Replay
    // =========================================================================

    /// Restore a table to the state after `commands[0..=target]`
    ///
    /// Finds the nearest snapshot at or before the target, restores it, and
    /// replays forward. A replay failure leaves the sentinel set.
    fn restore_to_position(
        &self,
        timeline: &mut Timeline,
        table: &str,
        target: i64,
    ) -> Result<()> {
        // Nearest base: commands[s].snapshot_id_before captures the state at
        // s − 1; s == target + 1 needs no replay at all.
        let mut base: Option<(i64, SnapshotId)> = None;
        let mut s = target + 1;
        while s >= 0 {
            if let Some(command) = timeline.commands.get(s as usize) {
                if let Some(id) = &command.snapshot_id_before {
                    base = Some((s, id.clone()));
                    break;
                }
            }
            s -= 1;
        }
        let (replay_from, base_id) = match base {
            Some((s, id)) => (s, id),
            None => {
                let id = timeline
                    .snapshots
                    .get("original")
                    .cloned()
                    .ok_or_else(|| {
                        CoreError::internal("no snapshot reachable for restore")
                    })?;
                (0, id)
            }
        };

        self.store
            .import_table_from_snapshot(&self.engine, &base_id, table)?;
        if replay_from > target {
            return Ok(());
        }

        // Replay with the sentinel raised; it stays raised on failure.
        timeline.is_replaying = true;
        let _flag = FlagGuard::raise(&self.flags.replaying);
        info!(table = %table, from = replay_from, to = target, "replaying commands");
        for position in replay_from..=target {
            let command = timeline.commands[position as usize].clone();
            let result = (|| -> Result<()> {
                let columns = schema::table_columns(&self.engine, table)?;
                let statements = self.forward_with_shadow(&command, table, &columns)?;
                self.engine.execute_all_in_transaction(&statements)?;
                Ok(())
            })();
            if let Err(e) = result {
                warn!(table = %table, position, error = %e, "replay failed; sentinel set");
                return Err(CoreError::replay_failure(position as usize, e.to_string()));
            }
        }
        timeline.is_replaying = false;
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Forward statements plus tier-1 shadow bookkeeping
    fn forward_with_shadow(
        &self,
        command: &Command,
        table: &str,
        columns: &[ColumnInfo],
    ) -> Result<Vec<String>> {
        let mut statements = Vec::new();
        if command.tier() == Tier::Expression {
            let column = command
                .kind
                .chained_column()
                .expect("tier-1 command has a column");
            let shadow = shadow_column(column);
            let has_shadow = columns.iter().any(|c| c.name == shadow);
            if !has_shadow {
                statements.push(format!(
                    "ALTER TABLE {} ADD COLUMN {} VARCHAR",
                    qident(table),
                    qident(&shadow)
                ));
            }
            if !has_shadow || command.chain_restart {
                statements.push(format!(
                    "UPDATE {} SET {} = {}",
                    qident(table),
                    qident(&shadow),
                    qident(column)
                ));
            }
        }
        statements.extend(forward_statements(&command.kind, table, columns)?);
        Ok(statements)
    }

    fn emit_audit(&self, command: &Command, affected: usize) {
        match &command.kind {
            CommandKind::CellEditBatch { edits } => {
                for edit in edits {
                    self.audit.push(AuditEntry::cell_edit(
                        command.table_id.clone(),
                        edit.cs_id,
                        edit.column.clone(),
                        edit.previous.clone(),
                        edit.new.clone(),
                    ));
                }
            }
            CommandKind::MatchMerge { groups } => {
                let payload = serde_json::to_value(groups).unwrap_or(serde_json::Value::Null);
                self.audit.push(AuditEntry::transform(
                    command.table_id.clone(),
                    command.kind.command_type(),
                    command.kind.summary(),
                    affected,
                    payload,
                ));
            }
            kind => {
                self.audit.push(AuditEntry::transform(
                    command.table_id.clone(),
                    kind.command_type(),
                    kind.summary(),
                    affected,
                    serde_json::Value::Null,
                ));
            }
        }
    }

    /// Dirty-cell stamping
    ///
    /// Cell edits dirty exactly their cells; transforms stamp the touched
    /// columns across every row the table currently holds.
    fn stamp_dirty(&self, timeline: &mut Timeline, command: &Command, table: &str) -> Result<()> {
        match &command.kind {
            CommandKind::CellEditBatch { edits } => {
                for edit in edits {
                    timeline.mark_dirty(CellKey::new(edit.cs_id, edit.column.clone()));
                }
            }
            kind => {
                let touched = kind.touched_columns();
                if touched.is_empty() {
                    return Ok(());
                }
                let result = self.engine.run_query(&format!(
                    "SELECT {} FROM {}",
                    qident(CS_ID),
                    qident(table)
                ))?;
                for row in &result.rows {
                    if let Value::Int(cs_id) = row[0] {
                        for column in &touched {
                            timeline.mark_dirty(CellKey::new(cs_id, column.clone()));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn refresh_registry(&self, table_id: &TableId, table: &str) -> Result<()> {
        let columns = schema::table_columns(&self.engine, table)?;
        let rows = schema::row_count(&self.engine, table)?;
        self.registry.update(table_id, |e| {
            e.info.columns = columns;
            e.info.row_count = rows;
        })
    }

    // =========================================================================
    // Snapshot GC
    // =========================================================================

    /// Delete snapshots no timeline or table references
    ///
    /// Runs at startup after timelines hydrate. A snapshot survives when it
    /// is a table's canonical snapshot, a timeline marker, or a command's
    /// snapshot-before on any reachable timeline.
    pub fn gc_unreferenced_snapshots(&self) -> Result<Vec<SnapshotId>> {
        let mut referenced: Vec<SnapshotId> = Vec::new();
        for entry in self.registry.list() {
            referenced.push(entry.snapshot_id.clone());
        }
        for (_, timeline) in self.timelines.lock().iter() {
            for id in timeline.referenced_snapshot_ids() {
                if !referenced.contains(&id) {
                    referenced.push(id);
                }
            }
        }

        let mut removed = Vec::new();
        for id in self.store.list_manifest_ids()? {
            if !referenced.contains(&id) {
                self.store.delete_snapshot(&id)?;
                removed.push(id);
            }
        }
        if !removed.is_empty() {
            info!(count = removed.len(), "collected unreferenced snapshots");
        }
        Ok(removed)
    }
}

/// True when the new tier-1 command continues the current chain on `column`
fn chain_continues(timeline: &Timeline, column: &str) -> bool {
    // Walk back from the last applied command. Commands that cannot change
    // this column's values are transparent; the chain continues only when
    // the nearest relevant command is tier-1 on the same column.
    let mut idx = timeline.current_position;
    while idx >= 0 {
        let command = &timeline.commands[idx as usize];
        if command.kind.chained_column() == Some(column) {
            return true;
        }
        if command_touches_column(&command.kind, column) {
            return false;
        }
        idx -= 1;
    }
    false
}

/// True when undoing the tier-1 command at `pos` cannot trust the shadow
///
/// The shadow is stale when a newer, now-redoable command refreshed it.
fn shadow_is_stale(timeline: &Timeline, pos: usize, column: &str) -> bool {
    timeline.commands[pos + 1..].iter().any(|c| {
        c.chain_restart && c.kind.chained_column() == Some(column)
    })
}

/// Whether a command can change values in `column`
fn command_touches_column(kind: &CommandKind, column: &str) -> bool {
    match kind {
        CommandKind::CellEditBatch { edits } => edits.iter().any(|e| e.column == column),
        CommandKind::Formula { column: c, .. }
        | CommandKind::CastType { column: c, .. }
        | CommandKind::Standardize { column: c, .. } => c == column,
        CommandKind::RenameColumn { .. } => false,
        CommandKind::Trim { .. }
        | CommandKind::Uppercase { .. }
        | CommandKind::Lowercase { .. }
        | CommandKind::Proper { .. }
        | CommandKind::PadZeros { .. }
        | CommandKind::Replace { .. } => false, // handled by the chain test
        CommandKind::SplitColumn { left, right, .. } => left == column || right == column,
        // Row-level and free-form commands may touch anything.
        CommandKind::Dedupe { .. }
        | CommandKind::MatchMerge { .. }
        | CommandKind::Stack { .. }
        | CommandKind::Join { .. }
        | CommandKind::CustomSql { .. } => true,
    }
}

/// SQL projecting `column` back one step through its chain
fn undo_chain_sql(timeline: &Timeline, pos: usize, table: &str, column: &str) -> String {
    // Collect the chain ending at pos: walk back over tier-1 commands on
    // this column until (and including) the chain restart.
    let mut start = pos;
    loop {
        let command = &timeline.commands[start];
        if command.chain_restart || start == 0 {
            break;
        }
        let prev = &timeline.commands[start - 1];
        if prev.kind.chained_column() != Some(column) {
            break;
        }
        start -= 1;
    }

    // Re-compose every step except the undone one over the shadow.
    let mut expr = qident(&shadow_column(column));
    for command in &timeline.commands[start..pos] {
        if command.kind.chained_column() == Some(column) {
            expr = command
                .kind
                .expression_over(&expr)
                .expect("tier-1 command has an expression");
        }
    }
    format!(
        "UPDATE {} SET {} = {}",
        qident(table),
        qident(column),
        expr
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use cleanslate_engine::identity;
    use cleanslate_store::TableEntry;
    use cleanslate_core::{ColumnType, TableInfo};
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        executor: CommandExecutor,
        engine: Arc<Engine>,
        table_id: TableId,
    }

    fn fixture(rows: &[(&str, i64)]) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(SnapshotStore::open(tmp.path()).unwrap());
        let engine = Arc::new(Engine::open_in_memory().unwrap());
        let registry = Arc::new(TableRegistry::new());

        engine
            .execute("CREATE TABLE people (name VARCHAR, account_number VARCHAR)")
            .unwrap();
        for (name, account) in rows {
            engine
                .execute(&format!(
                    "INSERT INTO people VALUES ('{name}', '{account}')"
                ))
                .unwrap();
        }
        identity::stamp_identity(&engine, "people").unwrap();

        let columns = schema::table_columns(&engine, "people").unwrap();
        let info = TableInfo::new(TableId::new(), "people", columns, rows.len());
        let table_id = info.id.clone();
        registry.insert(TableEntry::materialized(info));

        let executor =
            CommandExecutor::new(Arc::clone(&engine), Arc::clone(&store), Arc::clone(&registry));

        // Ingest always exports the original marker snapshot.
        let original = SnapshotId::new("original_people");
        store
            .export_table_to_snapshot(&engine, "people", &original)
            .unwrap();
        executor.set_snapshot_marker(&table_id, "original", original);

        Fixture {
            _tmp: tmp,
            executor,
            engine,
            table_id,
        }
    }

    fn names(engine: &Engine) -> Vec<String> {
        engine
            .run_query("SELECT name FROM people ORDER BY _cs_id")
            .unwrap()
            .rows
            .into_iter()
            .map(|r| r[0].display_string())
            .collect()
    }

    #[test]
    fn test_tier1_apply_and_undo() {
        let f = fixture(&[("  Alice  ", 1)]);
        f.executor
            .apply(&f.table_id, CommandKind::Trim { column: "name".into() })
            .unwrap();
        assert_eq!(names(&f.engine), vec!["Alice"]);

        f.executor.undo(&f.table_id).unwrap();
        assert_eq!(names(&f.engine), vec!["  Alice  "]);
        assert_eq!(f.executor.timeline(&f.table_id).current_position, -1);
    }

    #[test]
    fn test_tier1_chain_stacks_and_unwinds() {
        let f = fixture(&[("  alice  ", 1)]);
        f.executor
            .apply(&f.table_id, CommandKind::Trim { column: "name".into() })
            .unwrap();
        f.executor
            .apply(&f.table_id, CommandKind::Uppercase { column: "name".into() })
            .unwrap();
        assert_eq!(names(&f.engine), vec!["ALICE"]);

        f.executor.undo(&f.table_id).unwrap();
        assert_eq!(names(&f.engine), vec!["alice"]);
        f.executor.undo(&f.table_id).unwrap();
        assert_eq!(names(&f.engine), vec!["  alice  "]);
    }

    #[test]
    fn test_tier1_redo() {
        let f = fixture(&[("  alice  ", 1)]);
        f.executor
            .apply(&f.table_id, CommandKind::Trim { column: "name".into() })
            .unwrap();
        f.executor.undo(&f.table_id).unwrap();
        f.executor.redo(&f.table_id).unwrap();
        assert_eq!(names(&f.engine), vec!["alice"]);
        assert_eq!(f.executor.timeline(&f.table_id).current_position, 0);
    }

    #[test]
    fn test_tier2_rename_undo_redo() {
        let f = fixture(&[("a", 1)]);
        f.executor
            .apply(
                &f.table_id,
                CommandKind::RenameColumn { from: "name".into(), to: "customer_name".into() },
            )
            .unwrap();
        let cols = schema::table_columns(&f.engine, "people").unwrap();
        assert!(cols.iter().any(|c| c.name == "customer_name"));

        f.executor.undo(&f.table_id).unwrap();
        let cols = schema::table_columns(&f.engine, "people").unwrap();
        assert!(cols.iter().any(|c| c.name == "name"));

        f.executor.redo(&f.table_id).unwrap();
        let cols = schema::table_columns(&f.engine, "people").unwrap();
        assert!(cols.iter().any(|c| c.name == "customer_name"));
    }

    #[test]
    fn test_cell_edit_batch_audit_and_dirty() {
        let f = fixture(&[("a", 1), ("b", 2)]);
        f.executor
            .apply(
                &f.table_id,
                CommandKind::CellEditBatch {
                    edits: vec![crate::command::CellEdit {
                        cs_id: 100,
                        column: "name".into(),
                        previous: Value::Text("a".into()),
                        new: Value::Text("EDITED_VALUE".into()),
                    }],
                },
            )
            .unwrap();
        assert_eq!(names(&f.engine), vec!["EDITED_VALUE", "b"]);

        let audit = f.executor.audit().entries_for(&f.table_id);
        assert_eq!(audit.len(), 1);
        assert!(matches!(audit[0], AuditEntry::CellEdit { cs_id: 100, .. }));

        let timeline = f.executor.timeline(&f.table_id);
        assert_eq!(timeline.dirty_cells.len(), 1);
        assert!(timeline.dirty_cells.contains(&CellKey::new(100, "name")));

        f.executor.undo(&f.table_id).unwrap();
        assert_eq!(names(&f.engine), vec!["a", "b"]);
    }

    #[test]
    fn test_tier3_undo_restores_snapshot() {
        let f = fixture(&[("a", 1), ("a", 1), ("b", 2)]);
        f.executor
            .apply(&f.table_id, CommandKind::Dedupe { columns: vec![] })
            .unwrap();
        assert_eq!(names(&f.engine), vec!["a", "b"]);

        f.executor.undo(&f.table_id).unwrap();
        assert_eq!(names(&f.engine), vec!["a", "a", "b"]);

        f.executor.redo(&f.table_id).unwrap();
        assert_eq!(names(&f.engine), vec!["a", "b"]);
    }

    #[test]
    fn test_pad_zeros_params_survive_undo_redo() {
        let f = fixture(&[("x", 123), ("y", 456)]);
        f.executor
            .apply(
                &f.table_id,
                CommandKind::PadZeros { column: "account_number".into(), length: 9 },
            )
            .unwrap();
        f.executor
            .apply(
                &f.table_id,
                CommandKind::RenameColumn { from: "name".into(), to: "customer_name".into() },
            )
            .unwrap();
        f.executor.undo(&f.table_id).unwrap();

        // Pad effect intact, params untouched.
        let result = f
            .engine
            .run_query("SELECT account_number FROM people ORDER BY _cs_id")
            .unwrap();
        assert_eq!(result.rows[0][0].display_string(), "000000123");
        let timeline = f.executor.timeline(&f.table_id);
        match &timeline.commands[0].kind {
            CommandKind::PadZeros { length, .. } => assert_eq!(*length, 9),
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_forward_branch_truncation_discards_snapshots() {
        let f = fixture(&[("a", 1), ("a", 1)]);
        f.executor
            .apply(&f.table_id, CommandKind::Dedupe { columns: vec![] })
            .unwrap();
        let snapshot = f.executor.timeline(&f.table_id).commands[0]
            .snapshot_id_before
            .clone()
            .unwrap();
        assert!(f.executor.timeline(&f.table_id).commands[0].snapshot_id_before.is_some());

        f.executor.undo(&f.table_id).unwrap();
        f.executor
            .apply(&f.table_id, CommandKind::Trim { column: "name".into() })
            .unwrap();

        let timeline = f.executor.timeline(&f.table_id);
        assert_eq!(timeline.commands.len(), 1);
        assert!(matches!(timeline.commands[0].kind, CommandKind::Trim { .. }));
        // The dedupe snapshot was only referenced by the discarded branch.
        assert!(!timeline.referenced_snapshot_ids().contains(&snapshot));
    }

    #[test]
    fn test_apply_failure_appends_nothing() {
        let f = fixture(&[("a", 1)]);
        let before = f.executor.timeline(&f.table_id).commands.len();
        let err = f.executor.apply(
            &f.table_id,
            CommandKind::CustomSql { sql: "UPDATE nonexistent SET x = 1".into() },
        );
        assert!(err.is_err());
        assert_eq!(f.executor.timeline(&f.table_id).commands.len(), before);
        // Data untouched.
        assert_eq!(names(&f.engine), vec!["a"]);
    }

    #[test]
    fn test_undo_nothing_errors() {
        let f = fixture(&[("a", 1)]);
        assert!(f.executor.undo(&f.table_id).is_err());
        assert!(f.executor.redo(&f.table_id).is_err());
    }

    #[test]
    fn test_stale_shadow_falls_back_to_replay() {
        // trim; dedupe (tier 3); upper — undo upper, undo dedupe, undo trim
        // must land back on the original text.
        let f = fixture(&[("  alice  ", 1), ("  alice  ", 1)]);
        f.executor
            .apply(&f.table_id, CommandKind::Trim { column: "name".into() })
            .unwrap();
        f.executor
            .apply(&f.table_id, CommandKind::Dedupe { columns: vec![] })
            .unwrap();
        f.executor
            .apply(&f.table_id, CommandKind::Uppercase { column: "name".into() })
            .unwrap();
        assert_eq!(names(&f.engine), vec!["ALICE"]);

        f.executor.undo(&f.table_id).unwrap();
        assert_eq!(names(&f.engine), vec!["alice"]);
        f.executor.undo(&f.table_id).unwrap();
        assert_eq!(names(&f.engine), vec!["alice", "alice"]);
        f.executor.undo(&f.table_id).unwrap();
        assert_eq!(names(&f.engine), vec!["  alice  ", "  alice  "]);
    }

    #[test]
    fn test_standardize_and_undo_via_original() {
        let f = fixture(&[("CA", 1), ("N.Y.", 2)]);
        let mut mapping = std::collections::BTreeMap::new();
        mapping.insert("CA".to_string(), "California".to_string());
        f.executor
            .apply(&f.table_id, CommandKind::Standardize { column: "name".into(), mapping })
            .unwrap();
        assert_eq!(names(&f.engine), vec!["California", "N.Y."]);
        f.executor.undo(&f.table_id).unwrap();
        assert_eq!(names(&f.engine), vec!["CA", "N.Y."]);
    }

    #[test]
    fn test_replay_sentinel_blocks_further_commands() {
        let f = fixture(&[("a", 1)]);
        // Force the sentinel by hand (as a failed replay would leave it).
        {
            let mut timelines = f.executor.timelines.lock();
            timelines
                .entry(f.table_id.clone())
                .or_insert_with(Timeline::new)
                .is_replaying = true;
        }
        let err = f
            .executor
            .apply(&f.table_id, CommandKind::Trim { column: "name".into() })
            .unwrap_err();
        assert!(err.is_replay_failure());

        f.executor.reset_replay_sentinel(&f.table_id);
        f.executor
            .apply(&f.table_id, CommandKind::Trim { column: "name".into() })
            .unwrap();
    }

    #[test]
    fn test_gc_removes_unreferenced_snapshots() {
        let f = fixture(&[("a", 1)]);
        // An orphan snapshot nothing references.
        f.executor
            .apply(&f.table_id, CommandKind::Trim { column: "name".into() })
            .unwrap();
        let store = Arc::clone(&f.executor.store);
        store
            .export_table_to_snapshot(&f.engine, "people", &SnapshotId::new("orphan_xyz"))
            .unwrap();

        let removed = f.executor.gc_unreferenced_snapshots().unwrap();
        assert_eq!(removed, vec![SnapshotId::new("orphan_xyz")]);
        // The original marker snapshot survives.
        assert!(store.snapshot_exists(&SnapshotId::new("original_people")));
    }

    #[test]
    fn test_cast_type_and_undo() {
        let f = fixture(&[("a", 123), ("b", 456)]);
        f.executor
            .apply(
                &f.table_id,
                CommandKind::CastType {
                    column: "account_number".into(),
                    to: cleanslate_core::ColumnType::Bigint,
                },
            )
            .unwrap();
        let cols = schema::table_columns(&f.engine, "people").unwrap();
        let cast = cols.iter().find(|c| c.name == "account_number").unwrap();
        assert_eq!(cast.column_type, cleanslate_core::ColumnType::Bigint);
        let result = f
            .engine
            .run_query("SELECT account_number FROM people ORDER BY _cs_id")
            .unwrap();
        assert_eq!(result.rows[0][0], Value::Int(123));

        f.executor.undo(&f.table_id).unwrap();
        let cols = schema::table_columns(&f.engine, "people").unwrap();
        let back = cols.iter().find(|c| c.name == "account_number").unwrap();
        assert_eq!(back.column_type, cleanslate_core::ColumnType::Varchar);
    }

    #[test]
    fn test_split_column() {
        let f = fixture(&[("john smith", 1)]);
        f.executor
            .apply(
                &f.table_id,
                CommandKind::SplitColumn {
                    column: "name".into(),
                    separator: " ".into(),
                    left: "first".into(),
                    right: "last".into(),
                },
            )
            .unwrap();
        let result = f
            .engine
            .run_query("SELECT first, last FROM people")
            .unwrap();
        assert_eq!(
            result.rows[0],
            vec![Value::Text("john".into()), Value::Text("smith".into())]
        );
    }

    #[test]
    fn test_join_pulls_columns() {
        let f = fixture(&[("a", 1), ("b", 2)]);
        f.engine
            .execute_batch(
                "CREATE TABLE lookup (key VARCHAR, city VARCHAR); \
                 INSERT INTO lookup VALUES ('a', 'nyc'), ('b', 'la');",
            )
            .unwrap();
        f.executor
            .apply(
                &f.table_id,
                CommandKind::Join {
                    other_table: "lookup".into(),
                    left_key: "name".into(),
                    right_key: "key".into(),
                    columns: vec!["city".into()],
                },
            )
            .unwrap();
        let result = f
            .engine
            .run_query("SELECT city FROM people ORDER BY _cs_id")
            .unwrap();
        assert_eq!(result.rows[0][0], Value::Text("nyc".into()));
        assert_eq!(result.rows[1][0], Value::Text("la".into()));

        // Snapshot-backed undo removes the joined column.
        f.executor.undo(&f.table_id).unwrap();
        let cols = schema::table_columns(&f.engine, "people").unwrap();
        assert!(!cols.iter().any(|c| c.name == "city"));
    }

    #[test]
    fn test_stack_command_appends_with_gap_ids() {
        let f = fixture(&[("a", 1), ("b", 2)]);
        f.engine
            .execute("CREATE TABLE more (name VARCHAR, account_number VARCHAR)")
            .unwrap();
        f.engine
            .execute("INSERT INTO more VALUES ('c', '3')")
            .unwrap();
        identity::stamp_identity(&f.engine, "more").unwrap();

        f.executor
            .apply(&f.table_id, CommandKind::Stack { other_table: "more".into() })
            .unwrap();
        let result = f
            .engine
            .run_query("SELECT _cs_id, name FROM people ORDER BY _cs_id")
            .unwrap();
        let ids: Vec<i64> = result.rows.iter().map(|r| r[0].as_int().unwrap()).collect();
        assert_eq!(ids, vec![100, 200, 300]);
        assert_eq!(result.rows[2][1], Value::Text("c".into()));
    }

    #[test]
    fn test_match_merge_and_audit_payload() {
        let f = fixture(&[("a", 1), ("a", 1), ("b", 2)]);
        let mut resolved = std::collections::BTreeMap::new();
        resolved.insert("name".to_string(), Value::Text("A".into()));
        f.executor
            .apply(
                &f.table_id,
                CommandKind::MatchMerge {
                    groups: vec![crate::command::MergeGroup {
                        survivor_cs_id: 100,
                        merged_cs_ids: vec![200],
                        resolved,
                    }],
                },
            )
            .unwrap();
        assert_eq!(names(&f.engine), vec!["A", "b"]);

        let entries = f.executor.audit().entries_for(&f.table_id);
        match &entries[0] {
            AuditEntry::Transform { command_type, has_row_details, .. } => {
                assert_eq!(command_type, "merge:duplicates");
                assert!(*has_row_details);
            }
            _ => panic!("expected transform entry"),
        }

        // Merge is snapshot-backed: undo restores the merged rows.
        f.executor.undo(&f.table_id).unwrap();
        assert_eq!(names(&f.engine), vec!["a", "a", "b"]);
    }

    #[test]
    fn test_busy_flags_idle_after_apply() {
        let f = fixture(&[("a", 1)]);
        f.executor
            .apply(&f.table_id, CommandKind::Trim { column: "name".into() })
            .unwrap();
        assert!(!f.executor.flags().is_transforming());
        assert!(!f.executor.flags().is_replaying());
    }
}
