//! Edit batch
//!
//! Rapid cell edits coalesce here before becoming one `edit:cell-batch`
//! command. Edits to the same `(cs_id, column)` fold together — earliest
//! previous value, latest new value — so a burst of keystrokes undoes as
//! one step.
//!
//! Flushing is deadline-driven (500 ms after the last edit) or immediate at
//! well-defined boundaries: table switch, explicit flush, freeze, the
//! unload guard, and transform issue. The batch itself stays passive; the
//! workspace drains it and hands the command to the executor. At most one
//! flush is in flight per batch.

use crate::command::CellEdit;
use cleanslate_core::{TableId, Value};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Debounce window after the last edit
pub const FLUSH_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
struct PendingEdit {
    previous: Value,
    new: Value,
}

#[derive(Debug, Default)]
struct BatchState {
    table_id: Option<TableId>,
    pending: FxHashMap<(i64, String), PendingEdit>,
    last_edit_at: Option<Instant>,
    flushing: bool,
}

/// Outcome of recording an edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The edit joined the current batch
    Buffered,
    /// The batch holds edits for a different table; flush it first
    TableMismatch,
}

/// The pending-edit buffer
#[derive(Debug, Default)]
pub struct EditBatch {
    state: Mutex<BatchState>,
}

impl EditBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one cell edit
    ///
    /// Coalesces with an existing pending edit for the same cell: the
    /// earliest previous value and the latest new value win.
    pub fn record(
        &self,
        table_id: &TableId,
        cs_id: i64,
        column: &str,
        previous: Value,
        new: Value,
    ) -> RecordOutcome {
        let mut state = self.state.lock();
        match &state.table_id {
            Some(current) if current != table_id => return RecordOutcome::TableMismatch,
            _ => {}
        }
        state.table_id = Some(table_id.clone());
        state.last_edit_at = Some(Instant::now());
        state
            .pending
            .entry((cs_id, column.to_string()))
            .and_modify(|e| e.new = new.clone())
            .or_insert(PendingEdit { previous, new });
        RecordOutcome::Buffered
    }

    /// Pending edit count
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// True when nothing is pending
    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    /// The table the pending edits target
    pub fn table_id(&self) -> Option<TableId> {
        self.state.lock().table_id.clone()
    }

    /// True when the debounce window has elapsed since the last edit
    pub fn is_due(&self, now: Instant) -> bool {
        let state = self.state.lock();
        match state.last_edit_at {
            Some(last) if !state.pending.is_empty() => now.duration_since(last) >= FLUSH_DEBOUNCE,
            _ => false,
        }
    }

    /// Drain the batch for a flush
    ///
    /// Returns None when empty or when another flush is already in flight;
    /// otherwise marks the flush in flight and hands over the edits ordered
    /// by `(cs_id, column)`. The caller must finish with [`Self::flush_done`].
    pub fn take_for_flush(&self) -> Option<(TableId, Vec<CellEdit>)> {
        let mut state = self.state.lock();
        if state.flushing || state.pending.is_empty() {
            return None;
        }
        let table_id = state.table_id.clone()?;
        state.flushing = true;

        let mut edits: Vec<CellEdit> = state
            .pending
            .drain()
            .map(|((cs_id, column), e)| CellEdit {
                cs_id,
                column,
                previous: e.previous,
                new: e.new,
            })
            .collect();
        edits.sort_by(|a, b| (a.cs_id, &a.column).cmp(&(b.cs_id, &b.column)));
        state.last_edit_at = None;
        debug!(table = %table_id, edits = edits.len(), "edit batch drained");
        Some((table_id, edits))
    }

    /// Mark the in-flight flush finished
    pub fn flush_done(&self) {
        let mut state = self.state.lock();
        state.flushing = false;
        if state.pending.is_empty() {
            state.table_id = None;
        }
    }

    /// Drop everything (the target table disappeared)
    pub fn discard(&self) {
        let mut state = self.state.lock();
        state.pending.clear();
        state.table_id = None;
        state.last_edit_at = None;
        state.flushing = false;
    }

    /// True while unsaved edits should arm the navigation-away guard
    pub fn guard_armed(&self) -> bool {
        !self.is_empty()
    }
}
