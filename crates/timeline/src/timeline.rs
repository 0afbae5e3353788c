//! Per-table timeline state
//!
//! A timeline is the ordered command log for one table plus the cursor into
//! it. Position −1 is the original (as-ingested) state; the position always
//! points at the last applied command. Snapshot markers and the dirty-cell
//! set persist with the timeline in the app state.

use crate::command::Command;
use cleanslate_core::{CellKey, SnapshotId};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The command log and cursor for one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    /// Applied (and redoable) commands, dense
    pub commands: Vec<Command>,
    /// Index of the last applied command; −1 = original state
    pub current_position: i64,
    /// Named snapshot markers (e.g. `original` → the ingest snapshot)
    pub snapshots: BTreeMap<String, SnapshotId>,
    /// Cells edited since the last snapshot, as `"{cs_id}:{column}"` keys
    pub dirty_cells: FxHashSet<CellKey>,
    /// Set while an undo replay runs; survives a failed replay as the
    /// unrecoverable-state sentinel
    pub is_replaying: bool,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Timeline {
    /// A fresh timeline at the original state
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            current_position: -1,
            snapshots: BTreeMap::new(),
            dirty_cells: FxHashSet::default(),
            is_replaying: false,
        }
    }

    /// The last applied command, if any
    pub fn current_command(&self) -> Option<&Command> {
        if self.current_position < 0 {
            None
        } else {
            self.commands.get(self.current_position as usize)
        }
    }

    /// The next redoable command, if any
    pub fn next_command(&self) -> Option<&Command> {
        self.commands.get((self.current_position + 1) as usize)
    }

    /// True when an undo is possible
    pub fn can_undo(&self) -> bool {
        self.current_position >= 0 && !self.is_replaying
    }

    /// True when a redo is possible
    pub fn can_redo(&self) -> bool {
        !self.is_replaying && ((self.current_position + 1) as usize) < self.commands.len()
    }

    /// Drop the redoable branch, returning the removed commands
    ///
    /// Called when a new command applies while redoable commands exist; the
    /// forward branch is discarded and its snapshots become garbage.
    pub fn truncate_forward(&mut self) -> Vec<Command> {
        let keep = (self.current_position + 1) as usize;
        if keep >= self.commands.len() {
            return Vec::new();
        }
        self.commands.split_off(keep)
    }

    /// Every snapshot id reachable from this timeline
    ///
    /// Reachable snapshots must not be garbage-collected: marker snapshots
    /// plus every command's snapshot-before.
    pub fn referenced_snapshot_ids(&self) -> Vec<SnapshotId> {
        let mut ids: Vec<SnapshotId> = self.snapshots.values().cloned().collect();
        for command in &self.commands {
            if let Some(id) = &command.snapshot_id_before {
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
        }
        ids
    }

    /// Record a dirty cell
    pub fn mark_dirty(&mut self, key: CellKey) {
        self.dirty_cells.insert(key);
    }

    /// Clear the dirty-cell set (after a snapshot captures the state)
    pub fn clear_dirty(&mut self) {
        self.dirty_cells.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;
    use cleanslate_core::TableId;

    fn cmd(table: &TableId) -> Command {
        Command::new(table.clone(), CommandKind::Trim { column: "c".into() })
    }

    #[test]
    fn test_new_timeline_at_original() {
        let t = Timeline::new();
        assert_eq!(t.current_position, -1);
        assert!(!t.can_undo());
        assert!(!t.can_redo());
        assert!(t.current_command().is_none());
    }

    #[test]
    fn test_cursor_movement() {
        let table = TableId::new();
        let mut t = Timeline::new();
        t.commands.push(cmd(&table));
        t.commands.push(cmd(&table));
        t.current_position = 1;

        assert!(t.can_undo());
        assert!(!t.can_redo());

        t.current_position = 0;
        assert!(t.can_undo());
        assert!(t.can_redo());
        assert_eq!(t.next_command().unwrap().id, t.commands[1].id);
    }

    #[test]
    fn test_truncate_forward() {
        let table = TableId::new();
        let mut t = Timeline::new();
        for _ in 0..4 {
            t.commands.push(cmd(&table));
        }
        t.current_position = 1;
        let removed = t.truncate_forward();
        assert_eq!(removed.len(), 2);
        assert_eq!(t.commands.len(), 2);

        // Nothing to truncate at the tip.
        assert!(t.truncate_forward().is_empty());
    }

    #[test]
    fn test_replay_sentinel_blocks_undo_redo() {
        let table = TableId::new();
        let mut t = Timeline::new();
        t.commands.push(cmd(&table));
        t.current_position = 0;
        t.is_replaying = true;
        assert!(!t.can_undo());
        assert!(!t.can_redo());
    }

    #[test]
    fn test_referenced_snapshot_ids() {
        let table = TableId::new();
        let mut t = Timeline::new();
        t.snapshots
            .insert("original".into(), SnapshotId::new("original_people"));
        let mut c = cmd(&table);
        c.snapshot_id_before = Some(SnapshotId::new("people_undo_1"));
        t.commands.push(c);
        let mut c2 = cmd(&table);
        c2.snapshot_id_before = Some(SnapshotId::new("people_undo_1"));
        t.commands.push(c2);

        let ids = t.referenced_snapshot_ids();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&SnapshotId::new("original_people")));
        assert!(ids.contains(&SnapshotId::new("people_undo_1")));
    }

    #[test]
    fn test_dirty_cells() {
        let mut t = Timeline::new();
        t.mark_dirty(CellKey::new(100, "name"));
        t.mark_dirty(CellKey::new(100, "name"));
        assert_eq!(t.dirty_cells.len(), 1);
        t.clear_dirty();
        assert!(t.dirty_cells.is_empty());
    }

    #[test]
    fn test_serde_roundtrip() {
        let table = TableId::new();
        let mut t = Timeline::new();
        t.commands.push(cmd(&table));
        t.current_position = 0;
        t.mark_dirty(CellKey::new(100, "name"));
        t.snapshots.insert("original".into(), SnapshotId::new("x"));

        let json = serde_json::to_string(&t).unwrap();
        let back: Timeline = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
