//! Startup orchestration
//!
//! Cold start runs in strict order:
//! 1. initialize the engine
//! 2. startup cleanup of the snapshots directory
//! 3. read the app-state JSON
//! 4. verify each referenced table's snapshot; missing → mark the table
//!    missing (kept for re-ingest, never an error)
//! 5. thaw the previously-active table
//! 6. hydrate timelines
//! 7. collect unreferenced snapshots, checkpoint
//! 8. signal ready

use crate::state;
use crate::workspace::{PersistenceStatus, Workspace};
use cleanslate_core::Result;
use cleanslate_engine::Engine;
use cleanslate_store::{Residency, SnapshotStore, TableRegistry, STORE_DIR_NAME};
use cleanslate_timeline::{CommandExecutor, EditBatch, Timeline};
use cleanslate_vfs::StoreDir;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Boot a workspace from its directory
pub fn boot(root: &Path) -> Result<Workspace> {
    // 1. Engine first; everything else talks to it.
    let engine = Arc::new(Engine::open_in_memory()?);

    // 2. Cleanup before any snapshot is read.
    let store = Arc::new(SnapshotStore::open(root)?);
    let cleanup = store.startup_cleanup();
    if cleanup.total() > 0 {
        info!(removed = cleanup.total(), "startup cleanup finished");
    }

    // 3. App state.
    let state_dir = StoreDir::ensure(root.join(STORE_DIR_NAME))?;
    let app_state = state::load(&state_dir);

    // 4. Registry hydration with snapshot verification. Nothing is
    // materialized yet, whatever the saved residency says.
    let registry = Arc::new(TableRegistry::new());
    let timelines: Vec<(cleanslate_core::TableId, Timeline)> = app_state
        .timelines
        .iter()
        .map(|(id, t)| (cleanslate_core::TableId::from_string(id.clone()), t.clone()))
        .collect();

    for mut entry in app_state.tables {
        let timeline = timelines
            .iter()
            .find(|(id, _)| *id == entry.info.id)
            .map(|(_, t)| t);
        let reachable = store.snapshot_exists(&entry.snapshot_id)
            || timeline.is_some_and(|t| {
                t.referenced_snapshot_ids()
                    .iter()
                    .any(|id| store.snapshot_exists(id))
            });
        entry.residency = if reachable {
            Residency::Frozen
        } else {
            warn!(table = %entry.info.name, "no snapshot on disk, marking missing");
            Residency::Missing
        };
        registry.insert(entry);
    }

    // 6. Timelines hydrate before anything replays or applies.
    let executor = Arc::new(CommandExecutor::new(
        Arc::clone(&engine),
        Arc::clone(&store),
        Arc::clone(&registry),
    ));
    executor.load_timelines(timelines);

    let workspace = Workspace {
        engine,
        store,
        registry,
        executor,
        edits: EditBatch::new(),
        state_dir,
        active_table: Mutex::new(app_state.active_table_id),
        preferences: Mutex::new(app_state.preferences),
        persistence: Mutex::new(PersistenceStatus::Idle),
        ready: AtomicBool::new(false),
    };

    // 5. Thaw the previously-active table (after hydration so replay-free
    // thaw sees the registry; a failed thaw downgrades, never aborts).
    let active = workspace.active_table.lock().clone();
    if let Some(active) = active {
        match workspace.registry.get(&active) {
            Some(entry) if entry.residency == Residency::Frozen => {
                let thawed = workspace
                    .store
                    .thaw(&workspace.engine, &workspace.registry, &active)?;
                if !thawed {
                    // No canonical snapshot; rebuild from the original
                    // marker by replaying the timeline.
                    match workspace.executor.restore_current_state(&active) {
                        Ok(()) => {
                            workspace
                                .registry
                                .update(&active, |e| {
                                    e.residency = Residency::Materialized;
                                    e.dirty = true;
                                })?;
                        }
                        Err(e) => {
                            warn!(error = %e, "previously-active table could not thaw");
                        }
                    }
                }
            }
            Some(_) => {}
            None => {
                *workspace.active_table.lock() = None;
            }
        }
    }

    // 7. Garbage, then let the engine release what the boot touched.
    workspace.executor.gc_unreferenced_snapshots()?;
    workspace.engine.checkpoint()?;

    // 8. Ready.
    workspace.ready.store(true, Ordering::SeqCst);
    info!(tables = workspace.registry.len(), "workspace ready");
    Ok(workspace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cleanslate_core::{ColumnInfo, ColumnType, Value};
    use tempfile::TempDir;

    fn people_columns() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new("name", ColumnType::Varchar),
            ColumnInfo::new("age", ColumnType::Bigint),
        ]
    }

    fn people_rows() -> Vec<Vec<Value>> {
        vec![
            vec![Value::Text("alice".into()), Value::Int(30)],
            vec![Value::Text("bob".into()), Value::Int(40)],
        ]
    }

    #[test]
    fn test_cold_start_empty_directory() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::open(tmp.path()).unwrap();
        assert!(ws.is_ready());
        assert!(ws.registry.is_empty());
        assert!(ws.active_table_id().is_none());
    }

    #[test]
    fn test_restart_restores_active_table() {
        let tmp = TempDir::new().unwrap();
        let table_id;
        {
            let ws = Workspace::open(tmp.path()).unwrap();
            table_id = ws.ingest("People", &people_columns(), &people_rows()).unwrap();
            ws.freeze_active().unwrap();
        }
        let ws = Workspace::open(tmp.path()).unwrap();
        assert_eq!(ws.active_table_id(), Some(table_id.clone()));
        let entry = ws.registry.get(&table_id).unwrap();
        assert_eq!(entry.residency, Residency::Materialized);
        assert_eq!(entry.info.name, "people");

        let rows = ws.user_rows(&table_id).unwrap();
        assert_eq!(rows.columns, vec!["name", "age"]);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_missing_snapshot_marks_table_missing() {
        let tmp = TempDir::new().unwrap();
        let table_id;
        {
            let ws = Workspace::open(tmp.path()).unwrap();
            table_id = ws.ingest("people", &people_columns(), &people_rows()).unwrap();
            ws.freeze_active().unwrap();
            // Remove every snapshot file behind the state's back.
            for id in ws.store.list_manifest_ids().unwrap() {
                ws.store.delete_snapshot(&id).unwrap();
            }
        }
        let ws = Workspace::open(tmp.path()).unwrap();
        let entry = ws.registry.get(&table_id).unwrap();
        assert_eq!(entry.residency, Residency::Missing);
        assert!(ws.is_ready());
    }

    #[test]
    fn test_corrupt_seed_file_self_heals() {
        let tmp = TempDir::new().unwrap();
        let snapshots = tmp.path().join("cleanslate").join("snapshots");
        std::fs::create_dir_all(&snapshots).unwrap();
        std::fs::write(snapshots.join("foo_shard_0.arrow"), b"1234").unwrap();

        let ws = Workspace::open(tmp.path()).unwrap();
        assert!(ws.is_ready());
        assert!(!snapshots.join("foo_shard_0.arrow").exists());
    }

    #[test]
    fn test_startup_collects_unreferenced_snapshots() {
        let tmp = TempDir::new().unwrap();
        {
            let ws = Workspace::open(tmp.path()).unwrap();
            ws.ingest("people", &people_columns(), &people_rows()).unwrap();
            // A snapshot nothing references.
            ws.store
                .export_table_to_snapshot(
                    &ws.engine,
                    "people",
                    &cleanslate_core::SnapshotId::new("stray_snapshot"),
                )
                .unwrap();
            ws.freeze_active().unwrap();
        }
        let ws = Workspace::open(tmp.path()).unwrap();
        assert!(!ws
            .store
            .snapshot_exists(&cleanslate_core::SnapshotId::new("stray_snapshot")));
    }
}
