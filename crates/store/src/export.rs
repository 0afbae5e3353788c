//! Snapshot export
//!
//! Exports a live table to an ordered set of IPC shards plus a manifest.
//! Exports serialize globally: encoding a shard materializes the full byte
//! buffer in memory, so one export at a time caps peak RAM. Writes to the
//! snapshot's files additionally serialize through the per-file lock on the
//! snapshot id.
//!
//! Export is all-or-nothing: a failure deletes this export's temp files,
//! writes no manifest, and leaves any prior snapshot untouched.

use crate::manifest::{ShardMeta, SnapshotManifest};
use crate::shard::encode_ipc;
use crate::store::SnapshotStore;
use cleanslate_core::{Result, SnapshotId, Value, CS_ID, SHARD_SIZE};
use cleanslate_engine::{arrow_bridge, qident, schema, Engine};
use cleanslate_vfs::write_atomic;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// All exports serialize through this lock to cap peak resident memory.
static EXPORT_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Progress callback: `(shards_done, shards_total)`
pub type ExportProgress<'a> = &'a dyn Fn(usize, usize);

impl SnapshotStore {
    /// Export a table to `snapshot_id`, replacing that snapshot's content
    pub fn export_table_to_snapshot(
        &self,
        engine: &Engine,
        table: &str,
        snapshot_id: &SnapshotId,
    ) -> Result<SnapshotManifest> {
        self.export_with_progress(engine, table, snapshot_id, None)
    }

    /// Export with a progress callback invoked after each shard
    ///
    /// The callback doubles as the cooperative yield point between shards.
    pub fn export_with_progress(
        &self,
        engine: &Engine,
        table: &str,
        snapshot_id: &SnapshotId,
        progress: Option<ExportProgress<'_>>,
    ) -> Result<SnapshotManifest> {
        let _global = EXPORT_LOCK.lock();
        self.locks().with_lock(snapshot_id.as_str(), || {
            self.export_locked(engine, table, snapshot_id, progress)
        })
    }

    fn export_locked(
        &self,
        engine: &Engine,
        table: &str,
        snapshot_id: &SnapshotId,
        progress: Option<ExportProgress<'_>>,
    ) -> Result<SnapshotManifest> {
        let columns = schema::table_columns(engine, table)?;
        if columns.is_empty() {
            return Err(cleanslate_core::CoreError::table_missing(table));
        }
        let order_by = schema::detect_order_by(&columns);
        let row_count = schema::row_count(engine, table)?;
        // A zero-row table still gets one (empty) shard.
        let total_shards = row_count.div_ceil(SHARD_SIZE).max(1);
        let track_cs_id = order_by == CS_ID;

        debug!(
            table,
            snapshot = %snapshot_id,
            rows = row_count,
            shards = total_shards,
            order_by = %order_by,
            "export starting"
        );

        let mut manifest = SnapshotManifest::new(
            snapshot_id.clone(),
            columns.iter().map(|c| c.name.clone()).collect(),
            order_by.clone(),
        );

        let result = (|| -> Result<()> {
            for index in 0..total_shards {
                let order_clause = if order_by.is_empty() {
                    String::new()
                } else {
                    format!(" ORDER BY {}", qident(&order_by))
                };
                let sql = format!(
                    "SELECT * FROM {}{order_clause} LIMIT {SHARD_SIZE} OFFSET {}",
                    qident(table),
                    index * SHARD_SIZE,
                );
                let batch = arrow_bridge::query_to_batch(engine, &sql, &columns)?;
                let bytes = encode_ipc(&batch)?;

                let file_name = snapshot_id.shard_file_name(index);
                write_atomic(self.dir(), &file_name, &bytes)?;

                let (min_cs_id, max_cs_id) = if track_cs_id && batch.num_rows() > 0 {
                    cs_id_bounds(engine, table, index)?
                } else {
                    (None, None)
                };

                manifest.push_shard(ShardMeta {
                    index,
                    file_name,
                    row_count: batch.num_rows(),
                    byte_size: bytes.len() as u64,
                    min_cs_id,
                    max_cs_id,
                });

                if let Some(cb) = progress {
                    cb(index + 1, total_shards);
                }
            }
            self.manifests().write(&manifest)?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                if row_count > SHARD_SIZE {
                    engine.checkpoint()?;
                }
                info!(
                    table,
                    snapshot = %snapshot_id,
                    rows = manifest.total_rows,
                    bytes = manifest.total_bytes,
                    "export complete"
                );
                Ok(manifest)
            }
            Err(e) => {
                warn!(snapshot = %snapshot_id, error = %e, "export failed, removing temp files");
                self.remove_export_temps(snapshot_id);
                Err(e)
            }
        }
    }

    /// Remove `*.arrow.tmp` leftovers for one snapshot id
    fn remove_export_temps(&self, snapshot_id: &SnapshotId) {
        let prefix = format!("{}_shard_", snapshot_id.as_str());
        if let Ok(files) = self.dir().list_files() {
            for name in files {
                if name.starts_with(&prefix) && name.ends_with(".tmp") {
                    let _ = self.dir().delete_if_exists(&name);
                }
            }
        }
    }
}

fn cs_id_bounds(engine: &Engine, table: &str, shard_index: usize) -> Result<(Option<i64>, Option<i64>)> {
    let sql = format!(
        "SELECT MIN({id}), MAX({id}) FROM (SELECT {id} FROM {t} ORDER BY {id} LIMIT {SHARD_SIZE} OFFSET {offset})",
        id = qident(CS_ID),
        t = qident(table),
        offset = shard_index * SHARD_SIZE,
    );
    let result = engine.run_query(&sql)?;
    let row = result.rows.first();
    let get = |i: usize| -> Option<i64> {
        row.and_then(|r| match r.get(i) {
            Some(Value::Int(v)) => Some(*v),
            _ => None,
        })
    };
    Ok((get(0), get(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cleanslate_engine::identity;
    use std::cell::RefCell;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SnapshotStore, Engine) {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::open(tmp.path()).unwrap();
        let engine = Engine::open_in_memory().unwrap();
        (tmp, store, engine)
    }

    fn seed(engine: &Engine, rows: usize) {
        engine.execute("CREATE TABLE t (name VARCHAR)").unwrap();
        for i in 0..rows {
            engine
                .execute(&format!("INSERT INTO t VALUES ('row{i}')"))
                .unwrap();
        }
        identity::stamp_identity(engine, "t").unwrap();
    }

    #[test]
    fn test_export_single_shard() {
        let (_tmp, store, engine) = setup();
        seed(&engine, 3);
        let id = SnapshotId::new("t");
        let manifest = store.export_table_to_snapshot(&engine, "t", &id).unwrap();

        assert_eq!(manifest.total_rows, 3);
        assert_eq!(manifest.shards.len(), 1);
        assert_eq!(manifest.order_by_column, "_cs_id");
        assert_eq!(manifest.shards[0].min_cs_id, Some(100));
        assert_eq!(manifest.shards[0].max_cs_id, Some(300));
        assert!(store.dir().exists("t_shard_0.arrow"));
        assert!(store.dir().exists("t_manifest.json"));
        // No temp leftovers
        assert!(!store.dir().exists("t_shard_0.arrow.tmp"));
        manifest.check_consistency().unwrap();
    }

    #[test]
    fn test_export_zero_rows_produces_one_shard() {
        let (_tmp, store, engine) = setup();
        seed(&engine, 0);
        let id = SnapshotId::new("t");
        let manifest = store.export_table_to_snapshot(&engine, "t", &id).unwrap();
        assert_eq!(manifest.total_rows, 0);
        assert_eq!(manifest.shards.len(), 1);
        assert_eq!(manifest.shards[0].row_count, 0);
        assert!(store.dir().file_size("t_shard_0.arrow").unwrap() >= 8);
    }

    #[test]
    fn test_export_missing_table() {
        let (_tmp, store, engine) = setup();
        let err = store
            .export_table_to_snapshot(&engine, "ghost", &SnapshotId::new("g"))
            .unwrap_err();
        assert!(err.is_missing());
    }

    #[test]
    fn test_export_progress_reported() {
        let (_tmp, store, engine) = setup();
        seed(&engine, 5);
        let calls = RefCell::new(Vec::new());
        let cb = |done: usize, total: usize| calls.borrow_mut().push((done, total));
        store
            .export_with_progress(&engine, "t", &SnapshotId::new("t"), Some(&cb))
            .unwrap();
        assert_eq!(calls.into_inner(), vec![(1, 1)]);
    }

    #[test]
    fn test_export_is_idempotent_in_content() {
        let (_tmp, store, engine) = setup();
        seed(&engine, 4);
        let id = SnapshotId::new("t");
        store.export_table_to_snapshot(&engine, "t", &id).unwrap();
        let first = store.dir().read("t_shard_0.arrow").unwrap();

        store.delete_snapshot(&id).unwrap();
        store.export_table_to_snapshot(&engine, "t", &id).unwrap();
        let second = store.dir().read("t_shard_0.arrow").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_export_unordered_table_has_no_bounds() {
        let (_tmp, store, engine) = setup();
        engine
            .execute_batch("CREATE TABLE plain (v VARCHAR); INSERT INTO plain VALUES ('x');")
            .unwrap();
        let manifest = store
            .export_table_to_snapshot(&engine, "plain", &SnapshotId::new("plain"))
            .unwrap();
        assert_eq!(manifest.order_by_column, "");
        assert_eq!(manifest.shards[0].min_cs_id, None);
        assert_eq!(manifest.shards[0].max_cs_id, None);
    }
}
