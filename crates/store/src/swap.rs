//! Atomic snapshot replacement
//!
//! `swap_snapshots(old, new, final)` promotes a freshly written snapshot
//! over an older one under the final id. The order is rename-first, delete
//! last, so a crash at any step leaves a readable snapshot: every instant
//! has either the old manifest or the new one on disk. If both survive a
//! crash, startup reconciliation trusts the newer `createdAt`.

use crate::manifest::SnapshotManifest;
use crate::store::SnapshotStore;
use cleanslate_core::{Result, SnapshotId};
use cleanslate_vfs::rename_file;
use tracing::{debug, info};

impl SnapshotStore {
    /// Promote `new_id`'s files over `old_id`'s under `final_id`
    pub fn swap_snapshots(
        &self,
        old_id: &SnapshotId,
        new_id: &SnapshotId,
        final_id: &SnapshotId,
    ) -> Result<SnapshotManifest> {
        // 1. The new snapshot's manifest drives the swap.
        let new_manifest = self.manifests().read(new_id)?;
        let new_shard_count = new_manifest.shards.len();
        debug!(
            old = %old_id,
            new = %new_id,
            promoted = %final_id,
            shards = new_shard_count,
            "swap starting"
        );

        // 2. Rename every new shard over the final name.
        for shard in &new_manifest.shards {
            let final_name = final_id.shard_file_name(shard.index);
            self.locks().with_lock(&final_name, || {
                rename_file(self.dir(), &shard.file_name, &final_name)
            })?;
        }

        // 3. Retire the new manifest and publish one under the final id.
        let mut final_manifest = new_manifest.clone();
        final_manifest.snapshot_id = final_id.clone();
        for shard in &mut final_manifest.shards {
            shard.file_name = final_id.shard_file_name(shard.index);
        }
        self.manifests().delete(new_id)?;
        self.manifests().write(&final_manifest)?;

        // 4. Trailing shards of a bigger old snapshot are now garbage.
        let mut index = new_shard_count;
        loop {
            let stale = final_id.shard_file_name(index);
            if !self.dir().exists(&stale) {
                break;
            }
            self.locks()
                .with_lock(&stale, || self.dir().delete_if_exists(&stale))?;
            index += 1;
        }

        // 5. Legacy chunk files under the final id are superseded.
        let mut index = 0;
        loop {
            let part = final_id.legacy_part_file_name(index);
            if !self.dir().exists(&part) {
                break;
            }
            self.locks()
                .with_lock(&part, || self.dir().delete_if_exists(&part))?;
            index += 1;
        }

        // The old id's own files (when distinct from the final id) are
        // unreferenced now; snapshot GC collects them.
        if old_id != final_id && old_id != new_id {
            self.delete_snapshot(old_id)?;
        }

        info!(promoted = %final_id, shards = new_shard_count, "swap complete");
        Ok(final_manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cleanslate_engine::{identity, Engine};
    use cleanslate_core::Value;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SnapshotStore, Engine) {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::open(tmp.path()).unwrap();
        let engine = Engine::open_in_memory().unwrap();
        (tmp, store, engine)
    }

    fn export_rows(store: &SnapshotStore, engine: &Engine, table: &str, id: &str, rows: &[&str]) {
        engine.drop_table_if_exists(table).unwrap();
        engine
            .execute(&format!("CREATE TABLE {table} (v VARCHAR)"))
            .unwrap();
        for v in rows {
            engine
                .execute(&format!("INSERT INTO {table} VALUES ('{v}')"))
                .unwrap();
        }
        identity::stamp_identity(engine, table).unwrap();
        store
            .export_table_to_snapshot(engine, table, &SnapshotId::new(id))
            .unwrap();
    }

    #[test]
    fn test_swap_promotes_new_content() {
        let (_tmp, store, engine) = setup();
        let final_id = SnapshotId::new("orders");
        let staging = SnapshotId::new("orders_staging");

        export_rows(&store, &engine, "t", "orders", &["old1", "old2"]);
        export_rows(&store, &engine, "t", "orders_staging", &["new1"]);

        let manifest = store.swap_snapshots(&final_id, &staging, &final_id).unwrap();
        assert_eq!(manifest.snapshot_id, final_id);
        assert_eq!(manifest.total_rows, 1);
        assert_eq!(manifest.shards[0].file_name, "orders_shard_0.arrow");

        // Staging files are gone; final content is the new data.
        assert!(!store.dir().exists("orders_staging_shard_0.arrow"));
        assert!(!store.dir().exists("orders_staging_manifest.json"));

        let rows = store
            .import_table_from_snapshot(&engine, &final_id, "restored")
            .unwrap();
        assert_eq!(rows, 1);
        let result = engine.run_query("SELECT v FROM restored").unwrap();
        assert_eq!(result.rows[0][0], Value::Text("new1".into()));
    }

    #[test]
    fn test_swap_deletes_trailing_old_shards() {
        let (_tmp, store, engine) = setup();
        let final_id = SnapshotId::new("orders");
        let staging = SnapshotId::new("orders_staging");

        export_rows(&store, &engine, "t", "orders", &["a"]);
        // Fake extra trailing shards from a previously bigger snapshot.
        std::fs::write(store.dir().file_path("orders_shard_1.arrow"), vec![b'x'; 16]).unwrap();
        std::fs::write(store.dir().file_path("orders_shard_2.arrow"), vec![b'x'; 16]).unwrap();

        export_rows(&store, &engine, "t", "orders_staging", &["b"]);
        store.swap_snapshots(&final_id, &staging, &final_id).unwrap();

        assert!(store.dir().exists("orders_shard_0.arrow"));
        assert!(!store.dir().exists("orders_shard_1.arrow"));
        assert!(!store.dir().exists("orders_shard_2.arrow"));
    }

    #[test]
    fn test_swap_removes_legacy_parts() {
        let (_tmp, store, engine) = setup();
        let final_id = SnapshotId::new("orders");
        let staging = SnapshotId::new("orders_staging");
        std::fs::write(
            store.dir().file_path("orders_part_0.parquet"),
            vec![b'x'; 16],
        )
        .unwrap();
        export_rows(&store, &engine, "t", "orders_staging", &["b"]);
        store.swap_snapshots(&final_id, &staging, &final_id).unwrap();
        assert!(!store.dir().exists("orders_part_0.parquet"));
    }

    #[test]
    fn test_swap_missing_new_manifest_errors() {
        let (_tmp, store, _engine) = setup();
        let err = store
            .swap_snapshots(
                &SnapshotId::new("a"),
                &SnapshotId::new("missing"),
                &SnapshotId::new("a"),
            )
            .unwrap_err();
        assert!(err.is_missing());
    }

    #[test]
    fn test_manifest_present_throughout() {
        // After a swap there is exactly one manifest for the final id and
        // none for staging; mid-crash states leave at least one readable.
        let (_tmp, store, engine) = setup();
        let final_id = SnapshotId::new("orders");
        let staging = SnapshotId::new("orders_staging");
        export_rows(&store, &engine, "t", "orders", &["old"]);
        export_rows(&store, &engine, "t", "orders_staging", &["new"]);
        store.swap_snapshots(&final_id, &staging, &final_id).unwrap();
        assert!(store.manifests().read(&final_id).is_ok());
        assert!(store.manifests().read(&staging).is_err());
    }
}
