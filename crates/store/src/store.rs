//! The snapshot store handle
//!
//! `SnapshotStore` owns the snapshots directory: shard files and manifests
//! are written by it and nothing else. The heavy operations live in sibling
//! modules as further `impl` blocks — export, import, lifecycle
//! (freeze/thaw), swap, and cleanup.

use crate::manifest::ManifestStore;
use cleanslate_core::{Result, SnapshotId};
use cleanslate_vfs::{FileLocks, StoreDir};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Name of the store's root directory under the workspace
pub const STORE_DIR_NAME: &str = "cleanslate";

/// Name of the snapshots subdirectory
pub const SNAPSHOTS_DIR_NAME: &str = "snapshots";

/// Owner of all on-disk snapshot state
#[derive(Clone)]
pub struct SnapshotStore {
    snapshots: StoreDir,
    locks: Arc<FileLocks>,
    manifests: ManifestStore,
}

impl SnapshotStore {
    /// Open the store under a workspace root, creating directories as needed
    ///
    /// Layout: `<root>/cleanslate/snapshots/`.
    pub fn open(workspace_root: impl AsRef<Path>) -> Result<Self> {
        let root = StoreDir::ensure(workspace_root.as_ref().join(STORE_DIR_NAME))?;
        let snapshots = root.subdir(SNAPSHOTS_DIR_NAME)?;
        Ok(Self::over(snapshots))
    }

    /// Open the store directly over a snapshots directory
    pub fn over(snapshots: StoreDir) -> Self {
        let locks = Arc::new(FileLocks::new());
        let manifests = ManifestStore::new(snapshots.clone(), Arc::clone(&locks));
        Self {
            snapshots,
            locks,
            manifests,
        }
    }

    /// The snapshots directory
    pub fn dir(&self) -> &StoreDir {
        &self.snapshots
    }

    /// The per-file lock map
    pub fn locks(&self) -> &Arc<FileLocks> {
        &self.locks
    }

    /// The manifest store
    pub fn manifests(&self) -> &ManifestStore {
        &self.manifests
    }

    /// True when any encoding of this snapshot exists on disk
    ///
    /// Checks the sharded layout first, then the legacy single-file and
    /// chunked encodings.
    pub fn snapshot_exists(&self, id: &SnapshotId) -> bool {
        self.snapshots.exists(&id.shard_file_name(0))
            || self.snapshots.exists(&id.legacy_file_name())
            || self.snapshots.exists(&id.legacy_part_file_name(0))
    }

    /// Every snapshot id that has a manifest on disk
    pub fn list_manifest_ids(&self) -> Result<Vec<SnapshotId>> {
        let mut ids = Vec::new();
        for name in self.snapshots.list_files()? {
            if let Some(stem) = name.strip_suffix("_manifest.json") {
                ids.push(SnapshotId::new(stem));
            }
        }
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }

    /// File names belonging to a snapshot: shards, manifest, legacy forms
    pub fn snapshot_file_names(&self, id: &SnapshotId) -> Result<Vec<String>> {
        let shard_prefix = format!("{}_shard_", id.as_str());
        let part_prefix = format!("{}_part_", id.as_str());
        let manifest = id.manifest_file_name();
        let legacy = id.legacy_file_name();
        Ok(self
            .snapshots
            .list_files()?
            .into_iter()
            .filter(|name| {
                name == &manifest
                    || name == &legacy
                    || name.starts_with(&shard_prefix)
                    || name.starts_with(&part_prefix)
            })
            .collect())
    }

    /// Delete every file of a snapshot; no-op for absent snapshots
    pub fn delete_snapshot(&self, id: &SnapshotId) -> Result<()> {
        for name in self.snapshot_file_names(id)? {
            self.locks
                .with_lock(&name, || self.snapshots.delete_if_exists(&name))?;
        }
        debug!(snapshot = %id, "snapshot deleted");
        Ok(())
    }
}
