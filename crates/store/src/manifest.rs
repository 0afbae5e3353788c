//! Snapshot manifests
//!
//! One JSON manifest per snapshot, `{snapshotId}_manifest.json`, describing
//! the ordered shard list. Field names use the original on-disk camelCase
//! form so older stores stay readable.
//!
//! Reads validate before parsing: a manifest under 10 bytes or unparseable
//! is corrupt, and the caller must re-export.

use cleanslate_core::{CoreError, Result, SnapshotId, MIN_MANIFEST_BYTES, SHARD_SIZE};
use cleanslate_vfs::{write_atomic, FileLocks, StoreDir};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Current manifest format version
pub const MANIFEST_VERSION: u32 = 1;

/// One shard's entry in a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardMeta {
    /// 0-based dense shard index
    pub index: usize,
    /// Shard file name
    pub file_name: String,
    /// Rows in this shard
    pub row_count: usize,
    /// Encoded size in bytes
    pub byte_size: u64,
    /// Smallest `_cs_id` in the shard; None for non-`_cs_id`-ordered tables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_cs_id: Option<i64>,
    /// Largest `_cs_id` in the shard; None for non-`_cs_id`-ordered tables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cs_id: Option<i64>,
}

/// The per-snapshot manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotManifest {
    /// Format version
    pub version: u32,
    /// The snapshot this manifest describes
    pub snapshot_id: SnapshotId,
    /// Total rows across all shards
    pub total_rows: usize,
    /// Total encoded bytes across all shards
    pub total_bytes: u64,
    /// Rows-per-shard ceiling in force when written
    pub shard_size: usize,
    /// Ordered shard entries
    pub shards: Vec<ShardMeta>,
    /// Column names, in table order
    pub columns: Vec<String>,
    /// Ordering key used at export; empty when the table had none
    pub order_by_column: String,
    /// Export time, milliseconds since the epoch
    pub created_at: i64,
}

impl SnapshotManifest {
    /// Start a manifest for a snapshot being exported
    pub fn new(snapshot_id: SnapshotId, columns: Vec<String>, order_by_column: String) -> Self {
        Self {
            version: MANIFEST_VERSION,
            snapshot_id,
            total_rows: 0,
            total_bytes: 0,
            shard_size: SHARD_SIZE,
            shards: Vec::new(),
            columns,
            order_by_column,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Append a shard entry, accumulating totals
    pub fn push_shard(&mut self, shard: ShardMeta) {
        self.total_rows += shard.row_count;
        self.total_bytes += shard.byte_size;
        self.shards.push(shard);
    }

    /// Check internal consistency: dense indices and matching totals
    pub fn check_consistency(&self) -> Result<()> {
        let mut rows = 0usize;
        for (i, shard) in self.shards.iter().enumerate() {
            if shard.index != i {
                return Err(CoreError::corrupt(
                    self.snapshot_id.clone(),
                    format!("shard index {} at position {i}", shard.index),
                ));
            }
            rows += shard.row_count;
        }
        if rows != self.total_rows {
            return Err(CoreError::corrupt(
                self.snapshot_id.clone(),
                format!("shard rows {rows} disagree with totalRows {}", self.total_rows),
            ));
        }
        Ok(())
    }
}

/// Reads, writes, and deletes manifests in the snapshots directory
#[derive(Clone)]
pub struct ManifestStore {
    dir: StoreDir,
    locks: Arc<FileLocks>,
}

impl ManifestStore {
    /// Create a manifest store over the snapshots directory
    pub fn new(dir: StoreDir, locks: Arc<FileLocks>) -> Self {
        Self { dir, locks }
    }

    /// True when a manifest file exists (without validating it)
    pub fn exists(&self, id: &SnapshotId) -> bool {
        self.dir.exists(&id.manifest_file_name())
    }

    /// Read and validate a manifest
    ///
    /// Missing file → `SnapshotMissing`; undersized or unparseable →
    /// `CorruptSnapshot`.
    pub fn read(&self, id: &SnapshotId) -> Result<SnapshotManifest> {
        let name = id.manifest_file_name();
        let size = self
            .dir
            .file_size(&name)
            .ok_or_else(|| CoreError::snapshot_missing(id.clone()))?;
        if size < MIN_MANIFEST_BYTES {
            return Err(CoreError::corrupt(
                id.clone(),
                format!("manifest is {size} bytes, minimum is {MIN_MANIFEST_BYTES}"),
            ));
        }
        let bytes = self.dir.read(&name)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::corrupt(id.clone(), format!("manifest unparseable: {e}")))
    }

    /// Write a manifest atomically
    pub fn write(&self, manifest: &SnapshotManifest) -> Result<()> {
        let name = manifest.snapshot_id.manifest_file_name();
        let bytes = serde_json::to_vec(manifest)?;
        self.locks
            .with_lock(&name, || write_atomic(&self.dir, &name, &bytes))?;
        debug!(
            snapshot = %manifest.snapshot_id,
            shards = manifest.shards.len(),
            rows = manifest.total_rows,
            "manifest written"
        );
        Ok(())
    }

    /// Delete a manifest; no-op when absent
    pub fn delete(&self, id: &SnapshotId) -> Result<()> {
        let name = id.manifest_file_name();
        self.locks.with_lock(&name, || self.dir.delete_if_exists(&name))
    }
}
