//! Snapshot import
//!
//! Restores a snapshot into a live table. Three on-disk layouts are
//! readable:
//! - sharded (`{id}_shard_{i}.arrow`) — the only layout ever written
//! - legacy chunked (`{id}_part_{i}.parquet`)
//! - legacy single file (`{id}.arrow`)
//!
//! Shard 0 creates the table; later shards append, falling back to a staged
//! temp-table copy when their schema drifts from shard 0. After the rows
//! land, identity is repaired: missing `_cs_id` / `_cs_origin_id` columns
//! are synthesized and dense ids are renumbered to the gap spacing.

use crate::shard::decode_ipc;
use crate::store::SnapshotStore;
use bytes::Bytes;
use cleanslate_core::{CoreError, Result, SnapshotId};
use cleanslate_engine::{arrow_bridge, identity, schema, Engine};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::{debug, info, warn};

/// How a snapshot is laid out on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotLayout {
    /// `{id}_shard_{i}.arrow`
    Sharded,
    /// `{id}_part_{i}.parquet`
    LegacyParts,
    /// `{id}.arrow`
    LegacySingle,
}

impl SnapshotStore {
    /// Discover which layout a snapshot uses
    pub fn discover_layout(&self, id: &SnapshotId) -> Option<SnapshotLayout> {
        if self.dir().exists(&id.shard_file_name(0)) {
            Some(SnapshotLayout::Sharded)
        } else if self.dir().exists(&id.legacy_part_file_name(0)) {
            Some(SnapshotLayout::LegacyParts)
        } else if self.dir().exists(&id.legacy_file_name()) {
            Some(SnapshotLayout::LegacySingle)
        } else {
            None
        }
    }

    /// Import a snapshot into `table_name`, replacing any existing table
    ///
    /// Returns the imported row count.
    pub fn import_table_from_snapshot(
        &self,
        engine: &Engine,
        snapshot_id: &SnapshotId,
        table_name: &str,
    ) -> Result<usize> {
        engine.drop_table_if_exists(table_name)?;

        let layout = self
            .discover_layout(snapshot_id)
            .ok_or_else(|| CoreError::snapshot_missing(snapshot_id.clone()))?;
        debug!(snapshot = %snapshot_id, table = table_name, ?layout, "import starting");

        match layout {
            SnapshotLayout::Sharded => self.import_sharded(engine, snapshot_id, table_name)?,
            SnapshotLayout::LegacyParts => self.import_parts(engine, snapshot_id, table_name)?,
            SnapshotLayout::LegacySingle => self.import_single(engine, snapshot_id, table_name)?,
        }

        identity::ensure_identity_columns(engine, table_name)?;
        identity::migrate_dense_ids(engine, table_name)?;

        let rows = schema::row_count(engine, table_name)?;
        info!(snapshot = %snapshot_id, table = table_name, rows, "import complete");
        Ok(rows)
    }

    fn import_sharded(
        &self,
        engine: &Engine,
        snapshot_id: &SnapshotId,
        table_name: &str,
    ) -> Result<()> {
        let mut index = 0;
        loop {
            let file_name = snapshot_id.shard_file_name(index);
            if !self.dir().exists(&file_name) {
                break;
            }
            let bytes = self.dir().read(&file_name)?;
            let batches = decode_ipc(snapshot_id, &bytes)?;
            for batch in &batches {
                if index == 0 && !engine.table_exists(table_name)? {
                    arrow_bridge::create_table_from_batch(engine, table_name, batch)?;
                } else {
                    arrow_bridge::append_batch(engine, table_name, batch).map_err(|e| {
                        warn!(snapshot = %snapshot_id, shard = index, error = %e, "shard append failed");
                        CoreError::schema_drift(snapshot_id.clone(), index, e.to_string())
                    })?;
                }
            }
            index += 1;
        }
        if index == 0 {
            return Err(CoreError::snapshot_missing(snapshot_id.clone()));
        }
        Ok(())
    }

    fn import_parts(
        &self,
        engine: &Engine,
        snapshot_id: &SnapshotId,
        table_name: &str,
    ) -> Result<()> {
        let mut index = 0;
        loop {
            let file_name = snapshot_id.legacy_part_file_name(index);
            if !self.dir().exists(&file_name) {
                break;
            }
            let bytes = self.dir().read(&file_name)?;
            let reader = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes))
                .map_err(|e| {
                    CoreError::corrupt(snapshot_id.clone(), format!("parquet chunk {index}: {e}"))
                })?
                .build()
                .map_err(|e| {
                    CoreError::corrupt(snapshot_id.clone(), format!("parquet chunk {index}: {e}"))
                })?;
            for batch in reader {
                let batch = batch.map_err(|e| {
                    CoreError::corrupt(snapshot_id.clone(), format!("parquet chunk {index}: {e}"))
                })?;
                if !engine.table_exists(table_name)? {
                    arrow_bridge::create_table_from_batch(engine, table_name, &batch)?;
                } else {
                    arrow_bridge::append_batch(engine, table_name, &batch).map_err(|e| {
                        CoreError::schema_drift(snapshot_id.clone(), index, e.to_string())
                    })?;
                }
            }
            index += 1;
        }
        Ok(())
    }

    fn import_single(
        &self,
        engine: &Engine,
        snapshot_id: &SnapshotId,
        table_name: &str,
    ) -> Result<()> {
        let bytes = self.dir().read(&snapshot_id.legacy_file_name())?;
        let batches = decode_ipc(snapshot_id, &bytes)?;
        if batches.is_empty() {
            return Err(CoreError::corrupt(
                snapshot_id.clone(),
                "single-file snapshot holds no batches",
            ));
        }
        for batch in &batches {
            if !engine.table_exists(table_name)? {
                arrow_bridge::create_table_from_batch(engine, table_name, batch)?;
            } else {
                arrow_bridge::append_batch(engine, table_name, batch)
                    .map_err(|e| CoreError::schema_drift(snapshot_id.clone(), 0, e.to_string()))?;
            }
        }
        Ok(())
    }
}
