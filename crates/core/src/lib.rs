//! Core types for the CleanSlate data-cleaning engine
//!
//! This crate defines the foundational types used throughout the system:
//! - TableId / SnapshotId: identifiers for tables and on-disk snapshots
//! - ColumnType / ColumnInfo / TableInfo: schema descriptions
//! - Value: unified cell value enum
//! - CellKey: stable per-cell identity (`cs_id` + column name)
//! - CoreError: error type hierarchy
//! - Internal-column filtering applied at every user-facing boundary

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod columns;
pub mod error;
pub mod types;
pub mod value;

pub use columns::{filter_user_columns, is_internal_column};
pub use error::{CoreError, Result};
pub use types::{
    CellKey, ColumnInfo, ColumnType, SnapshotId, TableId, TableInfo, CS_ID, CS_ID_GAP,
    MIN_MANIFEST_BYTES, MIN_SHARD_BYTES, ORIGIN_ID, SHARD_SIZE,
};
pub use value::Value;
