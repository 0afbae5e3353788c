//! # CleanSlate
//!
//! An embeddable data-cleaning core: durable table snapshots, a tiered
//! undo/redo command timeline, debounced cell-edit batching, and a
//! spreadsheet-formula-to-SQL transpiler, over an embedded SQL engine.
//!
//! Tables live in the engine while active and as ordered Arrow IPC shards
//! (plus JSON manifests) on disk otherwise; at most one user table is
//! materialized at a time. Every mutation is a command with frozen params,
//! so any state is reproducible by replaying from a snapshot.
//!
//! # Quick Start
//!
//! ```no_run
//! use cleanslate::{ColumnInfo, ColumnType, CommandKind, Value, Workspace};
//!
//! fn main() -> cleanslate::Result<()> {
//!     let ws = Workspace::open("./my-workspace")?;
//!
//!     let table = ws.ingest(
//!         "people",
//!         &[ColumnInfo::new("name", ColumnType::Varchar)],
//!         &[vec![Value::Text("  Alice  ".into())]],
//!     )?;
//!
//!     // Chainable transforms with undo
//!     ws.apply(&table, CommandKind::Trim { column: "name".into() })?;
//!     ws.undo(&table)?;
//!
//!     // Direct cell edits coalesce and flush as one command
//!     ws.edit_cell(&table, 100, "name", Value::Text("Alice".into()))?;
//!     ws.flush_edits()?;
//!
//!     // Durable across restarts
//!     ws.freeze_active()?;
//!     Ok(())
//! }
//! ```
//!
//! # Subsystems
//!
//! | Crate | Responsibility |
//! |-------|----------------|
//! | `cleanslate-core` | Ids, values, schema types, errors |
//! | `cleanslate-vfs` | Atomic writes, per-file locks, listing |
//! | `cleanslate-formula` | Formula grammar → AST → validated SQL |
//! | `cleanslate-engine` | Engine handle, identity, Arrow bridge, diff |
//! | `cleanslate-store` | Shards, manifests, freeze/thaw, cleanup |
//! | `cleanslate-timeline` | Commands, edit batch, executor, audit |
//! | `cleanslate-api` | Workspace facade, startup, inspector, waiters |

pub use cleanslate_api::{
    normalize_table_name, wait_for_combiner_complete, wait_for_merge_complete, wait_for_ready,
    wait_for_replay_complete, wait_for_table_loaded, wait_for_transform_complete, AppState,
    FlagsSnapshot, PersistenceStatus, StoreSnapshot, TableSummary, Workspace,
};
pub use cleanslate_core::{
    filter_user_columns, is_internal_column, CellKey, ColumnInfo, ColumnType, CoreError, Result,
    SnapshotId, TableId, TableInfo, Value, CS_ID, CS_ID_GAP, ORIGIN_ID, SHARD_SIZE,
};
pub use cleanslate_engine::DiffSummary;
pub use cleanslate_formula::{transpile, validate, TranspileOutput, ValidationReport};
pub use cleanslate_store::{
    CleanupReport, Residency, ShardMeta, SnapshotManifest, SnapshotStore, TableRegistry,
};
pub use cleanslate_timeline::{
    AuditEntry, CellEdit, Command, CommandKind, EditBatch, MergeGroup, Tier, Timeline,
};
