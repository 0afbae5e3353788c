//! Workspace API
//!
//! The top-level surface: the [`Workspace`] facade (ingest, the Single
//! Active Table policy, edits, commands, undo/redo, diff/stack), the
//! startup orchestrator, app-state persistence, the read-only inspector,
//! and the polling wait helpers external harnesses use.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod inspector;
pub mod startup;
pub mod state;
pub mod waiters;
pub mod workspace;

pub use inspector::{FlagsSnapshot, StoreSnapshot, TableSummary};
pub use state::{AppState, APP_STATE_FILE, APP_STATE_VERSION};
pub use waiters::{
    wait_for_combiner_complete, wait_for_merge_complete, wait_for_ready,
    wait_for_replay_complete, wait_for_table_loaded, wait_for_transform_complete,
};
pub use workspace::{normalize_table_name, PersistenceStatus, Workspace};
