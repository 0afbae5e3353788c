//! Error types for the CleanSlate engine
//!
//! `CoreError` is the unified error type for all layers. We use `thiserror`
//! for automatic `Display` and `Error` trait implementations.
//!
//! ## Error Categories
//!
//! - **Corruption**: on-disk snapshot data failed a validity check
//! - **Contention**: transient filesystem lock exhaustion after bounded retry
//! - **Missing**: a referenced snapshot or table is absent
//! - **Drift**: shard schemas disagree within one snapshot
//! - **Replay**: a command failed while replaying a timeline
//! - **Engine / Io / Serialization**: lower-level failures, propagated
//!
//! Formula validation failures are *not* errors: they are returned
//! structurally by the transpiler (`ValidationReport`), never thrown.
//!
//! ### Usage
//!
//! ```ignore
//! match store.thaw(&table) {
//!     Err(e) if e.is_corruption() => { /* self-heal at startup */ }
//!     Err(e) if e.is_retryable() => { /* bounded retry */ }
//!     Err(e) => return Err(e),
//!     Ok(done) => { /* success */ }
//! }
//! ```

use crate::types::SnapshotId;
use std::io;
use thiserror::Error;

/// Result type alias for CleanSlate operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Unified error type for all CleanSlate operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// A snapshot file or manifest failed a validity check
    ///
    /// Raised when a manifest is under 10 bytes or unparseable, or a shard
    /// is under 8 bytes. Startup cleanup deletes such files and marks the
    /// table missing instead of surfacing this to the user.
    #[error("corrupt snapshot {snapshot_id}: {reason}")]
    CorruptSnapshot {
        /// The affected snapshot
        snapshot_id: SnapshotId,
        /// What the validity check found
        reason: String,
    },

    /// Filesystem lock could not be acquired after bounded retries
    ///
    /// The atomic-write path retries transient creation failures three times
    /// with backoff before surfacing this.
    #[error("filesystem lock contention on {file}: {attempts} attempts exhausted")]
    LockContention {
        /// File being written
        file: String,
        /// Attempts made before giving up
        attempts: u32,
    },

    /// A referenced snapshot does not exist on disk
    ///
    /// Reported to the user; the table entry is kept so the data can be
    /// re-ingested.
    #[error("snapshot not found: {snapshot_id}")]
    SnapshotMissing {
        /// The snapshot that was referenced
        snapshot_id: SnapshotId,
    },

    /// A shard's columns disagree with shard 0 and the fallback import also failed
    #[error("schema drift in snapshot {snapshot_id} at shard {shard_index}: {reason}")]
    SchemaDrift {
        /// The affected snapshot
        snapshot_id: SnapshotId,
        /// Index of the disagreeing shard
        shard_index: usize,
        /// Why the fallback import could not reconcile it
        reason: String,
    },

    /// A command failed while replaying a timeline after a tier-3 undo
    ///
    /// The executor leaves its replay sentinel set; further mutations are
    /// rejected until the user resets.
    #[error("replay failed at command {position}: {reason}")]
    ReplayFailure {
        /// Position of the failing command in the timeline
        position: usize,
        /// Underlying failure
        reason: String,
    },

    /// An operation referenced a table that no longer exists
    ///
    /// Pending edit batches against such a table are dropped and their dirty
    /// flags cleared.
    #[error("table not found: {name}")]
    TableMissing {
        /// The table name or id that was referenced
        name: String,
    },

    /// The executor rejected a mutation while a replay is in progress
    #[error("operation rejected: replay in progress")]
    ReplayInProgress,

    /// SQL engine error
    #[error("engine error: {0}")]
    Engine(String),

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid input or argument
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unexpected internal state; indicates a bug
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Create a CorruptSnapshot error
    pub fn corrupt(snapshot_id: SnapshotId, reason: impl Into<String>) -> Self {
        CoreError::CorruptSnapshot {
            snapshot_id,
            reason: reason.into(),
        }
    }

    /// Create a LockContention error
    pub fn lock_contention(file: impl Into<String>, attempts: u32) -> Self {
        CoreError::LockContention {
            file: file.into(),
            attempts,
        }
    }

    /// Create a SnapshotMissing error
    pub fn snapshot_missing(snapshot_id: SnapshotId) -> Self {
        CoreError::SnapshotMissing { snapshot_id }
    }

    /// Create a SchemaDrift error
    pub fn schema_drift(
        snapshot_id: SnapshotId,
        shard_index: usize,
        reason: impl Into<String>,
    ) -> Self {
        CoreError::SchemaDrift {
            snapshot_id,
            shard_index,
            reason: reason.into(),
        }
    }

    /// Create a ReplayFailure error
    pub fn replay_failure(position: usize, reason: impl Into<String>) -> Self {
        CoreError::ReplayFailure {
            position,
            reason: reason.into(),
        }
    }

    /// Create a TableMissing error
    pub fn table_missing(name: impl Into<String>) -> Self {
        CoreError::TableMissing { name: name.into() }
    }

    /// Create an engine error
    pub fn engine(message: impl Into<String>) -> Self {
        CoreError::Engine(message.into())
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        CoreError::Serialization(message.into())
    }

    /// Create an invalid-input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        CoreError::InvalidInput(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        CoreError::Internal(message.into())
    }

    /// True for corruption findings that startup cleanup self-heals
    pub fn is_corruption(&self) -> bool {
        matches!(self, CoreError::CorruptSnapshot { .. })
    }

    /// True for transient failures worth a bounded retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::LockContention { .. })
    }

    /// True for absent-resource errors the caller reports without aborting
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            CoreError::SnapshotMissing { .. } | CoreError::TableMissing { .. }
        )
    }

    /// True for failures that leave the replay sentinel set
    pub fn is_replay_failure(&self) -> bool {
        matches!(
            self,
            CoreError::ReplayFailure { .. } | CoreError::ReplayInProgress
        )
    }

    /// The snapshot involved, when the error is about one
    pub fn snapshot_id(&self) -> Option<&SnapshotId> {
        match self {
            CoreError::CorruptSnapshot { snapshot_id, .. } => Some(snapshot_id),
            CoreError::SnapshotMissing { snapshot_id } => Some(snapshot_id),
            CoreError::SchemaDrift { snapshot_id, .. } => Some(snapshot_id),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(format!("JSON error: {e}"))
    }
}
