//! Timeline and command execution
//!
//! The tiered command log: every table mutation is a [`Command`] with
//! frozen params, applied by the process-wide [`CommandExecutor`] and
//! undoable by its tier's mechanism (expression chain, inverse SQL, or
//! snapshot restore + replay). Cell edits coalesce in the [`EditBatch`]
//! before they become commands; every applied command leaves an
//! [`AuditEntry`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audit;
pub mod command;
pub mod edits;
pub mod executor;
pub mod timeline;

pub use audit::{AuditEntry, AuditLog};
pub use command::{
    forward_statements, inverse_statements, shadow_column, CellEdit, Command, CommandKind,
    MergeGroup, Tier,
};
pub use edits::{EditBatch, RecordOutcome, FLUSH_DEBOUNCE};
pub use executor::{BusyFlags, CommandExecutor, FlagGuard};
pub use timeline::Timeline;
