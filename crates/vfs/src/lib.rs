//! Filesystem helpers for the CleanSlate store
//!
//! Every persistent-store filesystem interaction goes through this crate:
//! - `StoreDir`: directory handle with ensure/list/read/delete operations
//! - `write_atomic`: temp-file + rename writes with bounded retry
//! - `rename_file`: portable overwrite-semantics rename
//! - `FileLocks`: per-file in-process write serialization
//!
//! The store is designed for single-process operation; cross-process
//! concurrency is not guaranteed.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod atomic;
pub mod dir;
pub mod lock;

pub use atomic::{rename_file, write_atomic};
pub use dir::{EntryKind, StoreDir};
pub use lock::FileLocks;
