//! Per-file in-process write locks
//!
//! All writes to one logical file serialize through `FileLocks`. The lock is
//! scoped: callers run a closure while holding the file's mutex, which rules
//! out leaked guards. Re-entering the same file name from inside the closure
//! deadlocks, so callers never nest locks for one name.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Map of logical file name → write mutex
#[derive(Debug, Default)]
pub struct FileLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileLocks {
    /// Create an empty lock map
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the write lock for `name`
    ///
    /// Locks for distinct names are independent; calls for the same name
    /// serialize in arrival order.
    pub fn with_lock<T>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        let lock = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock();
        f()
    }

    /// Number of file names that have ever been locked
    pub fn tracked_files(&self) -> usize {
        self.locks.len()
    }
}
