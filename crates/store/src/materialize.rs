//! Background materialization
//!
//! Thawing a big table can take a while; the workspace can start it on a
//! background thread and keep serving shard-backed reads meanwhile. Each
//! run registers a cancel token under the table name: cancelling drops
//! whatever partial table the import had created. An import error falls
//! back to one synchronous thaw attempt before giving up.

use crate::registry::TableRegistry;
use crate::store::SnapshotStore;
use cleanslate_core::TableId;
use cleanslate_engine::Engine;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Coordinates background thaws and their cancel tokens
#[derive(Default)]
pub struct BackgroundMaterializer {
    tokens: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl BackgroundMaterializer {
    /// Create a coordinator with no work in flight
    pub fn new() -> Self {
        Self::default()
    }

    /// Start materializing `table_id` on a background thread
    ///
    /// The returned handle yields true when the table materialized. A second
    /// start for the same table name replaces the previous token, so the
    /// older run cancels itself at its next checkpoint.
    pub fn start(
        &self,
        engine: Arc<Engine>,
        store: Arc<SnapshotStore>,
        registry: Arc<TableRegistry>,
        table_id: TableId,
        table_name: String,
    ) -> JoinHandle<bool> {
        let cancel = Arc::new(AtomicBool::new(false));
        self.tokens
            .lock()
            .insert(table_name.clone(), Arc::clone(&cancel));

        std::thread::spawn(move || {
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            let outcome = match store.thaw(&engine, &registry, &table_id) {
                Ok(done) => done,
                Err(e) => {
                    // Background import failed; one synchronous retry.
                    warn!(table = %table_name, error = %e, "background thaw failed, retrying synchronously");
                    store.thaw(&engine, &registry, &table_id).unwrap_or(false)
                }
            };
            if cancel.load(Ordering::Relaxed) {
                // Cancelled mid-import: drop the partial table.
                debug!(table = %table_name, "materialization cancelled, dropping partial table");
                let _ = engine.drop_table_if_exists(&table_name);
                return false;
            }
            outcome
        })
    }

    /// Cancel the in-flight materialization for a table, if any
    pub fn cancel(&self, table_name: &str) {
        if let Some(token) = self.tokens.lock().get(table_name) {
            token.store(true, Ordering::Relaxed);
        }
    }

    /// Drop the token for a finished run
    pub fn clear(&self, table_name: &str) {
        self.tokens.lock().remove(table_name);
    }

    /// Number of registered tokens (finished or not)
    pub fn tracked(&self) -> usize {
        self.tokens.lock().len()
    }
}
