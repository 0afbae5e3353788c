//! Polling wait helpers
//!
//! External harnesses observe completion by polling the inspector's flags,
//! never by hooking internals. Each helper polls until its condition holds
//! or the caller's timeout elapses.

use crate::workspace::Workspace;
use cleanslate_core::{CoreError, Result};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn wait_until(
    workspace: &Workspace,
    timeout: Duration,
    what: &str,
    condition: impl Fn(&Workspace) -> bool,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if condition(workspace) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(CoreError::internal(format!("timed out waiting for {what}")));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Wait until startup signals ready
pub fn wait_for_ready(workspace: &Workspace, timeout: Duration) -> Result<()> {
    wait_until(workspace, timeout, "ready", |w| w.is_ready())
}

/// Wait until a table is materialized (optionally with an exact row count)
pub fn wait_for_table_loaded(
    workspace: &Workspace,
    name: &str,
    row_count: Option<usize>,
    timeout: Duration,
) -> Result<()> {
    wait_until(workspace, timeout, "table load", |w| {
        w.inspect().table(name).is_some_and(|t| {
            t.residency == cleanslate_store::Residency::Materialized
                && row_count.map_or(true, |n| t.row_count == n)
        })
    })
}

/// Wait until no transform is executing
pub fn wait_for_transform_complete(workspace: &Workspace, timeout: Duration) -> Result<()> {
    wait_until(workspace, timeout, "transform", |w| {
        !w.executor().flags().is_transforming()
    })
}

/// Wait until no match-merge is executing
pub fn wait_for_merge_complete(workspace: &Workspace, timeout: Duration) -> Result<()> {
    wait_until(workspace, timeout, "merge", |w| {
        !w.executor().flags().is_merging()
    })
}

/// Wait until no stack is executing
pub fn wait_for_combiner_complete(workspace: &Workspace, timeout: Duration) -> Result<()> {
    wait_until(workspace, timeout, "combine", |w| {
        !w.executor().flags().is_combining()
    })
}

/// Wait until no replay is executing
pub fn wait_for_replay_complete(workspace: &Workspace, timeout: Duration) -> Result<()> {
    wait_until(workspace, timeout, "replay", |w| {
        !w.executor().flags().is_replaying()
    })
}
