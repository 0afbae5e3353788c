//! App-state persistence
//!
//! The whole workspace's durable metadata lives in one JSON file,
//! `cleanslate/app-state.json`: the table registry, every table's timeline
//! (commands, positions, snapshot references, dirty cells), the active
//! table, and UI preferences. Snapshot shard data lives separately under
//! `snapshots/`; the app state only references snapshot ids.
//!
//! Saves are atomic; a torn write leaves the previous state readable.

use cleanslate_core::{CoreError, Result, TableId};
use cleanslate_store::TableEntry;
use cleanslate_timeline::Timeline;
use cleanslate_vfs::{write_atomic, StoreDir};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Name of the app-state file inside the `cleanslate/` directory
pub const APP_STATE_FILE: &str = "app-state.json";

/// Current app-state format version
pub const APP_STATE_VERSION: u32 = 1;

/// The persisted workspace state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    /// Format version
    #[serde(default)]
    pub version: u32,
    /// The table that was active at save time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_table_id: Option<TableId>,
    /// Registry entries
    #[serde(default)]
    pub tables: Vec<TableEntry>,
    /// Timelines keyed by table id
    #[serde(default)]
    pub timelines: BTreeMap<String, Timeline>,
    /// Opaque UI preferences
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub preferences: serde_json::Value,
}

impl AppState {
    /// An empty state at the current version
    pub fn empty() -> Self {
        Self {
            version: APP_STATE_VERSION,
            preferences: serde_json::Value::Null,
            ..Default::default()
        }
    }
}

/// Load the app state; a missing or unreadable file yields the empty state
///
/// Unreadable state is logged and replaced rather than surfaced: losing
/// metadata must never block startup, and table snapshots remain on disk
/// for re-attachment.
pub fn load(dir: &StoreDir) -> AppState {
    if !dir.exists(APP_STATE_FILE) {
        debug!("no app state on disk, starting empty");
        return AppState::empty();
    }
    match dir
        .read(APP_STATE_FILE)
        .and_then(|bytes| serde_json::from_slice(&bytes).map_err(CoreError::from))
    {
        Ok(state) => state,
        Err(e) => {
            warn!(error = %e, "app state unreadable, starting empty");
            AppState::empty()
        }
    }
}

/// Save the app state atomically
pub fn save(dir: &StoreDir, state: &AppState) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(state)?;
    write_atomic(dir, APP_STATE_FILE, &bytes)?;
    debug!(tables = state.tables.len(), "app state saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cleanslate_core::{ColumnInfo, ColumnType, TableInfo};
    use tempfile::TempDir;

    fn dir() -> (TempDir, StoreDir) {
        let tmp = TempDir::new().unwrap();
        let dir = StoreDir::ensure(tmp.path().join("cleanslate")).unwrap();
        (tmp, dir)
    }

    fn sample_state() -> AppState {
        let info = TableInfo::new(
            TableId::new(),
            "people",
            vec![ColumnInfo::new("name", ColumnType::Varchar)],
            5,
        );
        let table_id = info.id.clone();
        let mut timelines = BTreeMap::new();
        timelines.insert(table_id.to_string(), Timeline::new());
        AppState {
            version: APP_STATE_VERSION,
            active_table_id: Some(table_id),
            tables: vec![TableEntry::materialized(info)],
            timelines,
            preferences: serde_json::json!({"wordWrap": true}),
        }
    }

    #[test]
    fn test_missing_file_yields_empty() {
        let (_tmp, dir) = dir();
        let state = load(&dir);
        assert_eq!(state, AppState::empty());
    }

    #[test]
    fn test_roundtrip() {
        let (_tmp, dir) = dir();
        let state = sample_state();
        save(&dir, &state).unwrap();
        let back = load(&dir);
        assert_eq!(back, state);
    }

    #[test]
    fn test_unreadable_state_yields_empty() {
        let (_tmp, dir) = dir();
        std::fs::write(dir.file_path(APP_STATE_FILE), b"{broken json").unwrap();
        let state = load(&dir);
        assert_eq!(state, AppState::empty());
    }

    #[test]
    fn test_save_is_atomic() {
        let (_tmp, dir) = dir();
        save(&dir, &sample_state()).unwrap();
        assert!(!dir.exists("app-state.json.tmp"));
    }

    #[test]
    fn test_camel_case_keys() {
        let (_tmp, dir) = dir();
        save(&dir, &sample_state()).unwrap();
        let raw = String::from_utf8(dir.read(APP_STATE_FILE).unwrap()).unwrap();
        assert!(raw.contains("\"activeTableId\""));
        assert!(raw.contains("\"timelines\""));
    }
}
