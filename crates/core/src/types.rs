//! Foundational identifiers and schema types
//!
//! - SnapshotId: lowercase-normalized on-disk snapshot identifier
//! - TableId: opaque table identifier
//! - ColumnType / ColumnInfo: declared column schema
//! - TableInfo: user-visible table description
//! - CellKey: stable per-cell identity used for dirty tracking

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum rows per shard file.
pub const SHARD_SIZE: usize = 50_000;

/// Gap between consecutive `_cs_id` values assigned at ingest.
///
/// Gaps leave room for in-between insertion without renumbering.
pub const CS_ID_GAP: i64 = 100;

/// Name of the stable per-row identity column.
pub const CS_ID: &str = "_cs_id";

/// Name of the per-row origin identity column (assigned at ingest, never mutated).
pub const ORIGIN_ID: &str = "_cs_origin_id";

/// Manifests smaller than this are considered corrupt.
pub const MIN_MANIFEST_BYTES: u64 = 10;

/// Shard files smaller than this are considered corrupt.
pub const MIN_SHARD_BYTES: u64 = 8;

/// Opaque identifier for a user table
///
/// TableIds are stable across freeze/thaw cycles and reloads; they are what
/// timelines and the app state refer to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableId(String);

impl TableId {
    /// Create a new random TableId
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing identifier string
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TableId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for an on-disk snapshot
///
/// Snapshot ids are normalized to lowercase at construction so the on-disk
/// form is case-stable: two ids differing only in case refer to the same
/// snapshot. Startup cleanup relies on this when reconciling shard filenames
/// whose case-insensitive normalizations collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(String);

impl SnapshotId {
    /// Create a snapshot id, normalizing to lowercase
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().to_lowercase())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of shard `index` for this snapshot
    pub fn shard_file_name(&self, index: usize) -> String {
        format!("{}_shard_{}.arrow", self.0, index)
    }

    /// File name of this snapshot's manifest
    pub fn manifest_file_name(&self) -> String {
        format!("{}_manifest.json", self.0)
    }

    /// File name of the legacy single-file encoding
    pub fn legacy_file_name(&self) -> String {
        format!("{}.arrow", self.0)
    }

    /// File name of legacy Parquet chunk `index`
    pub fn legacy_part_file_name(&self, index: usize) -> String {
        format!("{}_part_{}.parquet", self.0, index)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declared column type
///
/// The engine may widen values at runtime; this is the declared type carried
/// in manifests and table metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// Variable-length text
    Varchar,
    /// 64-bit integer
    Bigint,
    /// 64-bit float
    Double,
    /// Boolean
    Boolean,
    /// Calendar date
    Date,
    /// Date + time
    Timestamp,
}

impl ColumnType {
    /// Parse from a declared SQL type name (case-insensitive)
    ///
    /// Unrecognized declarations fall back to `Varchar`, matching how the
    /// engine treats untyped columns.
    pub fn from_decl(decl: &str) -> Self {
        let upper = decl.trim().to_uppercase();
        // Affinity-style matching: the engine reports declarations like
        // "BIGINT", "INTEGER", "DOUBLE PRECISION", "TEXT".
        if upper.contains("BIGINT") || upper.contains("INT") {
            ColumnType::Bigint
        } else if upper.contains("DOUBLE") || upper.contains("FLOAT") || upper.contains("REAL") {
            ColumnType::Double
        } else if upper.contains("BOOL") {
            ColumnType::Boolean
        } else if upper == "DATE" {
            ColumnType::Date
        } else if upper.contains("TIMESTAMP") || upper.contains("DATETIME") {
            ColumnType::Timestamp
        } else {
            ColumnType::Varchar
        }
    }

    /// The SQL declaration used when creating columns of this type
    pub fn sql_decl(&self) -> &'static str {
        match self {
            ColumnType::Varchar => "VARCHAR",
            ColumnType::Bigint => "BIGINT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Date => "DATE",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }

    /// Whether values of this type are textual
    pub fn is_textual(&self) -> bool {
        matches!(self, ColumnType::Varchar)
    }

    /// Whether values of this type are numeric
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Bigint | ColumnType::Double)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql_decl())
    }
}

/// One column of a table: name plus declared type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name as stored in the engine
    pub name: String,
    /// Declared type
    pub column_type: ColumnType,
}

impl ColumnInfo {
    /// Create a new column description
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// User-visible description of a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Stable identifier
    pub id: TableId,
    /// Normalized name (lowercased for the on-disk form)
    pub name: String,
    /// Ordered columns, including internal ones; callers filter for display
    pub columns: Vec<ColumnInfo>,
    /// Row count at last materialization or refresh
    pub row_count: usize,
    /// Per-column display preferences (e.g. word-wrap), keyed by column name
    #[serde(default)]
    pub column_preferences: std::collections::BTreeMap<String, serde_json::Value>,
}

impl TableInfo {
    /// Create a table description with no preferences
    pub fn new(id: TableId, name: impl Into<String>, columns: Vec<ColumnInfo>, row_count: usize) -> Self {
        Self {
            id,
            name: name.into(),
            columns,
            row_count,
            column_preferences: Default::default(),
        }
    }

    /// Columns with internal names filtered out
    pub fn user_columns(&self) -> Vec<&ColumnInfo> {
        self.columns
            .iter()
            .filter(|c| !crate::columns::is_internal_column(&c.name))
            .collect()
    }
}

/// Stable identity of one cell: row `_cs_id` plus column name
///
/// Serialized as `"{cs_id}:{column}"`, the form used by dirty-cell sets in
/// the persisted app state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellKey {
    /// Row identity
    pub cs_id: i64,
    /// Column name
    pub column: String,
}

impl CellKey {
    /// Create a cell key
    pub fn new(cs_id: i64, column: impl Into<String>) -> Self {
        Self {
            cs_id,
            column: column.into(),
        }
    }

    /// Parse the `"{cs_id}:{column}"` form
    ///
    /// Column names may themselves contain `:`; only the first separator
    /// splits.
    pub fn parse(s: &str) -> Option<Self> {
        let (id, col) = s.split_once(':')?;
        let cs_id = id.parse().ok()?;
        if col.is_empty() {
            return None;
        }
        Some(Self {
            cs_id,
            column: col.to_string(),
        })
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.cs_id, self.column)
    }
}

impl Serialize for CellKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CellKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        CellKey::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid cell key: {s}")))
    }
}
