//! Internal-column filtering
//!
//! Internal columns carry row identity, tier-1 undo shadows, and engine
//! bookkeeping. They are filtered from every user-facing projection: the grid
//! column list, transformation pickers, diff column lists, schema banners,
//! and CSV export. The predicate lives here so every boundary applies the
//! same rule.

/// True if `name` is an internal column that must never surface to users
///
/// Internal names: anything starting with `_` (identity columns, diff
/// bookkeeping), anything ending with `__base` (tier-1 undo shadows), and the
/// engine-reserved names `duckdb_schema` and `row_id`.
pub fn is_internal_column(name: &str) -> bool {
    name.starts_with('_') || name.ends_with("__base") || name == "duckdb_schema" || name == "row_id"
}

/// Filter a column-name list down to user-visible names, preserving order
pub fn filter_user_columns<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    names
        .iter()
        .map(|n| n.as_ref())
        .filter(|n| !is_internal_column(n))
        .map(|n| n.to_string())
        .collect()
}
