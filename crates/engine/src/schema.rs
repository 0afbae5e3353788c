//! Schema introspection and order-by detection

use crate::engine::{qident, sql_err, Engine};
use cleanslate_core::{ColumnInfo, ColumnType, Result, CS_ID};
use rusqlite::Connection;

/// Columns of a table, in declaration order
pub fn table_columns(engine: &Engine, table: &str) -> Result<Vec<ColumnInfo>> {
    engine.with_conn(|conn| table_columns_on(conn, table))
}

/// Columns of a table on an already-held connection
pub fn table_columns_on(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn
        .prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")
        .map_err(sql_err)?;
    let rows = stmt
        .query_map([table], |row| {
            let name: String = row.get(0)?;
            let decl: String = row.get(1)?;
            Ok(ColumnInfo::new(name, ColumnType::from_decl(&decl)))
        })
        .map_err(sql_err)?;
    let mut columns = Vec::new();
    for row in rows {
        columns.push(row.map_err(sql_err)?);
    }
    Ok(columns)
}

/// Row count of a table
pub fn row_count(engine: &Engine, table: &str) -> Result<usize> {
    engine.with_conn(|conn| row_count_on(conn, table))
}

/// Row count on an already-held connection
pub fn row_count_on(conn: &Connection, table: &str) -> Result<usize> {
    let count: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM {}", qident(table)), [], |row| {
            row.get(0)
        })
        .map_err(sql_err)?;
    Ok(count as usize)
}

/// Rename a table
pub fn rename_table(engine: &Engine, from: &str, to: &str) -> Result<()> {
    engine.execute_batch(&format!(
        "ALTER TABLE {} RENAME TO {}",
        qident(from),
        qident(to)
    ))
}

/// Detect the deterministic ordering key for a table
///
/// `_cs_id` for normal tables; `sort_key` falling back to `row_id` for diff
/// tables (which carry no `_cs_id`); empty when none of these exist.
pub fn detect_order_by(columns: &[ColumnInfo]) -> String {
    let has = |name: &str| columns.iter().any(|c| c.name == name);
    if has(CS_ID) {
        CS_ID.to_string()
    } else if has("sort_key") {
        "sort_key".to_string()
    } else if has("row_id") {
        "row_id".to_string()
    } else {
        String::new()
    }
}

/// Ordering key of a live table
pub fn detect_order_by_for(engine: &Engine, table: &str) -> Result<String> {
    Ok(detect_order_by(&table_columns(engine, table)?))
}
