//! Row-key diff summaries
//!
//! Compares two tables on a user-chosen key column over user columns only.
//! Internal columns (identity, shadows, engine bookkeeping) never take part
//! in the value comparison, so a table whose `_cs_id`s were regenerated
//! still diffs clean against its original.
//!
//! The comparison materializes into a `_diff_*` working table (keyed by
//! `sort_key`), reads the counts, and drops it. Orphans from interrupted
//! runs are removed by startup cleanup.

use crate::engine::{qident, query_on, sql_err, Engine};
use crate::schema::table_columns_on;
use cleanslate_core::{is_internal_column, CoreError, Result, Value};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

/// Outcome counts of a row-key diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DiffSummary {
    /// Keys present in both tables with at least one differing user column
    pub modified: usize,
    /// Keys present in both tables with every user column equal
    pub unchanged: usize,
    /// Keys only in the right table
    pub added: usize,
    /// Keys only in the left table
    pub removed: usize,
}

/// Compare `left` and `right` on `key_column`, over shared user columns
pub fn diff_tables(
    engine: &Engine,
    left: &str,
    right: &str,
    key_column: &str,
) -> Result<DiffSummary> {
    if is_internal_column(key_column) {
        return Err(CoreError::invalid_input(format!(
            "diff key must be a user column, got {key_column}"
        )));
    }

    let work = format!("_diff_{}", Uuid::new_v4().simple());
    let result = engine.with_conn(|conn| {
        let left_cols = table_columns_on(conn, left)?;
        let right_cols = table_columns_on(conn, right)?;
        if left_cols.is_empty() {
            return Err(CoreError::table_missing(left));
        }
        if right_cols.is_empty() {
            return Err(CoreError::table_missing(right));
        }

        let key_exists = |cols: &[cleanslate_core::ColumnInfo]| {
            cols.iter().any(|c| c.name == key_column)
        };
        if !key_exists(&left_cols) || !key_exists(&right_cols) {
            return Err(CoreError::invalid_input(format!(
                "key column {key_column} must exist in both tables"
            )));
        }

        // Shared user columns, key excluded, in left-table order.
        let compared: Vec<String> = left_cols
            .iter()
            .map(|c| c.name.clone())
            .filter(|n| !is_internal_column(n) && n != key_column)
            .filter(|n| right_cols.iter().any(|c| &c.name == n))
            .collect();

        let differs = if compared.is_empty() {
            "0".to_string()
        } else {
            compared
                .iter()
                .map(|n| format!("l.{col} IS NOT r.{col}", col = qident(n)))
                .collect::<Vec<_>>()
                .join(" OR ")
        };

        let key = qident(key_column);
        let work_q = qident(&work);
        conn.execute_batch(&format!(
            "CREATE TABLE {work_q} AS \
             SELECT ROW_NUMBER() OVER (ORDER BY status, key_value) AS sort_key, status, key_value FROM ( \
               SELECT CASE WHEN {differs} THEN 'modified' ELSE 'unchanged' END AS status, \
                      l.{key} AS key_value \
               FROM {l} l JOIN {r} r ON l.{key} IS r.{key} \
               UNION ALL \
               SELECT 'removed', l.{key} FROM {l} l \
               WHERE NOT EXISTS (SELECT 1 FROM {r} r WHERE r.{key} IS l.{key}) \
               UNION ALL \
               SELECT 'added', r.{key} FROM {r} r \
               WHERE NOT EXISTS (SELECT 1 FROM {l} l WHERE l.{key} IS r.{key}) \
             )",
            l = qident(left),
            r = qident(right),
        ))
        .map_err(sql_err)?;

        let counts = query_on(
            conn,
            &format!("SELECT status, COUNT(*) FROM {work_q} GROUP BY status"),
        )?;
        let mut summary = DiffSummary::default();
        for row in &counts.rows {
            let n = match &row[1] {
                Value::Int(n) => *n as usize,
                _ => 0,
            };
            match row[0].as_text() {
                Some("modified") => summary.modified = n,
                Some("unchanged") => summary.unchanged = n,
                Some("added") => summary.added = n,
                Some("removed") => summary.removed = n,
                _ => {}
            }
        }
        Ok(summary)
    });

    // The working table goes away regardless of outcome.
    let _ = engine.drop_table_if_exists(&work);
    let summary = result?;
    debug!(left, right, key_column, ?summary, "diff complete");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::open_in_memory().unwrap()
    }

    fn seed_pair(e: &Engine) {
        e.execute_batch(
            "CREATE TABLE a (_cs_id BIGINT, id BIGINT, name VARCHAR); \
             CREATE TABLE b (_cs_id BIGINT, id BIGINT, name VARCHAR); \
             INSERT INTO a VALUES (100, 1, 'alice'), (200, 2, 'bob'), (300, 3, 'carol'); \
             INSERT INTO b VALUES (900, 1, 'alice'), (800, 2, 'bobby'), (700, 4, 'dave');",
        )
        .unwrap();
    }

    #[test]
    fn test_diff_counts() {
        let e = engine();
        seed_pair(&e);
        let summary = diff_tables(&e, "a", "b", "id").unwrap();
        assert_eq!(
            summary,
            DiffSummary {
                modified: 1,  // id 2: bob -> bobby
                unchanged: 1, // id 1
                added: 1,     // id 4
                removed: 1,   // id 3
            }
        );
    }

    #[test]
    fn test_diff_ignores_internal_columns() {
        let e = engine();
        // Identical user data, regenerated _cs_id values.
        e.execute_batch(
            "CREATE TABLE orig (_cs_id BIGINT, id BIGINT, name VARCHAR); \
             CREATE TABLE dup  (_cs_id BIGINT, id BIGINT, name VARCHAR); \
             INSERT INTO orig VALUES (100, 1, 'a'), (200, 2, 'b'), (300, 3, 'c'), (400, 4, 'd'), (500, 5, 'e'); \
             INSERT INTO dup  VALUES (9100, 1, 'a'), (9200, 2, 'b'), (9300, 3, 'c'), (9400, 4, 'd'), (9500, 5, 'e');",
        )
        .unwrap();
        let summary = diff_tables(&e, "orig", "dup", "id").unwrap();
        assert_eq!(summary.modified, 0);
        assert_eq!(summary.unchanged, 5);
        assert_eq!(summary.added, 0);
        assert_eq!(summary.removed, 0);
    }

    #[test]
    fn test_diff_null_safe_comparison() {
        let e = engine();
        e.execute_batch(
            "CREATE TABLE a (id BIGINT, v VARCHAR); \
             CREATE TABLE b (id BIGINT, v VARCHAR); \
             INSERT INTO a VALUES (1, NULL), (2, 'x'); \
             INSERT INTO b VALUES (1, NULL), (2, NULL);",
        )
        .unwrap();
        let summary = diff_tables(&e, "a", "b", "id").unwrap();
        // NULL = NULL counts as unchanged; x -> NULL counts as modified.
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.modified, 1);
    }

    #[test]
    fn test_diff_rejects_internal_key() {
        let e = engine();
        seed_pair(&e);
        assert!(diff_tables(&e, "a", "b", "_cs_id").is_err());
    }

    #[test]
    fn test_diff_missing_table() {
        let e = engine();
        seed_pair(&e);
        assert!(diff_tables(&e, "a", "nope", "id").is_err());
    }

    #[test]
    fn test_working_table_dropped() {
        let e = engine();
        seed_pair(&e);
        diff_tables(&e, "a", "b", "id").unwrap();
        let result = e
            .run_query("SELECT name FROM sqlite_master WHERE name LIKE '\\_diff\\_%' ESCAPE '\\'")
            .unwrap();
        assert!(result.is_empty());
    }
}
