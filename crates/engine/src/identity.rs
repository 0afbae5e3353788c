//! Row identity stamping and migration
//!
//! Every materialized user table carries two identity columns:
//! - `_cs_id BIGINT NOT NULL` — gap-based (`ROW_NUMBER() * 100`), strictly
//!   unique within the table, assigned at ingest, preserved across
//!   transforms, snapshots, and reload. The canonical ORDER BY key.
//! - `_cs_origin_id VARCHAR NOT NULL` — random UUID per row, assigned at
//!   ingest, never mutated.
//!
//! Tables restored from older snapshots may arrive without identity (both
//! columns synthesized here) or with dense ids (min gap of 1, renumbered to
//! the ×100 spacing in one transaction).

use crate::engine::{qident, query_on, sql_err, Engine};
use crate::schema::table_columns_on;
use cleanslate_core::{Result, Value, CS_ID, CS_ID_GAP, ORIGIN_ID};
use rusqlite::Connection;
use tracing::{debug, info};

/// Stamp identity columns on a freshly ingested table
///
/// Rebuilds the table as `_cs_id`, `_cs_origin_id`, then the original
/// columns, numbering rows in their current scan order.
pub fn stamp_identity(engine: &Engine, table: &str) -> Result<()> {
    engine.with_transaction(|conn| rebuild_with_identity(conn, table, false, false))
}

/// Ensure identity columns exist after an import
///
/// Synthesizes `_cs_id` (`ROW_NUMBER() * 100`) when missing and
/// `_cs_origin_id` (random UUIDs) when missing; keeps existing values when
/// present. The rewrite is atomic: temp table, drop, rename.
pub fn ensure_identity_columns(engine: &Engine, table: &str) -> Result<()> {
    engine.with_transaction(|conn| {
        let columns = table_columns_on(conn, table)?;
        let has_cs_id = columns.iter().any(|c| c.name == CS_ID);
        let has_origin = columns.iter().any(|c| c.name == ORIGIN_ID);
        if has_cs_id && has_origin {
            return Ok(());
        }
        debug!(table, has_cs_id, has_origin, "synthesizing identity columns");
        rebuild_with_identity(conn, table, has_cs_id, has_origin)
    })
}

fn rebuild_with_identity(
    conn: &Connection,
    table: &str,
    keep_cs_id: bool,
    keep_origin: bool,
) -> Result<()> {
    let columns = table_columns_on(conn, table)?;
    // Identity columns are always emitted first (kept or synthesized), so
    // they never pass through with the user columns.
    let passthrough: Vec<&cleanslate_core::ColumnInfo> = columns
        .iter()
        .filter(|c| c.name != CS_ID && c.name != ORIGIN_ID)
        .collect();

    let cs_id_expr = if keep_cs_id {
        qident(CS_ID)
    } else {
        // Window ordering follows the table's current scan order.
        format!("ROW_NUMBER() OVER () * {CS_ID_GAP}")
    };
    let origin_expr = if keep_origin {
        qident(ORIGIN_ID)
    } else {
        "GEN_UUID()".to_string()
    };

    // The rebuilt table keeps explicit declarations; identity columns stay
    // BIGINT/VARCHAR so ordering and comparisons remain numeric.
    let mut decls = vec![
        format!("{} BIGINT NOT NULL", qident(CS_ID)),
        format!("{} VARCHAR NOT NULL", qident(ORIGIN_ID)),
    ];
    let mut select_list = vec![cs_id_expr, origin_expr];
    for column in &passthrough {
        decls.push(format!(
            "{} {}",
            qident(&column.name),
            column.column_type.sql_decl()
        ));
        select_list.push(qident(&column.name));
    }

    let temp = format!("__temp_{table}_identity");
    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {temp_q};\n\
         CREATE TABLE {temp_q} ({decls});\n\
         INSERT INTO {temp_q} SELECT {select_list} FROM {table_q};\n\
         DROP TABLE {table_q};\n\
         ALTER TABLE {temp_q} RENAME TO {table_q};",
        temp_q = qident(&temp),
        table_q = qident(table),
        decls = decls.join(", "),
        select_list = select_list.join(", "),
    ))
    .map_err(sql_err)?;
    Ok(())
}

/// Renumber dense `_cs_id`s to the gap-based spacing when needed
///
/// A table restored without gap-based identity shows a minimum gap of 1
/// between consecutive ids. Returns true when a renumber ran.
pub fn migrate_dense_ids(engine: &Engine, table: &str) -> Result<bool> {
    engine.with_transaction(|conn| {
        let result = query_on(
            conn,
            &format!(
                "WITH ordered AS (SELECT {id} AS id, LAG({id}) OVER (ORDER BY {id}) AS prev FROM {t}) \
                 SELECT MIN(id - prev) FROM ordered WHERE prev IS NOT NULL",
                id = qident(CS_ID),
                t = qident(table),
            ),
        )?;
        let min_gap = result.rows.first().and_then(|r| r.first()).cloned();
        if min_gap != Some(Value::Int(1)) {
            return Ok(false);
        }

        info!(table, "dense row ids detected, renumbering to gap spacing");
        conn.execute_batch(&format!(
            "CREATE TEMP TABLE __renumber AS \
             SELECT {id} AS old_id, ROW_NUMBER() OVER (ORDER BY {id}) * {gap} AS new_id FROM {t};\n\
             UPDATE {t} SET {id} = (SELECT new_id FROM __renumber WHERE old_id = {t}.{id});\n\
             DROP TABLE __renumber;",
            id = qident(CS_ID),
            gap = CS_ID_GAP,
            t = qident(table),
        ))
        .map_err(sql_err)?;
        Ok(true)
    })
}

/// The next free gap-based id for appends
pub fn next_cs_id(engine: &Engine, table: &str) -> Result<i64> {
    let max = engine.query_scalar(&format!(
        "SELECT MAX({}) FROM {}",
        qident(CS_ID),
        qident(table)
    ))?;
    Ok(match max {
        Some(Value::Int(max)) => max + CS_ID_GAP,
        _ => CS_ID_GAP,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cleanslate_core::Value;

    fn engine() -> Engine {
        Engine::open_in_memory().unwrap()
    }

    fn ids(e: &Engine, table: &str) -> Vec<i64> {
        e.run_query(&format!("SELECT _cs_id FROM {table} ORDER BY _cs_id"))
            .unwrap()
            .rows
            .into_iter()
            .map(|r| r[0].as_int().unwrap())
            .collect()
    }

    #[test]
    fn test_stamp_identity_gap_based() {
        let e = engine();
        e.execute_batch("CREATE TABLE t (name VARCHAR); INSERT INTO t VALUES ('a'), ('b'), ('c');")
            .unwrap();
        stamp_identity(&e, "t").unwrap();
        assert_eq!(ids(&e, "t"), vec![100, 200, 300]);

        // Origin ids present and distinct
        let result = e.run_query("SELECT _cs_origin_id FROM t").unwrap();
        let mut origins: Vec<String> = result
            .rows
            .iter()
            .map(|r| r[0].as_text().unwrap().to_string())
            .collect();
        origins.sort();
        origins.dedup();
        assert_eq!(origins.len(), 3);
    }

    #[test]
    fn test_stamp_preserves_user_columns() {
        let e = engine();
        e.execute_batch("CREATE TABLE t (name VARCHAR, age BIGINT); INSERT INTO t VALUES ('a', 30);")
            .unwrap();
        stamp_identity(&e, "t").unwrap();
        let result = e.run_query("SELECT name, age FROM t").unwrap();
        assert_eq!(
            result.rows[0],
            vec![Value::Text("a".into()), Value::Int(30)]
        );
    }

    #[test]
    fn test_ensure_identity_noop_when_present() {
        let e = engine();
        e.execute_batch("CREATE TABLE t (name VARCHAR); INSERT INTO t VALUES ('a');")
            .unwrap();
        stamp_identity(&e, "t").unwrap();
        let before = e
            .run_query("SELECT _cs_id, _cs_origin_id FROM t")
            .unwrap();
        ensure_identity_columns(&e, "t").unwrap();
        let after = e
            .run_query("SELECT _cs_id, _cs_origin_id FROM t")
            .unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_ensure_identity_synthesizes_missing_cs_id() {
        let e = engine();
        e.execute_batch(
            "CREATE TABLE t (name VARCHAR, _cs_origin_id VARCHAR); \
             INSERT INTO t VALUES ('a', 'keep-me'), ('b', 'keep-too');",
        )
        .unwrap();
        ensure_identity_columns(&e, "t").unwrap();
        assert_eq!(ids(&e, "t"), vec![100, 200]);
        // Existing origin ids kept
        let result = e
            .run_query("SELECT _cs_origin_id FROM t ORDER BY _cs_id")
            .unwrap();
        assert_eq!(result.rows[0][0], Value::Text("keep-me".into()));
    }

    #[test]
    fn test_ensure_identity_synthesizes_missing_origin() {
        let e = engine();
        e.execute_batch(
            "CREATE TABLE t (_cs_id BIGINT, name VARCHAR); INSERT INTO t VALUES (700, 'a');",
        )
        .unwrap();
        ensure_identity_columns(&e, "t").unwrap();
        assert_eq!(ids(&e, "t"), vec![700]);
        let result = e.run_query("SELECT _cs_origin_id FROM t").unwrap();
        assert_eq!(result.rows[0][0].as_text().unwrap().len(), 36);
    }

    #[test]
    fn test_migrate_dense_ids() {
        let e = engine();
        e.execute_batch(
            "CREATE TABLE t (_cs_id BIGINT, _cs_origin_id VARCHAR, name VARCHAR); \
             INSERT INTO t VALUES (1, 'o1', 'a'), (2, 'o2', 'b'), (3, 'o3', 'c');",
        )
        .unwrap();
        assert!(migrate_dense_ids(&e, "t").unwrap());
        assert_eq!(ids(&e, "t"), vec![100, 200, 300]);
        // Order preserved
        let result = e.run_query("SELECT name FROM t ORDER BY _cs_id").unwrap();
        let names: Vec<&str> = result.rows.iter().map(|r| r[0].as_text().unwrap()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_migrate_skips_gapped_tables() {
        let e = engine();
        e.execute_batch(
            "CREATE TABLE t (_cs_id BIGINT, name VARCHAR); \
             INSERT INTO t VALUES (100, 'a'), (200, 'b');",
        )
        .unwrap();
        assert!(!migrate_dense_ids(&e, "t").unwrap());
        assert_eq!(ids(&e, "t"), vec![100, 200]);
    }

    #[test]
    fn test_migrate_skips_single_row() {
        let e = engine();
        e.execute_batch("CREATE TABLE t (_cs_id BIGINT); INSERT INTO t VALUES (1);")
            .unwrap();
        assert!(!migrate_dense_ids(&e, "t").unwrap());
    }

    #[test]
    fn test_next_cs_id() {
        let e = engine();
        e.execute_batch("CREATE TABLE t (_cs_id BIGINT); INSERT INTO t VALUES (100), (300);")
            .unwrap();
        assert_eq!(next_cs_id(&e, "t").unwrap(), 400);

        e.execute("CREATE TABLE empty (_cs_id BIGINT)").unwrap();
        assert_eq!(next_cs_id(&e, "empty").unwrap(), 100);
    }
}
