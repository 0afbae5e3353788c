//! The engine handle
//!
//! A single [`Engine`] owns the embedded connection for the whole process,
//! behind a mutex. Public operations acquire the lock once and run to
//! completion; sibling modules compose multi-statement work through
//! [`Engine::with_conn`] so one logical operation holds one lock scope.
//!
//! Never call back into the engine from inside a `with_conn` closure: the
//! lock is not reentrant.

use cleanslate_core::{CoreError, Result, Value};
use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tracing::debug;

/// Convert an engine-level error
pub(crate) fn sql_err(e: rusqlite::Error) -> CoreError {
    CoreError::Engine(e.to_string())
}

/// Double-quote an identifier for SQL, escaping embedded quotes
pub fn qident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Result of a query: column names plus rows of values
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Column names in projection order
    pub columns: Vec<String>,
    /// Rows in result order
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when no rows came back
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one named column, in row order
    pub fn column_values(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }
}

fn value_from_ref(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Text(String::from_utf8_lossy(b).into_owned()),
    }
}

pub(crate) fn to_sql_value(v: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sv;
    match v {
        Value::Null => Sv::Null,
        Value::Bool(b) => Sv::Integer(i64::from(*b)),
        Value::Int(i) => Sv::Integer(*i),
        Value::Float(f) => Sv::Real(*f),
        Value::Text(s) => Sv::Text(s.clone()),
    }
}

/// The process-wide engine handle
pub struct Engine {
    conn: Mutex<Connection>,
}

impl Engine {
    /// Open an in-memory engine with the dialect shims registered
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        crate::shims::register_all(&conn).map_err(sql_err)?;
        debug!("engine opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run a closure against the raw connection under the engine lock
    ///
    /// The composition point for sibling modules. The closure must not call
    /// back into the engine.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run a closure inside a transaction; rolls back on error
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(sql_err)?;
        match f(&tx) {
            Ok(out) => {
                tx.commit().map_err(sql_err)?;
                Ok(out)
            }
            Err(e) => {
                // Drop rolls the transaction back.
                Err(e)
            }
        }
    }

    /// Execute one statement, returning the affected row count
    pub fn execute(&self, sql: &str) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute(sql, []).map_err(sql_err)
    }

    /// Execute multiple statements separated by semicolons
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(sql).map_err(sql_err)
    }

    /// Execute statements inside one transaction, returning per-statement
    /// affected row counts
    pub fn execute_all_in_transaction(&self, stmts: &[String]) -> Result<Vec<usize>> {
        self.with_transaction(|conn| {
            let mut counts = Vec::with_capacity(stmts.len());
            for sql in stmts {
                counts.push(conn.execute(sql, []).map_err(sql_err)?);
            }
            Ok(counts)
        })
    }

    /// Run a read query, materializing every row
    pub fn run_query(&self, sql: &str) -> Result<QueryResult> {
        let conn = self.conn.lock();
        query_on(&conn, sql)
    }

    /// Run a query returning a single optional scalar
    pub fn query_scalar(&self, sql: &str) -> Result<Option<Value>> {
        let result = self.run_query(sql)?;
        Ok(result.rows.into_iter().next().and_then(|r| r.into_iter().next()))
    }

    /// True when a table with this exact name exists
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .map_err(sql_err)?;
        Ok(count > 0)
    }

    /// Drop a table; no-op when absent
    pub fn drop_table_if_exists(&self, table: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", qident(table)))
            .map_err(sql_err)?;
        Ok(())
    }

    /// Release engine memory back to the allocator
    ///
    /// Issued after large exports, freezes, and at the end of startup.
    pub fn checkpoint(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA shrink_memory;").map_err(sql_err)?;
        debug!("checkpoint complete");
        Ok(())
    }
}

/// Run a query on an already-held connection
pub(crate) fn query_on(conn: &Connection, sql: &str) -> Result<QueryResult> {
    let mut stmt = conn.prepare(sql).map_err(sql_err)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let col_count = columns.len();
    let mut rows = Vec::new();
    let mut raw = stmt.query([]).map_err(sql_err)?;
    while let Some(row) = raw.next().map_err(sql_err)? {
        let mut out = Vec::with_capacity(col_count);
        for i in 0..col_count {
            out.push(value_from_ref(row.get_ref(i).map_err(sql_err)?));
        }
        rows.push(out);
    }
    Ok(QueryResult { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::open_in_memory().unwrap()
    }

    #[test]
    fn test_execute_and_query() {
        let e = engine();
        e.execute_batch("CREATE TABLE t (a BIGINT, b VARCHAR); INSERT INTO t VALUES (1, 'x'), (2, NULL);")
            .unwrap();
        let result = e.run_query("SELECT a, b FROM t ORDER BY a").unwrap();
        assert_eq!(result.columns, vec!["a", "b"]);
        assert_eq!(
            result.rows,
            vec![
                vec![Value::Int(1), Value::Text("x".into())],
                vec![Value::Int(2), Value::Null],
            ]
        );
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_column_values() {
        let e = engine();
        e.execute_batch("CREATE TABLE t (a BIGINT); INSERT INTO t VALUES (5), (7);")
            .unwrap();
        let result = e.run_query("SELECT a FROM t ORDER BY a").unwrap();
        let vals = result.column_values("a").unwrap();
        assert_eq!(vals, vec![&Value::Int(5), &Value::Int(7)]);
        assert!(result.column_values("missing").is_none());
    }

    #[test]
    fn test_query_scalar() {
        let e = engine();
        assert_eq!(e.query_scalar("SELECT 42").unwrap(), Some(Value::Int(42)));
        assert_eq!(
            e.query_scalar("SELECT 1 WHERE 1 = 0").unwrap(),
            None
        );
    }

    #[test]
    fn test_table_exists_and_drop() {
        let e = engine();
        assert!(!e.table_exists("t").unwrap());
        e.execute("CREATE TABLE t (a BIGINT)").unwrap();
        assert!(e.table_exists("t").unwrap());
        e.drop_table_if_exists("t").unwrap();
        assert!(!e.table_exists("t").unwrap());
        // No-op on absence
        e.drop_table_if_exists("t").unwrap();
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let e = engine();
        e.execute("CREATE TABLE t (a BIGINT)").unwrap();
        let err = e.with_transaction(|conn| {
            conn.execute("INSERT INTO t VALUES (1)", []).map_err(sql_err)?;
            Err::<(), _>(CoreError::internal("forced failure"))
        });
        assert!(err.is_err());
        let result = e.run_query("SELECT COUNT(*) FROM t").unwrap();
        assert_eq!(result.rows[0][0], Value::Int(0));
    }

    #[test]
    fn test_execute_all_in_transaction_counts() {
        let e = engine();
        e.execute("CREATE TABLE t (a BIGINT)").unwrap();
        let counts = e
            .execute_all_in_transaction(&[
                "INSERT INTO t VALUES (1), (2)".to_string(),
                "UPDATE t SET a = a + 1".to_string(),
            ])
            .unwrap();
        assert_eq!(counts, vec![2, 2]);
    }

    #[test]
    fn test_execute_all_atomic() {
        let e = engine();
        e.execute("CREATE TABLE t (a BIGINT)").unwrap();
        let err = e.execute_all_in_transaction(&[
            "INSERT INTO t VALUES (1)".to_string(),
            "INSERT INTO nonexistent VALUES (1)".to_string(),
        ]);
        assert!(err.is_err());
        let result = e.run_query("SELECT COUNT(*) FROM t").unwrap();
        assert_eq!(result.rows[0][0], Value::Int(0));
    }

    #[test]
    fn test_qident_escapes() {
        assert_eq!(qident("name"), "\"name\"");
        assert_eq!(qident("od\"d"), "\"od\"\"d\"");
    }

    #[test]
    fn test_checkpoint_is_callable() {
        engine().checkpoint().unwrap();
    }
}
