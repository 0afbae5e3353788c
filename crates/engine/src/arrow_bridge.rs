//! RecordBatch import/export
//!
//! The bridge between the engine's tables and Arrow record batches. The
//! snapshot store serializes batches to IPC shard files; this module only
//! moves data between live tables and batches.
//!
//! Type mapping is deliberately narrow: text, 64-bit integers, doubles, and
//! booleans map natively; dates and timestamps travel as text. Batches
//! arriving with other types are cast on import.

use crate::engine::{qident, sql_err, to_sql_value, Engine, QueryResult};
use crate::schema::{table_columns_on, table_columns};
use arrow::array::{
    Array, ArrayRef, BooleanArray, BooleanBuilder, Float64Array, Float64Builder, Int64Array,
    Int64Builder, RecordBatch, StringArray, StringBuilder,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use cleanslate_core::{ColumnInfo, ColumnType, CoreError, Result, Value};
use rusqlite::Connection;
use std::sync::Arc;
use tracing::{debug, warn};

/// Arrow data type used for a declared column type
pub fn arrow_type(column_type: ColumnType) -> DataType {
    match column_type {
        ColumnType::Varchar | ColumnType::Date | ColumnType::Timestamp => DataType::Utf8,
        ColumnType::Bigint => DataType::Int64,
        ColumnType::Double => DataType::Float64,
        ColumnType::Boolean => DataType::Boolean,
    }
}

/// Declared column type for an Arrow data type
pub fn column_type_for(data_type: &DataType) -> ColumnType {
    match data_type {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => ColumnType::Bigint,
        DataType::Float16 | DataType::Float32 | DataType::Float64 => ColumnType::Double,
        DataType::Boolean => ColumnType::Boolean,
        DataType::Date32 | DataType::Date64 => ColumnType::Date,
        DataType::Timestamp(_, _) => ColumnType::Timestamp,
        _ => ColumnType::Varchar,
    }
}

/// Arrow schema for a column list
pub fn schema_for(columns: &[ColumnInfo]) -> SchemaRef {
    let fields: Vec<Field> = columns
        .iter()
        .map(|c| Field::new(&c.name, arrow_type(c.column_type), true))
        .collect();
    Arc::new(Schema::new(fields))
}

/// Column list for an Arrow schema
pub fn columns_for(schema: &Schema) -> Vec<ColumnInfo> {
    schema
        .fields()
        .iter()
        .map(|f| ColumnInfo::new(f.name().clone(), column_type_for(f.data_type())))
        .collect()
}

/// Run a query and pack the result into one RecordBatch
///
/// `columns` declares the projection's names and types; the query must
/// produce them in order.
pub fn query_to_batch(engine: &Engine, sql: &str, columns: &[ColumnInfo]) -> Result<RecordBatch> {
    let result = engine.run_query(sql)?;
    batch_from_result(&result, columns)
}

fn batch_from_result(result: &QueryResult, columns: &[ColumnInfo]) -> Result<RecordBatch> {
    if result.columns.len() != columns.len() {
        return Err(CoreError::internal(format!(
            "projection produced {} columns, expected {}",
            result.columns.len(),
            columns.len()
        )));
    }

    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len());
    for (idx, column) in columns.iter().enumerate() {
        let array: ArrayRef = match arrow_type(column.column_type) {
            DataType::Int64 => {
                let mut builder = Int64Builder::with_capacity(result.rows.len());
                for row in &result.rows {
                    match &row[idx] {
                        Value::Int(i) => builder.append_value(*i),
                        Value::Bool(b) => builder.append_value(i64::from(*b)),
                        Value::Null => builder.append_null(),
                        other => {
                            // Out-of-class value; preserve what parses.
                            match other.display_string().parse::<i64>() {
                                Ok(i) => builder.append_value(i),
                                Err(_) => builder.append_null(),
                            }
                        }
                    }
                }
                Arc::new(builder.finish())
            }
            DataType::Float64 => {
                let mut builder = Float64Builder::with_capacity(result.rows.len());
                for row in &result.rows {
                    match &row[idx] {
                        Value::Float(f) => builder.append_value(*f),
                        Value::Int(i) => builder.append_value(*i as f64),
                        Value::Null => builder.append_null(),
                        other => match other.display_string().parse::<f64>() {
                            Ok(f) => builder.append_value(f),
                            Err(_) => builder.append_null(),
                        },
                    }
                }
                Arc::new(builder.finish())
            }
            DataType::Boolean => {
                let mut builder = BooleanBuilder::with_capacity(result.rows.len());
                for row in &result.rows {
                    match &row[idx] {
                        Value::Bool(b) => builder.append_value(*b),
                        Value::Int(i) => builder.append_value(*i != 0),
                        Value::Null => builder.append_null(),
                        _ => builder.append_null(),
                    }
                }
                Arc::new(builder.finish())
            }
            _ => {
                let mut builder = StringBuilder::new();
                for row in &result.rows {
                    match &row[idx] {
                        Value::Null => builder.append_null(),
                        other => builder.append_value(other.display_string()),
                    }
                }
                Arc::new(builder.finish())
            }
        };
        arrays.push(array);
    }

    RecordBatch::try_new(schema_for(columns), arrays)
        .map_err(|e| CoreError::internal(format!("record batch assembly failed: {e}")))
}

/// Create a table from a batch (drops any existing table of that name)
pub fn create_table_from_batch(engine: &Engine, table: &str, batch: &RecordBatch) -> Result<()> {
    let columns = columns_for(batch.schema().as_ref());
    engine.with_transaction(|conn| {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", qident(table)))
            .map_err(sql_err)?;
        create_empty_on(conn, table, &columns)?;
        insert_batch_on(conn, table, &columns, batch)
    })?;
    debug!(table, rows = batch.num_rows(), "table created from batch");
    Ok(())
}

/// Create an empty table with the given columns
pub fn create_empty_table(engine: &Engine, table: &str, columns: &[ColumnInfo]) -> Result<()> {
    engine.with_conn(|conn| create_empty_on(conn, table, columns))
}

fn create_empty_on(conn: &Connection, table: &str, columns: &[ColumnInfo]) -> Result<()> {
    let decls: Vec<String> = columns
        .iter()
        .map(|c| format!("{} {}", qident(&c.name), c.column_type.sql_decl()))
        .collect();
    conn.execute_batch(&format!(
        "CREATE TABLE {} ({})",
        qident(table),
        decls.join(", ")
    ))
    .map_err(sql_err)?;
    Ok(())
}

/// Append a batch to an existing table
///
/// When the batch's column names match the table in order, rows insert
/// directly. Otherwise the batch lands in a temp table and the common
/// columns copy across; no common columns is a schema-drift failure.
pub fn append_batch(engine: &Engine, table: &str, batch: &RecordBatch) -> Result<()> {
    let table_cols = table_columns(engine, table)?;
    let batch_cols = columns_for(batch.schema().as_ref());

    let matches = table_cols.len() == batch_cols.len()
        && table_cols
            .iter()
            .zip(batch_cols.iter())
            .all(|(t, b)| t.name == b.name);

    if matches {
        return engine
            .with_transaction(|conn| insert_batch_on(conn, table, &batch_cols, batch));
    }

    // Schema drift: stage in a temp table, copy the common columns.
    let common: Vec<String> = table_cols
        .iter()
        .map(|c| c.name.clone())
        .filter(|n| batch_cols.iter().any(|b| &b.name == n))
        .collect();
    if common.is_empty() {
        return Err(CoreError::engine(format!(
            "no common columns between batch and table {table}"
        )));
    }
    warn!(
        table,
        common = common.len(),
        "batch schema differs, staging through temp table"
    );

    let temp = format!("__temp_append_{table}");
    engine.with_transaction(|conn| {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", qident(&temp)))
            .map_err(sql_err)?;
        create_empty_on(conn, &temp, &batch_cols)?;
        insert_batch_on(conn, &temp, &batch_cols, batch)?;
        let list: Vec<String> = common.iter().map(|n| qident(n)).collect();
        let list = list.join(", ");
        conn.execute(
            &format!(
                "INSERT INTO {} ({list}) SELECT {list} FROM {}",
                qident(table),
                qident(&temp)
            ),
            [],
        )
        .map_err(sql_err)?;
        conn.execute_batch(&format!("DROP TABLE {}", qident(&temp)))
            .map_err(sql_err)?;
        Ok(())
    })
}

fn insert_batch_on(
    conn: &Connection,
    table: &str,
    columns: &[ColumnInfo],
    batch: &RecordBatch,
) -> Result<()> {
    if batch.num_rows() == 0 {
        return Ok(());
    }

    // Normalize every column to its canonical array type once.
    let mut normalized: Vec<ArrayRef> = Vec::with_capacity(columns.len());
    for (idx, column) in columns.iter().enumerate() {
        let target = arrow_type(column.column_type);
        let array = batch.column(idx);
        let array = if array.data_type() == &target {
            Arc::clone(array)
        } else {
            cast(array.as_ref(), &target)
                .map_err(|e| CoreError::serialization(format!("column cast failed: {e}")))?
        };
        normalized.push(array);
    }

    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let names: Vec<String> = columns.iter().map(|c| qident(&c.name)).collect();
    let mut stmt = conn
        .prepare(&format!(
            "INSERT INTO {} ({}) VALUES ({})",
            qident(table),
            names.join(", "),
            placeholders.join(", ")
        ))
        .map_err(sql_err)?;

    for row in 0..batch.num_rows() {
        let mut params: Vec<rusqlite::types::Value> = Vec::with_capacity(columns.len());
        for array in &normalized {
            params.push(to_sql_value(&array_value(array, row)));
        }
        stmt.execute(rusqlite::params_from_iter(params)).map_err(sql_err)?;
    }
    Ok(())
}

fn array_value(array: &ArrayRef, row: usize) -> Value {
    if array.is_null(row) {
        return Value::Null;
    }
    match array.data_type() {
        DataType::Int64 => {
            let a = array.as_any().downcast_ref::<Int64Array>().unwrap();
            Value::Int(a.value(row))
        }
        DataType::Float64 => {
            let a = array.as_any().downcast_ref::<Float64Array>().unwrap();
            Value::Float(a.value(row))
        }
        DataType::Boolean => {
            let a = array.as_any().downcast_ref::<BooleanArray>().unwrap();
            Value::Bool(a.value(row))
        }
        _ => {
            let a = array.as_any().downcast_ref::<StringArray>().unwrap();
            Value::Text(a.value(row).to_string())
        }
    }
}

/// Create a table directly from rows (ingest path)
pub fn create_table_from_rows(
    engine: &Engine,
    table: &str,
    columns: &[ColumnInfo],
    rows: &[Vec<Value>],
) -> Result<()> {
    engine.with_transaction(|conn| {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", qident(table)))
            .map_err(sql_err)?;
        create_empty_on(conn, table, columns)?;
        if rows.is_empty() {
            return Ok(());
        }
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let names: Vec<String> = columns.iter().map(|c| qident(&c.name)).collect();
        let mut stmt = conn
            .prepare(&format!(
                "INSERT INTO {} ({}) VALUES ({})",
                qident(table),
                names.join(", "),
                placeholders.join(", ")
            ))
            .map_err(sql_err)?;
        for row in rows {
            if row.len() != columns.len() {
                return Err(CoreError::invalid_input(format!(
                    "row has {} values, table {table} has {} columns",
                    row.len(),
                    columns.len()
                )));
            }
            let params: Vec<rusqlite::types::Value> = row.iter().map(to_sql_value).collect();
            stmt.execute(rusqlite::params_from_iter(params)).map_err(sql_err)?;
        }
        Ok(())
    })?;

    // Confirm the declared shape matches what the engine now reports.
    let created = engine.with_conn(|conn| table_columns_on(conn, table))?;
    debug_assert_eq!(created.len(), columns.len());
    Ok(())
}
