use chrono::NaiveTime;
use duckdb::types::{TimeUnit, ToSql, ToSqlOutput, Value as DuckValue};
use duckdb::{appender_params_from_iter, Connection};
use itertools::Itertools;

use super::{quote_ident, TableSink};
use crate::dataset::{Column, Row, Value};
use crate::error::Result;

/// Target table in a DuckDB database, in memory or on disk.
pub struct DuckDbSink {
    conn: Connection,
}

impl DuckDbSink {
    pub fn new(conn: Connection) -> DuckDbSink {
        DuckDbSink { conn }
    }

    pub fn open_in_memory() -> Result<DuckDbSink> {
        Ok(DuckDbSink::new(Connection::open_in_memory()?))
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn row_count(&self, table: &str) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            &format!("SELECT count(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }
}

impl TableSink for DuckDbSink {
    fn replace_table(&mut self, table: &str, columns: &[Column], rows: &[Row]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {};\n{};",
            quote_ident(table),
            create_table_sql(table, columns)
        ))?;
        append(&tx, table, rows)?;
        tx.commit()?;
        Ok(())
    }

    fn append_rows(&mut self, table: &str, _columns: &[Column], rows: &[Row]) -> Result<()> {
        let tx = self.conn.transaction()?;
        append(&tx, table, rows)?;
        tx.commit()?;
        Ok(())
    }
}

pub fn create_table_sql(table: &str, columns: &[Column]) -> String {
    format!(
        "CREATE TABLE {} ({})",
        quote_ident(table),
        columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.column_type.duckdb_name()))
            .join(", ")
    )
}

fn append(conn: &Connection, table: &str, rows: &[Row]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut appender = conn.appender(table)?;
    for row in rows {
        appender.append_row(appender_params_from_iter(row.iter()))?;
    }
    appender.flush()?;
    Ok(())
}

impl ToSql for Value {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        let value = match self {
            Value::Null => DuckValue::Null,
            Value::Boolean(v) => DuckValue::Boolean(*v),
            Value::SmallInt(v) => DuckValue::SmallInt(*v),
            Value::Integer(v) => DuckValue::Int(*v),
            Value::BigInt(v) => DuckValue::BigInt(*v),
            Value::Real(v) => DuckValue::Float(*v),
            Value::Double(v) => DuckValue::Double(*v),
            Value::Text(v) => DuckValue::Text(v.clone()),
            Value::Bytes(v) => DuckValue::Blob(v.clone()),
            Value::Date(v) => {
                let days = v.and_time(NaiveTime::MIN).and_utc().timestamp() / 86_400;
                DuckValue::Date32(days as i32)
            }
            Value::Timestamp(v) => {
                DuckValue::Timestamp(TimeUnit::Microsecond, v.and_utc().timestamp_micros())
            }
            Value::TimestampTz(v) => {
                DuckValue::Timestamp(TimeUnit::Microsecond, v.timestamp_micros())
            }
        };
        Ok(ToSqlOutput::Owned(value))
    }
}
