use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use duckdb::types::{TimeUnit, Value as DuckValue};
use duckdb::Connection;
use itertools::Itertools;
use log::info;

use crate::db::quote_ident;
use crate::error::{LoadError, Result};

/// Column types that survive the trip from the source file into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Text,
    Bytes,
    Date,
    Timestamp,
    TimestampTz,
}

impl ColumnType {
    /// Infer the column type from a DuckDB type name, as reported by
    /// `DESCRIBE`.  Types without a portable counterpart (TIME, INTERVAL,
    /// UUID, lists, structs, ...) are carried as text.
    pub fn from_duckdb(type_name: &str) -> ColumnType {
        let name = type_name.trim().to_uppercase();
        match name.as_str() {
            "BOOLEAN" | "BOOL" => ColumnType::Boolean,
            "TINYINT" | "SMALLINT" | "UTINYINT" => ColumnType::SmallInt,
            "INTEGER" | "INT" | "USMALLINT" => ColumnType::Integer,
            "BIGINT" | "UINTEGER" => ColumnType::BigInt,
            "FLOAT" | "REAL" => ColumnType::Real,
            "DOUBLE" | "HUGEINT" | "UBIGINT" | "UHUGEINT" => ColumnType::Double,
            "VARCHAR" => ColumnType::Text,
            "BLOB" => ColumnType::Bytes,
            "DATE" => ColumnType::Date,
            "TIMESTAMP" | "DATETIME" | "TIMESTAMP_S" | "TIMESTAMP_MS" | "TIMESTAMP_NS" => {
                ColumnType::Timestamp
            }
            "TIMESTAMP WITH TIME ZONE" | "TIMESTAMPTZ" => ColumnType::TimestampTz,
            s if s.starts_with("DECIMAL") || s.starts_with("NUMERIC") => ColumnType::Double,
            _ => ColumnType::Text,
        }
    }

    /// Canonical DuckDB type, used both to cast source columns on read and
    /// for DuckDB table definitions.
    pub fn duckdb_name(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::SmallInt => "SMALLINT",
            ColumnType::Integer => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Real => "REAL",
            ColumnType::Double => "DOUBLE",
            ColumnType::Text => "VARCHAR",
            ColumnType::Bytes => "BLOB",
            ColumnType::Date => "DATE",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::TimestampTz => "TIMESTAMPTZ",
        }
    }

    pub fn postgres_name(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::SmallInt => "SMALLINT",
            ColumnType::Integer => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Real => "REAL",
            ColumnType::Double => "DOUBLE PRECISION",
            ColumnType::Text => "TEXT",
            ColumnType::Bytes => "BYTEA",
            ColumnType::Date => "DATE",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::TimestampTz => "TIMESTAMPTZ",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: &str, column_type: ColumnType) -> Column {
        Column {
            name: name.to_string(),
            column_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
}

impl Value {
    /// The column type this value belongs to, `None` for a null.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(ColumnType::Boolean),
            Value::SmallInt(_) => Some(ColumnType::SmallInt),
            Value::Integer(_) => Some(ColumnType::Integer),
            Value::BigInt(_) => Some(ColumnType::BigInt),
            Value::Real(_) => Some(ColumnType::Real),
            Value::Double(_) => Some(ColumnType::Double),
            Value::Text(_) => Some(ColumnType::Text),
            Value::Bytes(_) => Some(ColumnType::Bytes),
            Value::Date(_) => Some(ColumnType::Date),
            Value::Timestamp(_) => Some(ColumnType::Timestamp),
            Value::TimestampTz(_) => Some(ColumnType::TimestampTz),
        }
    }

    /// Nulls fit every column.
    pub fn fits(&self, column_type: ColumnType) -> bool {
        self.column_type().map_or(true, |t| t == column_type)
    }

    /// Convert a DuckDB value read from a column already cast to
    /// `column_type.duckdb_name()`.
    pub fn from_duckdb(value: DuckValue, column_type: ColumnType) -> Result<Value> {
        let out = match (column_type, value) {
            (_, DuckValue::Null) => Value::Null,
            (ColumnType::Boolean, DuckValue::Boolean(v)) => Value::Boolean(v),
            (ColumnType::SmallInt, DuckValue::SmallInt(v)) => Value::SmallInt(v),
            (ColumnType::Integer, DuckValue::Int(v)) => Value::Integer(v),
            (ColumnType::BigInt, DuckValue::BigInt(v)) => Value::BigInt(v),
            (ColumnType::Real, DuckValue::Float(v)) => Value::Real(v),
            (ColumnType::Double, DuckValue::Double(v)) => Value::Double(v),
            (ColumnType::Text, DuckValue::Text(v)) => Value::Text(v),
            (ColumnType::Bytes, DuckValue::Blob(v)) => Value::Bytes(v),
            (ColumnType::Date, DuckValue::Date32(days)) => {
                let dt = DateTime::from_timestamp(i64::from(days) * 86_400, 0).ok_or_else(|| {
                    LoadError::Schema(format!("date out of range: {} days", days))
                })?;
                Value::Date(dt.date_naive())
            }
            (ColumnType::Timestamp, DuckValue::Timestamp(unit, v)) => {
                Value::Timestamp(utc_from_unit(unit, v)?.naive_utc())
            }
            (ColumnType::TimestampTz, DuckValue::Timestamp(unit, v)) => {
                Value::TimestampTz(utc_from_unit(unit, v)?)
            }
            (t, v) => {
                return Err(LoadError::Schema(format!(
                    "value {:?} does not fit a {} column",
                    v,
                    t.duckdb_name()
                )))
            }
        };
        Ok(out)
    }
}

fn utc_from_unit(unit: TimeUnit, v: i64) -> Result<DateTime<Utc>> {
    let micros = match unit {
        TimeUnit::Second => v.checked_mul(1_000_000),
        TimeUnit::Millisecond => v.checked_mul(1_000),
        TimeUnit::Microsecond => Some(v),
        TimeUnit::Nanosecond => Some(v / 1_000),
    };
    micros
        .and_then(DateTime::from_timestamp_micros)
        .ok_or_else(|| LoadError::Schema(format!("timestamp out of range: {} {:?}", v, unit)))
}

pub type Row = Vec<Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Parquet,
    Csv,
}

impl SourceFormat {
    /// CSV for `.csv` and `.csv.gz` files, Parquet for everything else.
    pub fn from_path(path: &Path) -> SourceFormat {
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.ends_with(".csv") || name.ends_with(".csv.gz") {
            SourceFormat::Csv
        } else {
            SourceFormat::Parquet
        }
    }

    /// The DuckDB table function scanning `path`.
    fn scan(&self, path: &Path) -> String {
        let literal = path.to_string_lossy().replace('\'', "''");
        match self {
            SourceFormat::Parquet => format!("read_parquet('{}')", literal),
            SourceFormat::Csv => format!("read_csv_auto('{}', header = true)", literal),
        }
    }
}

/// The whole source file, in memory.  Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    columns: Vec<Column>,
    rows: Vec<Row>,
}

impl Dataset {
    /// Check that every row has one value per column and that every value
    /// fits its column.
    pub fn new(columns: Vec<Column>, rows: Vec<Row>) -> Result<Dataset> {
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(LoadError::Schema(format!(
                    "row {} has {} values, expected {}",
                    i,
                    row.len(),
                    columns.len()
                )));
            }
            for (value, column) in row.iter().zip(&columns) {
                if !value.fits(column.column_type) {
                    return Err(LoadError::Schema(format!(
                        "row {}, column {}: {:?} does not fit {}",
                        i,
                        column.name,
                        value,
                        column.column_type.duckdb_name()
                    )));
                }
            }
        }
        Ok(Dataset { columns, rows })
    }

    /// Read a Parquet or CSV file fully into memory, see [`SourceFormat::from_path`].
    pub fn read_file(path: &Path) -> Result<Dataset> {
        if !path.is_file() {
            return Err(LoadError::io(path, "file not found"));
        }
        let format = SourceFormat::from_path(path);
        let conn = Connection::open_in_memory().map_err(|e| LoadError::io(path, e))?;
        let columns = infer_schema(&conn, path, format)?;
        if columns.is_empty() {
            return Err(LoadError::Schema(format!(
                "{} has no columns",
                path.display()
            )));
        }

        let sql = format!(
            "SELECT {} FROM {}",
            columns
                .iter()
                .map(|c| format!(
                    "CAST({} AS {})",
                    quote_ident(&c.name),
                    c.column_type.duckdb_name()
                ))
                .join(", "),
            format.scan(path)
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| LoadError::io(path, e))?;
        let mut query = stmt.query([]).map_err(|e| LoadError::io(path, e))?;
        let mut rows: Vec<Row> = Vec::new();
        while let Some(row) = query.next().map_err(|e| LoadError::io(path, e))? {
            let mut values = Vec::with_capacity(columns.len());
            for (i, column) in columns.iter().enumerate() {
                let value: DuckValue = row.get(i).map_err(|e| LoadError::io(path, e))?;
                values.push(Value::from_duckdb(value, column.column_type)?);
            }
            rows.push(values);
        }
        info!(
            "read {} rows, {} columns from {}",
            rows.len(),
            columns.len(),
            path.display()
        );
        Ok(Dataset { columns, rows })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Column names and types as DuckDB sees them in the source file.
fn infer_schema(conn: &Connection, path: &Path, format: SourceFormat) -> Result<Vec<Column>> {
    let sql = format!("DESCRIBE SELECT * FROM {}", format.scan(path));
    let mut stmt = conn.prepare(&sql).map_err(|e| LoadError::io(path, e))?;
    let columns = stmt
        .query_map([], |row| {
            let name: String = row.get(0)?;
            let type_name: String = row.get(1)?;
            Ok(Column::new(&name, ColumnType::from_duckdb(&type_name)))
        })
        .map_err(|e| LoadError::io(path, e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| LoadError::io(path, e))?;
    Ok(columns)
}
