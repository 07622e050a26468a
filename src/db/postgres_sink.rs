use std::error::Error;
use std::fmt::Display;

use bytes::BytesMut;
use itertools::Itertools;
use log::info;
use postgres::binary_copy::BinaryCopyInWriter;
use postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use postgres::{Client, Config, NoTls, Transaction};

use super::{quote_ident, TableSink};
use crate::dataset::{Column, ColumnType, Row, Value};
use crate::error::{LoadError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub db: String,
}

impl ConnectionParams {
    pub fn to_config(&self) -> Config {
        let mut config = Config::new();
        config
            .user(&self.user)
            .password(&self.password)
            .host(&self.host)
            .port(self.port)
            .dbname(&self.db);
        config
    }
}

/// Connection string with the password masked, for logs.
impl Display for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "postgresql://{}:***@{}:{}/{}",
            self.user, self.host, self.port, self.db
        )
    }
}

pub struct PostgresSink {
    client: Client,
}

impl PostgresSink {
    /// Fails right away with [`LoadError::Connection`] if the server is
    /// unreachable or rejects the credentials.
    pub fn connect(params: &ConnectionParams) -> Result<PostgresSink> {
        info!("connecting to {}", params);
        let client = params
            .to_config()
            .connect(NoTls)
            .map_err(|e| LoadError::Connection(format!("{}: {}", params, e)))?;
        Ok(PostgresSink { client })
    }

    pub fn row_count(&mut self, table: &str) -> Result<i64> {
        let row = self
            .client
            .query_one(format!("SELECT count(*) FROM {}", quote_ident(table)).as_str(), &[])?;
        Ok(row.get(0))
    }
}

impl TableSink for PostgresSink {
    fn replace_table(&mut self, table: &str, columns: &[Column], rows: &[Row]) -> Result<()> {
        let mut tx = self.client.transaction()?;
        tx.batch_execute(&format!(
            "DROP TABLE IF EXISTS {};\n{};",
            quote_ident(table),
            create_table_sql(table, columns)
        ))?;
        copy_rows(&mut tx, table, columns, rows)?;
        tx.commit()?;
        Ok(())
    }

    fn append_rows(&mut self, table: &str, columns: &[Column], rows: &[Row]) -> Result<()> {
        let mut tx = self.client.transaction()?;
        copy_rows(&mut tx, table, columns, rows)?;
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
            .map(|c| format!("{} {}", quote_ident(&c.name), c.column_type.postgres_name()))
            .join(", ")
    )
}

pub fn postgres_type(column_type: ColumnType) -> Type {
    match column_type {
        ColumnType::Boolean => Type::BOOL,
        ColumnType::SmallInt => Type::INT2,
        ColumnType::Integer => Type::INT4,
        ColumnType::BigInt => Type::INT8,
        ColumnType::Real => Type::FLOAT4,
        ColumnType::Double => Type::FLOAT8,
        ColumnType::Text => Type::TEXT,
        ColumnType::Bytes => Type::BYTEA,
        ColumnType::Date => Type::DATE,
        ColumnType::Timestamp => Type::TIMESTAMP,
        ColumnType::TimestampTz => Type::TIMESTAMPTZ,
    }
}

/// Stream one batch with a binary COPY.
fn copy_rows(tx: &mut Transaction, table: &str, columns: &[Column], rows: &[Row]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let sql = format!(
        "COPY {} ({}) FROM STDIN BINARY",
        quote_ident(table),
        columns.iter().map(|c| quote_ident(&c.name)).join(", ")
    );
    let types: Vec<Type> = columns.iter().map(|c| postgres_type(c.column_type)).collect();
    let mut writer = BinaryCopyInWriter::new(tx.copy_in(sql.as_str())?, &types);
    for row in rows {
        let values: Vec<&(dyn ToSql + Sync)> =
            row.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
        writer.write(&values)?;
    }
    writer.finish()?;
    Ok(())
}

/// Encode `v` only if its Rust type matches the wire type, the binary
/// encoders don't check the width on their own.
fn encode<T: ToSql>(
    v: &T,
    ty: &Type,
    out: &mut BytesMut,
) -> std::result::Result<IsNull, Box<dyn Error + Sync + Send>> {
    if !T::accepts(ty) {
        return Err(format!("cannot encode {} as {}", std::any::type_name::<T>(), ty).into());
    }
    v.to_sql(ty, out)
}

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Boolean(v) => encode(v, ty, out),
            Value::SmallInt(v) => encode(v, ty, out),
            Value::Integer(v) => encode(v, ty, out),
            Value::BigInt(v) => encode(v, ty, out),
            Value::Real(v) => encode(v, ty, out),
            Value::Double(v) => encode(v, ty, out),
            Value::Text(v) => encode(v, ty, out),
            Value::Bytes(v) => encode(v, ty, out),
            Value::Date(v) => encode(v, ty, out),
            Value::Timestamp(v) => encode(v, ty, out),
            Value::TimestampTz(v) => encode(v, ty, out),
        }
    }

    fn accepts(ty: &Type) -> bool {
        matches!(
            *ty,
            Type::BOOL
                | Type::INT2
                | Type::INT4
                | Type::INT8
                | Type::FLOAT4
                | Type::FLOAT8
                | Type::TEXT
                | Type::BYTEA
                | Type::DATE
                | Type::TIMESTAMP
                | Type::TIMESTAMPTZ
        )
    }

    to_sql_checked!();
}
