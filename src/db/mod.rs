pub mod duckdb_sink;
pub mod postgres_sink;

use crate::dataset::{Column, Row};
use crate::error::Result;

/// A store that can hold the target table.
///
/// Both calls are atomic on their own.  Nothing spans two calls, so a load
/// that fails after the first batch leaves the earlier batches committed.
pub trait TableSink {
    /// Drop `table` if it exists, create it from `columns` and insert `rows`,
    /// in one transaction.  If this fails the previous table is untouched.
    fn replace_table(&mut self, table: &str, columns: &[Column], rows: &[Row]) -> Result<()>;

    /// Insert `rows` into a table created by [`TableSink::replace_table`].
    fn append_rows(&mut self, table: &str, columns: &[Column], rows: &[Row]) -> Result<()>;
}

/// Quote an identifier for both Postgres and DuckDB, the name is used verbatim.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
