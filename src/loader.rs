use std::num::NonZeroUsize;

use log::{debug, info};

use crate::dataset::Dataset;
use crate::db::TableSink;
use crate::error::{LoadError, Result};

pub const DEFAULT_BATCH_SIZE: NonZeroUsize = match NonZeroUsize::new(10_000) {
    Some(n) => n,
    None => unreachable!(),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub rows: usize,
    pub batches: usize,
}

/// Write every row of `dataset` to `table`, replacing the table if it exists.
///
/// Rows go out in order, in batches of at most `batch_size`.  The first
/// batch drops and recreates the table in the same transaction as its
/// insert, later batches are appended one transaction each.  An empty
/// dataset still creates the table.
pub fn load_table<S: TableSink + ?Sized>(
    sink: &mut S,
    dataset: &Dataset,
    table: &str,
    batch_size: NonZeroUsize,
) -> Result<LoadReport> {
    if table.is_empty() {
        return Err(LoadError::InvalidTableName(table.to_string()));
    }
    let columns = dataset.columns();
    let mut chunks = dataset.rows().chunks(batch_size.get());

    info!(
        "loading {} rows into {} in batches of {}",
        dataset.len(),
        table,
        batch_size
    );
    let first = chunks.next().unwrap_or(&[]);
    sink.replace_table(table, columns, first)?;
    debug!("batch 1: replaced {} with {} rows", table, first.len());

    let mut report = LoadReport {
        rows: first.len(),
        batches: 1,
    };
    for chunk in chunks {
        sink.append_rows(table, columns, chunk)?;
        report.rows += chunk.len();
        report.batches += 1;
        debug!(
            "batch {}: appended {} rows, {} total",
            report.batches,
            chunk.len(),
            report.rows
        );
    }
    info!("loaded {} rows into {} in {} batches", report.rows, table, report.batches);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;
    use crate::dataset::{Column, ColumnType, Row, Value};
    use crate::db::duckdb_sink::DuckDbSink;

    /// Records the calls instead of writing anywhere.
    #[derive(Default)]
    struct RecordingSink {
        calls: Vec<(&'static str, usize)>,
        fail_on_call: Option<usize>,
    }

    impl RecordingSink {
        fn record(&mut self, kind: &'static str, n: usize) -> Result<()> {
            if self.fail_on_call == Some(self.calls.len()) {
                return Err(LoadError::Connection("connection reset".to_string()));
            }
            self.calls.push((kind, n));
            Ok(())
        }
    }

    impl TableSink for RecordingSink {
        fn replace_table(&mut self, _: &str, _: &[Column], rows: &[Row]) -> Result<()> {
            self.record("replace", rows.len())
        }

        fn append_rows(&mut self, _: &str, _: &[Column], rows: &[Row]) -> Result<()> {
            self.record("append", rows.len())
        }
    }

    fn dataset(n: usize) -> Dataset {
        let columns = vec![
            Column::new("id", ColumnType::BigInt),
            Column::new("fare_amount", ColumnType::Double),
        ];
        let rows = (0..n)
            .map(|i| vec![Value::BigInt(i as i64), Value::Double(i as f64 * 0.5)])
            .collect();
        Dataset::new(columns, rows).unwrap()
    }

    fn batch(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn three_batches_for_25k_rows() -> std::result::Result<(), Box<dyn Error>> {
        let mut sink = RecordingSink::default();
        let report = load_table(&mut sink, &dataset(25_000), "trips", DEFAULT_BATCH_SIZE)?;
        assert_eq!(report, LoadReport { rows: 25_000, batches: 3 });
        assert_eq!(
            sink.calls,
            vec![("replace", 10_000), ("append", 10_000), ("append", 5_000)]
        );
        Ok(())
    }

    #[test]
    fn empty_dataset_still_replaces() -> std::result::Result<(), Box<dyn Error>> {
        let mut sink = RecordingSink::default();
        let report = load_table(&mut sink, &dataset(0), "trips", DEFAULT_BATCH_SIZE)?;
        assert_eq!(report, LoadReport { rows: 0, batches: 1 });
        assert_eq!(sink.calls, vec![("replace", 0)]);
        Ok(())
    }

    #[test]
    fn empty_table_name_is_rejected() {
        let mut sink = RecordingSink::default();
        let res = load_table(&mut sink, &dataset(3), "", DEFAULT_BATCH_SIZE);
        assert!(matches!(res, Err(LoadError::InvalidTableName(_))));
        assert!(sink.calls.is_empty());
    }

    #[test]
    fn failure_stops_the_load() {
        let mut sink = RecordingSink {
            fail_on_call: Some(1),
            ..Default::default()
        };
        let res = load_table(&mut sink, &dataset(25), "trips", batch(10));
        assert!(matches!(res, Err(LoadError::Connection(_))));
        // the first batch stays committed, nothing after the failure runs
        assert_eq!(sink.calls, vec![("replace", 10)]);
    }

    #[test]
    fn row_count_does_not_depend_on_batch_size() -> std::result::Result<(), Box<dyn Error>> {
        let ds = dataset(103);
        for n in [1, 7, 10, 103, 500] {
            let mut sink = DuckDbSink::open_in_memory()?;
            let report = load_table(&mut sink, &ds, "trips", batch(n))?;
            assert_eq!(report.rows, 103);
            assert_eq!(report.batches, (103 + n - 1) / n);
            assert_eq!(sink.row_count("trips")?, 103);
        }
        Ok(())
    }

    #[test]
    fn rows_keep_their_order() -> std::result::Result<(), Box<dyn Error>> {
        let mut sink = DuckDbSink::open_in_memory()?;
        load_table(&mut sink, &dataset(50), "trips", batch(7))?;
        let ids: Vec<i64> = sink
            .connection()
            .prepare("SELECT id FROM trips")?
            .query_map([], |r| r.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        assert_eq!(ids, (0..50).collect::<Vec<i64>>());
        Ok(())
    }

    #[test]
    fn loading_twice_is_same_as_once() -> std::result::Result<(), Box<dyn Error>> {
        let ds = dataset(42);
        let mut sink = DuckDbSink::open_in_memory()?;
        load_table(&mut sink, &ds, "trips", batch(10))?;
        load_table(&mut sink, &ds, "trips", batch(10))?;
        assert_eq!(sink.row_count("trips")?, 42);
        let sum: f64 = sink
            .connection()
            .query_row("SELECT sum(fare_amount) FROM trips", [], |r| r.get(0))?;
        assert_eq!(sum, (0..42).map(|i| i as f64 * 0.5).sum::<f64>());
        Ok(())
    }

    #[test]
    fn empty_dataset_creates_table_with_schema() -> std::result::Result<(), Box<dyn Error>> {
        let mut sink = DuckDbSink::open_in_memory()?;
        load_table(&mut sink, &dataset(0), "trips", DEFAULT_BATCH_SIZE)?;
        assert_eq!(sink.row_count("trips")?, 0);
        let types: Vec<(String, String)> = sink
            .connection()
            .prepare("SELECT column_name, data_type FROM information_schema.columns WHERE table_name = 'trips' ORDER BY ordinal_position")?
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;
        assert_eq!(
            types,
            vec![
                ("id".to_string(), "BIGINT".to_string()),
                ("fare_amount".to_string(), "DOUBLE".to_string()),
            ]
        );
        Ok(())
    }

    #[test]
    fn parquet_file_into_duckdb() -> std::result::Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("output.parquet");
        let scratch = duckdb::Connection::open_in_memory()?;
        scratch.execute_batch(&format!(
            "COPY (SELECT i AS \"VendorID\", i * 1.5 AS fare_amount, 'N' AS store_and_fwd_flag \
             FROM range(25000) t(i)) TO '{}' (FORMAT PARQUET);",
            path.display()
        ))?;

        let ds = Dataset::read_file(&path)?;
        let mut sink = DuckDbSink::open_in_memory()?;
        let report = load_table(&mut sink, &ds, "yellow_taxi_data", DEFAULT_BATCH_SIZE)?;
        assert_eq!(report, LoadReport { rows: 25_000, batches: 3 });
        assert_eq!(sink.row_count("yellow_taxi_data")?, 25_000);
        let max: i64 = sink.connection().query_row(
            "SELECT max(\"VendorID\") FROM yellow_taxi_data",
            [],
            |r| r.get(0),
        )?;
        assert_eq!(max, 24_999);
        Ok(())
    }

    #[test]
    fn unrelated_table_is_replaced_not_merged() -> std::result::Result<(), Box<dyn Error>> {
        let mut sink = DuckDbSink::open_in_memory()?;
        sink.connection().execute_batch(
            "CREATE TABLE trips (borough VARCHAR, zone VARCHAR);
             INSERT INTO trips VALUES ('Queens', 'Jamaica Bay'), ('EWR', 'Newark Airport');",
        )?;
        load_table(&mut sink, &dataset(5), "trips", batch(2))?;
        assert_eq!(sink.row_count("trips")?, 5);
        let n: i64 = sink.connection().query_row(
            "SELECT count(*) FROM information_schema.columns WHERE table_name = 'trips' AND column_name = 'borough'",
            [],
            |r| r.get(0),
        )?;
        assert_eq!(n, 0);
        Ok(())
    }

    #[test]
    fn failed_first_batch_leaves_prior_table() -> std::result::Result<(), Box<dyn Error>> {
        let mut sink = DuckDbSink::open_in_memory()?;
        sink.connection()
            .execute_batch("CREATE TABLE trips (borough VARCHAR); INSERT INTO trips VALUES ('Queens');")?;

        let mut sink = FailingAppend { inner: sink };
        assert!(load_table(&mut sink, &dataset(5), "trips", batch(10)).is_err());
        assert_eq!(sink.inner.row_count("trips")?, 1);
        Ok(())
    }

    /// Passes a truncated batch to the real sink so the insert fails inside
    /// the replace transaction.
    struct FailingAppend {
        inner: DuckDbSink,
    }

    impl TableSink for FailingAppend {
        fn replace_table(&mut self, table: &str, columns: &[Column], rows: &[Row]) -> Result<()> {
            let mut broken = rows.to_vec();
            if let Some(last) = broken.last_mut() {
                last.pop();
            }
            self.inner.replace_table(table, columns, &broken)
        }

        fn append_rows(&mut self, table: &str, columns: &[Column], rows: &[Row]) -> Result<()> {
            self.inner.append_rows(table, columns, rows)
        }
    }
}
