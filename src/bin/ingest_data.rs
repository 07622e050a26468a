use std::{error::Error, path::Path, time::Instant};

use clap::Parser;
use log::info;
use pg_ingest::{
    dataset::Dataset,
    db::postgres_sink::{ConnectionParams, PostgresSink},
    download::{download_file, local_file_name},
    loader::{load_table, DEFAULT_BATCH_SIZE},
};

/// Ingest a Parquet or CSV file into a Postgres table, replacing the table.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// user name for Postgres
    #[arg(long)]
    user: String,

    /// password for Postgres
    #[arg(long)]
    password: String,

    /// host for Postgres
    #[arg(long)]
    host: String,

    /// port for Postgres
    #[arg(long)]
    port: u16,

    /// database name for Postgres
    #[arg(long)]
    db: String,

    /// name of the table the data is written to
    #[arg(long = "table_name")]
    table_name: String,

    /// url of the Parquet or CSV file
    #[arg(long)]
    url: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let file_name = Path::new(local_file_name(&args.url));
    download_file(&args.url, file_name)?;

    let dataset = Dataset::read_file(file_name)?;

    let params = ConnectionParams {
        user: args.user,
        password: args.password,
        host: args.host,
        port: args.port,
        db: args.db,
    };
    let mut sink = PostgresSink::connect(&params)?;

    println!("Data migration in process...");
    let start = Instant::now();
    let report = load_table(&mut sink, &dataset, &args.table_name, DEFAULT_BATCH_SIZE)?;
    let elapsed = start.elapsed();
    info!("{} batches written", report.batches);

    println!(
        "Data loaded into Postgres, {} records took {} seconds.",
        report.rows,
        elapsed.as_secs_f64()
    );
    Ok(())
}
