use clap::Parser;
use dealroom::application::engine::DealEngine;
use dealroom::domain::ports::Repositories;
use dealroom::infrastructure::in_memory;
use dealroom::interfaces::csv::deal_writer::DealWriter;
use dealroom::interfaces::jsonl::command_reader::CommandReader;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Command script, one JSON command per line
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "DEALROOM_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Log filter directive
    #[arg(long, env = "RUST_LOG", default_value = "dealroom=info")]
    log_filter: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_filter).into_diagnostic()?)
        .with_writer(io::stderr)
        .init();

    let engine = DealEngine::new(open_repositories(cli.db_path)?);

    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = CommandReader::new(BufReader::new(file));
    let mut applied = 0usize;
    let mut failed = 0usize;
    for (line, command) in reader.commands() {
        match command {
            Ok(command) => {
                let op = command.op();
                match engine.execute(command).await {
                    Ok(()) => applied += 1,
                    Err(e) => {
                        failed += 1;
                        error!(line, op, error = %e, "Failed to apply command");
                    }
                }
            }
            Err(e) => {
                failed += 1;
                error!(line, error = %e, "Failed to read command");
            }
        }
    }
    info!(applied, failed, "Script replayed");

    let reports = engine.reports().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = DealWriter::new(stdout.lock());
    writer.write_reports(&reports).into_diagnostic()?;

    Ok(())
}

#[cfg(feature = "storage-rocksdb")]
fn open_repositories(db_path: Option<PathBuf>) -> Result<Repositories> {
    use dealroom::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => {
            let store = RocksDBStore::open(&path).into_diagnostic()?;
            info!(path = %path.display(), "Using RocksDB storage");
            Ok(store.repositories())
        }
        None => Ok(in_memory::repositories()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_repositories(db_path: Option<PathBuf>) -> Result<Repositories> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(in_memory::repositories())
}
