//! Loader Service - Materializes the processed artifacts into PostgreSQL
//!
//! Responsibilities:
//! - Create the destination database and tables when absent
//! - Replace the registry table from the registry snapshot
//! - Replace the statistics table from the aggregated expenses
//!
//! Each table is truncated and reloaded in its own transaction; a failed
//! registry load does not stop the statistics load.
//!
//! Usage:
//!   cargo run --bin loader
//!   cargo run --bin loader -- --processed-dir ./data/processed --db-name intuitive_care

mod config;
mod load;
mod schema;

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::Config;
use load::{RegistryRow, StatisticRow};

const REGISTRY_SNAPSHOT_FILE: &str = "registry_snapshot.csv";
const AGGREGATED_FILE: &str = "aggregated_expenses.csv";

#[derive(Parser, Debug)]
#[command(name = "loader", about = "Loads registry and expense statistics into PostgreSQL")]
struct Args {
    /// Directory holding the parser's output
    #[arg(long)]
    processed_dir: Option<PathBuf>,

    /// Target database name
    #[arg(long)]
    db_name: Option<String>,

    /// Rows per INSERT statement
    #[arg(long)]
    batch_size: Option<usize>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.processed_dir {
            config.processed_dir = dir.clone();
        }
        if let Some(name) = &self.db_name {
            config.db_name = name.clone();
        }
        if let Some(size) = self.batch_size.filter(|&n| n > 0) {
            config.insert_batch_size = size;
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn report(table: &str, result: &Result<u64>) -> bool {
    match result {
        Ok(rows) => {
            println!("{:<11} {} rows", format!("{}:", table), rows);
            true
        }
        Err(e) => {
            println!("{:<11} FAILED ({:#})", format!("{}:", table), e);
            false
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let args = Args::parse();
    let mut config = Config::from_env()?;
    args.apply(&mut config);

    println!("=== ANS Expense Loader ===");
    println!("Database: {}", config.db_name);
    println!("Processed dir: {}", config.processed_dir.display());
    println!("Batch size: {}", config.insert_batch_size);

    let (maintenance, target) = config.connect_options()?;
    if schema::ensure_database(&maintenance, &config.db_name).await? {
        println!("Created database {}", config.db_name);
    }

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect_with(target)
        .await
        .context("Failed to connect to database")?;
    schema::ensure_tables(&pool).await?;
    info!(database = %config.db_name, "destination schema ready");

    let registry = load::load_file::<RegistryRow>(
        &pool,
        &config.processed_dir.join(REGISTRY_SNAPSHOT_FILE),
        config.insert_batch_size,
    )
    .await;
    if let Err(e) = &registry {
        error!(table = "registry", error = %format!("{:#}", e), "load failed, continuing");
    }

    let statistics = load::load_file::<StatisticRow>(
        &pool,
        &config.processed_dir.join(AGGREGATED_FILE),
        config.insert_batch_size,
    )
    .await;
    if let Err(e) = &statistics {
        error!(table = "statistics", error = %format!("{:#}", e), "load failed");
    }

    pool.close().await;

    println!("\n=== Load Summary ===");
    let registry_ok = report("registry", &registry);
    let statistics_ok = report("statistics", &statistics);

    if !(registry_ok && statistics_ok) {
        anyhow::bail!("One or more tables failed to load");
    }
    Ok(())
}
