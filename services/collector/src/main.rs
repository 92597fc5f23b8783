//! Collector Service - Discovers and downloads the regulator's raw disclosures
//!
//! Responsibilities:
//! - Discover the most recent reporting-period archives (flat or nested layout)
//! - Download and extract each archive into the raw area, skipping failures
//! - Select the expense/claims files among the extracted members
//! - Locate and download the current operator registry
//! - Write a run manifest for the parser
//!
//! Usage:
//!   cargo run --bin collector
//!   cargo run --bin collector -- --periods 4 --raw-dir ./data/raw
//!   cargo run --bin collector -- --dry-run

mod config;
mod fetcher;
mod listing;
mod locator;
mod manifest;
mod registry;
mod relevance;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use config::{directory_url, Config};
use listing::HttpSource;
use manifest::{CollectionSummary, Manifest};

#[derive(Parser, Debug)]
#[command(
    name = "collector",
    about = "Collects expense disclosure archives and the operator registry"
)]
struct Args {
    /// Number of most recent reporting periods to fetch
    #[arg(long)]
    periods: Option<usize>,

    /// Root directory of the disclosure corpus
    #[arg(long)]
    root_url: Option<String>,

    /// Directory listing that holds the operator registry
    #[arg(long)]
    registry_url: Option<String>,

    /// Local raw-file area
    #[arg(long)]
    raw_dir: Option<PathBuf>,

    /// Dry run - only list the archives that would be fetched
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(periods) = self.periods {
            config.periods = periods;
        }
        if let Some(url) = &self.root_url {
            config.corpus_root_url = directory_url(url)?;
        }
        if let Some(url) = &self.registry_url {
            config.registry_dir_url = directory_url(url)?;
        }
        if let Some(dir) = &self.raw_dir {
            config.raw_fs_dir = dir.clone();
        }
        Ok(())
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let args = Args::parse();
    let mut config = Config::from_env()?;
    args.apply(&mut config)?;

    let run_id = Uuid::new_v4();
    let started_at = Utc::now();

    println!("=== ANS Expense Collector ===");
    println!("Run: {}", run_id);
    println!("Corpus: {}", config.corpus_root_url);
    println!("Registry: {}", config.registry_dir_url);
    println!("Raw dir: {}", config.raw_fs_dir.display());

    let http = HttpSource::new(&config)?;

    let archives =
        locator::locate_archives(&http, &config.corpus_root_url, config.periods).await?;
    if archives.is_empty() {
        anyhow::bail!("No archives found under {}", config.corpus_root_url);
    }

    println!("\nArchives to fetch ({}):", archives.len());
    for archive in &archives {
        println!("  - {} ({})", archive.filename, archive.url);
    }

    if args.dry_run {
        println!("\nDry run - nothing downloaded");
        return Ok(());
    }

    tokio::fs::create_dir_all(&config.raw_fs_dir).await?;
    manifest::remove_stale_manifest(&config.raw_fs_dir).await?;

    let outcomes = fetcher::fetch_archives(&http, &archives, &config.raw_fs_dir).await;
    let extracted = fetcher::extracted_paths(&outcomes);
    let relevant = relevance::filter_relevant(&extracted);
    info!(
        extracted = extracted.len(),
        relevant = relevant.len(),
        "relevant expense files selected"
    );

    let registry =
        registry::download_registry(&http, &config.registry_dir_url, &config.raw_fs_dir).await?;

    let summary = CollectionSummary::from_outcomes(&outcomes, &extracted, &relevant);
    let manifest = Manifest {
        run_id,
        started_at,
        finished_at: Utc::now(),
        corpus_root_url: config.corpus_root_url.to_string(),
        registry_dir_url: config.registry_dir_url.to_string(),
        archives: outcomes,
        extracted_files: extracted,
        relevant_files: relevant,
        registry,
        summary,
    };
    let manifest_path = manifest.write(&config.raw_fs_dir).await?;

    println!("\n=== Collection Summary ===");
    println!("Archives located: {}", manifest.summary.archives_located);
    println!("Archives fetched: {}", manifest.summary.archives_fetched);
    println!("Archives failed:  {}", manifest.summary.archives_failed);
    println!("Files extracted:  {}", manifest.summary.files_extracted);
    println!("Relevant files:   {}", manifest.summary.relevant_files);
    println!("Registry:         {}", manifest.registry.path.display());
    println!("Manifest:         {}", manifest_path.display());
    println!("Ready for parsing: cargo run --bin parser");

    Ok(())
}
