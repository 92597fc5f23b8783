//! Parser Service - Turns the collected raw files into expense statistics
//!
//! Responsibilities:
//! - Consolidate the relevant disclosure files into per-period expense sums
//! - Parse the operator registry and write a clean snapshot
//! - Join expenses to the registry and validate tax ids
//! - Aggregate per (legal name, region) and write the statistics
//!
//! Usage:
//!   cargo run --bin parser
//!   cargo run --bin parser -- --stage consolidate
//!   cargo run --bin parser -- --stage transform --processed-dir ./out

mod aggregate;
mod artifacts;
mod cnpj;
mod config;
mod consolidate;
mod enrich;
mod manifest;
mod registry;
mod report;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use artifacts::{
    AGGREGATED_FILE, AGGREGATED_HEADER, CONSOLIDATED_FILE, CONSOLIDATED_HEADER,
    CONSOLIDATION_REPORT_FILE, REGISTRY_SNAPSHOT_FILE, REGISTRY_SNAPSHOT_HEADER,
    TRANSFORMATION_REPORT_FILE,
};
use config::Config;
use consolidate::ConsolidatedExpenseRecord;
use manifest::Manifest;
use report::{ConsolidationReport, TransformationReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Stage {
    /// Raw disclosure files -> consolidated expenses
    Consolidate,
    /// Consolidated expenses + registry -> aggregated statistics
    Transform,
    /// Both stages in order
    All,
}

#[derive(Parser, Debug)]
#[command(
    name = "parser",
    about = "Consolidates raw disclosures and computes per-operator statistics"
)]
struct Args {
    /// Stage to run
    #[arg(long, value_enum, default_value = "all")]
    stage: Stage,

    /// Local raw-file area written by the collector
    #[arg(long)]
    raw_dir: Option<PathBuf>,

    /// Output directory for processed artifacts
    #[arg(long)]
    processed_dir: Option<PathBuf>,

    /// Rows per consolidation increment
    #[arg(long)]
    chunk_rows: Option<usize>,

    /// Collector manifest (defaults to <raw-dir>/manifest.json)
    #[arg(long)]
    manifest: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.raw_dir {
            config.raw_fs_dir = dir.clone();
        }
        if let Some(dir) = &self.processed_dir {
            config.processed_dir = dir.clone();
        }
        if let Some(rows) = self.chunk_rows.filter(|&n| n > 0) {
            config.chunk_rows = rows;
        }
    }

    fn manifest_path(&self, config: &Config) -> PathBuf {
        self.manifest
            .clone()
            .unwrap_or_else(|| manifest::default_manifest_path(&config.raw_fs_dir))
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run_consolidation(config: &Config, manifest: &Manifest) -> Result<()> {
    let started_at = Utc::now();
    println!("\n=== Consolidation ===");
    println!("Relevant files: {}", manifest.relevant_files.len());

    let (records, stats, files) = consolidate::consolidate(&manifest.relevant_files, config);

    let output = config.processed_dir.join(CONSOLIDATED_FILE);
    artifacts::write_records(&output, CONSOLIDATED_HEADER, &records)?;
    info!(records = records.len(), path = %output.display(), "consolidated expenses written");

    let report = ConsolidationReport {
        collection_run_id: manifest.run_id,
        started_at,
        finished_at: Utc::now(),
        output: output.clone(),
        stats,
        files,
    };
    artifacts::write_report(&config.processed_dir.join(CONSOLIDATION_REPORT_FILE), &report)?;

    println!("Files processed:     {}", report.stats.files_processed);
    println!("Files skipped:       {}", report.stats.files_skipped);
    println!("Rows scanned:        {}", report.stats.rows_scanned);
    println!("Expense rows:        {}", report.stats.rows_matched);
    println!("Non-numeric zeroed:  {}", report.stats.balances_non_numeric);
    println!("Negatives clamped:   {}", report.stats.balances_clamped);
    println!("Undated excluded:    {}", report.stats.rows_undated);
    println!("Consolidated rows:   {}", report.stats.records);
    println!("Output:              {}", output.display());
    Ok(())
}

fn run_transformation(config: &Config, manifest: &Manifest) -> Result<()> {
    let started_at = Utc::now();
    println!("\n=== Transformation ===");
    println!("Registry: {} ({})", manifest.registry.path.display(), manifest.registry.sha256);

    let (registry, registry_stats) = registry::load_registry(&manifest.registry.path, config)?;
    let snapshot_path = config.processed_dir.join(REGISTRY_SNAPSHOT_FILE);
    artifacts::write_records(&snapshot_path, REGISTRY_SNAPSHOT_HEADER, &registry)?;
    info!(entries = registry.len(), path = %snapshot_path.display(), "registry snapshot written");

    let consolidated_path = config.processed_dir.join(CONSOLIDATED_FILE);
    let expenses: Vec<ConsolidatedExpenseRecord> = artifacts::read_records(&consolidated_path)?;

    let (enriched, enrichment) = enrich::enrich(&expenses, &registry);
    info!(
        joined = enriched.len(),
        unmatched = enrichment.unmatched_expense_records,
        invalid_tax_id = enrichment.invalid_tax_id_records,
        "expenses enriched"
    );

    let statistics = aggregate::aggregate(&enriched);
    let aggregated_path = config.processed_dir.join(AGGREGATED_FILE);
    artifacts::write_records(&aggregated_path, AGGREGATED_HEADER, &statistics)?;
    info!(groups = statistics.len(), path = %aggregated_path.display(), "statistics written");

    let report = TransformationReport {
        started_at,
        finished_at: Utc::now(),
        registry_source: manifest.registry.path.clone(),
        registry_url: manifest.registry.url.clone(),
        registry_sha256: manifest.registry.sha256.clone(),
        registry: registry_stats,
        consolidated_records_read: expenses.len(),
        enrichment,
        aggregated_groups: statistics.len(),
        outputs: vec![snapshot_path.clone(), aggregated_path.clone()],
    };
    artifacts::write_report(&config.processed_dir.join(TRANSFORMATION_REPORT_FILE), &report)?;

    println!("Registry rows:       {}", report.registry.rows_read);
    println!("Duplicate ids:       {}", report.registry.duplicate_ids);
    println!("Oversized dropped:   {}", report.registry.rows_oversized);
    println!("Names repaired:      {}", report.registry.names_repaired);
    println!("Expense records:     {}", report.enrichment.expense_records);
    println!("Unmatched ids:       {}", report.enrichment.unmatched_expense_records);
    println!("Invalid tax ids:     {}", report.enrichment.invalid_tax_id_records);
    println!("Valid rows:          {}", report.enrichment.valid_records);
    println!("Groups:              {}", report.aggregated_groups);

    println!("\nTop operators by total:");
    for (i, stat) in statistics.iter().take(5).enumerate() {
        println!(
            "  [{}] {} ({}) total={:.2} mean={:.2} stddev={:.2}",
            i + 1,
            stat.legal_name,
            stat.region,
            stat.total,
            stat.mean,
            stat.stddev
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let args = Args::parse();
    let mut config = Config::from_env()?;
    args.apply(&mut config);

    let manifest_path = args.manifest_path(&config);

    println!("=== ANS Expense Parser ===");
    println!("Stage: {:?}", args.stage);
    println!("Manifest: {}", manifest_path.display());
    println!("Processed dir: {}", config.processed_dir.display());
    println!("Encoding: {}", config.source_encoding.name());

    let manifest = Manifest::load(&manifest_path)?;
    info!(run_id = %manifest.run_id, "collector manifest loaded");

    if matches!(args.stage, Stage::Consolidate | Stage::All) {
        run_consolidation(&config, &manifest)?;
    }
    if matches!(args.stage, Stage::Transform | Stage::All) {
        run_transformation(&config, &manifest)?;
    }

    println!("\nReady for loading: cargo run --bin loader");
    Ok(())
}
