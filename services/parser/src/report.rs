//! Per-stage run metadata, written next to the stage outputs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

use crate::consolidate::{ConsolidationStats, FileOutcome};
use crate::enrich::EnrichmentStats;
use crate::registry::RegistryStats;

#[derive(Debug, Serialize)]
pub struct ConsolidationReport {
    pub collection_run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub output: PathBuf,
    #[serde(flatten)]
    pub stats: ConsolidationStats,
    pub files: Vec<FileOutcome>,
}

#[derive(Debug, Serialize)]
pub struct TransformationReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub registry_source: PathBuf,
    pub registry_url: String,
    pub registry_sha256: String,
    pub registry: RegistryStats,
    pub consolidated_records_read: usize,
    pub enrichment: EnrichmentStats,
    pub aggregated_groups: usize,
    pub outputs: Vec<PathBuf>,
}
