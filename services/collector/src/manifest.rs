//! Run manifest handed from the collector to the parser.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::fetcher::{ArchiveOutcome, FetchStatus};
use crate::registry::RegistryFile;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Serialize)]
pub struct CollectionSummary {
    pub archives_located: usize,
    pub archives_fetched: usize,
    pub archives_failed: usize,
    pub files_extracted: usize,
    pub relevant_files: usize,
}

#[derive(Debug, Serialize)]
pub struct Manifest {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub corpus_root_url: String,
    pub registry_dir_url: String,
    pub archives: Vec<ArchiveOutcome>,
    pub extracted_files: Vec<PathBuf>,
    pub relevant_files: Vec<PathBuf>,
    pub registry: RegistryFile,
    pub summary: CollectionSummary,
}

impl CollectionSummary {
    pub fn from_outcomes(
        outcomes: &[ArchiveOutcome],
        extracted: &[PathBuf],
        relevant: &[PathBuf],
    ) -> Self {
        let fetched = outcomes
            .iter()
            .filter(|o| o.status == FetchStatus::Ok)
            .count();
        Self {
            archives_located: outcomes.len(),
            archives_fetched: fetched,
            archives_failed: outcomes.len() - fetched,
            files_extracted: extracted.len(),
            relevant_files: relevant.len(),
        }
    }
}

pub fn manifest_path(raw_dir: &Path) -> PathBuf {
    raw_dir.join(MANIFEST_FILE)
}

/// Drop the previous run's manifest so a failed run can never hand stale
/// file lists to the parser.
pub async fn remove_stale_manifest(raw_dir: &Path) -> Result<()> {
    let path = manifest_path(raw_dir);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

impl Manifest {
    pub async fn write(&self, raw_dir: &Path) -> Result<PathBuf> {
        let path = manifest_path(raw_dir);
        let json = serde_json::to_string_pretty(self).context("Failed to serialize manifest")?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: FetchStatus, extracted: &[&str]) -> ArchiveOutcome {
        ArchiveOutcome {
            url: "https://example.test/a.zip".to_string(),
            filename: "a.zip".to_string(),
            status,
            sha256: None,
            size_bytes: None,
            error: None,
            extracted: extracted.iter().map(PathBuf::from).collect(),
        }
    }

    #[test]
    fn test_summary_counts() {
        let outcomes = vec![
            outcome(FetchStatus::Ok, &["raw/despesas.csv", "raw/leiame.txt"]),
            outcome(FetchStatus::Failed, &[]),
            outcome(FetchStatus::Ok, &["raw/eventos.csv"]),
        ];
        let extracted: Vec<PathBuf> = outcomes.iter().flat_map(|o| o.extracted.clone()).collect();
        let relevant = vec![
            PathBuf::from("raw/despesas.csv"),
            PathBuf::from("raw/eventos.csv"),
        ];

        let summary = CollectionSummary::from_outcomes(&outcomes, &extracted, &relevant);

        assert_eq!(summary.archives_located, 3);
        assert_eq!(summary.archives_fetched, 2);
        assert_eq!(summary.archives_failed, 1);
        assert_eq!(summary.files_extracted, 3);
        assert_eq!(summary.relevant_files, 2);
    }

    #[tokio::test]
    async fn test_write_and_remove_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let manifest = Manifest {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            corpus_root_url: "https://example.test/pda/".to_string(),
            registry_dir_url: "https://example.test/operadoras/".to_string(),
            archives: vec![outcome(FetchStatus::Ok, &["raw/despesas.csv"])],
            extracted_files: vec![PathBuf::from("raw/despesas.csv")],
            relevant_files: vec![PathBuf::from("raw/despesas.csv")],
            registry: RegistryFile {
                url: "https://example.test/operadoras/cadop.csv".to_string(),
                filename: "cadop.csv".to_string(),
                path: PathBuf::from("raw/registry/cadop.csv"),
                sha256: "sha256:00".to_string(),
                size_bytes: 1,
            },
            summary: CollectionSummary::from_outcomes(&[], &[], &[]),
        };

        let path = manifest.write(dir.path()).await.unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["archives"][0]["status"], "ok");
        assert_eq!(json["relevant_files"][0], "raw/despesas.csv");
        assert!(json["archives"][0].get("error").is_none());

        remove_stale_manifest(dir.path()).await.unwrap();
        assert!(!path.exists());
        // Removing twice is fine.
        remove_stale_manifest(dir.path()).await.unwrap();
    }
}
