//! The collector's run manifest, as far as the parser needs it.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Deserialize)]
pub struct RegistryFile {
    pub url: String,
    pub path: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Deserialize)]
pub struct Manifest {
    pub run_id: Uuid,
    pub relevant_files: Vec<PathBuf>,
    pub registry: RegistryFile,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| {
            format!(
                "Failed to read manifest {} (run the collector first)",
                path.display()
            )
        })?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse manifest {}", path.display()))
    }
}

pub fn default_manifest_path(raw_dir: &Path) -> PathBuf {
    raw_dir.join(MANIFEST_FILE)
}
