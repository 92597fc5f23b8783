//! Download and extraction of period archives into the raw area.
//!
//! A failed archive (network, HTTP status, corrupt zip) is logged and
//! recorded; the remaining archives are still processed.

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zip::ZipArchive;

use crate::listing::ArchiveSource;
use crate::locator::ArchiveRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Ok,
    Failed,
}

/// What happened to one located archive.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveOutcome {
    pub url: String,
    pub filename: String,
    pub status: FetchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub extracted: Vec<PathBuf>,
}

/// `sha256:<hex>` digest of a payload.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

/// Unpack every member of a zip payload beneath `dest`, returning the paths
/// written. Members whose names would escape `dest` are skipped.
pub fn extract_archive(bytes: &[u8], dest: &Path) -> Result<Vec<PathBuf>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).context("Failed to open zip archive")?;
    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create raw dir {}", dest.display()))?;

    let mut paths = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut member = archive
            .by_index(i)
            .with_context(|| format!("Failed to read zip entry #{}", i))?;

        let Some(relative) = member.enclosed_name() else {
            warn!(entry = member.name(), "skipping zip entry outside the raw area");
            continue;
        };
        let target = dest.join(relative);

        if member.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut out = File::create(&target)
            .with_context(|| format!("Failed to create {}", target.display()))?;
        io::copy(&mut member, &mut out)
            .with_context(|| format!("Failed to decompress {}", target.display()))?;

        paths.push(target);
    }

    Ok(paths)
}

/// Extraction directory for one archive: its file stem under the raw area,
/// so members with the same name in different archives never collide.
pub fn archive_dir(raw_dir: &Path, filename: &str) -> PathBuf {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .unwrap_or("archive");
    raw_dir.join(stem)
}

async fn fetch_one<S: ArchiveSource>(
    source: &S,
    archive: &ArchiveRef,
    raw_dir: &Path,
) -> Result<(String, u64, Vec<PathBuf>)> {
    let bytes = source.download(&archive.url).await?;
    let hash = content_hash(&bytes);
    info!(file = %archive.filename, bytes = bytes.len(), hash = %hash, "archive downloaded");

    let dest = archive_dir(raw_dir, &archive.filename);
    let extracted = extract_archive(&bytes, &dest)
        .with_context(|| format!("Failed to extract {}", archive.filename))?;
    Ok((hash, bytes.len() as u64, extracted))
}

/// Fetch and extract each archive in turn.
pub async fn fetch_archives<S: ArchiveSource>(
    source: &S,
    archives: &[ArchiveRef],
    raw_dir: &Path,
) -> Vec<ArchiveOutcome> {
    let mut outcomes = Vec::with_capacity(archives.len());

    for archive in archives {
        info!(file = %archive.filename, url = %archive.url, "fetching archive");
        let outcome = match fetch_one(source, archive, raw_dir).await {
            Ok((sha256, size_bytes, extracted)) => {
                info!(file = %archive.filename, members = extracted.len(), "archive extracted");
                ArchiveOutcome {
                    url: archive.url.to_string(),
                    filename: archive.filename.clone(),
                    status: FetchStatus::Ok,
                    sha256: Some(sha256),
                    size_bytes: Some(size_bytes),
                    error: None,
                    extracted,
                }
            }
            Err(e) => {
                let error = format!("{:#}", e);
                warn!(file = %archive.filename, error = %error, "archive skipped");
                ArchiveOutcome {
                    url: archive.url.to_string(),
                    filename: archive.filename.clone(),
                    status: FetchStatus::Failed,
                    sha256: None,
                    size_bytes: None,
                    error: Some(error),
                    extracted: Vec::new(),
                }
            }
        };
        outcomes.push(outcome);
    }

    outcomes
}

/// Every extracted path across all successful archives, in fetch order.
pub fn extracted_paths(outcomes: &[ArchiveOutcome]) -> Vec<PathBuf> {
    outcomes
        .iter()
        .flat_map(|o| o.extracted.iter().cloned())
        .collect()
}
