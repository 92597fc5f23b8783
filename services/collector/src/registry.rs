//! Locating and downloading the current operator registry file.

use anyhow::{Context, Result};
use reqwest::Url;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::fetcher::content_hash;
use crate::listing::{entry_name, is_directory, resolve, HttpSource, ListingSource};

/// Subdirectory of the raw area holding the registry download.
const REGISTRY_SUBDIR: &str = "registry";

#[derive(Debug, Clone, Serialize)]
pub struct RegistryFile {
    pub url: String,
    pub filename: String,
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
}

/// First `.csv` link of the registry listing, as an absolute URL.
pub fn find_registry_link(dir_url: &Url, hrefs: &[String]) -> Result<Option<(Url, String)>> {
    let Some(href) = hrefs
        .iter()
        .filter(|href| !is_directory(href))
        .find(|href| entry_name(href).to_lowercase().ends_with(".csv"))
    else {
        return Ok(None);
    };
    Ok(Some((resolve(dir_url, href)?, entry_name(href).to_string())))
}

/// Find, download and store the registry file. Any failure is fatal.
pub async fn download_registry(
    http: &HttpSource,
    dir_url: &Url,
    raw_dir: &Path,
) -> Result<RegistryFile> {
    info!(%dir_url, "locating registry file");
    let hrefs = http
        .list(dir_url)
        .await
        .with_context(|| format!("Failed to list registry directory {}", dir_url))?;

    let (url, filename) = find_registry_link(dir_url, &hrefs)?.with_context(|| {
        format!("No .csv registry file found in {}", dir_url)
    })?;
    info!(%url, "registry file identified");

    let bytes = http.get_bytes(&url).await?;
    let sha256 = content_hash(&bytes);

    let dir = raw_dir.join(REGISTRY_SUBDIR);
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(&filename);
    tokio::fs::write(&path, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!(path = %path.display(), bytes = bytes.len(), hash = %sha256, "registry saved");

    Ok(RegistryFile {
        url: url.to_string(),
        filename,
        path,
        sha256,
        size_bytes: bytes.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hrefs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_first_csv_link_wins() {
        let dir = Url::parse("https://example.test/operadoras/").unwrap();
        let found = find_registry_link(
            &dir,
            &hrefs(&["../", "leiame.pdf", "Relatorio_cadop.csv", "antigo.csv"]),
        )
        .unwrap()
        .unwrap();

        assert_eq!(found.1, "Relatorio_cadop.csv");
        assert_eq!(
            found.0.as_str(),
            "https://example.test/operadoras/Relatorio_cadop.csv"
        );
    }

    #[test]
    fn test_uppercase_extension_matches() {
        let dir = Url::parse("https://example.test/operadoras/").unwrap();
        let found = find_registry_link(&dir, &hrefs(&["CADOP.CSV"])).unwrap();
        assert_eq!(found.unwrap().1, "CADOP.CSV");
    }

    #[test]
    fn test_no_csv_link() {
        let dir = Url::parse("https://example.test/operadoras/").unwrap();
        let found = find_registry_link(&dir, &hrefs(&["../", "csv/", "dados.zip"])).unwrap();
        assert!(found.is_none());
    }
}
