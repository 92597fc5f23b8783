use anyhow::{Context, Result};
use reqwest::Url;
use std::path::PathBuf;

pub const DEFAULT_CORPUS_ROOT_URL: &str =
    "https://dadosabertos.ans.gov.br/FTP/PDA/demonstracoes_contabeis/";
pub const DEFAULT_REGISTRY_DIR_URL: &str =
    "https://dadosabertos.ans.gov.br/FTP/PDA/operadoras_de_plano_de_saude_ativas/";

#[derive(Debug, Clone)]
pub struct Config {
    pub corpus_root_url: Url,
    pub registry_dir_url: Url,
    pub raw_fs_dir: PathBuf,
    pub periods: usize,
    pub rate_limit_ms: u64,
    pub http_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            corpus_root_url: directory_url(
                &std::env::var("CORPUS_ROOT_URL")
                    .unwrap_or_else(|_| DEFAULT_CORPUS_ROOT_URL.to_string()),
            )?,
            registry_dir_url: directory_url(
                &std::env::var("REGISTRY_DIR_URL")
                    .unwrap_or_else(|_| DEFAULT_REGISTRY_DIR_URL.to_string()),
            )?,
            raw_fs_dir: PathBuf::from(
                std::env::var("RAW_FS_DIR").unwrap_or_else(|_| "./data/raw".to_string()),
            ),
            periods: env_or("PERIODS", 3),
            rate_limit_ms: env_or("RATE_LIMIT_MS", 500),
            http_timeout_secs: env_or("HTTP_TIMEOUT_SECS", 600),
        })
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parse a directory URL, forcing a trailing slash so relative links resolve
/// beneath it rather than beside it.
pub fn directory_url(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Url::parse(&normalized).with_context(|| format!("Invalid directory URL: {}", raw))
}
