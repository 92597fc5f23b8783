use anyhow::{Context, Result};
use encoding_rs::Encoding;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub raw_fs_dir: PathBuf,
    pub processed_dir: PathBuf,
    /// Declared encoding of the raw disclosure and registry files.
    pub source_encoding: &'static Encoding,
    pub delimiter: u8,
    /// Rows per consolidation increment.
    pub chunk_rows: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let label = std::env::var("SOURCE_ENCODING").unwrap_or_else(|_| "latin1".to_string());
        let delimiter = std::env::var("SOURCE_DELIMITER").unwrap_or_else(|_| ";".to_string());

        Ok(Self {
            raw_fs_dir: PathBuf::from(
                std::env::var("RAW_FS_DIR").unwrap_or_else(|_| "./data/raw".to_string()),
            ),
            processed_dir: PathBuf::from(
                std::env::var("PROCESSED_DIR").unwrap_or_else(|_| "./data/processed".to_string()),
            ),
            source_encoding: encoding_for_label(&label)?,
            delimiter: parse_delimiter(&delimiter)?,
            chunk_rows: std::env::var("CHUNK_ROWS")
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|&n| n > 0)
                .unwrap_or(50_000),
        })
    }
}

pub fn encoding_for_label(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
        .with_context(|| format!("Unknown SOURCE_ENCODING label '{}'", label))
}

pub fn parse_delimiter(raw: &str) -> Result<u8> {
    match raw {
        "\\t" | "\t" => Ok(b'\t'),
        s if s.len() == 1 && s.is_ascii() => Ok(s.as_bytes()[0]),
        other => anyhow::bail!("SOURCE_DELIMITER must be a single ASCII character, got '{}'", other),
    }
}
