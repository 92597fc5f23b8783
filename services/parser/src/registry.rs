//! Parsing of the operator registry (cadastro de operadoras).

use anyhow::{Context, Result};
use encoding_rs::{Encoding, UTF_8};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

use crate::cnpj::digits_only;
use crate::config::Config;

/// Identifier column names, newest first. Older registry files use the
/// second spelling.
pub const REGISTRY_ID_COLUMNS: &[&str] = &["REGISTRO_OPERADORA", "Registro_ANS"];
const TAX_ID_COLUMN: &str = "CNPJ";
const LEGAL_NAME_COLUMN: &str = "Razao_Social";
const REGION_COLUMN: &str = "UF";

/// Widths of the destination `registry` columns (id, tax_id, region).
pub const MAX_REGISTRY_ID_LEN: usize = 20;
pub const MAX_TAX_ID_LEN: usize = 14;
pub const MAX_REGION_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub registry_id: String,
    pub tax_id: String,
    pub legal_name: String,
    pub region: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub rows_read: usize,
    pub rows_without_id: usize,
    pub duplicate_ids: usize,
    pub rows_oversized: usize,
    pub names_repaired: usize,
    pub entries: usize,
}

/// Undo text that was UTF-8 on disk but decoded with a single-byte encoding
/// (`SAÃšDE` -> `SAÚDE`). Returns `None` when nothing needs repairing.
pub fn repair_double_encoding(text: &str, encoding: &'static Encoding) -> Option<String> {
    if text.is_ascii() || encoding == UTF_8 {
        return None;
    }
    let (bytes, _, had_errors) = encoding.encode(text);
    if had_errors {
        return None;
    }
    let repaired = std::str::from_utf8(&bytes).ok()?;
    (repaired != text).then(|| repaired.to_string())
}

fn find_column(headers: &[String], name: &str) -> Option<usize> {
    headers.iter().position(|h| h.eq_ignore_ascii_case(name))
}

/// Parse registry bytes. Column names are trimmed; the first occurrence of a
/// registry id wins.
pub fn parse_registry(
    bytes: &[u8],
    encoding: &'static Encoding,
    delimiter: u8,
) -> Result<(Vec<RegistryEntry>, RegistryStats)> {
    let (text, used_encoding, _) = encoding.decode(bytes);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read registry header")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let id_col = REGISTRY_ID_COLUMNS
        .iter()
        .find_map(|name| find_column(&headers, name))
        .with_context(|| {
            format!(
                "Registry has no identifier column (expected one of {:?}). Headers: {:?}",
                REGISTRY_ID_COLUMNS, headers
            )
        })?;
    let required = |name: &str| {
        find_column(&headers, name)
            .with_context(|| format!("Registry is missing column '{}'. Headers: {:?}", name, headers))
    };
    let tax_col = required(TAX_ID_COLUMN)?;
    let name_col = required(LEGAL_NAME_COLUMN)?;
    let region_col = required(REGION_COLUMN)?;

    let mut stats = RegistryStats::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut entries = Vec::new();

    for (idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Registry line {}", idx + 2))?;
        stats.rows_read += 1;

        let field = |col: usize| record.get(col).unwrap_or("").trim();

        let registry_id = field(id_col).to_string();
        if registry_id.is_empty() {
            stats.rows_without_id += 1;
            continue;
        }

        let tax_id = digits_only(field(tax_col));
        let region = field(region_col).to_uppercase();
        if registry_id.chars().count() > MAX_REGISTRY_ID_LEN
            || tax_id.len() > MAX_TAX_ID_LEN
            || region.chars().count() > MAX_REGION_LEN
        {
            warn!(registry_id = %registry_id, tax_id = %tax_id, region = %region, "registry row exceeds column widths, dropped");
            stats.rows_oversized += 1;
            continue;
        }

        if !seen.insert(registry_id.clone()) {
            stats.duplicate_ids += 1;
            continue;
        }

        let raw_name = field(name_col);
        let legal_name = match repair_double_encoding(raw_name, used_encoding) {
            Some(fixed) => {
                stats.names_repaired += 1;
                fixed.trim().to_string()
            }
            None => raw_name.to_string(),
        };

        entries.push(RegistryEntry {
            registry_id,
            tax_id,
            legal_name,
            region,
        });
    }

    stats.entries = entries.len();
    Ok((entries, stats))
}

pub fn load_registry(path: &Path, config: &Config) -> Result<(Vec<RegistryEntry>, RegistryStats)> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read registry {}", path.display()))?;
    let (entries, stats) = parse_registry(&bytes, config.source_encoding, config.delimiter)
        .with_context(|| format!("Failed to parse registry {}", path.display()))?;
    info!(
        path = %path.display(),
        entries = stats.entries,
        duplicates = stats.duplicate_ids,
        oversized = stats.rows_oversized,
        repaired = stats.names_repaired,
        "registry parsed"
    );
    Ok((entries, stats))
}
