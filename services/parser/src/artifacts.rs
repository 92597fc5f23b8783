//! Intermediate artifacts shared between the parser stages and the loader.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;

pub const CONSOLIDATED_FILE: &str = "consolidated_expenses.csv";
pub const REGISTRY_SNAPSHOT_FILE: &str = "registry_snapshot.csv";
pub const AGGREGATED_FILE: &str = "aggregated_expenses.csv";
pub const CONSOLIDATION_REPORT_FILE: &str = "consolidation_report.json";
pub const TRANSFORMATION_REPORT_FILE: &str = "transformation_report.json";

pub const CONSOLIDATED_HEADER: &[&str] = &["registry_id", "year", "quarter", "expense_value"];
pub const REGISTRY_SNAPSHOT_HEADER: &[&str] = &["registry_id", "tax_id", "legal_name", "region"];
pub const AGGREGATED_HEADER: &[&str] = &["legal_name", "region", "total", "mean", "stddev"];

/// Write records as a UTF-8, comma-delimited CSV. The header row is always
/// written, even with no records.
pub fn write_records<T: Serialize>(path: &Path, header: &[&str], records: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer
        .write_record(header)
        .with_context(|| format!("Failed to write header to {}", path.display()))?;
    for record in records {
        writer
            .serialize(record)
            .with_context(|| format!("Failed to write record to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    Ok(())
}

pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    reader
        .deserialize()
        .enumerate()
        .map(|(i, row)| {
            row.with_context(|| format!("Malformed row {} in {}", i + 2, path.display()))
        })
        .collect()
}

pub fn write_report<T: Serialize>(path: &Path, report: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregatedStatistic;
    use crate::consolidate::ConsolidatedExpenseRecord;

    #[test]
    fn test_consolidated_header_and_reread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONSOLIDATED_FILE);
        let records = vec![ConsolidatedExpenseRecord {
            registry_id: "123".to_string(),
            year: 2024,
            quarter: 1,
            expense_value: 100.5,
        }];

        write_records(&path, CONSOLIDATED_HEADER, &records).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "registry_id,year,quarter,expense_value\n123,2024,1,100.5\n"
        );
        let back: Vec<ConsolidatedExpenseRecord> = read_records(&path).unwrap();
        assert_eq!(back, records);
    }

    #[test]
    fn test_aggregated_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(AGGREGATED_FILE);
        let stats = vec![AggregatedStatistic {
            legal_name: "ACME, SAUDE".to_string(),
            region: "SP".to_string(),
            total: 100.5,
            mean: 100.5,
            stddev: 0.0,
        }];

        write_records(&path, AGGREGATED_HEADER, &stats).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("legal_name,region,total,mean,stddev\n"));
        assert!(text.contains("\"ACME, SAUDE\",SP,"));
    }

    #[test]
    fn test_empty_output_keeps_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(AGGREGATED_FILE);

        write_records::<AggregatedStatistic>(&path, AGGREGATED_HEADER, &[]).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "legal_name,region,total,mean,stddev\n"
        );
        let back: Vec<AggregatedStatistic> = read_records(&path).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn test_malformed_row_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONSOLIDATED_FILE);
        fs::write(
            &path,
            "registry_id,year,quarter,expense_value\n1,2024,1,5.0\n2,abc,1,5.0\n",
        )
        .unwrap();

        let err = read_records::<ConsolidatedExpenseRecord>(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("row 3"));
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_records::<ConsolidatedExpenseRecord>(&dir.path().join("nope.csv")).is_err());
    }
}
