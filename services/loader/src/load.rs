//! Full-replace loads of the processed artifacts.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sqlx::query_builder::Separated;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::path::Path;
use tracing::info;

/// Postgres caps a statement at 65535 bind parameters.
const MAX_BIND_PARAMS: usize = 65_535;

/// A destination table fed from one processed CSV.
pub trait Table: DeserializeOwned {
    const NAME: &'static str;
    const TRUNCATE: &'static str;
    const INSERT: &'static str;
    const COLUMNS: usize;

    fn push_row(&self, row: &mut Separated<'_, '_, Postgres, &'static str>);
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegistryRow {
    pub registry_id: String,
    pub tax_id: String,
    pub legal_name: String,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatisticRow {
    pub legal_name: String,
    pub region: String,
    pub total: f64,
    pub mean: f64,
    pub stddev: f64,
}

impl Table for RegistryRow {
    const NAME: &'static str = "registry";
    const TRUNCATE: &'static str = "TRUNCATE TABLE registry";
    const INSERT: &'static str = "INSERT INTO registry (id, tax_id, legal_name, region) ";
    const COLUMNS: usize = 4;

    fn push_row(&self, row: &mut Separated<'_, '_, Postgres, &'static str>) {
        row.push_bind(self.registry_id.clone())
            .push_bind(self.tax_id.clone())
            .push_bind(self.legal_name.clone())
            .push_bind(self.region.clone());
    }
}

impl Table for StatisticRow {
    const NAME: &'static str = "statistics";
    const TRUNCATE: &'static str = "TRUNCATE TABLE statistics RESTART IDENTITY";
    const INSERT: &'static str = "INSERT INTO statistics (legal_name, region, total, mean, stddev) ";
    const COLUMNS: usize = 5;

    fn push_row(&self, row: &mut Separated<'_, '_, Postgres, &'static str>) {
        row.push_bind(self.legal_name.clone())
            .push_bind(self.region.clone());
        for value in [self.total, self.mean, self.stddev] {
            row.push("ROUND(")
                .push_bind_unseparated(value)
                .push_unseparated("::numeric, 2)");
        }
    }
}

/// Rows per INSERT, bounded by the bind-parameter limit.
pub fn rows_per_statement(requested: usize, columns: usize) -> usize {
    requested.clamp(1, MAX_BIND_PARAMS / columns.max(1))
}

pub fn read_rows<T: Table>(path: &Path) -> Result<Vec<T>> {
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

/// Replace the table contents in one transaction. Any error rolls back, so
/// the previous contents survive a failed load.
pub async fn replace_table<T: Table>(pool: &PgPool, rows: &[T], batch_size: usize) -> Result<u64> {
    let mut tx = pool
        .begin()
        .await
        .with_context(|| format!("Failed to begin transaction for {}", T::NAME))?;

    sqlx::query(T::TRUNCATE)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to truncate {}", T::NAME))?;

    let mut inserted = 0u64;
    for chunk in rows.chunks(rows_per_statement(batch_size, T::COLUMNS)) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(T::INSERT);
        builder.push_values(chunk, |mut row, record| record.push_row(&mut row));
        let result = builder
            .build()
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert into {}", T::NAME))?;
        inserted += result.rows_affected();
    }

    tx.commit()
        .await
        .with_context(|| format!("Failed to commit {}", T::NAME))?;

    info!(table = T::NAME, rows = inserted, "table replaced");
    Ok(inserted)
}

/// Read a processed CSV and replace the matching table with it.
pub async fn load_file<T: Table>(pool: &PgPool, path: &Path, batch_size: usize) -> Result<u64> {
    let rows: Vec<T> = read_rows(path)?;
    replace_table(pool, &rows, batch_size).await
}
