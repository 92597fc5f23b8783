//! Destination database and table bootstrap.

use anyhow::{Context, Result};
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, PgConnection, PgPool};
use tracing::info;

use crate::config::validate_identifier;

pub const REGISTRY_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS registry (
    id         VARCHAR(20) PRIMARY KEY,
    tax_id     VARCHAR(14),
    legal_name TEXT,
    region     CHAR(2)
)
"#;

pub const STATISTICS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS statistics (
    id         SERIAL PRIMARY KEY,
    legal_name TEXT,
    region     CHAR(2),
    total      NUMERIC(18, 2),
    mean       NUMERIC(18, 2),
    stddev     NUMERIC(18, 2)
)
"#;

/// Create the target database when absent. `CREATE DATABASE` cannot run in a
/// transaction, so it goes over the simple query protocol on its own connection.
pub async fn ensure_database(maintenance: &PgConnectOptions, name: &str) -> Result<bool> {
    validate_identifier(name)?;

    let mut conn = PgConnection::connect_with(maintenance)
        .await
        .context("Failed to connect to maintenance database")?;

    let exists: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM pg_database WHERE datname = $1")
        .bind(name)
        .fetch_optional(&mut conn)
        .await
        .context("Failed to look up database")?;

    let created = if exists.is_none() {
        let sql = format!("CREATE DATABASE \"{}\"", name);
        sqlx::raw_sql(&sql)
            .execute(&mut conn)
            .await
            .with_context(|| format!("Failed to create database {}", name))?;
        info!(database = name, "database created");
        true
    } else {
        false
    };

    conn.close().await.ok();
    Ok(created)
}

pub async fn ensure_tables(pool: &PgPool) -> Result<()> {
    for ddl in [REGISTRY_DDL, STATISTICS_DDL] {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .context("Failed to create destination table")?;
    }
    Ok(())
}
