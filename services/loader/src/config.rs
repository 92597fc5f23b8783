use anyhow::{Context, Result};
use sqlx::postgres::PgConnectOptions;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    /// Maintenance connection, used to create the target database.
    pub db_url: String,
    pub db_name: String,
    pub processed_dir: PathBuf,
    /// Rows per multi-row INSERT.
    pub insert_batch_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            db_url: std::env::var("DB_URL").context("DB_URL env var missing")?,
            db_name: std::env::var("DB_NAME").unwrap_or_else(|_| "intuitive_care".to_string()),
            processed_dir: PathBuf::from(
                std::env::var("PROCESSED_DIR").unwrap_or_else(|_| "./data/processed".to_string()),
            ),
            insert_batch_size: std::env::var("INSERT_BATCH_SIZE")
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|&n| n > 0)
                .unwrap_or(1000),
        })
    }

    /// Options for the maintenance connection and for the target database.
    pub fn connect_options(&self) -> Result<(PgConnectOptions, PgConnectOptions)> {
        let maintenance = PgConnectOptions::from_str(&self.db_url).context("Invalid DB_URL")?;
        let target = maintenance.clone().database(&self.db_name);
        Ok((maintenance, target))
    }
}

/// Database names are interpolated into DDL, so only plain identifiers pass.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_start
        && name.len() <= 63
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Ok(())
    } else {
        anyhow::bail!("Invalid database name '{}': expected [A-Za-z_][A-Za-z0-9_]*", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> Config {
        Config {
            db_url: url.to_string(),
            db_name: "intuitive_care".to_string(),
            processed_dir: PathBuf::from("./data/processed"),
            insert_batch_size: 1000,
        }
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("intuitive_care").is_ok());
        assert!(validate_identifier("_db2").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("2db").is_err());
        assert!(validate_identifier("db; DROP TABLE x").is_err());
        assert!(validate_identifier("my-db").is_err());
        assert!(validate_identifier("d\"b").is_err());
        assert!(validate_identifier(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_target_options_switch_database() {
        let (maintenance, target) = config("postgres://user:pw@localhost:5432/postgres")
            .connect_options()
            .unwrap();
        assert_eq!(maintenance.get_database(), Some("postgres"));
        assert_eq!(target.get_database(), Some("intuitive_care"));
        assert_eq!(target.get_host(), "localhost");
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(config("not a url").connect_options().is_err());
    }
}
