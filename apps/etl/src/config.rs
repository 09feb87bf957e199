use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    /// Warehouse the importers write to.
    pub database_url: String,
    /// Database holding the staged source documents. Defaults to the warehouse.
    pub source_database_url: String,
    pub workers: usize,
    pub partition_size: u64,
    pub partition_deadline: Option<Duration>,
    pub max_connections: u32,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let database_url = require_env("DATABASE_URL")?;
        let workers = parse_env("ETL_WORKERS", 4usize)?;
        if workers == 0 {
            anyhow::bail!("ETL_WORKERS must be at least 1");
        }

        Ok(Config {
            source_database_url: std::env::var("SOURCE_DATABASE_URL")
                .unwrap_or_else(|_| database_url.clone()),
            database_url,
            workers,
            partition_size: parse_env("ETL_PARTITION_SIZE", 500u64)?,
            partition_deadline: optional_env::<u64>("ETL_PARTITION_DEADLINE_SECS")?
                .map(Duration::from_secs),
            // One connection per worker plus headroom for counting and staging.
            max_connections: parse_env("ETL_MAX_CONNECTIONS", workers as u32 + 2)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        Err(_) => Ok(None),
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(optional_env(key)?.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Keys are unique per test so parallel tests never observe each other.

    #[test]
    fn test_parse_env_falls_back_to_default() {
        assert_eq!(parse_env("ETL_TEST_UNSET_WORKERS", 7usize).unwrap(), 7);
    }

    #[test]
    fn test_parse_env_reads_value() {
        std::env::set_var("ETL_TEST_PARTITION_SIZE", " 250 ");
        assert_eq!(parse_env("ETL_TEST_PARTITION_SIZE", 500u64).unwrap(), 250);
    }

    #[test]
    fn test_parse_env_rejects_garbage() {
        std::env::set_var("ETL_TEST_BAD_WORKERS", "many");
        let err = parse_env("ETL_TEST_BAD_WORKERS", 4usize).unwrap_err();
        assert!(err.to_string().contains("ETL_TEST_BAD_WORKERS"));
    }
}
