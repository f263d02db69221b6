//! Configuration management

use std::time::Duration;

use anyhow::{self, Context, Result};

use crate::defaults::{self, ImportSettings};

/// Where jobs and contacts are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    /// In-process maps; development only, nothing survives a restart
    Memory,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    /// PostgreSQL connection string (required for the postgres backend)
    pub database_url: Option<String>,

    pub storage_backend: StorageBackend,

    /// JWT secret key for token validation
    pub jwt_secret: String,

    /// Optional ML mapping classifier endpoint
    pub classifier_url: Option<String>,

    pub import: ImportSettings,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let nats_url = std::env::var("NATS_URL")
            .unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let storage_backend = match std::env::var("STORAGE_BACKEND").as_deref() {
            Ok("memory") => StorageBackend::Memory,
            Ok("postgres") | Err(_) => StorageBackend::Postgres,
            Ok(other) => anyhow::bail!("Unknown STORAGE_BACKEND '{}' (expected postgres or memory)", other),
        };

        let database_url = std::env::var("DATABASE_URL").ok();
        if storage_backend == StorageBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL must be set when STORAGE_BACKEND=postgres");
        }

        let jwt_secret = std::env::var("JWT_SECRET")
            .context("JWT_SECRET must be set; generate one with: openssl rand -base64 48")?;

        if jwt_secret.len() < 32 {
            anyhow::bail!(
                "JWT_SECRET must be at least 32 bytes (current: {} bytes)",
                jwt_secret.len()
            );
        }

        let classifier_url = classifier_url_from_env();
        let import = import_settings_from_env()?;

        Ok(Self {
            nats_url,
            database_url,
            storage_backend,
            jwt_secret,
            classifier_url,
            import,
        })
    }
}

/// Optional ML mapping classifier endpoint
pub fn classifier_url_from_env() -> Option<String> {
    std::env::var("MAPPING_CLASSIFIER_URL").ok().filter(|u| !u.is_empty())
}

/// Import tuning knobs; usable without the rest of the server config
pub fn import_settings_from_env() -> Result<ImportSettings> {
    dotenvy::dotenv().ok();

    let import = ImportSettings {
        max_file_bytes: env_or("IMPORT_MAX_FILE_BYTES", defaults::MAX_FILE_SIZE_BYTES)?,
        stale_after: chrono::Duration::minutes(env_or(
            "STALE_JOB_MINUTES",
            defaults::STALE_JOB_THRESHOLD_MINUTES,
        )?),
        min_confidence: env_or("MAPPING_MIN_CONFIDENCE", defaults::MIN_MAPPING_CONFIDENCE)?,
        sample_rows: defaults::SAMPLE_ROW_COUNT,
        coverage_threshold: env_or(
            "IDENTIFIER_COVERAGE_THRESHOLD",
            defaults::IDENTIFIER_COVERAGE_THRESHOLD,
        )?,
        classifier_timeout: Duration::from_millis(env_or(
            "MAPPING_CLASSIFIER_TIMEOUT_MS",
            defaults::CLASSIFIER_TIMEOUT_MS,
        )?),
    };

    if !(0.0..=1.0).contains(&import.min_confidence) {
        anyhow::bail!("MAPPING_MIN_CONFIDENCE must be between 0 and 1");
    }
    Ok(import)
}

/// Parse an optional numeric env var, falling back to `default`
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_uses_default_when_unset() {
        std::env::remove_var("IMPORT_TEST_UNSET_VALUE");
        let value: u64 = env_or("IMPORT_TEST_UNSET_VALUE", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_env_or_parses_value() {
        std::env::set_var("IMPORT_TEST_STALE_MINUTES", "15");
        let value: i64 = env_or("IMPORT_TEST_STALE_MINUTES", 10).unwrap();
        assert_eq!(value, 15);
        std::env::remove_var("IMPORT_TEST_STALE_MINUTES");
    }

    #[test]
    fn test_env_or_rejects_garbage() {
        std::env::set_var("IMPORT_TEST_BAD_CONFIDENCE", "high");
        let result: Result<f64> = env_or("IMPORT_TEST_BAD_CONFIDENCE", 0.5);
        assert!(result.is_err());
        std::env::remove_var("IMPORT_TEST_BAD_CONFIDENCE");
    }

    #[test]
    #[ignore] // requires --test-threads=1 due to env var race
    fn test_config_memory_backend_without_database_url() {
        std::env::remove_var("DATABASE_URL");
        std::env::set_var("STORAGE_BACKEND", "memory");
        std::env::set_var("JWT_SECRET", "test-secret-key-for-jwt-at-least-32-bytes-long");

        let config = Config::from_env().unwrap();
        assert_eq!(config.storage_backend, StorageBackend::Memory);
        assert!(config.database_url.is_none());
        assert_eq!(config.import.max_file_bytes, defaults::MAX_FILE_SIZE_BYTES);
    }
}
