//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use library_core::{size, QuotaDefaults};
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub database_max_connections: u32,
    pub log_level: Level,
    pub cors_origin: String,
    pub quota_defaults: QuotaDefaults,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_vars(std::env::vars().collect())
    }

    /// Builds the configuration from an explicit set of variables.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let var = |name: &str| vars.get(name).cloned();
        let invalid = |name: &str, reason: String| ConfigError::InvalidValue(name.to_string(), reason);

        // --- Load Server and Database Settings ---
        let bind_address = var("BIND_ADDRESS")
            .unwrap_or_else(|| "0.0.0.0:3000".to_string())
            .parse::<SocketAddr>()
            .map_err(|e| invalid("BIND_ADDRESS", e.to_string()))?;

        let database_url = var("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let database_max_connections = match var("DATABASE_MAX_CONNECTIONS") {
            Some(value) => value.parse::<u32>().map_err(|e| invalid("DATABASE_MAX_CONNECTIONS", e.to_string()))?,
            None => 5,
        };

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| invalid("RUST_LOG", format!("'{}' is not a valid log level", log_level_str)))?;

        let cors_origin = var("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        // --- Load Quota Defaults ---
        let book_storage_limit = match var("DEFAULT_BOOK_STORAGE_LIMIT") {
            Some(value) => size::parse(&value).map_err(|e| invalid("DEFAULT_BOOK_STORAGE_LIMIT", e.to_string()))?,
            None => QuotaDefaults::default().book_storage_limit,
        };
        let ai_request_limit = match var("DEFAULT_AI_REQUEST_LIMIT") {
            Some(value) => value.parse::<u32>().map_err(|e| invalid("DEFAULT_AI_REQUEST_LIMIT", e.to_string()))?,
            None => QuotaDefaults::default().ai_request_limit,
        };

        Ok(Self {
            bind_address,
            database_url,
            database_max_connections,
            log_level,
            cors_origin,
            quota_defaults: QuotaDefaults { book_storage_limit, ai_request_limit },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_vars(vars(&[("DATABASE_URL", "postgres://localhost/library")])).unwrap();
        assert_eq!(config.bind_address.port(), 3000);
        assert_eq!(config.database_max_connections, 5);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.quota_defaults, QuotaDefaults::default());
    }

    #[test]
    fn database_url_is_required() {
        assert!(matches!(Config::from_vars(HashMap::new()), Err(ConfigError::MissingVar(v)) if v == "DATABASE_URL"));
    }

    #[test]
    fn storage_limit_is_a_size_string() {
        let config = Config::from_vars(vars(&[
            ("DATABASE_URL", "postgres://localhost/library"),
            ("DEFAULT_BOOK_STORAGE_LIMIT", "1,5 GB"),
            ("DEFAULT_AI_REQUEST_LIMIT", "25"),
        ]))
        .unwrap();
        assert_eq!(config.quota_defaults, QuotaDefaults { book_storage_limit: 1_500_000_000, ai_request_limit: 25 });
    }

    #[test]
    fn malformed_values_are_rejected() {
        for (name, value) in [
            ("DEFAULT_BOOK_STORAGE_LIMIT", "lots"),
            ("BIND_ADDRESS", "nowhere"),
            ("RUST_LOG", "chatty"),
            ("DATABASE_MAX_CONNECTIONS", "-1"),
        ] {
            let result = Config::from_vars(vars(&[("DATABASE_URL", "postgres://localhost/library"), (name, value)]));
            assert!(matches!(result, Err(ConfigError::InvalidValue(v, _)) if v == name), "{name}={value}");
        }
    }
}
