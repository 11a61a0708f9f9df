//! Service configuration from environment variables
//!
//! Loaded from the process environment (optionally seeded from `.env`) with
//! defaults. Invalid required settings fail startup; an invalid refresh
//! interval falls back to the default instead.

use crate::pipeline::arcgis::{
    ArcGisSettings, DEFAULT_OUT_FIELDS, DEFAULT_PAGE_SIZE, DEFAULT_POPULATION_FIELD, DEFAULT_STATE_FIELD,
};
use crate::pipeline::scheduler::interval_from_minutes;
use reqwest::Url;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub const MAX_PAGE_SIZE: u32 = 10_000;
pub const MAX_RETRIES_LIMIT: u32 = 10;

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Feature layer connection and paging
    pub arcgis: ArcGisSettings,

    /// Period between scheduled refreshes
    pub refresh_interval: Duration,

    /// Path to SQLite database file
    pub db_path: String,

    /// Read API listen address
    pub bind_addr: SocketAddr,

    pub environment: Environment,
}

impl ServiceConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `ARCGIS_LAYER_URL` (required, http/https)
    /// - `ARCGIS_OUT_FIELDS` (default: STATE_NAME,POPULATION)
    /// - `ARCGIS_STATE_FIELD` (default: STATE_NAME)
    /// - `ARCGIS_POPULATION_FIELD` (default: POPULATION)
    /// - `ARCGIS_MAX_RECORD_COUNT` (default: 2000, 1..=10000)
    /// - `ARCGIS_TIMEOUT_SECS` (default: 60)
    /// - `ARCGIS_MAX_RETRIES` (default: 3, 0..=10)
    /// - `ARCGIS_RETRY_BASE_MS` (default: 2000)
    /// - `REFRESH_INTERVAL_MINUTES` (default: 120, 1..=10080)
    /// - `STATEPOP_DB_PATH` (default: data/app.db)
    /// - `STATEPOP_BIND_ADDR` (default: 0.0.0.0:8080)
    /// - `STATEPOP_ENV` (default: production)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, reading values through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let layer_url = get("ARCGIS_LAYER_URL")
            .ok_or_else(|| ConfigError::MissingVariable("ARCGIS_LAYER_URL".to_string()))?;
        validate_layer_url(&layer_url)?;

        let max_record_count: u32 = parse_or("ARCGIS_MAX_RECORD_COUNT", get("ARCGIS_MAX_RECORD_COUNT"), DEFAULT_PAGE_SIZE)?;
        if !(1..=MAX_PAGE_SIZE).contains(&max_record_count) {
            return Err(ConfigError::InvalidValue(format!(
                "ARCGIS_MAX_RECORD_COUNT must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, max_record_count
            )));
        }

        let timeout_secs: u64 = parse_or("ARCGIS_TIMEOUT_SECS", get("ARCGIS_TIMEOUT_SECS"), 60)?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "ARCGIS_TIMEOUT_SECS must be at least 1".to_string(),
            ));
        }

        let max_retries: u32 = parse_or("ARCGIS_MAX_RETRIES", get("ARCGIS_MAX_RETRIES"), 3)?;
        if max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::InvalidValue(format!(
                "ARCGIS_MAX_RETRIES must be at most {}, got {}",
                MAX_RETRIES_LIMIT, max_retries
            )));
        }

        let retry_base_ms: u64 = parse_or("ARCGIS_RETRY_BASE_MS", get("ARCGIS_RETRY_BASE_MS"), 2_000)?;

        let arcgis = ArcGisSettings {
            layer_url,
            out_fields: get("ARCGIS_OUT_FIELDS").unwrap_or_else(|| DEFAULT_OUT_FIELDS.to_string()),
            state_field: get("ARCGIS_STATE_FIELD").unwrap_or_else(|| DEFAULT_STATE_FIELD.to_string()),
            population_field: get("ARCGIS_POPULATION_FIELD")
                .unwrap_or_else(|| DEFAULT_POPULATION_FIELD.to_string()),
            max_record_count,
            request_timeout: Duration::from_secs(timeout_secs),
            max_retries,
            retry_base_delay: Duration::from_millis(retry_base_ms),
            ..ArcGisSettings::default()
        };

        // Invalid interval never fails startup
        let interval_minutes = match get("REFRESH_INTERVAL_MINUTES") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(m) => Some(m),
                Err(_) => {
                    log::warn!("⚠️  Invalid REFRESH_INTERVAL_MINUTES '{}', using default", raw);
                    None
                }
            },
            None => None,
        };
        let refresh_interval = interval_from_minutes(interval_minutes);

        let bind_addr = parse_or(
            "STATEPOP_BIND_ADDR",
            get("STATEPOP_BIND_ADDR"),
            SocketAddr::from(([0, 0, 0, 0], 8080)),
        )?;

        let environment = match get("STATEPOP_ENV").map(|e| e.to_lowercase()).as_deref() {
            Some("development") | Some("dev") => Environment::Development,
            _ => Environment::Production,
        };

        Ok(Self {
            arcgis,
            refresh_interval,
            db_path: get("STATEPOP_DB_PATH").unwrap_or_else(|| "data/app.db".to_string()),
            bind_addr,
            environment,
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }
}

fn validate_layer_url(raw: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw)
        .map_err(|e| ConfigError::InvalidValue(format!("ARCGIS_LAYER_URL '{}' is not a valid URL: {}", raw, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidValue(
            "ARCGIS_LAYER_URL must start with http:// or https://".to_string(),
        ));
    }
    Ok(())
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(format!("{} has invalid value '{}'", key, value))),
    }
}
