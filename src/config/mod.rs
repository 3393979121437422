//! Typed configuration from environment variables and an optional TOML file.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! The database URL is wrapped in secrecy::SecretString to prevent log leaks.

use crate::error::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Largest batch a single mutation call may carry.
pub const DEFAULT_MUTATION_BATCH_SIZE: usize = 50;
/// Largest key list sent to one existence lookup.
pub const DEFAULT_LOOKUP_BATCH_SIZE: usize = 50;
/// Page size for bulk reads (filtered views, full-table loads).
pub const DEFAULT_READ_BATCH_SIZE: usize = 1000;
/// Lookup batch count above which dedup yields between batches.
pub const DEFAULT_YIELD_THRESHOLD: usize = 20;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Chunk sizes, cooperative-yield and retry knobs for batch runs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub mutation_batch_size: usize,
    pub lookup_batch_size: usize,
    pub read_batch_size: usize,
    pub yield_threshold: usize,
    pub yield_delay_ms: u64,
    /// Total attempts per chunk call; 1 disables retry.
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            mutation_batch_size: DEFAULT_MUTATION_BATCH_SIZE,
            lookup_batch_size: DEFAULT_LOOKUP_BATCH_SIZE,
            read_batch_size: DEFAULT_READ_BATCH_SIZE,
            yield_threshold: DEFAULT_YIELD_THRESHOLD,
            yield_delay_ms: 0,
            retry_max_attempts: 1,
            retry_base_delay_ms: 200,
        }
    }
}

impl BatchSettings {
    /// Load settings: defaults, then the TOML file if given, then `CRM_*` env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        settings.apply_env()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML file. Missing keys fall back to defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read batch settings {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("bad batch settings {}: {e}", path.display())))
    }

    pub fn from_toml_str(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn apply_env(&mut self) -> Result<()> {
        override_from_env("CRM_MUTATION_BATCH_SIZE", &mut self.mutation_batch_size)?;
        override_from_env("CRM_LOOKUP_BATCH_SIZE", &mut self.lookup_batch_size)?;
        override_from_env("CRM_READ_BATCH_SIZE", &mut self.read_batch_size)?;
        override_from_env("CRM_YIELD_THRESHOLD", &mut self.yield_threshold)?;
        override_from_env("CRM_YIELD_DELAY_MS", &mut self.yield_delay_ms)?;
        override_from_env("CRM_RETRY_MAX_ATTEMPTS", &mut self.retry_max_attempts)?;
        override_from_env("CRM_RETRY_BASE_DELAY_MS", &mut self.retry_base_delay_ms)?;
        Ok(())
    }

    /// Reject sizes that would make chunking impossible.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("mutation_batch_size", self.mutation_batch_size),
            ("lookup_batch_size", self.lookup_batch_size),
            ("read_batch_size", self.read_batch_size),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }
        if self.retry_max_attempts == 0 {
            return Err(Error::Config(
                "retry_max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn yield_delay(&self) -> Duration {
        Duration::from_millis(self.yield_delay_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn override_from_env<T: std::str::FromStr>(name: &str, slot: &mut T) -> Result<()> {
    if let Ok(raw) = std::env::var(name) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{name} has an invalid value: {raw}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let settings = BatchSettings::from_toml_str("mutation_batch_size = 25\n").unwrap();
        assert_eq!(settings.mutation_batch_size, 25);
        assert_eq!(settings.read_batch_size, DEFAULT_READ_BATCH_SIZE);
        assert_eq!(settings.retry_max_attempts, 1);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let settings = BatchSettings {
            lookup_batch_size: 0,
            ..BatchSettings::default()
        };
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }
}
