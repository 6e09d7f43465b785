// src/settings/mod.rs
pub mod io;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::blocks::cache::CachePolicy;
use crate::blocks::database::{RetryPolicy, StoreConfig};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("could not determine the configuration directory")]
    NoConfigDir,
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub short_ttl_secs: u64,
    pub long_ttl_secs: u64,
    pub large_result_threshold: usize,
    pub capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            short_ttl_secs: 300,
            long_ttl_secs: 3600,
            large_result_threshold: 100,
            capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub attempts: usize,
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 25,
        }
    }
}

/// Engine tuning. Every field has a default, so a partial file is fine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub max_query_limit: usize,
    pub default_query_limit: usize,
    pub bulk_batch_size: usize,
    pub busy_timeout_ms: u64,
    /// Database file; `None` uses the documents directory.
    pub db_path: Option<PathBuf>,
    pub cache: CacheSettings,
    pub retry: RetrySettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_query_limit: 1000,
            default_query_limit: 50,
            bulk_batch_size: 100,
            busy_timeout_ms: 5000,
            db_path: None,
            cache: CacheSettings::default(),
            retry: RetrySettings::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, SettingsError> {
    value.trim().parse().map_err(|_| SettingsError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl EngineSettings {
    /// Applies `BLOCKDB_*` overrides. `lookup` is `std::env::var` in production.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        macro_rules! override_field {
            ($key:literal, $field:expr) => {
                if let Some(value) = lookup($key) {
                    $field = parse_env($key, &value)?;
                }
            };
        }
        override_field!("BLOCKDB_MAX_QUERY_LIMIT", self.max_query_limit);
        override_field!("BLOCKDB_DEFAULT_QUERY_LIMIT", self.default_query_limit);
        override_field!("BLOCKDB_BULK_BATCH_SIZE", self.bulk_batch_size);
        override_field!("BLOCKDB_BUSY_TIMEOUT_MS", self.busy_timeout_ms);
        override_field!("BLOCKDB_CACHE_SHORT_TTL_SECS", self.cache.short_ttl_secs);
        override_field!("BLOCKDB_CACHE_LONG_TTL_SECS", self.cache.long_ttl_secs);
        override_field!("BLOCKDB_CACHE_LARGE_RESULT_THRESHOLD", self.cache.large_result_threshold);
        override_field!("BLOCKDB_CACHE_CAPACITY", self.cache.capacity);
        override_field!("BLOCKDB_RETRY_ATTEMPTS", self.retry.attempts);
        override_field!("BLOCKDB_RETRY_BASE_DELAY_MS", self.retry.base_delay_ms);
        if let Some(path) = lookup("BLOCKDB_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = Some(PathBuf::from(path));
            }
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |key: &str, value: usize| SettingsError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        if self.max_query_limit == 0 {
            return Err(invalid("max_query_limit", self.max_query_limit));
        }
        if self.default_query_limit == 0 || self.default_query_limit > self.max_query_limit {
            return Err(invalid("default_query_limit", self.default_query_limit));
        }
        if self.bulk_batch_size == 0 {
            return Err(invalid("bulk_batch_size", self.bulk_batch_size));
        }
        if self.retry.attempts == 0 {
            return Err(invalid("retry.attempts", self.retry.attempts));
        }
        Ok(())
    }

    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy {
            short_ttl: Duration::from_secs(self.cache.short_ttl_secs),
            long_ttl: Duration::from_secs(self.cache.long_ttl_secs),
            large_result_threshold: self.cache.large_result_threshold,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.attempts, Duration::from_millis(self.retry.base_delay_ms))
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            db_path: self.db_path.clone().unwrap_or_else(StoreConfig::default_path),
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            retry: self.retry_policy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: EngineSettings =
            serde_json::from_str(r#"{"max_query_limit": 200, "cache": {"capacity": 5}}"#).unwrap();
        assert_eq!(settings.max_query_limit, 200);
        assert_eq!(settings.default_query_limit, 50);
        assert_eq!(settings.cache.capacity, 5);
        assert_eq!(settings.cache.long_ttl_secs, 3600);
    }

    #[test]
    fn env_overrides_apply_and_validate() {
        let env: HashMap<&str, &str> = [
            ("BLOCKDB_BULK_BATCH_SIZE", "25"),
            ("BLOCKDB_CACHE_SHORT_TTL_SECS", "60"),
            ("BLOCKDB_DB_PATH", "/tmp/x.db"),
        ]
        .into_iter()
        .collect();
        let mut settings = EngineSettings::default();
        settings
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(settings.bulk_batch_size, 25);
        assert_eq!(settings.cache_policy().short_ttl, Duration::from_secs(60));
        assert_eq!(settings.store_config().db_path, PathBuf::from("/tmp/x.db"));

        let mut bad = EngineSettings::default();
        let err = bad
            .apply_overrides(|k| (k == "BLOCKDB_RETRY_ATTEMPTS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue { .. }));

        let mut zero = EngineSettings::default();
        assert!(zero
            .apply_overrides(|k| (k == "BLOCKDB_DEFAULT_QUERY_LIMIT").then(|| "0".to_string()))
            .is_err());
    }
}
