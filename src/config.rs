//! Application Configuration
//!
//! YAML configuration loaded from `config/<env>.yaml`. Every section has
//! defaults, so a file only lists what it overrides.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::rpc::DEFAULT_STORE_KEY;
use crate::services::{BalanceServiceConfig, PriceServiceConfig, RetryPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    /// hourly | daily | never
    pub rotation: String,
    pub cache: CacheConfig,
    pub balance: BalanceConfig,
    pub price: PriceConfig,
    pub rpc: RpcConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "portfolio.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            cache: CacheConfig::default(),
            balance: BalanceConfig::default(),
            price: PriceConfig::default(),
            rpc: RpcConfig::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_ms: u64,
    pub cleanup_interval_ms: u64,
    /// sled directory for the durable tier; memory-only when unset
    pub durable_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: 300_000,
            cleanup_interval_ms: 60_000,
            durable_path: None,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BalanceConfig {
    pub cache_ttl_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub batch_size: usize,
    pub provider_timeout_ms: u64,
    pub include_tokens: bool,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 30_000,
            max_retries: 3,
            retry_base_delay_ms: 1_000,
            batch_size: 5,
            provider_timeout_ms: 10_000,
            include_tokens: true,
        }
    }
}

impl BalanceConfig {
    pub fn service_config(&self) -> BalanceServiceConfig {
        BalanceServiceConfig {
            cache_ttl: Duration::from_millis(self.cache_ttl_ms),
            retry: RetryPolicy::new(
                self.max_retries,
                Duration::from_millis(self.retry_base_delay_ms),
            ),
            batch_size: self.batch_size,
            provider_timeout: Duration::from_millis(self.provider_timeout_ms),
            include_tokens: self.include_tokens,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PriceConfig {
    pub batch_size: usize,
    pub refresh_interval_ms: u64,
    pub max_cache_age_ms: u64,
    pub provider_timeout_ms: u64,
    pub cache_ttl_ms: u64,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            refresh_interval_ms: 30_000,
            max_cache_age_ms: 60_000,
            provider_timeout_ms: 5_000,
            cache_ttl_ms: 300_000,
        }
    }
}

impl PriceConfig {
    pub fn service_config(&self) -> PriceServiceConfig {
        PriceServiceConfig {
            batch_size: self.batch_size,
            refresh_interval: Duration::from_millis(self.refresh_interval_ms),
            max_cache_age: Duration::from_millis(self.max_cache_age_ms),
            provider_timeout: Duration::from_millis(self.provider_timeout_ms),
            cache_ttl: Duration::from_millis(self.cache_ttl_ms),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RpcConfig {
    pub health_check_interval_ms: u64,
    pub probe_timeout_ms: u64,
    /// Durable-store key holding custom endpoints and active pointers
    pub store_key: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: 60_000,
            probe_timeout_ms: 5_000,
            store_key: DEFAULT_STORE_KEY.to_string(),
        }
    }
}

impl RpcConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.rotation.as_str(), "hourly" | "daily" | "never") {
            return Err(ConfigError::invalid(
                "rotation",
                format!("expected hourly, daily or never, got '{}'", self.rotation),
            ));
        }
        let non_zero = [
            ("cache.default_ttl_ms", self.cache.default_ttl_ms),
            ("cache.cleanup_interval_ms", self.cache.cleanup_interval_ms),
            ("balance.batch_size", self.balance.batch_size as u64),
            ("balance.provider_timeout_ms", self.balance.provider_timeout_ms),
            ("price.batch_size", self.price.batch_size as u64),
            ("price.refresh_interval_ms", self.price.refresh_interval_ms),
            ("price.provider_timeout_ms", self.price.provider_timeout_ms),
            ("rpc.health_check_interval_ms", self.rpc.health_check_interval_ms),
            ("rpc.probe_timeout_ms", self.rpc.probe_timeout_ms),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }
        if self.rpc.store_key.trim().is_empty() {
            return Err(ConfigError::invalid("rpc.store_key", "must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config = AppConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config.balance.batch_size, 5);
        assert_eq!(config.price.batch_size, 50);
        assert_eq!(config.rpc.store_key, "rpc-endpoint-config");

        let balance = config.balance.service_config();
        assert_eq!(balance.cache_ttl, Duration::from_secs(30));
        assert_eq!(balance.retry.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn test_partial_override() {
        let yaml = r#"
log_level: debug
use_json: true
price:
  refresh_interval_ms: 10000
cache:
  durable_path: ./data/cache
"#;
        let config = AppConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.log_level, "debug");
        assert!(config.use_json);
        assert_eq!(
            config.price.service_config().refresh_interval,
            Duration::from_secs(10)
        );
        assert_eq!(config.price.max_cache_age_ms, 60_000);
        assert_eq!(
            config.cache.durable_path,
            Some(PathBuf::from("./data/cache"))
        );
    }

    #[test]
    fn test_rejects_zero_batch() {
        let err = AppConfig::from_yaml_str("balance:\n  batch_size: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "balance.batch_size", .. }));
    }

    #[test]
    fn test_rejects_bad_rotation_and_yaml() {
        assert!(AppConfig::from_yaml_str("rotation: weekly").is_err());
        assert!(matches!(
            AppConfig::from_yaml_str("price: [1, 2"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = AppConfig::load("does-not-exist").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_dev_config_parses() {
        let content = include_str!("../config/dev.yaml");
        let config = AppConfig::from_yaml_str(content).unwrap();
        assert_eq!(config.rotation, "daily");
    }
}
