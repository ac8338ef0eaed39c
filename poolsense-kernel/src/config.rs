/**
 * CONFIGURATION - poolsense.yaml + overrides d'environnement
 *
 * ROLE:
 * Loads the YAML file named by POOLSENSE_CONFIG (default poolsense.yaml),
 * applies POOLSENSE_API_KEY / POOLSENSE_ACCOUNT_NAME on top, then validates
 * the two required fields. A missing file means defaults.
 *
 * ERROR CODES (stable, surfaced to the user):
 * - invalid_api_key               empty credential
 * - invalid_rewards_account_name  empty account label
 */

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

use crate::api::{DEFAULT_BASE_URL, DEFAULT_COIN, DEFAULT_HASH_RATE_GROUP, DEFAULT_HISTORY_DAYS};
use crate::coordinator::CoordinatorSettings;
use crate::sensors::{SensorEntry, DOMAIN};

pub const CONFIG_PATH_ENV: &str = "POOLSENSE_CONFIG";
pub const API_KEY_ENV: &str = "POOLSENSE_API_KEY";
pub const ACCOUNT_NAME_ENV: &str = "POOLSENSE_ACCOUNT_NAME";
pub const DEFAULT_CONFIG_PATH: &str = "poolsense.yaml";
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("API key is required")]
    InvalidApiKey,
    #[error("rewards account name is required")]
    InvalidAccountName,
    #[error("scan interval must be at least one second")]
    InvalidScanInterval,
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::InvalidApiKey => "invalid_api_key",
            ConfigError::InvalidAccountName => "invalid_rewards_account_name",
            ConfigError::InvalidScanInterval => "invalid_scan_interval",
            ConfigError::Read { .. } | ConfigError::Parse { .. } => "invalid_config",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct PoolsenseConfig {
    #[serde(default)]
    pub pool: PoolConf,
    pub mqtt: Option<MqttConf>,
    pub http: Option<HttpConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PoolConf {
    pub api_key: String,
    pub account_name: String,
    pub entry_id: Option<String>,
    pub coin: String,
    pub base_url: String,
    pub scan_interval_secs: u64,
    pub hash_rate_group: String,
    pub history_days: u16,
    pub request_timeout_secs: u64,
}

impl Default for PoolConf {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            account_name: String::new(),
            entry_id: None,
            coin: DEFAULT_COIN.into(),
            base_url: DEFAULT_BASE_URL.into(),
            scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
            hash_rate_group: DEFAULT_HASH_RATE_GROUP.into(),
            history_days: DEFAULT_HISTORY_DAYS,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub base_topic: String,
    pub discovery_prefix: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "poolsense".into(),
            base_topic: "poolsense".into(),
            discovery_prefix: "homeassistant".into(),
            keep_alive_secs: 15,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
    pub api_key: Option<String>,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".into(),
            api_key: None,
        }
    }
}

impl PoolsenseConfig {
    pub fn parse(txt: &str, origin: &str) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(txt).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    /// Environment wins over the file. Empty variables are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(API_KEY_ENV).filter(|v| !v.trim().is_empty()) {
            self.pool.api_key = key;
        }
        if let Some(name) = lookup(ACCOUNT_NAME_ENV).filter(|v| !v.trim().is_empty()) {
            self.pool.account_name = name;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.api_key.trim().is_empty() {
            return Err(ConfigError::InvalidApiKey);
        }
        if self.pool.account_name.trim().is_empty() {
            return Err(ConfigError::InvalidAccountName);
        }
        if self.pool.scan_interval_secs == 0 {
            return Err(ConfigError::InvalidScanInterval);
        }
        Ok(())
    }

    pub fn entry_id(&self) -> String {
        match &self.pool.entry_id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => slugify(&self.pool.account_name),
        }
    }

    pub fn sensor_entry(&self) -> SensorEntry {
        SensorEntry {
            entry_id: self.entry_id(),
            title: self.pool.account_name.trim().to_string(),
            coin: self.pool.coin.clone(),
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.pool.scan_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.pool.request_timeout_secs.max(1))
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            coin: self.pool.coin.clone(),
            hash_rate_group: self.pool.hash_rate_group.clone(),
            history_days: self.pool.history_days,
        }
    }
}

/// Lowercase, runs of non-alphanumerics collapsed to `_`.
pub fn slugify(label: &str) -> String {
    let mut slug = String::with_capacity(label.len());
    for c in label.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_end_matches('_');
    if slug.is_empty() {
        DOMAIN.to_string()
    } else {
        slug.to_string()
    }
}

pub async fn load_config_from(path: &str) -> Result<PoolsenseConfig, ConfigError> {
    if !Path::new(path).exists() {
        warn!(path, "no config file, using defaults and environment");
        return Ok(PoolsenseConfig::default());
    }
    let txt = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
    let config = PoolsenseConfig::parse(&txt, path)?;
    info!(path, "config loaded");
    Ok(config)
}

/// File + environment, validated.
pub async fn load_config() -> Result<PoolsenseConfig, ConfigError> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut config = load_config_from(&path).await?;
    config.apply_overrides(|name| std::env::var(name).ok());
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn valid() -> PoolsenseConfig {
        let mut config = PoolsenseConfig::default();
        config.pool.api_key = "token".into();
        config.pool.account_name = "My Miner Sensors".into();
        config
    }

    #[test]
    fn test_validation_error_codes() {
        let mut config = valid();
        assert!(config.validate().is_ok());

        config.pool.api_key = "  ".into();
        assert_eq!(config.validate().unwrap_err().code(), "invalid_api_key");

        config.pool.api_key = "token".into();
        config.pool.account_name = String::new();
        assert_eq!(
            config.validate().unwrap_err().code(),
            "invalid_rewards_account_name"
        );
    }

    #[test]
    fn test_entry_id_is_slug_of_account_name() {
        let config = valid();
        assert_eq!(config.entry_id(), "my_miner_sensors");
        assert_eq!(slugify("  Rig #1 -- main "), "rig_1_main");
        assert_eq!(slugify("!!!"), "braiins_pool");

        let mut explicit = valid();
        explicit.pool.entry_id = Some("sensor_entry_1".into());
        assert_eq!(explicit.sensor_entry().entry_id, "sensor_entry_1");
        assert_eq!(explicit.sensor_entry().title, "My Miner Sensors");
    }

    #[test]
    fn test_parse_applies_section_defaults() {
        let yaml = "pool:\n  api_key: abc\n  account_name: acc\n  scan_interval_secs: 60\nmqtt:\n  host: broker\n";
        let config = PoolsenseConfig::parse(yaml, "inline").unwrap();
        assert_eq!(config.scan_interval(), Duration::from_secs(60));
        assert_eq!(config.pool.coin, "btc");
        assert_eq!(config.pool.history_days, 7);
        let mqtt = config.mqtt.unwrap();
        assert_eq!(mqtt.host, "broker");
        assert_eq!(mqtt.port, 1883);
        assert_eq!(mqtt.discovery_prefix, "homeassistant");
        assert!(config.http.is_none());

        assert!(PoolsenseConfig::parse("   \n", "inline").unwrap().pool.api_key.is_empty());
        let err = PoolsenseConfig::parse("pool: [1, 2", "inline").unwrap_err();
        assert_eq!(err.code(), "invalid_config");
    }

    #[test]
    fn test_environment_overrides_file() {
        let env: HashMap<&str, &str> = [(API_KEY_ENV, "from-env"), (ACCOUNT_NAME_ENV, "")]
            .into_iter()
            .collect();
        let mut config = valid();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));
        assert_eq!(config.pool.api_key, "from-env");
        assert_eq!(config.pool.account_name, "My Miner Sensors");
    }

    #[tokio::test]
    async fn test_load_from_file_and_missing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "pool:\n  api_key: k\n  account_name: Main\nhttp:\n  bind: 0.0.0.0:9000").unwrap();
        let config = load_config_from(file.path().to_str().unwrap()).await.unwrap();
        assert_eq!(config.entry_id(), "main");
        assert_eq!(config.http.unwrap().bind, "0.0.0.0:9000");

        let missing = load_config_from("/nonexistent/poolsense.yaml").await.unwrap();
        assert!(missing.pool.api_key.is_empty());
        assert_eq!(missing.scan_interval(), Duration::from_secs(300));
    }
}
