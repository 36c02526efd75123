//! SDK configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (STORYSDK_*)
//! 2. TOML config file (if STORYSDK_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// SDK cache configuration.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (STORYSDK_*)
/// 2. TOML config file (if STORYSDK_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdkConfig {
    /// Root of the persisted key namespace.
    ///
    /// Set via STORYSDK_KEY_PREFIX environment variable.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Path to the SQLite database backing the durable store.
    ///
    /// Set via STORYSDK_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// How long a clean memory entry is served without consulting the
    /// durable store.
    #[serde(default = "default_memory_expiration_ms")]
    pub memory_expiration_ms: u64,

    /// Coalescing delay between the first queued write and its flush.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// Interval of the background sweep of expired memory entries.
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,

    /// TTL applied by `set_data` when the caller gives none.
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,

    /// Reads after which a key counts as frequently accessed.
    #[serde(default = "default_access_frequency_threshold")]
    pub access_frequency_threshold: u32,

    /// Schema marker compared against the persisted cache version.
    #[serde(default = "default_version")]
    pub cache_version: String,

    /// Version stamped into every data metadata record.
    #[serde(default = "default_version")]
    pub data_version: String,

    /// Keep token records when a version mismatch clears the cache.
    #[serde(default)]
    pub preserve_tokens_on_version_change: bool,

    /// Data types tried during prefix eviction when the durable store
    /// cannot enumerate its keys.
    ///
    /// Set via STORYSDK_FALLBACK_SUFFIXES environment variable (comma-separated).
    #[serde(default = "default_fallback_suffixes", deserialize_with = "list_or_csv")]
    pub fallback_suffixes: Vec<String>,

    /// Wait for the embedded peer to acknowledge invalidation commands.
    #[serde(default)]
    pub confirm_peer_invalidation: bool,

    /// Acknowledgement timeout when `confirm_peer_invalidation` is set.
    #[serde(default = "default_peer_ack_timeout_ms")]
    pub peer_ack_timeout_ms: u64,

    /// Verbose cache logging.
    #[serde(default)]
    pub debug: bool,
}

fn default_key_prefix() -> String {
    "storysdk".into()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./storysdk-cache.sqlite")
}

fn default_memory_expiration_ms() -> u64 {
    5 * 60 * 1000
}

fn default_batch_delay_ms() -> u64 {
    200
}

fn default_cleanup_interval_ms() -> u64 {
    10 * 60 * 1000
}

fn default_ttl_ms() -> u64 {
    5 * 60 * 1000
}

fn default_access_frequency_threshold() -> u32 {
    3
}

fn default_version() -> String {
    "1.0.0".into()
}

fn default_fallback_suffixes() -> Vec<String> {
    ["groupsList", "story", "modal", "onboarding", "groups", "stories", "app"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Accept either a list or a single comma-separated string.
fn list_or_csv<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Csv(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::List(items) => items,
        Raw::Csv(csv) => csv
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(String::from)
            .collect(),
    })
}

fn default_peer_ack_timeout_ms() -> u64 {
    2_000
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            db_path: default_db_path(),
            memory_expiration_ms: default_memory_expiration_ms(),
            batch_delay_ms: default_batch_delay_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            default_ttl_ms: default_ttl_ms(),
            access_frequency_threshold: default_access_frequency_threshold(),
            cache_version: default_version(),
            data_version: default_version(),
            preserve_tokens_on_version_change: false,
            fallback_suffixes: default_fallback_suffixes(),
            confirm_peer_invalidation: false,
            peer_ack_timeout_ms: default_peer_ack_timeout_ms(),
            debug: false,
        }
    }
}

impl SdkConfig {
    pub fn memory_expiration(&self) -> Duration {
        Duration::from_millis(self.memory_expiration_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    /// Acknowledgement timeout, or `None` when invalidation is fire-and-forget.
    pub fn peer_ack_timeout(&self) -> Option<Duration> {
        self.confirm_peer_invalidation
            .then(|| Duration::from_millis(self.peer_ack_timeout_ms))
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `STORYSDK_`
    /// 2. TOML file from `STORYSDK_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file or environment cannot be parsed, or
    /// if validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("STORYSDK_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        Self::extract(figment.merge(
            Env::prefixed("STORYSDK_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        ))
    }

    /// Load defaults overlaid with a TOML document.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::extract(Figment::from(Serialized::defaults(Self::default())).merge(Toml::string(toml)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
