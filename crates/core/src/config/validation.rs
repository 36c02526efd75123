//! Configuration validation rules.
//!
//! This module provides validation logic for `SdkConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::SdkConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl SdkConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `key_prefix` is empty or contains `:`
    /// - `batch_delay_ms` is 0 or exceeds 10s
    /// - `memory_expiration_ms`, `cleanup_interval_ms` or `default_ttl_ms` is 0
    /// - `cache_version` or `data_version` is empty
    /// - confirmation is on with a zero ack timeout
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_prefix.is_empty() {
            return Err(ConfigError::Invalid { field: "key_prefix".into(), reason: "must not be empty".into() });
        }
        if self.key_prefix.contains(':') {
            return Err(ConfigError::Invalid { field: "key_prefix".into(), reason: "must not contain ':'".into() });
        }

        if self.batch_delay_ms == 0 {
            return Err(ConfigError::Invalid { field: "batch_delay_ms".into(), reason: "must be greater than 0".into() });
        }
        if self.batch_delay_ms > 10_000 {
            return Err(ConfigError::Invalid {
                field: "batch_delay_ms".into(),
                reason: "must not exceed 10 seconds (10000ms)".into(),
            });
        }

        for (field, value) in [
            ("memory_expiration_ms", self.memory_expiration_ms),
            ("cleanup_interval_ms", self.cleanup_interval_ms),
            ("default_ttl_ms", self.default_ttl_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid { field: field.into(), reason: "must be greater than 0".into() });
            }
        }

        if self.cache_version.is_empty() {
            return Err(ConfigError::Invalid { field: "cache_version".into(), reason: "must not be empty".into() });
        }
        if self.data_version.is_empty() {
            return Err(ConfigError::Invalid { field: "data_version".into(), reason: "must not be empty".into() });
        }

        if self.confirm_peer_invalidation && self.peer_ack_timeout_ms == 0 {
            return Err(ConfigError::Missing {
                field: "peer_ack_timeout_ms".into(),
                hint: "Set STORYSDK_PEER_ACK_TIMEOUT_MS when confirm_peer_invalidation is enabled".into(),
            });
        }

        if self.fallback_suffixes.is_empty() {
            tracing::warn!(
                "fallback_suffixes is empty; prefix eviction on stores without key enumeration \
                 relies on the key index alone"
            );
        }

        Ok(())
    }
}
