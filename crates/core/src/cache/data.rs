//! TTL-scoped payloads keyed by identity, token and data type.
//!
//! Every payload is stored next to a `:meta` record carrying its write time,
//! TTL and data version. A payload without readable, current metadata is
//! treated as not cached.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::keys::{KeySpace, token_hash};
use super::tiered::TieredCache;

/// Sibling record describing a cached payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Write time, epoch milliseconds.
    pub timestamp: i64,
    /// Lifetime in milliseconds.
    pub ttl: u64,
    pub version: String,
}

impl CacheMetadata {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.timestamp) >= i64::try_from(self.ttl).unwrap_or(i64::MAX)
    }
}

/// Typed payload cache over a [`TieredCache`].
#[derive(Clone)]
pub struct ScopedDataCache {
    cache: TieredCache,
    keys: KeySpace,
    default_ttl: Duration,
    version: String,
}

impl ScopedDataCache {
    pub fn new(cache: TieredCache, keys: KeySpace, default_ttl: Duration, version: impl Into<String>) -> Self {
        Self { cache, keys, default_ttl, version: version.into() }
    }

    /// Store `value` for `(identity, token, data_type)`.
    ///
    /// Returns `false` only when the value cannot be serialised.
    pub async fn set_data<T: Serialize>(
        &self, identity: &str, token: &str, data_type: &str, value: &T, ttl: Option<Duration>,
    ) -> bool {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(identity, data_type, error = %e, "failed to serialise cache payload");
                return false;
            }
        };
        let meta = CacheMetadata {
            timestamp: self.cache.now_ms(),
            ttl: u64::try_from(ttl.unwrap_or(self.default_ttl).as_millis()).unwrap_or(u64::MAX),
            version: self.version.clone(),
        };
        let meta = match serde_json::to_string(&meta) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(identity, data_type, error = %e, "failed to serialise cache metadata");
                return false;
            }
        };

        self.cache.set(&self.keys.data(identity, token, data_type), &payload).await
            && self.cache.set(&self.keys.data_meta(identity, token, data_type), &meta).await
    }

    /// Read a live payload. Expired, outdated or unreadable entries are
    /// removed and reported as misses.
    pub async fn get_data<T: DeserializeOwned>(&self, identity: &str, token: &str, data_type: &str) -> Option<T> {
        let meta_key = self.keys.data_meta(identity, token, data_type);
        let raw_meta = self.cache.get(&meta_key).await?;

        let meta: CacheMetadata = match serde_json::from_str(&raw_meta) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::debug!(key = %meta_key, error = %e, "unreadable cache metadata");
                self.remove_data(identity, token, data_type).await;
                return None;
            }
        };
        if meta.version != self.version {
            tracing::debug!(key = %meta_key, found = %meta.version, "cache version mismatch");
            self.remove_data(identity, token, data_type).await;
            return None;
        }
        if meta.is_expired(self.cache.now_ms()) {
            tracing::debug!(key = %meta_key, "cache entry expired");
            self.remove_data(identity, token, data_type).await;
            return None;
        }

        let raw = self.cache.get(&self.keys.data(identity, token, data_type)).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(identity, data_type, error = %e, "cached payload does not match requested type");
                None
            }
        }
    }

    /// Remove a payload and its metadata.
    pub async fn remove_data(&self, identity: &str, token: &str, data_type: &str) {
        self.cache.remove(&self.keys.data(identity, token, data_type)).await;
        self.cache.remove(&self.keys.data_meta(identity, token, data_type)).await;
    }

    /// Whether a payload is stored, regardless of expiry.
    pub async fn has_data(&self, identity: &str, token: &str, data_type: &str) -> bool {
        self.cache.get(&self.keys.data(identity, token, data_type)).await.is_some()
    }

    /// Warm memory with the payloads and metadata of `data_types`.
    pub async fn preload(&self, identity: &str, token: &str, data_types: &[&str]) -> usize {
        let keys: Vec<String> = data_types
            .iter()
            .flat_map(|data_type| {
                [self.keys.data(identity, token, data_type), self.keys.data_meta(identity, token, data_type)]
            })
            .collect();
        let loaded = self.cache.preload_keys(&keys).await;
        tracing::debug!(identity, token_hash = %token_hash(token), loaded, "preloaded scoped data");
        loaded
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }
}
