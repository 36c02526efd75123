//! Process-wide cache service.
//!
//! Built once by the host entry point and shared by reference with every
//! consumer. Owns the tiered cache, the components layered on it, and the
//! background maintenance task.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::cache::{KeySpace, ScopedDataCache, TieredCache, TieredCacheSettings};
use crate::clock::{Clock, SystemClock};
use crate::config::SdkConfig;
use crate::invalidation::{DetachedPeer, InvalidationSink};
use crate::onboarding::OnboardingLedger;
use crate::store::PersistentStore;
use crate::token::TokenCacheCoordinator;

/// Builder for [`CacheService`].
pub struct CacheServiceBuilder {
    config: SdkConfig,
    store: Option<Arc<dyn PersistentStore>>,
    sink: Arc<dyn InvalidationSink>,
    clock: Arc<dyn Clock>,
}

impl CacheServiceBuilder {
    /// Durable store. Without one the cache is memory-only.
    pub fn store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Delivery of invalidation commands to the embedded peer.
    pub fn sink(mut self, sink: Arc<dyn InvalidationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Assemble the service and start maintenance. Must run inside a tokio
    /// runtime.
    pub fn build(self) -> CacheService {
        let keys = KeySpace::new(&self.config.key_prefix);
        let cache = TieredCache::new(self.store, self.clock, TieredCacheSettings::from_config(&self.config));
        let data = ScopedDataCache::new(
            cache.clone(),
            keys.clone(),
            self.config.default_ttl(),
            self.config.data_version.clone(),
        );
        let coordinator = TokenCacheCoordinator::new(cache.clone(), data.clone(), self.sink, &self.config);
        let onboarding = OnboardingLedger::new(cache.clone(), keys);
        let maintenance = cache.spawn_maintenance(self.config.cleanup_interval());

        tracing::info!(
            prefix = %self.config.key_prefix,
            durable = cache.is_durable(),
            cleanup_interval_ms = self.config.cleanup_interval_ms,
            "cache service ready"
        );

        CacheService { config: self.config, cache, data, coordinator, onboarding, maintenance }
    }
}

/// The one cache instance for the life of the process.
pub struct CacheService {
    config: SdkConfig,
    cache: TieredCache,
    data: ScopedDataCache,
    coordinator: TokenCacheCoordinator,
    onboarding: OnboardingLedger,
    maintenance: JoinHandle<()>,
}

impl CacheService {
    pub fn builder(config: &SdkConfig) -> CacheServiceBuilder {
        CacheServiceBuilder {
            config: config.clone(),
            store: None,
            sink: Arc::new(DetachedPeer),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    pub fn data(&self) -> &ScopedDataCache {
        &self.data
    }

    pub fn coordinator(&self) -> &TokenCacheCoordinator {
        &self.coordinator
    }

    pub fn onboarding(&self) -> &OnboardingLedger {
        &self.onboarding
    }

    /// Flush every pending write. Call before the process exits.
    pub async fn shutdown(&self) {
        self.maintenance.abort();
        self.cache.flush().await;
        tracing::info!("cache service flushed");
    }
}

impl Drop for CacheService {
    fn drop(&mut self) {
        self.maintenance.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{MemoryStore, SqliteStore};

    #[tokio::test]
    async fn test_builder_defaults_to_memory_only() {
        let service = CacheService::builder(&SdkConfig::default()).build();
        assert!(!service.cache().is_durable());
        assert!(!service.coordinator().initialize("groups", "T").await);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_to_store() {
        let store = Arc::new(MemoryStore::new());
        let service = CacheService::builder(&SdkConfig::default())
            .store(store.clone())
            .clock(Arc::new(ManualClock::new(0)))
            .build();

        service.data().set_data("groups", "T", "list", &[1, 2], None).await;
        service.shutdown().await;

        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_sqlite_backed_service_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.sqlite");
        let config = SdkConfig { db_path: path.clone(), ..Default::default() };

        {
            let store = Arc::new(SqliteStore::open(&config.db_path).await.unwrap());
            let service = CacheService::builder(&config).store(store).build();
            service.coordinator().initialize("groups", "T").await;
            service.onboarding().mark_completed("T", "welcome").await;
            service.shutdown().await;
        }

        let store = Arc::new(SqliteStore::open(&path).await.unwrap());
        let service = CacheService::builder(&config).store(store).build();
        assert!(service.onboarding().is_completed("T", "welcome").await);
        assert!(!service.coordinator().initialize("groups", "T").await);
        assert!(service.coordinator().initialize("groups", "U").await);
        assert!(!service.onboarding().is_completed("T", "welcome").await);
        service.shutdown().await;
    }
}
