//! Cache behaviour across the public API: TTL, durability, eviction, token
//! isolation and failure recovery.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use storysdk_core::store::StoreResult;
use storysdk_core::{
    CacheService, Error, KeySpace, ManualClock, MemoryStore, PersistentStore, SdkConfig, StoreCapabilities,
    TieredCache, TieredCacheSettings,
};

/// Adapter that can be switched into failing every write.
#[derive(Default)]
struct UnreliableStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl UnreliableStore {
    fn fail(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::AdapterFailed("storage offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistentStore for UnreliableStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check()?;
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.check()?;
        self.inner.remove(key).await
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::minimal()
    }
}

fn service(store: Arc<dyn PersistentStore>, clock: Arc<ManualClock>) -> CacheService {
    CacheService::builder(&SdkConfig::default()).store(store).clock(clock).build()
}

#[tokio::test]
async fn ttl_boundary_is_exclusive() {
    let clock = Arc::new(ManualClock::new(10_000));
    let svc = service(Arc::new(MemoryStore::new()), clock.clone());
    let data = svc.data();
    data.set_data("groups", "T1", "list", &json!({"id": 1}), Some(Duration::from_millis(1_000)))
        .await;

    for offset in [0, 1, 500, 999] {
        clock.set(10_000 + offset);
        assert!(data.get_data::<serde_json::Value>("groups", "T1", "list").await.is_some(), "offset {offset}");
    }

    clock.set(11_000);
    assert!(data.get_data::<serde_json::Value>("groups", "T1", "list").await.is_none());

    clock.set(10_500);
    assert!(data.get_data::<serde_json::Value>("groups", "T1", "list").await.is_none());
}

#[tokio::test]
async fn flushed_writes_survive_restart() {
    let store = Arc::new(MemoryStore::with_capabilities(StoreCapabilities::minimal()));
    let clock = Arc::new(ManualClock::new(0));
    let writes = [("storysdk:a", "1"), ("storysdk:b", "2"), ("storysdk:a", "3")];

    {
        let cache = TieredCache::new(Some(store.clone()), clock.clone(), TieredCacheSettings::default());
        for (key, value) in writes {
            cache.set(key, value).await;
        }
        cache.flush().await;
    }

    let restarted = TieredCache::new(Some(store), clock, TieredCacheSettings::default());
    assert_eq!(restarted.get("storysdk:a").await.as_deref(), Some("3"));
    assert_eq!(restarted.get("storysdk:b").await.as_deref(), Some("2"));
}

#[tokio::test]
async fn prefix_eviction_is_complete_and_precise() {
    for capabilities in [StoreCapabilities::all(), StoreCapabilities::minimal()] {
        let store = Arc::new(MemoryStore::with_capabilities(capabilities));
        let cache = TieredCache::new(Some(store.clone()), Arc::new(ManualClock::new(0)), TieredCacheSettings::default());
        let inside = ["storysdk:groups:h:a", "storysdk:groups:h:b", "storysdk:groups:h:c:meta"];
        let outside = ["storysdk:groups:hh:a", "storysdk:modal:h:a", "storysdk:groups:"];

        for key in inside.iter().chain(outside.iter()) {
            cache.set(key, "v").await;
        }
        cache.flush().await;
        cache.set("storysdk:groups:h:queued", "v").await;

        cache.clear_by_prefix("storysdk:groups:h:").await;
        cache.flush().await;

        let fresh = TieredCache::new(Some(store.clone()), Arc::new(ManualClock::new(0)), TieredCacheSettings::default());
        for key in inside.iter().chain(["storysdk:groups:h:queued"].iter()) {
            assert!(cache.get(key).await.is_none(), "{key} served from memory");
            assert!(fresh.get(key).await.is_none(), "{key} still durable");
        }
        for key in outside {
            assert_eq!(fresh.get(key).await.as_deref(), Some("v"), "{key} lost");
        }
    }
}

#[tokio::test]
async fn token_change_isolates_identities() {
    let svc = service(Arc::new(MemoryStore::new()), Arc::new(ManualClock::new(0)));
    let keys = KeySpace::new("storysdk");
    let coordinator = svc.coordinator();
    let data = svc.data();

    coordinator.initialize("groups", "A").await;
    coordinator.initialize("modal", "A").await;
    data.set_data("groups", "A", "groupsList", &[1], None).await;
    data.set_data("modal", "A", "story", &[2], None).await;
    svc.onboarding().mark_completed("A", "welcome").await;

    assert!(coordinator.initialize("groups", "B").await);

    assert!(data.get_data::<Vec<u32>>("groups", "A", "groupsList").await.is_none());
    assert_eq!(data.get_data::<Vec<u32>>("modal", "A", "story").await, Some(vec![2]));
    assert!(!svc.onboarding().is_completed("A", "welcome").await);
    assert_eq!(svc.cache().get(&keys.token_record("modal")).await.as_deref(), Some("A"));
    assert_eq!(svc.cache().get(&keys.token_record("groups")).await.as_deref(), Some("B"));
}

#[tokio::test]
async fn repeated_initialization_never_clears() {
    let svc = service(Arc::new(MemoryStore::new()), Arc::new(ManualClock::new(0)));
    let coordinator = svc.coordinator();

    assert!(!coordinator.initialize("groups", "A").await);
    svc.data().set_data("groups", "A", "list", &1, None).await;
    assert!(!coordinator.initialize("groups", "A").await);
    assert!(!coordinator.initialize("groups", "A").await);

    assert_eq!(svc.data().get_data::<u32>("groups", "A", "list").await, Some(1));
}

#[tokio::test]
async fn adapter_failure_loses_no_writes() {
    let store = Arc::new(UnreliableStore::default());
    let cache = TieredCache::new(Some(store.clone()), Arc::new(ManualClock::new(0)), TieredCacheSettings::default());

    store.fail(true);
    cache.set("storysdk:a", "1").await;
    cache.set("storysdk:b", "2").await;
    cache.flush().await;

    assert_eq!(cache.get("storysdk:a").await.as_deref(), Some("1"));
    assert_eq!(cache.is_dirty("storysdk:a").await, Some(true));
    assert_eq!(cache.is_dirty("storysdk:b").await, Some(true));
    assert!(store.inner.is_empty().await);

    store.fail(false);
    cache.flush().await;

    assert_eq!(cache.is_dirty("storysdk:a").await, Some(false));
    assert_eq!(store.inner.get("storysdk:a").await.unwrap().as_deref(), Some("1"));
    assert_eq!(store.inner.get("storysdk:b").await.unwrap().as_deref(), Some("2"));
}

#[tokio::test]
async fn token_switch_scenario() {
    let clock = Arc::new(ManualClock::new(0));
    let svc = service(Arc::new(MemoryStore::new()), clock.clone());
    let coordinator = svc.coordinator();
    let data = svc.data();

    assert!(!coordinator.initialize("groups", "T1").await);
    data.set_data("groups", "T1", "list", &json!([{"id": 1}]), Some(Duration::from_millis(5_000)))
        .await;
    assert_eq!(
        data.get_data::<serde_json::Value>("groups", "T1", "list").await,
        Some(json!([{"id": 1}]))
    );

    clock.advance(Duration::from_millis(6_000));
    assert!(data.get_data::<serde_json::Value>("groups", "T1", "list").await.is_none());

    assert!(coordinator.initialize("groups", "T2").await);
    assert!(data.get_data::<serde_json::Value>("groups", "T1", "list").await.is_none());

    data.set_data("groups", "T2", "list", &json!([{"id": 2}]), None).await;
    assert_eq!(
        data.get_data::<serde_json::Value>("groups", "T2", "list").await,
        Some(json!([{"id": 2}]))
    );
}
