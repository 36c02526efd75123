//! Memory tier state, reads and writes.
//!
//! Flushing lives in [`super::flush`]; eviction and maintenance live in
//! [`super::evict`]. All three share the state defined here.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::keys::KeySpace;
use crate::clock::Clock;
use crate::config::SdkConfig;
use crate::store::{MemoryStore, PersistentStore, StoreCapabilities, StoreResult};

/// A memory-tier value.
#[derive(Debug, Clone)]
pub(crate) struct MemoryEntry {
    pub(crate) value: String,
    pub(crate) written_at: i64,
    /// Written locally and not yet confirmed durable.
    pub(crate) dirty: bool,
}

/// A pending durable write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteQueueItem {
    pub key: String,
    pub value: String,
}

/// Set of keys an eviction targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Scope {
    Key(String),
    Prefix(String),
    /// Everything under `prefix` except keys under `keep`.
    PrefixExcept { prefix: String, keep: String },
}

impl Scope {
    pub(crate) fn matches(&self, key: &str) -> bool {
        match self {
            Scope::Key(k) => key == k,
            Scope::Prefix(prefix) => key.starts_with(prefix.as_str()),
            Scope::PrefixExcept { prefix, keep } => key.starts_with(prefix.as_str()) && !key.starts_with(keep.as_str()),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Key(k) => write!(f, "{k}"),
            Scope::Prefix(prefix) => write!(f, "{prefix}*"),
            Scope::PrefixExcept { prefix, keep } => write!(f, "{prefix}* except {keep}*"),
        }
    }
}

/// Keys written through the cache, persisted for stores that cannot
/// enumerate.
#[derive(Debug, Default)]
pub(crate) struct KeyIndex {
    pub(crate) keys: BTreeSet<String>,
    pub(crate) loaded: bool,
    pub(crate) dirty: bool,
}

impl KeyIndex {
    pub(crate) fn insert(&mut self, key: &str) {
        if self.keys.insert(key.to_string()) {
            self.dirty = true;
        }
    }

    pub(crate) fn matching(&self, scope: &Scope) -> Vec<String> {
        self.keys.iter().filter(|k| scope.matches(k)).cloned().collect()
    }

    pub(crate) fn encode(&self) -> Option<String> {
        match serde_json::to_string(&self.keys) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode key index");
                None
            }
        }
    }
}

pub(crate) struct ScheduledFlush {
    pub(crate) generation: u64,
    pub(crate) handle: JoinHandle<()>,
}

#[derive(Default)]
pub(crate) struct CacheState {
    pub(crate) entries: HashMap<String, MemoryEntry>,
    pub(crate) access_counts: HashMap<String, u32>,
    pub(crate) frequent: HashSet<String>,
    pub(crate) queue: VecDeque<WriteQueueItem>,
    pub(crate) scheduled: Option<ScheduledFlush>,
    pub(crate) next_generation: u64,
    /// Bumped by every eviction; read-throughs that straddle a bump do not
    /// backfill.
    pub(crate) epoch: u64,
    /// Evictions whose durable half has not succeeded yet.
    pub(crate) pending_evictions: Vec<Scope>,
    pub(crate) index: KeyIndex,
}

impl CacheState {
    fn record_access(&mut self, key: &str, threshold: u32) {
        let count = self.access_counts.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        if *count >= threshold {
            self.frequent.insert(key.to_string());
        }
    }

    fn fresh_value(&self, key: &str, now: i64, expiration_ms: i64) -> Option<String> {
        self.entries
            .get(key)
            .filter(|e| e.dirty || now - e.written_at < expiration_ms)
            .map(|e| e.value.clone())
    }

    pub(crate) fn is_pending_eviction(&self, key: &str) -> bool {
        self.pending_evictions.iter().any(|scope| scope.matches(key))
    }
}

/// Tunables for a [`TieredCache`].
#[derive(Debug, Clone)]
pub struct TieredCacheSettings {
    pub memory_expiration: Duration,
    pub batch_delay: Duration,
    pub access_threshold: u32,
    /// Root of the namespace `clear_all` is limited to.
    pub namespace: String,
    /// Where the key index is persisted.
    pub index_key: String,
    pub fallback_suffixes: Vec<String>,
}

impl TieredCacheSettings {
    pub fn from_config(config: &SdkConfig) -> Self {
        let keys = KeySpace::new(&config.key_prefix);
        Self {
            memory_expiration: config.memory_expiration(),
            batch_delay: config.batch_delay(),
            access_threshold: config.access_frequency_threshold.max(1),
            namespace: keys.root().to_string(),
            index_key: keys.key_index(),
            fallback_suffixes: config.fallback_suffixes.clone(),
        }
    }
}

impl Default for TieredCacheSettings {
    fn default() -> Self {
        Self::from_config(&SdkConfig::default())
    }
}

/// Snapshot of the memory tier for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub dirty: usize,
    pub queued_writes: usize,
    pub frequent_keys: usize,
    pub pending_evictions: usize,
}

pub(crate) struct Inner {
    pub(crate) store: Arc<dyn PersistentStore>,
    pub(crate) capabilities: StoreCapabilities,
    pub(crate) durable: bool,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) settings: TieredCacheSettings,
    pub(crate) state: Mutex<CacheState>,
    /// Serialises durable batches and durable evictions.
    pub(crate) flush_gate: Mutex<()>,
}

/// Memory-first cache over an injected durable store.
///
/// Reads prefer memory; writes land in memory immediately and reach the
/// durable store through coalesced batch flushes. Cloning is cheap and
/// clones share state.
#[derive(Clone)]
pub struct TieredCache {
    pub(crate) inner: Arc<Inner>,
}

impl TieredCache {
    /// Create a cache over `store`, or a memory-only cache when `None`.
    pub fn new(store: Option<Arc<dyn PersistentStore>>, clock: Arc<dyn Clock>, settings: TieredCacheSettings) -> Self {
        let durable = store.is_some();
        let store: Arc<dyn PersistentStore> = match store {
            Some(store) => store,
            None => {
                tracing::warn!("no persistent store injected; cache is memory-only");
                Arc::new(MemoryStore::new())
            }
        };
        let capabilities = store.capabilities();
        tracing::debug!(?capabilities, "tiered cache created");

        Self {
            inner: Arc::new(Inner {
                store,
                capabilities,
                durable,
                clock,
                settings,
                state: Mutex::new(CacheState::default()),
                flush_gate: Mutex::new(()),
            }),
        }
    }

    /// Whether writes reach a durable store injected by the host.
    pub fn is_durable(&self) -> bool {
        self.inner.durable
    }

    pub fn settings(&self) -> &TieredCacheSettings {
        &self.inner.settings
    }

    pub(crate) fn now_ms(&self) -> i64 {
        self.inner.clock.now_ms()
    }

    fn expiration_ms(&self) -> i64 {
        i64::try_from(self.inner.settings.memory_expiration.as_millis()).unwrap_or(i64::MAX)
    }

    /// Read a key. Never fails: a durable error degrades to whatever the
    /// memory tier holds.
    pub async fn get(&self, key: &str) -> Option<String> {
        match self.read_through(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "durable read failed; falling back to memory tier");
                let state = self.inner.state.lock().await;
                state.entries.get(key).map(|e| e.value.clone())
            }
        }
    }

    /// Read a key, surfacing durable failures.
    pub(crate) async fn read_through(&self, key: &str) -> StoreResult<Option<String>> {
        let now = self.now_ms();
        let epoch = {
            let mut state = self.inner.state.lock().await;
            if let Some(value) = state.fresh_value(key, now, self.expiration_ms()) {
                state.record_access(key, self.inner.settings.access_threshold);
                return Ok(Some(value));
            }
            if state.is_pending_eviction(key) {
                return Ok(None);
            }
            state.epoch
        };

        let value = self.inner.store.get(key).await?;

        let mut state = self.inner.state.lock().await;
        if let Some(entry) = state.entries.get(key)
            && entry.dirty
        {
            return Ok(Some(entry.value.clone()));
        }
        if state.epoch != epoch || state.is_pending_eviction(key) {
            return Ok(None);
        }
        match &value {
            Some(v) => {
                state
                    .entries
                    .insert(key.to_string(), MemoryEntry { value: v.clone(), written_at: now, dirty: false });
                state.record_access(key, self.inner.settings.access_threshold);
            }
            None => {
                state.entries.remove(key);
            }
        }
        Ok(value)
    }

    /// Write a key to memory and queue it for the next flush.
    ///
    /// Returns `true` once the memory write is done; durable persistence
    /// follows asynchronously.
    pub async fn set(&self, key: &str, value: &str) -> bool {
        let now = self.now_ms();
        let mut state = self.inner.state.lock().await;
        state
            .entries
            .insert(key.to_string(), MemoryEntry { value: value.to_string(), written_at: now, dirty: true });
        state
            .queue
            .push_back(WriteQueueItem { key: key.to_string(), value: value.to_string() });
        if !self.inner.capabilities.enumerate && key != self.inner.settings.index_key {
            state.index.insert(key);
        }
        self.schedule_flush(&mut state);
        true
    }

    /// Warm the memory tier with `keys`. Returns how many were loaded.
    ///
    /// Keys with unflushed local writes keep their local value.
    pub async fn preload_keys(&self, keys: &[String]) -> usize {
        if keys.is_empty() {
            return 0;
        }
        let epoch = self.inner.state.lock().await.epoch;

        let loaded = if self.inner.capabilities.multi_get {
            self.inner.store.multi_get(keys).await
        } else {
            self.get_each(keys).await
        };
        let pairs = match loaded {
            Ok(pairs) => pairs,
            Err(e) => {
                tracing::debug!(error = %e, count = keys.len(), "preload skipped");
                return 0;
            }
        };

        let now = self.now_ms();
        let mut state = self.inner.state.lock().await;
        if state.epoch != epoch {
            return 0;
        }
        let mut count = 0;
        for (key, value) in pairs {
            let Some(value) = value else { continue };
            if state.entries.get(&key).is_some_and(|e| e.dirty) || state.is_pending_eviction(&key) {
                continue;
            }
            state.entries.insert(key, MemoryEntry { value, written_at: now, dirty: false });
            count += 1;
        }
        tracing::debug!(count, "preloaded keys into memory");
        count
    }

    async fn get_each(&self, keys: &[String]) -> StoreResult<Vec<(String, Option<String>)>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push((key.clone(), self.inner.store.get(key).await?));
        }
        Ok(out)
    }

    /// Re-warm every key flagged as frequently accessed.
    pub async fn preload_frequent(&self) -> usize {
        let keys: Vec<String> = {
            let state = self.inner.state.lock().await;
            state.frequent.iter().cloned().collect()
        };
        self.preload_keys(&keys).await
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock().await;
        CacheStats {
            entries: state.entries.len(),
            dirty: state.entries.values().filter(|e| e.dirty).count(),
            queued_writes: state.queue.len(),
            frequent_keys: state.frequent.len(),
            pending_evictions: state.pending_evictions.len(),
        }
    }

    /// Whether `key` holds an unflushed write. `None` when not in memory.
    pub async fn is_dirty(&self, key: &str) -> Option<bool> {
        let state = self.inner.state.lock().await;
        state.entries.get(key).map(|e| e.dirty)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::test_support::FlakyStore;
    use crate::clock::ManualClock;

    pub(crate) fn cache_over(store: Arc<FlakyStore>, clock: Arc<ManualClock>) -> TieredCache {
        TieredCache::new(Some(store), clock, TieredCacheSettings::default())
    }

    #[tokio::test]
    async fn test_set_is_visible_before_flush() {
        let store = FlakyStore::new(StoreCapabilities::all());
        let cache = cache_over(store.clone(), Arc::new(ManualClock::new(0)));

        assert!(cache.set("storysdk:k", "v").await);
        assert_eq!(cache.get("storysdk:k").await.as_deref(), Some("v"));
        assert_eq!(cache.is_dirty("storysdk:k").await, Some(true));
        assert!(store.inner.is_empty().await);
    }

    #[tokio::test]
    async fn test_read_through_backfills_memory() {
        let store = FlakyStore::new(StoreCapabilities::all());
        store.inner.set("storysdk:k", "durable").await.unwrap();
        let cache = cache_over(store.clone(), Arc::new(ManualClock::new(0)));

        assert_eq!(cache.get("storysdk:k").await.as_deref(), Some("durable"));

        store.set_failing(true, false);
        assert_eq!(cache.get("storysdk:k").await.as_deref(), Some("durable"));
    }

    #[tokio::test]
    async fn test_expired_clean_entry_rereads_durable() {
        let store = FlakyStore::new(StoreCapabilities::all());
        let clock = Arc::new(ManualClock::new(0));
        store.inner.set("storysdk:k", "one").await.unwrap();
        let cache = cache_over(store.clone(), clock.clone());
        cache.get("storysdk:k").await;

        store.inner.set("storysdk:k", "two").await.unwrap();
        assert_eq!(cache.get("storysdk:k").await.as_deref(), Some("one"));

        clock.advance(Duration::from_secs(301));
        assert_eq!(cache.get("storysdk:k").await.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_entry_expires_at_exactly_the_window() {
        let store = FlakyStore::new(StoreCapabilities::all());
        let clock = Arc::new(ManualClock::new(0));
        store.inner.set("storysdk:k", "one").await.unwrap();
        let cache = cache_over(store.clone(), clock.clone());
        cache.get("storysdk:k").await;
        store.inner.set("storysdk:k", "two").await.unwrap();

        clock.advance(Duration::from_millis(299_999));
        assert_eq!(cache.get("storysdk:k").await.as_deref(), Some("one"));

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get("storysdk:k").await.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_durable_failure_serves_expired_memory_copy() {
        let store = FlakyStore::new(StoreCapabilities::all());
        let clock = Arc::new(ManualClock::new(0));
        store.inner.set("storysdk:k", "cached").await.unwrap();
        let cache = cache_over(store.clone(), clock.clone());
        cache.get("storysdk:k").await;

        clock.advance(Duration::from_secs(600));
        store.set_failing(true, true);
        assert_eq!(cache.get("storysdk:k").await.as_deref(), Some("cached"));
        assert!(cache.read_through("storysdk:k").await.is_err());
    }

    #[tokio::test]
    async fn test_miss_on_both_tiers() {
        let store = FlakyStore::new(StoreCapabilities::minimal());
        let cache = cache_over(store, Arc::new(ManualClock::new(0)));
        assert!(cache.get("storysdk:absent").await.is_none());
    }

    #[tokio::test]
    async fn test_frequent_keys_after_threshold() {
        let store = FlakyStore::new(StoreCapabilities::all());
        let cache = cache_over(store, Arc::new(ManualClock::new(0)));
        cache.set("storysdk:hot", "1").await;
        cache.set("storysdk:cold", "1").await;

        for _ in 0..3 {
            cache.get("storysdk:hot").await;
        }
        cache.get("storysdk:cold").await;

        assert_eq!(cache.stats().await.frequent_keys, 1);
    }

    #[tokio::test]
    async fn test_preload_keys_respects_dirty_entries() {
        let store = FlakyStore::new(StoreCapabilities::minimal());
        store.inner.set("storysdk:a", "durable-a").await.unwrap();
        store.inner.set("storysdk:b", "durable-b").await.unwrap();
        let cache = cache_over(store.clone(), Arc::new(ManualClock::new(0)));
        cache.set("storysdk:b", "local-b").await;

        let loaded = cache
            .preload_keys(&["storysdk:a".to_string(), "storysdk:b".to_string(), "storysdk:c".to_string()])
            .await;

        assert_eq!(loaded, 1);
        store.set_failing(true, true);
        assert_eq!(cache.get("storysdk:a").await.as_deref(), Some("durable-a"));
        assert_eq!(cache.get("storysdk:b").await.as_deref(), Some("local-b"));
    }

    #[tokio::test]
    async fn test_memory_only_fallback() {
        let cache = TieredCache::new(None, Arc::new(ManualClock::new(0)), TieredCacheSettings::default());
        assert!(!cache.is_durable());
        cache.set("storysdk:k", "v").await;
        cache.flush().await;
        assert_eq!(cache.get("storysdk:k").await.as_deref(), Some("v"));
    }

    #[test]
    fn test_scope_matching() {
        let keep = Scope::PrefixExcept { prefix: "p:".into(), keep: "p:token:".into() };
        assert!(keep.matches("p:groups:abc:list"));
        assert!(!keep.matches("p:token:groups"));
        assert!(!keep.matches("q:groups"));
        assert!(Scope::Key("p:a".into()).matches("p:a"));
        assert!(!Scope::Key("p:a".into()).matches("p:ab"));
    }
}
