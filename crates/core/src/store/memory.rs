//! Process-local store.
//!
//! Used as the fallback when no durable adapter is injected, and as a
//! configurable stand-in for native storage in tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{PersistentStore, StoreCapabilities, StoreResult};
use crate::Error;

/// In-memory key/value store with switchable capabilities.
#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
    capabilities: StoreCapabilities,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Store advertising every optional operation.
    pub fn new() -> Self {
        Self::with_capabilities(StoreCapabilities::all())
    }

    /// Store advertising only the given optional operations.
    pub fn with_capabilities(capabilities: StoreCapabilities) -> Self {
        Self { entries: RwLock::new(BTreeMap::new()), capabilities }
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Copy of the current contents, for inspection.
    pub async fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.read().await.clone()
    }

    fn require(&self, supported: bool, op: &'static str) -> StoreResult<()> {
        if supported { Ok(()) } else { Err(Error::AdapterUnsupported(op)) }
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.entries.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    fn capabilities(&self) -> StoreCapabilities {
        self.capabilities
    }

    async fn multi_get(&self, keys: &[String]) -> StoreResult<Vec<(String, Option<String>)>> {
        self.require(self.capabilities.multi_get, "multi_get")?;
        let entries = self.entries.read().await;
        Ok(keys.iter().map(|k| (k.clone(), entries.get(k).cloned())).collect())
    }

    async fn multi_set(&self, pairs: &[(String, String)]) -> StoreResult<()> {
        self.require(self.capabilities.multi_set, "multi_set")?;
        let mut entries = self.entries.write().await;
        for (key, value) in pairs {
            entries.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn multi_remove(&self, keys: &[String]) -> StoreResult<()> {
        self.require(self.capabilities.multi_remove, "multi_remove")?;
        let mut entries = self.entries.write().await;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn all_keys(&self) -> StoreResult<Vec<String>> {
        self.require(self.capabilities.enumerate, "all_keys")?;
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}
