//! Onboarding completion ledger.
//!
//! One boolean per (token, onboarding id), stored as `"true"`/`"false"`
//! under the token's onboarding scope. Entries have no TTL.

use crate::cache::{KeySpace, TieredCache, token_hash};

#[derive(Clone)]
pub struct OnboardingLedger {
    cache: TieredCache,
    keys: KeySpace,
}

impl OnboardingLedger {
    pub fn new(cache: TieredCache, keys: KeySpace) -> Self {
        Self { cache, keys }
    }

    pub async fn mark_completed(&self, token: &str, onboarding_id: &str) {
        self.write(token, onboarding_id, "true").await;
    }

    /// Unknown or unreadable entries count as not completed.
    pub async fn is_completed(&self, token: &str, onboarding_id: &str) -> bool {
        self.cache
            .get(&self.keys.onboarding(token, onboarding_id))
            .await
            .is_some_and(|value| value == "true")
    }

    /// Mark as not completed. The entry is kept with a `"false"` value.
    pub async fn reset(&self, token: &str, onboarding_id: &str) {
        self.write(token, onboarding_id, "false").await;
    }

    pub async fn clear_for_token(&self, token: &str) {
        self.cache.clear_by_prefix(&self.keys.onboarding_scope(token)).await;
    }

    pub async fn clear_all(&self) {
        self.cache.clear_by_prefix(&self.keys.onboarding_root()).await;
    }

    /// Warm memory with the given onboarding entries.
    pub async fn preload(&self, token: &str, onboarding_ids: &[&str]) -> usize {
        let keys: Vec<String> = onboarding_ids
            .iter()
            .map(|id| self.keys.onboarding(token, id))
            .collect();
        self.cache.preload_keys(&keys).await
    }

    async fn write(&self, token: &str, onboarding_id: &str, value: &str) {
        if !self.cache.set(&self.keys.onboarding(token, onboarding_id), value).await {
            tracing::warn!(token_hash = %token_hash(token), onboarding_id, "failed to record onboarding state");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::TieredCacheSettings;
    use crate::cache::test_support::FlakyStore;
    use crate::clock::ManualClock;
    use crate::store::StoreCapabilities;

    fn ledger(store: Arc<FlakyStore>) -> OnboardingLedger {
        let cache = TieredCache::new(Some(store), Arc::new(ManualClock::new(0)), TieredCacheSettings::default());
        OnboardingLedger::new(cache, KeySpace::new("storysdk"))
    }

    #[tokio::test]
    async fn test_mark_and_reset() {
        let ledger = ledger(FlakyStore::new(StoreCapabilities::all()));
        assert!(!ledger.is_completed("T", "welcome").await);

        ledger.mark_completed("T", "welcome").await;
        assert!(ledger.is_completed("T", "welcome").await);
        assert!(!ledger.is_completed("other", "welcome").await);

        ledger.reset("T", "welcome").await;
        assert!(!ledger.is_completed("T", "welcome").await);
        assert_eq!(ledger.cache.get(&ledger.keys.onboarding("T", "welcome")).await.as_deref(), Some("false"));
    }

    #[tokio::test]
    async fn test_clear_for_token_is_scoped() {
        let ledger = ledger(FlakyStore::new(StoreCapabilities::all()));
        ledger.mark_completed("A", "welcome").await;
        ledger.mark_completed("B", "welcome").await;

        ledger.clear_for_token("A").await;

        assert!(!ledger.is_completed("A", "welcome").await);
        assert!(ledger.is_completed("B", "welcome").await);

        ledger.clear_all().await;
        assert!(!ledger.is_completed("B", "welcome").await);
    }

    #[tokio::test]
    async fn test_read_failure_defaults_to_not_completed() {
        let store = FlakyStore::new(StoreCapabilities::all());
        let ledger = ledger(store.clone());
        store.set_failing(true, true);
        assert!(!ledger.is_completed("T", "welcome").await);
    }

    #[tokio::test]
    async fn test_preload_reads_durable_entries() {
        let store = FlakyStore::new(StoreCapabilities::all());
        let writer = ledger(store.clone());
        writer.mark_completed("T", "a").await;
        writer.mark_completed("T", "b").await;
        writer.cache.flush().await;

        let reader = ledger(store.clone());
        assert_eq!(reader.preload("T", &["a", "b", "c"]).await, 2);
        store.set_failing(true, true);
        assert!(reader.is_completed("T", "b").await);
    }
}
