//! Eviction, expiry sweeps and background maintenance.
//!
//! An eviction runs in two halves. The memory half is immediate: matching
//! entries, access counters and queued writes are dropped, and the scope is
//! recorded as pending so durable reads under it count as misses. The
//! durable half runs behind the flush gate and is retried before every
//! later flush until it succeeds.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::tiered::{Scope, TieredCache};
use crate::Error;
use crate::store::StoreResult;

impl TieredCache {
    /// Remove every key starting with `prefix` from memory, the write queue
    /// and the durable store.
    pub async fn clear_by_prefix(&self, prefix: &str) {
        self.evict(Scope::Prefix(prefix.to_string())).await;
    }

    /// Remove one key from every tier.
    pub async fn remove(&self, key: &str) {
        self.evict(Scope::Key(key.to_string())).await;
    }

    /// Remove every key in the cache namespace. Keys outside it are left
    /// alone.
    pub async fn clear_all(&self) {
        let namespace = self.inner.settings.namespace.clone();
        self.evict(Scope::Prefix(namespace)).await;
    }

    /// Like [`clear_all`](Self::clear_all) but keeps keys under `keep`.
    pub async fn clear_all_except(&self, keep: &str) {
        let prefix = self.inner.settings.namespace.clone();
        self.evict(Scope::PrefixExcept { prefix, keep: keep.to_string() }).await;
    }

    pub(crate) async fn evict(&self, scope: Scope) {
        {
            let mut state = self.inner.state.lock().await;
            let entries_before = state.entries.len();
            let queued_before = state.queue.len();

            state.entries.retain(|key, _| !scope.matches(key));
            state.access_counts.retain(|key, _| !scope.matches(key));
            state.frequent.retain(|key| !scope.matches(key));
            state.queue.retain(|item| !scope.matches(&item.key));
            if state.queue.is_empty()
                && let Some(scheduled) = state.scheduled.take()
            {
                scheduled.handle.abort();
            }
            state.epoch += 1;
            if !state.pending_evictions.contains(&scope) {
                state.pending_evictions.push(scope.clone());
            }

            tracing::debug!(
                scope = %scope,
                entries = entries_before - state.entries.len(),
                queued = queued_before - state.queue.len(),
                "evicted from memory tier"
            );
        }

        let _gate = self.inner.flush_gate.lock().await;
        self.settle_pending_evictions().await;
    }

    /// Run the durable half of every pending eviction. Caller holds the
    /// flush gate.
    pub(crate) async fn settle_pending_evictions(&self) {
        let pending = self.inner.state.lock().await.pending_evictions.clone();
        if pending.is_empty() {
            return;
        }
        self.ensure_index_loaded().await;

        for scope in pending {
            match self.remove_durable(&scope).await {
                Ok(removed) => {
                    self.inner.state.lock().await.pending_evictions.retain(|s| s != &scope);
                    tracing::debug!(scope = %scope, removed, "durable eviction complete");
                }
                Err(e) => {
                    tracing::warn!(scope = %scope, error = %e, "durable eviction failed; will retry before next flush");
                }
            }
        }
        self.persist_index().await;
    }

    async fn remove_durable(&self, scope: &Scope) -> StoreResult<usize> {
        let capabilities = self.inner.capabilities;
        let candidates: Vec<String> = match scope {
            Scope::Key(key) => vec![key.clone()],
            _ if capabilities.enumerate => self
                .inner
                .store
                .all_keys()
                .await?
                .into_iter()
                .filter(|key| scope.matches(key))
                .collect(),
            _ => {
                let state = self.inner.state.lock().await;
                if !state.index.loaded {
                    return Err(Error::AdapterFailed("key index unavailable".into()));
                }
                let mut keys = state.index.matching(scope);
                keys.extend(self.suffix_guesses(scope));
                keys
            }
        };

        // Anything back in memory was written after the eviction.
        let keys: Vec<String> = {
            let state = self.inner.state.lock().await;
            candidates
                .into_iter()
                .filter(|key| !state.entries.contains_key(key))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        };
        if keys.is_empty() {
            return Ok(0);
        }

        if capabilities.multi_remove {
            self.inner.store.multi_remove(&keys).await?;
        } else {
            for key in &keys {
                self.inner.store.remove(key).await?;
            }
        }

        if !capabilities.enumerate {
            let mut state = self.inner.state.lock().await;
            for key in &keys {
                if state.index.keys.remove(key) {
                    state.index.dirty = true;
                }
            }
        }
        Ok(keys.len())
    }

    /// Known data-type keys directly under a prefix, with their metadata
    /// siblings.
    fn suffix_guesses(&self, scope: &Scope) -> Vec<String> {
        let prefix = match scope {
            Scope::Prefix(prefix) | Scope::PrefixExcept { prefix, .. } => prefix,
            Scope::Key(_) => return Vec::new(),
        };
        self.inner
            .settings
            .fallback_suffixes
            .iter()
            .flat_map(|suffix| [format!("{prefix}{suffix}"), format!("{prefix}{suffix}:meta")])
            .filter(|key| scope.matches(key))
            .collect()
    }

    /// Merge the persisted key index into memory, once.
    pub(crate) async fn ensure_index_loaded(&self) {
        if self.inner.capabilities.enumerate || self.inner.state.lock().await.index.loaded {
            return;
        }

        let raw = match self.inner.store.get(&self.inner.settings.index_key).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "key index unavailable");
                return;
            }
        };
        let persisted: Vec<String> = match raw.as_deref().map(serde_json::from_str) {
            None => Vec::new(),
            Some(Ok(keys)) => keys,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "discarding unreadable key index");
                Vec::new()
            }
        };

        let mut state = self.inner.state.lock().await;
        state.index.keys.extend(persisted);
        state.index.loaded = true;
    }

    async fn persist_index(&self) {
        if self.inner.capabilities.enumerate {
            return;
        }
        let encoded = {
            let mut state = self.inner.state.lock().await;
            if !state.index.dirty || !state.index.loaded {
                return;
            }
            let encoded = state.index.encode();
            if encoded.is_some() {
                state.index.dirty = false;
            }
            encoded
        };
        let Some(encoded) = encoded else { return };

        if let Err(e) = self.inner.store.set(&self.inner.settings.index_key, &encoded).await {
            tracing::warn!(error = %e, "failed to persist key index");
            self.inner.state.lock().await.index.dirty = true;
        }
    }

    /// Drop clean memory entries older than the expiration window. Dirty
    /// entries are kept regardless of age.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.now_ms();
        let expiration = i64::try_from(self.inner.settings.memory_expiration.as_millis()).unwrap_or(i64::MAX);
        let mut state = self.inner.state.lock().await;
        let before = state.entries.len();
        state
            .entries
            .retain(|_, entry| entry.dirty || now - entry.written_at < expiration);
        before - state.entries.len()
    }

    /// One maintenance pass: sweep expired entries and retry stalled
    /// durable work.
    pub async fn maintain(&self) {
        let swept = self.sweep_expired().await;
        let retry = {
            let state = self.inner.state.lock().await;
            state.scheduled.is_none() && (!state.queue.is_empty() || !state.pending_evictions.is_empty())
        };
        if retry {
            self.drain().await;
        }
        tracing::debug!(swept, retried = retry, "cache maintenance pass");
    }

    /// Run [`maintain`](Self::maintain) every `every` until the cache is
    /// dropped or the handle is aborted.
    pub fn spawn_maintenance(&self, every: Duration) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else { break };
                TieredCache { inner }.maintain().await;
            }
        })
    }
}
