//! Write queue flushing.
//!
//! Writes are coalesced behind a single cancelable timer. A flush persists a
//! snapshot of the queue in FIFO order, marks entries clean only when memory
//! still holds the flushed value, and requeues the snapshot at the front on
//! failure so ordering survives retries.

use super::tiered::{CacheState, ScheduledFlush, TieredCache, WriteQueueItem};
use crate::store::StoreResult;

impl TieredCache {
    /// Arm the batch timer unless one is already pending.
    pub(crate) fn schedule_flush(&self, state: &mut CacheState) {
        if state.scheduled.is_some() {
            return;
        }
        state.next_generation += 1;
        let generation = state.next_generation;
        let delay = self.inner.settings.batch_delay;
        let cache = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            cache.run_scheduled(generation).await;
        });
        state.scheduled = Some(ScheduledFlush { generation, handle });
    }

    async fn run_scheduled(&self, generation: u64) {
        {
            let mut state = self.inner.state.lock().await;
            if state.scheduled.as_ref().is_some_and(|s| s.generation == generation) {
                state.scheduled = None;
            }
        }
        self.drain().await;
    }

    /// Persist every queued write now, cancelling the pending timer.
    ///
    /// Failures are logged; failed writes stay queued and dirty.
    pub async fn flush(&self) {
        if let Some(scheduled) = self.inner.state.lock().await.scheduled.take() {
            scheduled.handle.abort();
        }
        self.drain().await;
    }

    /// Whether queued writes or unfinished evictions are waiting on the
    /// durable store.
    pub async fn has_pending_work(&self) -> bool {
        let state = self.inner.state.lock().await;
        !state.queue.is_empty() || !state.pending_evictions.is_empty() || state.index.dirty
    }

    pub(crate) async fn drain(&self) {
        let _gate = self.inner.flush_gate.lock().await;
        self.settle_pending_evictions().await;
        self.ensure_index_loaded().await;

        let (items, index_item) = {
            let mut state = self.inner.state.lock().await;
            let items: Vec<WriteQueueItem> = state.queue.drain(..).collect();
            let mut index_item = None;
            if !self.inner.capabilities.enumerate
                && state.index.dirty
                && state.index.loaded
                && let Some(value) = state.index.encode()
            {
                state.index.dirty = false;
                index_item = Some(WriteQueueItem { key: self.inner.settings.index_key.clone(), value });
            }
            (items, index_item)
        };
        if items.is_empty() && index_item.is_none() {
            return;
        }

        let pairs: Vec<(String, String)> = items
            .iter()
            .chain(index_item.iter())
            .map(|item| (item.key.clone(), item.value.clone()))
            .collect();
        let result = self.persist(&pairs).await;

        let mut state = self.inner.state.lock().await;
        match result {
            Ok(()) => {
                for item in &items {
                    if let Some(entry) = state.entries.get_mut(&item.key)
                        && entry.dirty
                        && entry.value == item.value
                    {
                        entry.dirty = false;
                    }
                }
                tracing::debug!(count = pairs.len(), "flushed write batch");
            }
            Err(e) => {
                if index_item.is_some() {
                    state.index.dirty = true;
                }
                let retry: Vec<WriteQueueItem> = items
                    .into_iter()
                    .filter(|item| {
                        state
                            .entries
                            .get(&item.key)
                            .is_some_and(|entry| entry.dirty && entry.value == item.value)
                    })
                    .collect();
                tracing::warn!(error = %e, requeued = retry.len(), "write batch failed; requeued for next flush");
                for item in retry.into_iter().rev() {
                    state.queue.push_front(item);
                }
            }
        }
    }

    async fn persist(&self, pairs: &[(String, String)]) -> StoreResult<()> {
        if self.inner.capabilities.multi_set {
            return self.inner.store.multi_set(pairs).await;
        }
        for (key, value) in pairs {
            self.inner.store.set(key, value).await?;
        }
        Ok(())
    }
}
