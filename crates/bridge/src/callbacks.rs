//! Correlation of asynchronous replies by callback id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::{Mutex, oneshot};

/// Pending one-shot waiters keyed by callback id.
///
/// Ids are unique per registry, so concurrent requests on one channel never
/// resolve each other.
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    seq: AtomicU64,
    waiters: Mutex<HashMap<String, oneshot::Sender<Value>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh id of the form `callback_{epoch_ms}_{seq}`.
    pub fn next_id(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("callback_{}_{seq}", chrono::Utc::now().timestamp_millis())
    }

    /// Register a waiter under a fresh id.
    pub async fn register(&self) -> (String, oneshot::Receiver<Value>) {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(id.clone(), tx);
        (id, rx)
    }

    /// Hand `data` to the waiter registered under exactly `callback_id`.
    ///
    /// Returns `false` when no such waiter exists; the reply is then left
    /// for other handlers.
    pub async fn resolve(&self, callback_id: &str, data: Value) -> bool {
        let Some(tx) = self.waiters.lock().await.remove(callback_id) else {
            return false;
        };
        if tx.send(data).is_err() {
            tracing::debug!(callback_id, "callback waiter already gone");
        }
        true
    }

    pub async fn cancel(&self, callback_id: &str) {
        self.waiters.lock().await.remove(callback_id);
    }

    pub async fn pending_ids(&self) -> Vec<String> {
        self.waiters.lock().await.keys().cloned().collect()
    }
}
