//! Durable key/value store contract and adapters.
//!
//! The cache treats the native durable store as an injected collaborator.
//! Only `get`, `set` and `remove` are mandatory; bulk operations and key
//! enumeration are advertised through [`StoreCapabilities`] and used only
//! when present.
//!
//! Adapters:
//! - [`MemoryStore`]: process-local map, also the memory-only fallback
//! - [`SqliteStore`]: SQLite file via tokio-rusqlite

pub mod connection;
pub mod memory;
pub mod migrations;
pub mod sqlite;

use async_trait::async_trait;

use crate::Error;

pub use connection::SqliteStore;
pub use memory::MemoryStore;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, Error>;

/// Optional operations a store implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCapabilities {
    pub multi_get: bool,
    pub multi_set: bool,
    pub multi_remove: bool,
    pub enumerate: bool,
}

impl StoreCapabilities {
    /// Every optional operation supported.
    pub const fn all() -> Self {
        Self { multi_get: true, multi_set: true, multi_remove: true, enumerate: true }
    }

    /// Only the mandatory single-key operations.
    pub const fn minimal() -> Self {
        Self { multi_get: false, multi_set: false, multi_remove: false, enumerate: false }
    }
}

/// Native durable key/value store.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    async fn remove(&self, key: &str) -> StoreResult<()>;

    /// Optional operations this store implements.
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::minimal()
    }

    /// Read several keys, preserving request order.
    async fn multi_get(&self, _keys: &[String]) -> StoreResult<Vec<(String, Option<String>)>> {
        Err(Error::AdapterUnsupported("multi_get"))
    }

    /// Write several pairs; later pairs win over earlier ones for the same key.
    async fn multi_set(&self, _pairs: &[(String, String)]) -> StoreResult<()> {
        Err(Error::AdapterUnsupported("multi_set"))
    }

    async fn multi_remove(&self, _keys: &[String]) -> StoreResult<()> {
        Err(Error::AdapterUnsupported("multi_remove"))
    }

    /// Every key currently held by the store.
    async fn all_keys(&self) -> StoreResult<Vec<String>> {
        Err(Error::AdapterUnsupported("all_keys"))
    }
}
