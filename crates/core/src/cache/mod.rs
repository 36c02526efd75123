//! Tiered (memory + durable) key/value cache.
//!
//! This module provides the memory-first cache that owns every interaction
//! with the durable store. It supports:
//!
//! - Memory reads with a freshness window and durable read-through
//! - Coalesced, FIFO batch flushes on a cancelable timer or on demand
//! - Prefix eviction across memory, the write queue and durable storage
//! - Periodic sweeps that never drop unflushed writes
//! - TTL-scoped data payloads with sibling metadata records

pub mod data;
pub mod evict;
pub mod flush;
pub mod keys;
pub mod tiered;

pub use data::{CacheMetadata, ScopedDataCache};
pub use keys::{KeySpace, token_hash};
pub use tiered::{CacheStats, TieredCache, TieredCacheSettings, WriteQueueItem};
