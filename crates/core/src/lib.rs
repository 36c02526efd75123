//! Core types and token-scoped caching for storysdk.
//!
//! This crate provides:
//! - Tiered (memory + durable) cache with batched flushes and prefix eviction
//! - Durable store contract with in-memory and SQLite adapters
//! - Token change detection and peer invalidation commands
//! - Onboarding completion ledger
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod invalidation;
pub mod onboarding;
pub mod service;
pub mod store;
pub mod token;

pub use cache::{CacheMetadata, CacheStats, KeySpace, ScopedDataCache, TieredCache, TieredCacheSettings, token_hash};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, SdkConfig};
pub use error::Error;
pub use invalidation::{CommandKind, DetachedPeer, InvalidationCommand, InvalidationSink};
pub use onboarding::OnboardingLedger;
pub use service::{CacheService, CacheServiceBuilder};
pub use store::{MemoryStore, PersistentStore, SqliteStore, StoreCapabilities};
pub use token::{CacheDiagnostics, TokenCacheCoordinator};
