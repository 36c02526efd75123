//! Per-identity token change detection.
//!
//! Each identity (an independently mounted consumer such as "groups" or
//! "modal") remembers the last token it was initialised with. When the token
//! changes, everything cached for the previous token under that identity is
//! evicted natively and the embedded peer is told to forget it too. Any
//! failure along the way over-invalidates rather than risk serving data
//! across a token boundary.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::{Mutex, OnceCell, RwLock};

use crate::Error;
use crate::cache::{KeySpace, ScopedDataCache, TieredCache, token_hash};
use crate::config::SdkConfig;
use crate::invalidation::{InvalidationCommand, InvalidationSink};

/// Data types checked by [`TokenCacheCoordinator::diagnose`].
const DIAGNOSED_DATA_TYPES: &[&str] = &["groupsList", "story", "modal", "onboarding"];

/// Scope prefixes that apply to one identity and token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopePrefixes {
    pub component: String,
    pub token: String,
    pub groups: String,
    pub modal: String,
    pub onboarding: String,
}

/// Snapshot of what the cache holds for one identity and token.
#[derive(Debug, Clone, Serialize)]
pub struct CacheDiagnostics {
    pub token_hash: String,
    pub current_tokens: BTreeMap<String, String>,
    pub has_data: BTreeMap<String, bool>,
    pub scopes: ScopePrefixes,
}

/// Orchestrates token-scoped invalidation across the native cache and the
/// embedded peer.
pub struct TokenCacheCoordinator {
    cache: TieredCache,
    data: ScopedDataCache,
    keys: KeySpace,
    sink: Arc<dyn InvalidationSink>,
    cache_version: String,
    preserve_tokens: bool,
    version_checked: OnceCell<()>,
    /// Set when the version check wiped a previously versioned cache; taken
    /// by the next `initialize` so it reports the clear.
    version_cleared: AtomicBool,
    init_gate: Mutex<()>,
    tokens: RwLock<BTreeMap<String, String>>,
}

impl TokenCacheCoordinator {
    pub fn new(cache: TieredCache, data: ScopedDataCache, sink: Arc<dyn InvalidationSink>, config: &SdkConfig) -> Self {
        Self {
            cache,
            data,
            keys: KeySpace::new(&config.key_prefix),
            sink,
            cache_version: config.cache_version.clone(),
            preserve_tokens: config.preserve_tokens_on_version_change,
            version_checked: OnceCell::new(),
            version_cleared: AtomicBool::new(false),
            init_gate: Mutex::new(()),
            tokens: RwLock::new(BTreeMap::new()),
        }
    }

    /// Record `token` for `identity`, evicting the previous token's data if
    /// it differs.
    ///
    /// Returns whether anything was cleared. Never fails: errors while
    /// detecting the change clear both the previous and the new token's
    /// scopes and report `true`.
    pub async fn initialize(&self, identity: &str, token: &str) -> bool {
        let _gate = self.init_gate.lock().await;
        self.ensure_cache_version().await;
        let version_cleared = self.version_cleared.swap(false, Ordering::SeqCst);

        let cleared = match self.detect_and_evict(identity, token).await {
            Ok(cleared) => cleared,
            Err(e) => {
                tracing::warn!(identity, error = %e, "token initialization failed; clearing previous and new token scopes");
                self.fail_safe(identity, token).await;
                true
            }
        };

        self.record_token(identity, token).await;
        cleared || version_cleared
    }

    async fn detect_and_evict(&self, identity: &str, token: &str) -> Result<bool, Error> {
        let previous = self
            .cache
            .read_through(&self.keys.token_record(identity))
            .await
            .map_err(|e| Error::TokenInitialization(e.to_string()))?
            .filter(|previous| !previous.is_empty());

        let Some(previous) = previous else {
            tracing::debug!(identity, "first initialization for identity");
            return Ok(false);
        };
        if previous == token {
            return Ok(false);
        }

        tracing::info!(
            identity,
            previous = %token_hash(&previous),
            current = %token_hash(token),
            "token changed; evicting previous token scope"
        );
        self.evict_token_scope(identity, &previous).await;
        self.cache.flush().await;

        self.sink.dispatch(InvalidationCommand::for_token(&previous)).await?;
        self.sink.dispatch(InvalidationCommand::resources()).await?;
        self.sink.dispatch(InvalidationCommand::reload()).await?;
        Ok(true)
    }

    async fn fail_safe(&self, identity: &str, token: &str) {
        let known = self.tokens.read().await.get(identity).cloned();
        let previous = match known {
            Some(previous) => Some(previous),
            None => self.cache.get(&self.keys.token_record(identity)).await,
        };
        if let Some(previous) = previous.filter(|p| !p.is_empty() && p != token) {
            self.evict_token_scope(identity, &previous).await;
        }
        self.evict_token_scope(identity, token).await;
        self.cache.flush().await;
        self.notify_peer([InvalidationCommand::all(), InvalidationCommand::reload()]).await;
    }

    /// Evict the identity scope, the token-only scope and the onboarding
    /// ledger of `token`. Other identities are untouched.
    async fn evict_token_scope(&self, identity: &str, token: &str) {
        self.cache.clear_by_prefix(&self.keys.identity_scope(identity, token)).await;
        self.cache.clear_by_prefix(&self.keys.token_scope(token)).await;
        self.cache.clear_by_prefix(&self.keys.onboarding_scope(token)).await;
    }

    async fn record_token(&self, identity: &str, token: &str) {
        self.tokens.write().await.insert(identity.to_string(), token.to_string());
        self.cache.set(&self.keys.token_record(identity), token).await;
    }

    async fn ensure_cache_version(&self) {
        self.version_checked.get_or_init(|| self.check_cache_version()).await;
    }

    /// A missing version marks a fresh install: the namespace is cleared
    /// quietly. A different or unreadable version means the peer may still
    /// hold data from before, including data for tokens whose records this
    /// clear erases, so the peer is reset as well.
    async fn check_cache_version(&self) {
        let key = self.keys.cache_version();
        let notify = match self.cache.read_through(&key).await {
            Ok(Some(stored)) if stored == self.cache_version => return,
            Ok(None) => {
                tracing::debug!(expected = %self.cache_version, "no cache version stored; initialising namespace");
                false
            }
            Ok(Some(stored)) => {
                tracing::info!(stored = %stored, expected = %self.cache_version, "cache version mismatch; clearing cache");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "cache version unreadable; clearing cache");
                true
            }
        };

        if self.preserve_tokens {
            self.cache.clear_all_except(&self.keys.token_records()).await;
        } else {
            self.cache.clear_all().await;
        }
        self.cache.set(&key, &self.cache_version).await;

        if notify {
            self.cache.flush().await;
            self.notify_peer([InvalidationCommand::all(), InvalidationCommand::resources()]).await;
            self.version_cleared.store(true, Ordering::SeqCst);
        }
    }

    async fn notify_peer(&self, commands: impl IntoIterator<Item = InvalidationCommand>) {
        for command in commands {
            let kind = command.kind.wire_type();
            if let Err(e) = self.sink.dispatch(command).await {
                tracing::warn!(kind, error = %e, "peer invalidation failed");
            }
        }
    }

    /// Tokens initialised in this process, by identity.
    pub async fn current_tokens(&self) -> BTreeMap<String, String> {
        self.tokens.read().await.clone()
    }

    /// Whether two identities share a token.
    pub async fn has_token_conflicts(&self) -> bool {
        let tokens = self.tokens.read().await;
        let mut distinct: Vec<&String> = tokens.values().collect();
        distinct.sort();
        distinct.dedup();
        distinct.len() < tokens.len()
    }

    /// Evict one identity's data for `token` and tell the peer to drop it.
    pub async fn clear_component_token_cache(&self, identity: &str, token: &str) {
        tracing::debug!(identity, token_hash = %token_hash(token), "clearing component token cache");
        self.evict_token_scope(identity, token).await;
        self.cache.flush().await;
        self.notify_peer([
            InvalidationCommand::for_token(token),
            InvalidationCommand::resources(),
            InvalidationCommand::reload(),
        ])
        .await;
    }

    /// Switch `identity` to `token`, unconditionally clearing both the
    /// previous and the new token scopes and resetting the peer.
    pub async fn force_token_change(&self, identity: &str, token: &str) {
        let _gate = self.init_gate.lock().await;
        self.ensure_cache_version().await;
        self.version_cleared.store(false, Ordering::SeqCst);

        let previous = self.cache.get(&self.keys.token_record(identity)).await;
        if let Some(previous) = previous.filter(|p| !p.is_empty() && p != token) {
            self.evict_token_scope(identity, &previous).await;
        }
        self.evict_token_scope(identity, token).await;
        self.cache.flush().await;
        self.notify_peer([
            InvalidationCommand::all(),
            InvalidationCommand::resources(),
            InvalidationCommand::reload(),
        ])
        .await;

        self.record_token(identity, token).await;
        tracing::info!(identity, token_hash = %token_hash(token), "forced token change");
    }

    /// Clear every cached key in the namespace, forget in-process tokens and
    /// reset the peer's storage.
    pub async fn clear_all(&self) {
        let _gate = self.init_gate.lock().await;
        self.cache.clear_all().await;
        self.tokens.write().await.clear();
        self.cache.set(&self.keys.cache_version(), &self.cache_version).await;
        self.cache.flush().await;
        self.notify_peer([InvalidationCommand::all(), InvalidationCommand::resources()]).await;
    }

    pub async fn diagnose(&self, identity: &str, token: &str) -> CacheDiagnostics {
        let mut has_data = BTreeMap::new();
        for data_type in DIAGNOSED_DATA_TYPES {
            has_data.insert(data_type.to_string(), self.data.has_data(identity, token, data_type).await);
        }

        CacheDiagnostics {
            token_hash: token_hash(token),
            current_tokens: self.current_tokens().await,
            has_data,
            scopes: ScopePrefixes {
                component: self.keys.identity_scope(identity, token),
                token: self.keys.token_scope(token),
                groups: self.keys.identity_scope("groups", token),
                modal: self.keys.identity_scope("modal", token),
                onboarding: self.keys.onboarding_scope(token),
            },
        }
    }
}
