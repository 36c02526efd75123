//! Invalidation commands for the embedded peer.
//!
//! The peer keeps its own local storage that native code cannot reach. The
//! coordinator describes what the peer must forget as an
//! [`InvalidationCommand`] and hands it to an [`InvalidationSink`], which
//! owns delivery.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::cache::token_hash;

/// Resource caches the peer can be told to drop.
pub const RESOURCE_KINDS: &[&str] = &["scripts", "styles", "images", "fonts", "media", "documents", "all"];

/// What the peer is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Remove local keys matching the patterns.
    Clear,
    /// Remove every SDK-owned local key.
    ClearAll,
    /// Drop cached resources of the listed kinds.
    ClearResources,
    /// Erase local state and hard-reload.
    Reload,
}

impl CommandKind {
    /// Message type used on the bridge.
    pub fn wire_type(self) -> &'static str {
        match self {
            CommandKind::Clear => "storysdk:cache:clear",
            CommandKind::ClearAll => "storysdk:cache:clear:all",
            CommandKind::ClearResources => "storysdk:cache:clear:resources",
            CommandKind::Reload => "storysdk:webview:reload",
        }
    }

    pub fn from_wire_type(message_type: &str) -> Option<Self> {
        match message_type {
            "storysdk:cache:clear" => Some(CommandKind::Clear),
            "storysdk:cache:clear:all" => Some(CommandKind::ClearAll),
            "storysdk:cache:clear:resources" => Some(CommandKind::ClearResources),
            "storysdk:webview:reload" => Some(CommandKind::Reload),
            _ => None,
        }
    }
}

/// Transient instruction for the peer. Never persisted.
///
/// `scope_patterns` are `*` globs for `Clear` and `ClearAll`, and resource
/// kinds for `ClearResources`. `Reload` carries none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationCommand {
    pub kind: CommandKind,
    pub scope_patterns: Vec<String>,
}

impl InvalidationCommand {
    pub fn new(kind: CommandKind, scope_patterns: Vec<String>) -> Self {
        Self { kind, scope_patterns }
    }

    /// Everything the peer cached under `token`.
    pub fn for_token(token: &str) -> Self {
        let hash = token_hash(token);
        let patterns = vec![
            format!("storysdk_api_cache_{token}_*"),
            format!("storysdk_adapted_{token}_*"),
            format!("storysdk_adapted_data_{token}_*"),
            format!("storysdk_groups_{token}_*"),
            format!("storysdk_stories_{token}_*"),
            format!("storysdk_app_{token}_*"),
            format!("storysdk:script:*:{hash}"),
            format!("storysdk:css:*:{hash}"),
        ];
        Self::new(CommandKind::Clear, patterns)
    }

    /// Every SDK-owned key in the peer, for all tokens.
    pub fn all() -> Self {
        let patterns = [
            "storysdk_api_cache_*",
            "storysdk_adapted_*",
            "storysdk_adapted_data_*",
            "storysdk_groups_*",
            "storysdk_stories_*",
            "storysdk_app_*",
            "storysdk_user_id",
            "uniq_user_id",
            "storysdk:script:*",
            "storysdk:css:*",
        ];
        Self::new(CommandKind::ClearAll, patterns.into_iter().map(String::from).collect())
    }

    pub fn resources() -> Self {
        Self::new(CommandKind::ClearResources, RESOURCE_KINDS.iter().map(|k| k.to_string()).collect())
    }

    pub fn reload() -> Self {
        Self::new(CommandKind::Reload, Vec::new())
    }
}

/// Delivery of invalidation commands to the embedded peer.
#[async_trait]
pub trait InvalidationSink: Send + Sync {
    /// Deliver `command`. An error means the peer may still hold the data.
    async fn dispatch(&self, command: InvalidationCommand) -> Result<(), Error>;
}

/// Sink used when no peer is attached. Drops every command.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedPeer;

#[async_trait]
impl InvalidationSink for DetachedPeer {
    async fn dispatch(&self, command: InvalidationCommand) -> Result<(), Error> {
        tracing::debug!(kind = command.kind.wire_type(), "no embedded peer attached; command dropped");
        Ok(())
    }
}
