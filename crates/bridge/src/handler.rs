//! Servicing of peer messages against the native cache.

use std::sync::Arc;

use serde_json::Value;
use storysdk_core::TieredCache;

use crate::callbacks::CallbackRegistry;
use crate::envelope::{PeerMessage, ResponseEnvelope};
use crate::instruction::PeerInstruction;

/// What the host should do with a handled message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Post this serialized response envelope back to the peer.
    Respond(String),
    /// Inject this instruction into the peer.
    Inject(PeerInstruction),
    /// A pending callback was resolved; nothing to send.
    Resolved,
    /// Not a message this bridge handles, or malformed.
    Unhandled,
}

/// Storage bridge between the peer and the native [`TieredCache`].
#[derive(Clone)]
pub struct StorageBridge {
    cache: TieredCache,
    callbacks: Arc<CallbackRegistry>,
}

impl StorageBridge {
    pub fn new(cache: TieredCache, callbacks: Arc<CallbackRegistry>) -> Self {
        Self { cache, callbacks }
    }

    pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
        &self.callbacks
    }

    /// Parse and handle one raw message. Never fails; anything that cannot
    /// be parsed is [`Outcome::Unhandled`].
    pub async fn handle_message(&self, raw: &str) -> Outcome {
        match PeerMessage::parse(raw) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                tracing::debug!(error = %e, "unhandled bridge message");
                Outcome::Unhandled
            }
        }
    }

    pub async fn handle(&self, message: PeerMessage) -> Outcome {
        match message {
            PeerMessage::StorageGet { callback_id, key } => {
                let value = match self.cache.get(&key).await {
                    Some(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
                    None => Value::Null,
                };
                respond(&ResponseEnvelope::value(callback_id, key, value))
            }
            PeerMessage::StorageSet { callback_id, key, value } => {
                let success = match value {
                    Value::Null => {
                        self.cache.remove(&key).await;
                        true
                    }
                    Value::String(s) => self.cache.set(&key, &s).await,
                    other => self.cache.set(&key, &other.to_string()).await,
                };
                respond(&ResponseEnvelope::written(callback_id, key, success))
            }
            PeerMessage::Invalidate { command, .. } => match PeerInstruction::from_command(&command) {
                Ok(instruction) => Outcome::Inject(instruction),
                Err(e) => {
                    tracing::warn!(kind = command.kind.wire_type(), error = %e, "untranslatable invalidation");
                    Outcome::Unhandled
                }
            },
            PeerMessage::Ack { callback_id, data } => {
                if self.callbacks.resolve(&callback_id, data).await {
                    Outcome::Resolved
                } else {
                    tracing::debug!(callback_id = %callback_id, "acknowledgement for unknown callback");
                    Outcome::Unhandled
                }
            }
        }
    }
}

fn respond(envelope: &ResponseEnvelope) -> Outcome {
    match serde_json::to_string(envelope) {
        Ok(json) => Outcome::Respond(json),
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode storage response");
            Outcome::Unhandled
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use storysdk_core::{ManualClock, MemoryStore, TieredCacheSettings};

    use super::*;

    fn bridge() -> StorageBridge {
        let cache = TieredCache::new(
            Some(Arc::new(MemoryStore::new())),
            Arc::new(ManualClock::new(0)),
            TieredCacheSettings::default(),
        );
        StorageBridge::new(cache, Arc::new(CallbackRegistry::new()))
    }

    fn response(outcome: Outcome) -> Value {
        let Outcome::Respond(json) = outcome else { panic!("expected a response, got {outcome:?}") };
        serde_json::from_str(&json).unwrap()
    }

    #[tokio::test]
    async fn test_set_then_get_parses_json() {
        let bridge = bridge();
        let set = bridge
            .handle_message(r#"{"type":"storysdk:storage:set","callbackId":"c1","data":{"key":"k","value":{"a":1}}}"#)
            .await;
        assert_eq!(
            response(set),
            json!({"type": "storysdk:storage:response", "callbackId": "c1", "data": {"key": "k", "success": true}})
        );

        let get = bridge
            .handle_message(r#"{"type":"storysdk:storage:get","callbackId":"c2","data":{"key":"k"}}"#)
            .await;
        assert_eq!(response(get)["data"]["value"], json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_non_json_values_pass_through_as_strings() {
        let bridge = bridge();
        bridge
            .handle_message(r#"{"type":"storysdk:storage:set","data":{"key":"k","value":"plain text"}}"#)
            .await;

        let get = bridge.handle_message(r#"{"type":"storysdk:storage:get","data":{"key":"k"}}"#).await;
        assert_eq!(response(get)["data"]["value"], json!("plain text"));
    }

    #[tokio::test]
    async fn test_missing_key_reads_null() {
        let bridge = bridge();
        let get = bridge.handle_message(r#"{"type":"storysdk:storage:get","data":{"key":"nope"}}"#).await;
        assert_eq!(response(get)["data"]["value"], Value::Null);
    }

    #[tokio::test]
    async fn test_null_set_removes_key() {
        let bridge = bridge();
        bridge
            .handle_message(r#"{"type":"storysdk:storage:set","data":{"key":"k","value":"v"}}"#)
            .await;
        bridge
            .handle_message(r#"{"type":"storysdk:storage:set","data":{"key":"k","value":null}}"#)
            .await;

        assert!(bridge.cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidation_is_translated_not_serviced() {
        let bridge = bridge();
        bridge.cache.set("storysdk_app_T_x", "v").await;

        let outcome = bridge
            .handle_message(r#"{"type":"storysdk:cache:clear","data":{"patterns":["storysdk_app_T_*"]}}"#)
            .await;

        assert!(matches!(outcome, Outcome::Inject(PeerInstruction::RemoveMatching { .. })));
        assert!(bridge.cache.get("storysdk_app_T_x").await.is_some());
    }

    #[tokio::test]
    async fn test_malformed_messages_are_unhandled() {
        let bridge = bridge();
        assert_eq!(bridge.handle_message("{").await, Outcome::Unhandled);
        assert_eq!(
            bridge.handle_message(r#"{"type":"storysdk:storage:set","data":{"value":1}}"#).await,
            Outcome::Unhandled
        );
        assert_eq!(bridge.handle_message(r#"{"type":"webview:ready"}"#).await, Outcome::Unhandled);
    }

    #[tokio::test]
    async fn test_ack_resolves_registered_callback() {
        let bridge = bridge();
        let (id, rx) = bridge.callbacks().register().await;
        let ack = json!({"type": "storysdk:cache:ack", "callbackId": id, "data": {"success": true}}).to_string();

        assert_eq!(bridge.handle_message(&ack).await, Outcome::Resolved);
        assert_eq!(rx.await.unwrap()["success"], json!(true));
        assert_eq!(bridge.handle_message(&ack).await, Outcome::Unhandled);
    }
}
