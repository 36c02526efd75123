//! Wire envelopes exchanged with the embedded peer.
//!
//! Every message is `{ type, callbackId?, data }`. [`Envelope`] is the raw
//! serde shape; [`PeerMessage`] is the closed set of messages the native
//! side understands, parsed from it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use storysdk_core::{CommandKind, InvalidationCommand};

use crate::error::BridgeError;

pub const STORAGE_GET: &str = "storysdk:storage:get";
pub const STORAGE_SET: &str = "storysdk:storage:set";
pub const STORAGE_RESPONSE: &str = "storysdk:storage:response";
pub const CACHE_ACK: &str = "storysdk:cache:ack";

/// Raw bridge envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(rename = "callbackId", default, skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// Messages arriving from the peer.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    StorageGet { callback_id: Option<String>, key: String },
    StorageSet { callback_id: Option<String>, key: String, value: Value },
    /// Invalidation intent, translated for injection rather than serviced.
    Invalidate { callback_id: Option<String>, command: InvalidationCommand },
    /// Confirmation of an injected instruction.
    Ack { callback_id: String, data: Value },
}

impl PeerMessage {
    pub fn parse(raw: &str) -> Result<Self, BridgeError> {
        let envelope: Envelope = serde_json::from_str(raw)?;
        Self::try_from(envelope)
    }
}

impl TryFrom<Envelope> for PeerMessage {
    type Error = BridgeError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        let Envelope { message_type, callback_id, data } = envelope;
        match message_type.as_str() {
            STORAGE_GET => Ok(PeerMessage::StorageGet { callback_id, key: required_key(&data)? }),
            STORAGE_SET => {
                let key = required_key(&data)?;
                let value = data.get("value").cloned().ok_or(BridgeError::MissingField("value"))?;
                Ok(PeerMessage::StorageSet { callback_id, key, value })
            }
            CACHE_ACK => {
                let callback_id = callback_id.ok_or(BridgeError::MissingField("callbackId"))?;
                Ok(PeerMessage::Ack { callback_id, data })
            }
            other => {
                let kind = CommandKind::from_wire_type(other).ok_or_else(|| BridgeError::UnknownType(other.to_string()))?;
                let scope_patterns = match kind {
                    CommandKind::Clear | CommandKind::ClearAll => string_list(&data, "patterns"),
                    CommandKind::ClearResources => string_list(&data, "clearTypes"),
                    CommandKind::Reload => Vec::new(),
                };
                Ok(PeerMessage::Invalidate { callback_id, command: InvalidationCommand::new(kind, scope_patterns) })
            }
        }
    }
}

fn required_key(data: &Value) -> Result<String, BridgeError> {
    data.get("key")
        .and_then(Value::as_str)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .ok_or(BridgeError::MissingField("key"))
}

fn string_list(data: &Value, field: &str) -> Vec<String> {
    data.get(field)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Payload of a storage response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    Value {
        key: String,
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Written {
        key: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// `storysdk:storage:response` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(rename = "callbackId", default, skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<String>,
    pub data: ResponseData,
}

impl ResponseEnvelope {
    pub fn value(callback_id: Option<String>, key: String, value: Value) -> Self {
        Self::storage(callback_id, ResponseData::Value { key, value, error: None })
    }

    pub fn written(callback_id: Option<String>, key: String, success: bool) -> Self {
        Self::storage(callback_id, ResponseData::Written { key, success, error: None })
    }

    fn storage(callback_id: Option<String>, data: ResponseData) -> Self {
        Self { message_type: STORAGE_RESPONSE.to_string(), callback_id, data }
    }
}
