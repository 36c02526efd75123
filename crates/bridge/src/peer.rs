//! Delivery of invalidation instructions to the embedded peer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use storysdk_core::{InvalidationCommand, InvalidationSink};

use crate::callbacks::CallbackRegistry;
use crate::error::BridgeError;
use crate::instruction::PeerInstruction;

/// Script injection into the peer's context.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn inject(&self, script: String) -> Result<(), BridgeError>;
}

/// [`InvalidationSink`] that injects translated commands into the peer.
///
/// Without an acknowledgement timeout delivery is fire-and-forget: success
/// means the script was handed to the transport. With one, each script
/// carries a fresh callback id and delivery waits for the matching
/// `storysdk:cache:ack`.
pub struct PeerChannel<T> {
    transport: T,
    callbacks: Arc<CallbackRegistry>,
    ack_timeout: Option<Duration>,
}

impl<T: PeerTransport> PeerChannel<T> {
    pub fn new(transport: T, callbacks: Arc<CallbackRegistry>) -> Self {
        Self { transport, callbacks, ack_timeout: None }
    }

    pub fn with_ack_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn deliver(&self, instruction: &PeerInstruction) -> Result<(), BridgeError> {
        let Some(timeout) = self.ack_timeout else {
            return self.transport.inject(instruction.render_script(None)).await;
        };

        let (callback_id, reply) = self.callbacks.register().await;
        if let Err(e) = self.transport.inject(instruction.render_script(Some(&callback_id))).await {
            self.callbacks.cancel(&callback_id).await;
            return Err(e);
        }

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(data)) if data.get("success").and_then(Value::as_bool) == Some(true) => Ok(()),
            Ok(Ok(data)) => {
                let reason = data
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("peer reported failure");
                Err(BridgeError::Unconfirmed(reason.to_string()))
            }
            Ok(Err(_)) => Err(BridgeError::Unconfirmed("acknowledgement channel closed".into())),
            Err(_) => {
                self.callbacks.cancel(&callback_id).await;
                Err(BridgeError::Unconfirmed(format!("no acknowledgement within {}ms", timeout.as_millis())))
            }
        }
    }
}

#[async_trait]
impl<T: PeerTransport> InvalidationSink for PeerChannel<T> {
    async fn dispatch(&self, command: InvalidationCommand) -> Result<(), storysdk_core::Error> {
        let instruction = PeerInstruction::from_command(&command)?;
        tracing::debug!(kind = command.kind.wire_type(), "delivering invalidation to peer");
        self.deliver(&instruction).await.map_err(|e| {
            tracing::warn!(kind = command.kind.wire_type(), error = %e, "peer invalidation failed");
            e.into()
        })
    }
}
