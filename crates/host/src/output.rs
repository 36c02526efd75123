//! Line-oriented JSON output shared by the handler and the peer transport.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use storysdk_bridge::{BridgeError, PeerTransport};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Serialises whole lines onto one writer so concurrent tasks never
/// interleave output.
pub struct OutputLines<W> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> OutputLines<W> {
    pub fn new(writer: W) -> Self {
        Self { writer: Mutex::new(writer) }
    }

    pub async fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }

    pub async fn write_json(&self, value: &serde_json::Value) -> std::io::Result<()> {
        self.write_line(&value.to_string()).await
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

/// Injects scripts by emitting `{"inject": "<script>"}` lines.
pub struct InjectLines<W>(pub Arc<OutputLines<W>>);

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> PeerTransport for InjectLines<W> {
    async fn inject(&self, script: String) -> Result<(), BridgeError> {
        self.0
            .write_json(&json!({ "inject": script }))
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }
}
