//! Routing of stdin lines to the bridge or to host control operations.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use storysdk_bridge::{CallbackRegistry, Envelope, Outcome, PeerChannel, PeerMessage, StorageBridge};
use storysdk_core::{CacheService, PersistentStore, SdkConfig};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::error::HostError;
use crate::output::{InjectLines, OutputLines};

pub const HOST_INITIALIZE: &str = "host:initialize";
pub const HOST_FLUSH: &str = "host:flush";

#[derive(Debug, Deserialize)]
struct InitializeRequest {
    identity: String,
    token: String,
}

/// Owns the process-wide [`CacheService`] and answers one line at a time.
pub struct Host<W> {
    service: Arc<CacheService>,
    bridge: StorageBridge,
    out: Arc<OutputLines<W>>,
    initialize_tx: Mutex<Option<mpsc::UnboundedSender<InitializeRequest>>>,
    initialize_worker: Mutex<Option<JoinHandle<()>>>,
}

impl<W: AsyncWrite + Unpin + Send + 'static> Host<W> {
    pub fn new(config: &SdkConfig, store: Arc<dyn PersistentStore>, writer: W) -> Arc<Self> {
        let out = Arc::new(OutputLines::new(writer));
        let callbacks = Arc::new(CallbackRegistry::new());
        let channel = PeerChannel::new(InjectLines(out.clone()), callbacks.clone())
            .with_ack_timeout(config.peer_ack_timeout());

        let service = CacheService::builder(config).store(store).sink(Arc::new(channel)).build();
        let bridge = StorageBridge::new(service.cache().clone(), callbacks);

        let service = Arc::new(service);
        let (initialize_tx, initialize_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(initialize_in_order(service.clone(), out.clone(), initialize_rx));

        Arc::new(Self {
            service,
            bridge,
            out,
            initialize_tx: Mutex::new(Some(initialize_tx)),
            initialize_worker: Mutex::new(Some(worker)),
        })
    }

    #[cfg(test)]
    pub fn service(&self) -> &CacheService {
        &self.service
    }

    pub async fn handle_line(&self, line: &str) -> Result<(), HostError> {
        let envelope: Envelope = serde_json::from_str(line)?;
        match envelope.message_type.as_str() {
            HOST_INITIALIZE => {
                let request: InitializeRequest = serde_json::from_value(envelope.data)
                    .map_err(|e| HostError::InvalidControl(format!("{HOST_INITIALIZE}: {e}")))?;
                self.queue_initialize(request).await
            }
            HOST_FLUSH => {
                self.service.cache().flush().await;
                self.out.write_json(&json!({ "host": { "type": "host:flushed" } })).await?;
                Ok(())
            }
            _ => {
                let message = PeerMessage::try_from(envelope)?;
                match self.bridge.handle(message).await {
                    Outcome::Respond(response) => self.out.write_line(&format!(r#"{{"respond":{response}}}"#)).await?,
                    Outcome::Inject(instruction) => {
                        self.out.write_json(&json!({ "inject": instruction.render_script(None) })).await?
                    }
                    Outcome::Resolved | Outcome::Unhandled => {}
                }
                Ok(())
            }
        }
    }

    /// Token checks can wait on peer acknowledgements that only arrive
    /// through later stdin lines, so they run off the read loop on a single
    /// worker that takes requests in arrival order.
    async fn queue_initialize(&self, request: InitializeRequest) -> Result<(), HostError> {
        let guard = self.initialize_tx.lock().await;
        let tx = guard
            .as_ref()
            .ok_or_else(|| HostError::InvalidControl(format!("{HOST_INITIALIZE}: host is shutting down")))?;
        tx.send(request)
            .map_err(|_| HostError::InvalidControl(format!("{HOST_INITIALIZE}: initialize worker stopped")))
    }

    /// Answer lines from `reader` until it ends or fails, then shut down.
    ///
    /// Lines that are not UTF-8 or fail to handle are logged and skipped;
    /// queued writes are flushed whichever way the loop ends.
    pub async fn run<R: AsyncBufRead + Unpin>(&self, mut reader: R) {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "input read failed");
                    break;
                }
            }
            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line.trim(),
                Err(e) => {
                    tracing::warn!(error = %e, "skipped non-UTF-8 input line");
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }
            if let Err(e) = self.handle_line(line).await {
                tracing::warn!(error = %e, "dropped input line");
            }
        }
        self.shutdown().await;
    }

    /// Drain queued initializations, then flush the cache.
    pub async fn shutdown(&self) {
        drop(self.initialize_tx.lock().await.take());
        if let Some(worker) = self.initialize_worker.lock().await.take()
            && let Err(e) = worker.await
        {
            tracing::warn!(error = %e, "initialize worker failed");
        }
        self.service.shutdown().await;
    }
}

async fn initialize_in_order<W: AsyncWrite + Unpin + Send>(
    service: Arc<CacheService>,
    out: Arc<OutputLines<W>>,
    mut requests: mpsc::UnboundedReceiver<InitializeRequest>,
) {
    while let Some(request) = requests.recv().await {
        let cleared = service.coordinator().initialize(&request.identity, &request.token).await;
        let reply = json!({
            "host": { "type": "host:initialized", "identity": request.identity, "cleared": cleared }
        });
        if let Err(e) = out.write_json(&reply).await {
            tracing::warn!(error = %e, "failed to report initialization");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use storysdk_core::MemoryStore;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};

    use super::*;

    struct Harness {
        host: Arc<Host<DuplexStream>>,
        lines: tokio::io::Lines<BufReader<DuplexStream>>,
        store: Arc<MemoryStore>,
    }

    impl Harness {
        fn new(config: SdkConfig) -> Self {
            let (writer, reader) = tokio::io::duplex(1 << 16);
            let store = Arc::new(MemoryStore::new());
            let host = Host::new(&config, store.clone(), writer);
            Self { host, lines: BufReader::new(reader).lines(), store }
        }

        async fn next(&mut self) -> Value {
            let line = self.lines.next_line().await.unwrap().expect("host output closed");
            serde_json::from_str(&line).unwrap()
        }
    }

    #[tokio::test]
    async fn test_storage_round_trip_through_host() {
        let mut h = Harness::new(SdkConfig::default());

        h.host
            .handle_line(r#"{"type":"storysdk:storage:set","callbackId":"c1","data":{"key":"k","value":"v"}}"#)
            .await
            .unwrap();
        assert_eq!(h.next().await["respond"]["data"]["success"], json!(true));

        h.host.handle_line(r#"{"type":"host:flush"}"#).await.unwrap();
        assert_eq!(h.next().await["host"]["type"], json!("host:flushed"));
        assert_eq!(h.store.get("k").await.unwrap(), Some("v".to_string()));

        h.host
            .handle_line(r#"{"type":"storysdk:storage:get","callbackId":"c2","data":{"key":"k"}}"#)
            .await
            .unwrap();
        let reply = h.next().await;
        assert_eq!(reply["respond"]["callbackId"], json!("c2"));
        assert_eq!(reply["respond"]["data"]["value"], json!("v"));
    }

    #[tokio::test]
    async fn test_peer_invalidation_is_injected() {
        let mut h = Harness::new(SdkConfig::default());
        h.host
            .handle_line(r#"{"type":"storysdk:webview:reload","data":{}}"#)
            .await
            .unwrap();

        let script = h.next().await["inject"].as_str().unwrap().to_string();
        assert!(script.contains("window.location.reload()"));
    }

    #[tokio::test]
    async fn test_bad_lines_are_errors_not_panics() {
        let h = Harness::new(SdkConfig::default());
        assert!(matches!(h.host.handle_line("nope").await, Err(HostError::Bridge(_))));
        assert!(matches!(
            h.host.handle_line(r#"{"type":"host:initialize","data":{"identity":"groups"}}"#).await,
            Err(HostError::InvalidControl(_))
        ));
    }

    #[tokio::test]
    async fn test_confirmed_token_change_does_not_deadlock() {
        let config = SdkConfig { confirm_peer_invalidation: true, ..SdkConfig::default() };
        let mut h = Harness::new(config);

        h.host
            .handle_line(r#"{"type":"host:initialize","data":{"identity":"groups","token":"T1"}}"#)
            .await
            .unwrap();
        assert_eq!(h.next().await["host"]["cleared"], json!(false));

        h.host
            .handle_line(r#"{"type":"host:initialize","data":{"identity":"groups","token":"T2"}}"#)
            .await
            .unwrap();

        // Three injections (token clear, resource clear, reload), each
        // acknowledged the way the peer script would.
        for _ in 0..3 {
            let line = h.next().await;
            let script = line["inject"].as_str().unwrap();
            let start = script.find("callbackId: \"").unwrap() + "callbackId: \"".len();
            let id = &script[start..start + script[start..].find('"').unwrap()];
            let ack = json!({"type": "storysdk:cache:ack", "callbackId": id, "data": {"success": true}});
            h.host.handle_line(&ack.to_string()).await.unwrap();
        }

        let done = h.next().await;
        assert_eq!(done["host"]["type"], json!("host:initialized"));
        assert_eq!(done["host"]["cleared"], json!(true));

        let tokens = h.host.service().coordinator().current_tokens().await;
        assert_eq!(tokens.get("groups").map(String::as_str), Some("T2"));
        h.host.shutdown().await;
    }

    #[tokio::test]
    async fn test_back_to_back_initializes_apply_in_order() {
        let mut h = Harness::new(SdkConfig::default());
        for token in ["T1", "T2"] {
            let line = json!({"type": "host:initialize", "data": {"identity": "groups", "token": token}});
            h.host.handle_line(&line.to_string()).await.unwrap();
        }

        let mut replies = Vec::new();
        while replies.len() < 2 {
            let line = h.next().await;
            if line.get("host").is_some() {
                replies.push(line["host"]["cleared"].clone());
            }
        }
        assert_eq!(replies, vec![json!(false), json!(true)]);

        let tokens = h.host.service().coordinator().current_tokens().await;
        assert_eq!(tokens.get("groups").map(String::as_str), Some("T2"));
        h.host.shutdown().await;
    }

    #[tokio::test]
    async fn test_run_skips_invalid_utf8_and_still_flushes() {
        let h = Harness::new(SdkConfig::default());
        let mut input = Vec::new();
        input.extend_from_slice(br#"{"type":"storysdk:storage:set","callbackId":"c1","data":{"key":"a","value":"1"}}"#);
        input.extend_from_slice(b"\n\xff\xfe\n\n");
        input.extend_from_slice(br#"{"type":"storysdk:storage:set","callbackId":"c2","data":{"key":"b","value":"2"}}"#);
        input.extend_from_slice(b"\n");

        h.host.run(input.as_slice()).await;

        assert_eq!(h.store.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(h.store.get("b").await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_initialize_after_shutdown_is_rejected() {
        let h = Harness::new(SdkConfig::default());
        h.host.shutdown().await;
        assert!(matches!(
            h.host.handle_line(r#"{"type":"host:initialize","data":{"identity":"groups","token":"T1"}}"#).await,
            Err(HostError::InvalidControl(_))
        ));
    }
}
