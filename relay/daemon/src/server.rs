//! Daemon Server Implementation
//!
//! Core server loop for the relay daemon:
//! - Accepts TCP connections on the configured address
//! - Routes each request by its head: panel page, panel socket, health
//! - Answers the WebSocket upgrade itself, then hands the socket to tungstenite
//! - Opens one relay panel per WebSocket and pumps frames both ways
//! - Supports graceful shutdown
//!
//! ```text
//!                     DaemonServer
//!                          │
//!          ┌───────────────┼───────────────┐
//!          │               │               │
//!      GET /          GET /ws (101)     GET /health
//!     panel page      panel-a, panel-b     JSON
//!                          │
//!                     RelayHandler
//!                 (one session per panel)
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use relay_core::{
    render_panel, FrameAction, LlmBackend, PanelFrame, PanelFrameAdapter, PanelMessage,
    RelayHandler, RequestId, ServerSettings,
};

use crate::http::{self, Route, MAX_HEAD_BYTES};

/// Time allowed for a client to send its request head
const HEAD_TIMEOUT: Duration = Duration::from_secs(5);

/// Identifier for one accepted TCP connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state tracking
struct ConnectionState {
    /// When the connection was accepted
    connected_at: Instant,
    /// Remote address
    peer: SocketAddr,
    /// Handle to abort the connection task
    abort_handle: tokio::task::AbortHandle,
}

/// What every connection task needs
struct ConnectionContext<B: LlmBackend> {
    relay: RelayHandler<B>,
    server: Arc<ServerSettings>,
}

impl<B: LlmBackend> Clone for ConnectionContext<B> {
    fn clone(&self) -> Self {
        Self {
            relay: self.relay.clone(),
            server: Arc::clone(&self.server),
        }
    }
}

/// The daemon server
pub struct DaemonServer<B: LlmBackend> {
    /// Relay shared by every panel
    relay: RelayHandler<B>,
    /// Listener settings
    server: Arc<ServerSettings>,
    /// Active connections
    connection_states: Arc<DashMap<ConnectionId, ConnectionState>>,
}

impl<B: LlmBackend + 'static> DaemonServer<B> {
    /// Create a server around a relay
    pub fn new(relay: RelayHandler<B>, server: ServerSettings) -> Self {
        Self {
            relay,
            server: Arc::new(server),
            connection_states: Arc::new(DashMap::new()),
        }
    }

    /// Bind the configured address
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be bound.
    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(&self.server.bind_address)
            .await
            .with_context(|| format!("Failed to bind to {}", self.server.bind_address))
    }

    /// Accept connections until `shutdown` fires
    ///
    /// # Errors
    ///
    /// Fails only if the listener's local address cannot be read.
    pub async fn run(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let local = listener.local_addr().context("Listener has no local address")?;
        info!(address = %local, "Listening for panels");
        info!("Open http://{local}/ in a browser");

        let ctx = ConnectionContext {
            relay: self.relay.clone(),
            server: Arc::clone(&self.server),
        };

        loop {
            let (stream, peer) = tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping accept loop");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                        continue;
                    }
                },
            };

            if self.connection_states.len() >= self.server.max_connections {
                warn!(peer = %peer, "Connection limit reached, rejecting new connection");
                drop(stream);
                continue;
            }

            let conn_id = ConnectionId::new();
            debug!(
                conn_id = %conn_id,
                peer = %peer,
                active_connections = self.connection_states.len() + 1,
                "Connection accepted"
            );

            let states = Arc::clone(&self.connection_states);
            let ctx = ctx.clone();
            let task = tokio::spawn(
                async move {
                    if let Err(e) = handle_connection(stream, ctx).await {
                        debug!(error = %e, "Connection ended with error");
                    }
                    states.remove(&conn_id);
                }
                .instrument(tracing::info_span!("connection", %conn_id, %peer)),
            );

            self.connection_states.insert(
                conn_id,
                ConnectionState {
                    connected_at: Instant::now(),
                    peer,
                    abort_handle: task.abort_handle(),
                },
            );
            // The task may have finished before it was tracked
            if task.is_finished() {
                self.connection_states.remove(&conn_id);
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Graceful shutdown
    async fn shutdown(&self) {
        info!(
            connections = self.connection_count(),
            "Initiating graceful shutdown"
        );

        // Stream tasks send their streamEnd before the sockets go away
        self.relay.shutdown();
        tokio::task::yield_now().await;

        let conn_ids: Vec<ConnectionId> =
            self.connection_states.iter().map(|r| *r.key()).collect();
        for conn_id in conn_ids {
            if let Some((_, state)) = self.connection_states.remove(&conn_id) {
                debug!(
                    conn_id = %conn_id,
                    peer = %state.peer,
                    uptime_secs = state.connected_at.elapsed().as_secs(),
                    "Aborting connection"
                );
                state.abort_handle.abort();
            }
        }

        info!("Shutdown complete");
    }

    /// Number of active connections
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connection_states.len()
    }
}

/// Route one connection by its request head
async fn handle_connection<B: LlmBackend + 'static>(
    mut stream: TcpStream,
    ctx: ConnectionContext<B>,
) -> Result<()> {
    let Some(head) = tokio::time::timeout(HEAD_TIMEOUT, read_head(&mut stream))
        .await
        .context("Timed out waiting for request head")??
    else {
        let body = "request head too large or malformed";
        stream.write_all(&http::response(400, "text/plain", body)).await?;
        return Ok(());
    };

    let route = http::route(&head);
    debug!(method = %head.method, path = %head.path, ?route, "Request");

    let response = match route {
        Route::PanelSocket => {
            let key = head.websocket_key.unwrap_or_default();
            stream.write_all(&http::upgrade_response(&key)).await?;
            return serve_panel(stream, ctx).await;
        }
        Route::Panel => http::response(
            200,
            "text/html; charset=utf-8",
            &render_panel(&ctx.server.page_title),
        ),
        Route::Health => {
            let registry = ctx.relay.registry();
            let body = serde_json::json!({
                "status": "ok",
                "model": ctx.relay.config().model,
                "panels": registry.len(),
                "streaming": registry.streaming_count(),
                "sessions": registry.snapshots(),
            });
            http::response(200, "application/json", &body.to_string())
        }
        Route::MethodNotAllowed => http::response(405, "text/plain", "method not allowed"),
        Route::NotFound => http::response(404, "text/plain", "not found"),
    };

    stream.write_all(&response).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Read until the blank line ending the request head
///
/// Returns `Ok(None)` if the peer closes early or the head is too large.
/// Panels send nothing after the head until the upgrade is answered, and
/// plain requests carry no body, so nothing past the head is lost.
async fn read_head(stream: &mut TcpStream) -> Result<Option<http::RequestHead>> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(head) = http::parse_request_head(&buf) {
            return Ok(Some(head));
        }
        if buf.len() >= MAX_HEAD_BYTES {
            return Ok(None);
        }
    }
}

/// Run one panel over a WebSocket
async fn serve_panel<B: LlmBackend + 'static>(
    stream: TcpStream,
    ctx: ConnectionContext<B>,
) -> Result<()> {
    let ws = WebSocketStream::from_raw_socket(stream, Role::Server, None).await;
    let (mut sink, mut source) = ws.split();

    let (tx, mut rx) = mpsc::channel::<PanelMessage>(ctx.server.channel_capacity);
    let panel_id = ctx.relay.open_panel(tx);
    let adapter = PanelFrameAdapter::new(ctx.server.max_message_size);
    info!(panel_id = %panel_id, "Panel connected");

    let result: Result<()> = async {
        loop {
            tokio::select! {
                incoming = source.next() => {
                    let Some(incoming) = incoming else {
                        debug!("Panel socket closed");
                        return Ok(());
                    };
                    let Some(frame) = to_panel_frame(incoming?) else {
                        continue;
                    };
                    match adapter.decode(frame) {
                        Ok(FrameAction::Event(event)) => {
                            if let Err(e) = ctx.relay.handle_event(&panel_id, event).await {
                                warn!(panel_id = %panel_id, error = %e, "Event refused");
                            }
                        }
                        Ok(FrameAction::Pong(payload)) => sink.send(Message::Pong(payload)).await?,
                        Ok(FrameAction::Ignore) => {}
                        Ok(FrameAction::Close) => {
                            debug!("Panel sent close");
                            return Ok(());
                        }
                        Err(e) => {
                            warn!(panel_id = %panel_id, error = %e, "Rejected panel frame");
                            for message in PanelMessage::refusal(RequestId::new(), &e) {
                                if let Ok(PanelFrame::Text(text)) = adapter.encode(&message) {
                                    sink.send(Message::Text(text)).await?;
                                }
                            }
                        }
                    }
                }

                outgoing = rx.recv() => {
                    let Some(message) = outgoing else {
                        return Ok(());
                    };
                    match adapter.encode(&message) {
                        Ok(PanelFrame::Text(text)) => sink.send(Message::Text(text)).await?,
                        Ok(other) => warn!(frame = ?other, "Unexpected outbound frame"),
                        Err(e) => warn!(
                            request_id = %message.request_id(),
                            error = %e,
                            "Failed to encode message"
                        ),
                    }
                }
            }
        }
    }
    .await;

    ctx.relay.close_panel(&panel_id);
    let _ = sink.close().await;
    info!(panel_id = %panel_id, "Panel disconnected");
    result
}

fn to_panel_frame(message: Message) -> Option<PanelFrame> {
    match message {
        Message::Text(text) => Some(PanelFrame::Text(text)),
        Message::Binary(data) => Some(PanelFrame::Binary(data)),
        Message::Ping(payload) => Some(PanelFrame::Ping(payload)),
        Message::Pong(payload) => Some(PanelFrame::Pong(payload)),
        Message::Close(_) => Some(PanelFrame::Close),
        Message::Frame(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use relay_core::{
        LlmRequest, ModelInfo, OverlapPolicy, RelayConfig, StreamOutcome, StreamingToken,
    };
    use tokio_tungstenite::MaybeTlsStream;

    const WAIT: Duration = Duration::from_secs(5);

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    /// Answers "Hello there"; prompts starting with "hold" stream until dropped
    struct FakeBackend;

    #[async_trait]
    impl LlmBackend for FakeBackend {
        fn name(&self) -> &str {
            "fake"
        }

        async fn health_check(&self) -> bool {
            true
        }

        async fn send_streaming(
            &self,
            request: &LlmRequest,
        ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
            let hold = request
                .messages
                .iter()
                .any(|m| m.content.starts_with("hold"));
            let (tx, rx) = mpsc::channel(8);
            tokio::spawn(async move {
                if hold {
                    let _ = tx.send(StreamingToken::Token("working".into())).await;
                    tx.closed().await;
                    return;
                }
                for text in ["Hello", " there"] {
                    if tx.send(StreamingToken::Token(text.into())).await.is_err() {
                        return;
                    }
                }
                let _ = tx.send(StreamingToken::Complete).await;
            });
            Ok(rx)
        }

        async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
            Ok(Vec::new())
        }
    }

    async fn start(overlap_policy: OverlapPolicy) -> (SocketAddr, CancellationToken) {
        let relay = RelayHandler::new(
            FakeBackend,
            RelayConfig {
                overlap_policy,
                ..RelayConfig::default()
            },
        );
        let server = DaemonServer::new(
            relay,
            ServerSettings {
                bind_address: "127.0.0.1:0".to_string(),
                ..ServerSettings::default()
            },
        );
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move { server.run(listener, token).await });
        (addr, shutdown)
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes())
            .await
            .unwrap();
        let mut response = String::new();
        tokio::time::timeout(WAIT, stream.read_to_string(&mut response))
            .await
            .expect("timed out reading response")
            .unwrap();
        response
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        ws
    }

    async fn send(ws: &mut Client, event: serde_json::Value) {
        ws.send(Message::Text(event.to_string())).await.unwrap();
    }

    async fn recv(ws: &mut Client) -> PanelMessage {
        loop {
            let frame = tokio::time::timeout(WAIT, ws.next())
                .await
                .expect("timed out waiting for panel message")
                .expect("socket closed")
                .unwrap();
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    /// Read until a `streamEnd` arrives
    async fn until_end(ws: &mut Client) -> Vec<PanelMessage> {
        let mut seen = Vec::new();
        loop {
            let message = recv(ws).await;
            let done = matches!(message, PanelMessage::StreamEnd { .. });
            seen.push(message);
            if done {
                return seen;
            }
        }
    }

    fn texts(messages: &[PanelMessage]) -> Vec<&str> {
        messages
            .iter()
            .filter_map(|m| match m {
                PanelMessage::ChatResponse { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn assert_refused(messages: &[PanelMessage]) {
        assert_eq!(messages.len(), 2, "{messages:?}");
        assert!(matches!(
            &messages[0],
            PanelMessage::ChatError { message, .. } if message.starts_with("Error: ")
        ));
        assert!(matches!(
            messages[1],
            PanelMessage::StreamEnd {
                outcome: StreamOutcome::Failed,
                ..
            }
        ));
        assert_eq!(messages[0].request_id(), messages[1].request_id());
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new();
        assert!(id.to_string().starts_with("conn-"));
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn test_frame_mapping() {
        assert_eq!(
            to_panel_frame(Message::Text("hi".to_string())),
            Some(PanelFrame::Text("hi".to_string()))
        );
        assert_eq!(
            to_panel_frame(Message::Binary(vec![1])),
            Some(PanelFrame::Binary(vec![1]))
        );
        assert_eq!(to_panel_frame(Message::Close(None)), Some(PanelFrame::Close));
    }

    #[tokio::test]
    async fn test_serves_panel_page_and_health() {
        let (addr, shutdown) = start(OverlapPolicy::CancelPrevious).await;

        let page = get(addr, "/").await;
        assert!(page.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(page.contains("<textarea id=\"prompt\""));

        let health = get(addr, "/health").await;
        let (_, body) = health.split_once("\r\n\r\n").unwrap();
        let body: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["panels"], 0);
        assert_eq!(body["streaming"], 0);
        assert_eq!(body["sessions"], serde_json::json!([]));

        assert!(get(addr, "/nope").await.starts_with("HTTP/1.1 404"));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_chat_over_websocket() {
        let (addr, shutdown) = start(OverlapPolicy::CancelPrevious).await;
        let mut ws = connect(addr).await;

        send(&mut ws, serde_json::json!({ "command": "chat", "promptByUser": "hi" })).await;
        let messages = until_end(&mut ws).await;

        assert_eq!(texts(&messages), vec!["Hello", "Hello there"]);
        assert!(matches!(
            messages.last(),
            Some(PanelMessage::StreamEnd {
                outcome: StreamOutcome::Completed,
                ..
            })
        ));

        let health = get(addr, "/health").await;
        let (_, body) = health.split_once("\r\n\r\n").unwrap();
        let body: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(body["panels"], 1);
        assert_eq!(body["sessions"][0]["metadata"]["requests_started"], 1);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_stop_then_chat_under_reject() {
        let (addr, shutdown) = start(OverlapPolicy::Reject).await;
        let mut ws = connect(addr).await;

        send(&mut ws, serde_json::json!({ "command": "chat", "promptByUser": "hold on" })).await;
        let first = match recv(&mut ws).await {
            PanelMessage::ChatResponse { text, request_id } => {
                assert_eq!(text, "working");
                request_id
            }
            other => panic!("expected chatResponse, got {other:?}"),
        };

        send(&mut ws, serde_json::json!({ "command": "stop" })).await;
        send(&mut ws, serde_json::json!({ "command": "chat", "promptByUser": "hi" })).await;

        let mut first_outcome = None;
        let mut second = Vec::new();
        let ended = |messages: &[PanelMessage]| {
            matches!(messages.last(), Some(PanelMessage::StreamEnd { .. }))
        };
        while first_outcome.is_none() || !ended(&second) {
            let message = recv(&mut ws).await;
            if message.request_id() == &first {
                if let PanelMessage::StreamEnd { outcome, .. } = message {
                    first_outcome = Some(outcome);
                }
            } else {
                second.push(message);
            }
        }

        assert_eq!(first_outcome, Some(StreamOutcome::Cancelled));
        assert_eq!(texts(&second), vec!["Hello", "Hello there"]);
        assert!(second
            .iter()
            .all(|m| !matches!(m, PanelMessage::ChatError { .. })));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_bad_frames_are_answered() {
        let (addr, shutdown) = start(OverlapPolicy::CancelPrevious).await;
        let mut ws = connect(addr).await;

        ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
        assert_refused(&until_end(&mut ws).await);

        let oversized = "x".repeat(ServerSettings::default().max_message_size + 1);
        ws.send(Message::Text(oversized)).await.unwrap();
        assert_refused(&until_end(&mut ws).await);

        send(&mut ws, serde_json::json!({ "command": "explode" })).await;
        assert_refused(&until_end(&mut ws).await);

        // The panel keeps working afterwards
        send(&mut ws, serde_json::json!({ "command": "chat", "promptByUser": "hi" })).await;
        assert_eq!(texts(&until_end(&mut ws).await), vec!["Hello", "Hello there"]);
        shutdown.cancel();
    }
}
