//! WebSocket transport server using Axum.
//!
//! Handles HTTP upgrade to WebSocket, the welcome handshake, and the
//! per-socket pump between the client and the session layer.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use collab_protocol::{ClientRequest, CoreError, Envelope, ServerReply};
use collab_services::AppContext;
use collab_session::{ClientChannel, ParticipantConnection};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Transport server configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// Maximum concurrent connections
    pub max_connections: Option<usize>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            hostname: "127.0.0.1".into(),
            max_connections: Some(256),
        }
    }
}

/// Shared state for the transport server.
struct ServerState {
    app: Arc<AppContext>,
    config: TransportConfig,
    /// Connected client count (for the cap and the health check)
    client_count: AtomicUsize,
}

/// The transport server — accepts WebSocket connections and pumps frames.
pub struct TransportServer {
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
    port: u16,
}

impl TransportServer {
    /// Bind and start serving.
    pub async fn start(
        config: TransportConfig,
        app: Arc<AppContext>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let state = Arc::new(ServerState {
            app,
            config: config.clone(),
            client_count: AtomicUsize::new(0),
        });

        let router = Router::new()
            .route("/ws", get(ws_upgrade_handler))
            .route("/health", get(health_handler))
            .with_state(state);

        let addr: SocketAddr = format!("{}:{}", config.hostname, config.port).parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        info!("listening on ws://{}:{}/ws", config.hostname, actual_port);

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
                .ok();
        });

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            port: actual_port,
        })
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Gracefully stop the server.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("transport server stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    if let Some(max) = state.config.max_connections {
        let current = state.client_count.load(Ordering::Relaxed);
        if current >= max {
            warn!("connection rejected: max connections reached ({max})");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    }

    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
        .into_response()
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "clients": state.client_count.load(Ordering::Relaxed),
        "sessions": state.app.registry.len(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket Connection Handler
// ─────────────────────────────────────────────────────────────────────────────

/// Session-layer channel backed by the socket's outbound queue.
struct SocketChannel {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl ClientChannel for SocketChannel {
    fn send(&self, envelope: &Envelope) {
        // a closed socket drops the frame; disconnect cleanup is on its way
        let _ = self.tx.send(envelope.clone());
    }
}

async fn handle_ws_connection(socket: WebSocket, state: Arc<ServerState>) {
    state.client_count.fetch_add(1, Ordering::Relaxed);

    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let conn = ParticipantConnection::new(Arc::new(SocketChannel { tx: out_tx }));
    info!("client connected: {}", conn.id());

    let (mut ws_tx, mut ws_rx) = socket.split();

    let welcome = ServerReply::Welcome {
        client_id: conn.id().to_string(),
        server_version: env!("CARGO_PKG_VERSION").into(),
    };
    if send_reply(&mut ws_tx, &welcome).await.is_err() {
        state.client_count.fetch_sub(1, Ordering::Relaxed);
        return;
    }

    loop {
        tokio::select! {
            // Incoming frame from the client
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match serde_json::from_str::<ClientRequest>(&text) {
                            Ok(request) => crate::dispatch(request, &conn, &state.app).await,
                            Err(e) => Some(ServerReply::Error {
                                error: CoreError::bad_request(format!("Malformed request: {e}")),
                            }),
                        };
                        if let Some(reply) = reply {
                            if send_reply(&mut ws_tx, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("client disconnected: {}", conn.id());
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("websocket error for {}: {e}", conn.id());
                        break;
                    }
                    _ => {}
                }
            }

            // Session broadcasts and routed messages for this client
            envelope = out_rx.recv() => {
                let Some(envelope) = envelope else { break };
                match serde_json::to_string(&envelope) {
                    Ok(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("failed to serialize envelope: {e}"),
                }
            }
        }
    }

    conn.leave(&state.app.registry);
    state.client_count.fetch_sub(1, Ordering::Relaxed);
    info!(
        "client disconnected: {} (total: {})",
        conn.id(),
        state.client_count.load(Ordering::Relaxed)
    );
}

async fn send_reply(
    ws_tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    reply: &ServerReply,
) -> Result<(), axum::Error> {
    match serde_json::to_string(reply) {
        Ok(text) => ws_tx.send(Message::Text(text.into())).await,
        Err(e) => {
            warn!("failed to serialize reply: {e}");
            Ok(())
        }
    }
}
