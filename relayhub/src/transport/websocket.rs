//! WebSocket transport.
//!
//! Every connection gets its own [`Session`]. Each text frame is one job
//! document; jobs run concurrently and their items and results are written
//! back on the same socket in the order they are produced.
//!
//! Sockets stay open until the transport is cancelled, and queued messages
//! are flushed before the close frame goes out.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use chrono::Utc;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::session::{Outbound, Session};

const LISTEN_BACKLOG: i32 = 1024;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct TransportState {
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
    connections: TaskTracker,
}

impl TransportState {
    pub fn new(dispatcher: Arc<Dispatcher>, cancel: CancellationToken) -> Self {
        Self {
            dispatcher,
            cancel,
            connections: TaskTracker::new(),
        }
    }

    /// Tracker holding one token per open socket.
    pub fn connections(&self) -> TaskTracker {
        self.connections.clone()
    }
}

/// Bind a listener that other worker processes can bind too.
///
/// On Unix the socket gets `SO_REUSEPORT`, so the kernel spreads incoming
/// connections across every worker of the pool.
pub fn bind_reuseport(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    TcpListener::from_std(socket.into())
}

pub fn router(state: TransportState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Serve connections until `cancel` fires.
pub async fn serve(listener: TcpListener, state: TransportState) -> io::Result<()> {
    let cancel = state.cancel.clone();
    if let Ok(addr) = listener.local_addr() {
        info!("WebSocket transport listening on ws://{}", addr);
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            info!("WebSocket transport shutting down...");
        })
        .await
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<TransportState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: TransportState) {
    let _connection = state.connections.token();
    let ctx = state.dispatcher.context().clone();
    if ctx.shutdown.is_set() {
        debug!("Refusing connection, worker is shutting down");
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let (session, mut outbound) = Session::channel(session_id.clone(), ctx.config_store().clone());
    let session = Arc::new(session);

    let namespace = ctx.namespace();
    let presence_key = format!("session:{}", session_id);
    let presence = json!({
        "session": session_id,
        "worker": ctx.worker_id.as_str(),
        "connected_at": Utc::now().to_rfc3339(),
    });
    if let Err(e) = ctx.store().put(&namespace, &presence_key, presence).await {
        warn!(session = %session_id, "Failed to record presence: {}", e);
    }
    info!(session = %session_id, "Client connected");

    let (mut sender, mut receiver) = socket.split();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            Some(message) = outbound.recv() => {
                if forward(&mut sender, &session_id, &message).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let dispatcher = state.dispatcher.clone();
                        let session = session.clone();
                        tokio::spawn(async move {
                            dispatcher.route_text(text.as_str(), &session).await;
                        });
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(session = %session_id, "WebSocket error: {}", e);
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }

            _ = state.cancel.cancelled() => {
                while let Ok(message) = outbound.try_recv() {
                    if forward(&mut sender, &session_id, &message).await.is_err() {
                        break;
                    }
                }
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    if let Err(e) = ctx.store().remove(&namespace, &presence_key).await {
        warn!(session = %session_id, "Failed to remove presence: {}", e);
    }
    info!(session = %session_id, "Client disconnected");
}

/// Write one outbound message as a text frame.
async fn forward(
    sender: &mut SplitSink<WebSocket, Message>,
    session_id: &str,
    message: &Outbound,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            warn!(session = %session_id, "Failed to encode outbound message: {}", e);
            return Ok(());
        }
    };
    if let Outbound::Result(result) = message {
        debug!(session = %session_id, rid = ?result.rid, status = result.status, "Job settled");
    }
    sender.send(Message::Text(text.into())).await
}
