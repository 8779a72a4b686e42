//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use mcp_core::{ConnectionId, EventBus, EventKind};
use mcp_rpc::ServerFrame;
use mcp_rpc::errors::INVALID_FORMAT;
use metrics::{counter, gauge, histogram};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, instrument, warn};

use super::broadcast::ConnectionTable;
use super::connection::{ConnectionHandle, ConnectionState, Outbound};
use super::handler::FrameHandler;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint going away.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// How long the forwarder gets to flush a close frame.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);
/// How long a reply may wait for room in a full send queue.
const REPLY_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared dependencies for every session.
pub struct SessionContext {
    /// Live connection table.
    pub connections: Arc<ConnectionTable>,
    /// Inbound frame handler.
    pub frames: Arc<FrameHandler>,
    /// Lifecycle event bus.
    pub events: Arc<EventBus>,
    /// Server-wide shutdown signal.
    pub shutdown: CancellationToken,
    /// Name announced in the welcome frame.
    pub server_name: String,
    /// Ping and liveness-check interval.
    pub heartbeat_interval: Duration,
    /// Silence after which a client is dropped.
    pub heartbeat_timeout: Duration,
    /// Outbound frames buffered per connection.
    pub send_queue_capacity: usize,
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client closed or the socket failed.
    Remote,
    /// The client stopped answering pings.
    HeartbeatTimeout,
    /// The server is shutting down.
    Shutdown,
}

impl DisconnectReason {
    /// Wire name used in the disconnect event.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the connection and sends the `welcome` frame
/// 2. Reads the socket continuously so pongs count even while a handler runs
/// 3. Dispatches inbound frames on a separate task, one at a time, in
///    arrival order
/// 4. Forwards outbound frames and periodic pings from the send queue
/// 5. Closes silent clients; on shutdown, stops reading, answers the
///    frames already received, then closes
/// 6. Removes the connection and emits `ClientDisconnected`
#[instrument(skip_all, fields(conn_id))]
pub async fn run_ws_session(ws: WebSocket, ctx: Arc<SessionContext>, remote_addr: Option<SocketAddr>) {
    let id = ConnectionId::new();
    let _ = tracing::Span::current().record("conn_id", id.as_str());
    let state = ConnectionState::new(id.clone(), remote_addr);

    let (ws_tx, mut ws_rx) = ws.split();
    let (send_tx, send_rx) = mpsc::channel(ctx.send_queue_capacity.max(1));
    let handle = Arc::new(ConnectionHandle::new(state.snapshot(), send_tx));

    let started = Instant::now();
    ctx.connections.insert(Arc::clone(&handle)).await;
    info!(remote_addr = ?remote_addr, "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    let _ = ctx.events.dispatch(
        EventKind::ClientConnected,
        json!({
            "connectionId": id,
            "remoteAddr": remote_addr.map(|a| a.to_string()),
        }),
    );

    let _ = handle.send_frame(&ServerFrame::welcome(&id, format!("Connected to {}", ctx.server_name)));

    let mut forwarder = tokio::spawn(forward_outbound(ws_tx, send_rx, ctx.heartbeat_interval));
    let heartbeat_cancel = ctx.shutdown.child_token();
    let mut heartbeat = tokio::spawn(run_heartbeat(
        Arc::clone(&handle),
        ctx.heartbeat_interval,
        ctx.heartbeat_timeout,
        heartbeat_cancel.clone(),
    ));

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let abandon = CancellationToken::new();
    let mut dispatcher = tokio::spawn(
        dispatch_inbound(
            Arc::clone(&ctx),
            Arc::clone(&handle),
            state,
            inbound_rx,
            abandon.clone(),
        )
        .instrument(tracing::Span::current()),
    );

    let reason = loop {
        tokio::select! {
            biased;
            () = ctx.shutdown.cancelled() => break DisconnectReason::Shutdown,
            result = &mut heartbeat => {
                break match result {
                    Ok(HeartbeatResult::TimedOut) => {
                        warn!(timeout = ?ctx.heartbeat_timeout, "client unresponsive, disconnecting");
                        DisconnectReason::HeartbeatTimeout
                    }
                    Ok(HeartbeatResult::Cancelled) => DisconnectReason::Shutdown,
                    Err(e) => {
                        warn!(error = %e, "heartbeat task failed");
                        DisconnectReason::Remote
                    }
                };
            }
            msg = ws_rx.next() => {
                let inbound = match msg {
                    Some(Ok(Message::Text(text))) => Inbound::Text(text.as_str().to_owned()),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => Inbound::Text(text.to_owned()),
                        Err(_) => Inbound::NonUtf8 { len: data.len() },
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        handle.mark_alive();
                        continue;
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("client sent close frame");
                        break DisconnectReason::Remote;
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket read failed");
                        break DisconnectReason::Remote;
                    }
                    None => break DisconnectReason::Remote,
                };

                handle.mark_alive();
                if inbound_tx.send(inbound).is_err() {
                    warn!("dispatch task stopped");
                    break DisconnectReason::Remote;
                }
            }
        }
    };

    heartbeat_cancel.cancel();
    heartbeat.abort();
    drop(inbound_tx);
    match reason {
        DisconnectReason::Shutdown => {
            // Frames already read still get their replies
            if let Err(e) = (&mut dispatcher).await {
                warn!(error = %e, "dispatch task failed");
            }
            let _ = handle.close(CLOSE_NORMAL, "server shutdown");
            flush_close(&mut forwarder).await;
        }
        DisconnectReason::HeartbeatTimeout => {
            abandon.cancel();
            let _ = handle.close(CLOSE_GOING_AWAY, "heartbeat timeout");
            flush_close(&mut forwarder).await;
        }
        DisconnectReason::Remote => {
            abandon.cancel();
            forwarder.abort();
        }
    }

    let _ = ctx.connections.remove(&id).await;
    info!(reason = reason.as_str(), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    let _ = ctx.events.dispatch(
        EventKind::ClientDisconnected,
        json!({
            "connectionId": id,
            "reason": reason.as_str(),
        }),
    );
}

/// A frame handed from the socket reader to the dispatch task.
#[derive(Debug)]
enum Inbound {
    Text(String),
    NonUtf8 { len: usize },
}

/// Answer inbound frames in arrival order until the reader hangs up.
///
/// The in-flight frame always completes. Once `abandon` fires, frames still
/// queued are skipped because nobody is left to read the replies.
async fn dispatch_inbound(
    ctx: Arc<SessionContext>,
    handle: Arc<ConnectionHandle>,
    mut state: ConnectionState,
    mut inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    abandon: CancellationToken,
) {
    while let Some(inbound) = inbound_rx.recv().await {
        if abandon.is_cancelled() {
            break;
        }
        let reply = match inbound {
            Inbound::Text(text) => {
                let reply = ctx.frames.handle_text(&mut state, &text).await;
                let _ = ctx.connections.publish(state.snapshot()).await;
                reply
            }
            Inbound::NonUtf8 { len } => {
                debug!(len, "received non-UTF8 binary frame");
                ServerFrame::error(INVALID_FORMAT, "Binary frames must be UTF-8 JSON", None)
            }
        };
        if !handle.send_reply(&reply, REPLY_SEND_TIMEOUT).await {
            warn!(timeout = ?REPLY_SEND_TIMEOUT, "reply not delivered (client not reading or gone)");
        }
    }
    state.close();
    handle.publish(state.snapshot());
}

/// Drain the send queue into the socket, pinging on every interval tick.
async fn forward_outbound(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Outbound>,
    ping_every: Duration,
) {
    let mut ping_interval = tokio::time::interval(ping_every.max(Duration::from_millis(1)));
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            msg = send_rx.recv() => match msg {
                Some(Outbound::Text(text)) => {
                    if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    let _ = ws_tx.send(Message::Close(Some(frame))).await;
                    break;
                }
                None => break,
            },
            _ = ping_interval.tick() => {
                if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn flush_close(forwarder: &mut JoinHandle<()>) {
    if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut *forwarder).await.is_err() {
        debug!("close frame not flushed in time");
        forwarder.abort();
    }
}
