//! Per-connection state.
//!
//! [`ConnectionState`] is owned by the connection's session task and is the
//! only place auth fields change. Other tasks see the connection through its
//! [`ConnectionHandle`]: a send queue plus the latest immutable
//! [`ConnectionSnapshot`] the session published.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use mcp_core::ConnectionId;
use mcp_rpc::ServerFrame;
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::metrics::WS_SEND_DROPS_TOTAL;

/// Lifecycle phase of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Socket is open.
    Open {
        /// Whether an auth exchange has succeeded.
        authenticated: bool,
    },
    /// Terminal.
    Closed,
}

/// Mutable connection state, owned by the session task.
#[derive(Debug)]
pub struct ConnectionState {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    phase: ConnectionPhase,
    caller_id: Option<String>,
    connected_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
}

impl ConnectionState {
    /// A freshly accepted, unauthenticated connection.
    pub fn new(id: ConnectionId, remote_addr: Option<SocketAddr>) -> Self {
        let now = Utc::now();
        Self {
            id,
            remote_addr,
            phase: ConnectionPhase::Open {
                authenticated: false,
            },
            caller_id: None,
            connected_at: now,
            last_activity_at: now,
        }
    }

    /// Connection ID.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Peer address, when known.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Current phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Whether the connection is open.
    pub fn is_open(&self) -> bool {
        matches!(self.phase, ConnectionPhase::Open { .. })
    }

    /// Whether the connection is open and authenticated.
    pub fn is_authenticated(&self) -> bool {
        matches!(self.phase, ConnectionPhase::Open { authenticated: true })
    }

    /// Authenticated principal.
    pub fn caller_id(&self) -> Option<&str> {
        self.caller_id.as_deref()
    }

    /// Record inbound activity.
    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    /// Apply a successful auth exchange.
    ///
    /// Returns `true` when this flipped the connection from unauthenticated
    /// to authenticated. A repeated success only replaces the caller ID. A
    /// closed connection is left untouched.
    pub fn authenticate(&mut self, caller_id: Option<String>) -> bool {
        match self.phase {
            ConnectionPhase::Open { authenticated } => {
                self.phase = ConnectionPhase::Open {
                    authenticated: true,
                };
                self.caller_id = caller_id;
                !authenticated
            }
            ConnectionPhase::Closed => false,
        }
    }

    /// Enter the terminal phase.
    pub fn close(&mut self) {
        self.phase = ConnectionPhase::Closed;
    }

    /// Immutable view for other tasks.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            connection_id: self.id.clone(),
            remote_addr: self.remote_addr,
            open: self.is_open(),
            authenticated: self.is_authenticated(),
            caller_id: self.caller_id.clone(),
            connected_at: self.connected_at,
            last_activity_at: self.last_activity_at,
        }
    }
}

/// Point-in-time copy of a connection's state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    /// Connection ID.
    pub connection_id: ConnectionId,
    /// Peer address, when known.
    pub remote_addr: Option<SocketAddr>,
    /// Whether the connection was open.
    pub open: bool,
    /// Whether the connection was authenticated.
    pub authenticated: bool,
    /// Authenticated principal.
    pub caller_id: Option<String>,
    /// Accept time.
    pub connected_at: DateTime<Utc>,
    /// Last inbound frame.
    pub last_activity_at: DateTime<Utc>,
}

/// Message for a connection's outbound forwarder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized frame.
    Text(Arc<String>),
    /// Send a close frame and stop.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Shared handle to a live connection.
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    snapshot: RwLock<Arc<ConnectionSnapshot>>,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    close_requested: AtomicBool,
    dropped_messages: AtomicU64,
}

impl ConnectionHandle {
    /// Create a handle from the initial snapshot and the forwarder's queue.
    pub fn new(snapshot: ConnectionSnapshot, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id: snapshot.connection_id.clone(),
            tx,
            snapshot: RwLock::new(Arc::new(snapshot)),
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(Instant::now()),
            close_requested: AtomicBool::new(false),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Connection ID.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<ConnectionSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Replace the published snapshot.
    pub fn publish(&self, snapshot: ConnectionSnapshot) {
        *self.snapshot.write() = Arc::new(snapshot);
    }

    /// Queue serialized text. Best-effort: returns `false` and counts a drop
    /// when the queue is full or the forwarder has stopped.
    pub fn send(&self, text: Arc<String>) -> bool {
        if self.tx.try_send(Outbound::Text(text)).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            counter!(WS_SEND_DROPS_TOTAL).increment(1);
            false
        }
    }

    /// Serialize and queue a frame.
    pub fn send_frame(&self, frame: &ServerFrame) -> bool {
        self.send(Arc::new(frame.to_text()))
    }

    /// Queue the reply to one of this connection's own frames.
    ///
    /// Unlike [`ConnectionHandle::send`] this waits for queue space, for at
    /// most `wait`. Returns `false` and counts a drop when the forwarder has
    /// stopped or the wait elapsed.
    pub async fn send_reply(&self, frame: &ServerFrame, wait: Duration) -> bool {
        let outbound = Outbound::Text(Arc::new(frame.to_text()));
        match tokio::time::timeout(wait, self.tx.send(outbound)).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) | Err(_) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                counter!(WS_SEND_DROPS_TOTAL).increment(1);
                false
            }
        }
    }

    /// Ask the forwarder to send a close frame and stop.
    ///
    /// Only the first call queues anything; returns whether this call did.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        if self.close_requested.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.tx
            .try_send(Outbound::Close {
                code,
                reason: reason.to_owned(),
            })
            .is_ok()
    }

    /// Whether a close has been requested.
    pub fn close_requested(&self) -> bool {
        self.close_requested.load(Ordering::Acquire)
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong or any inbound frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last pong or inbound frame.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }
}
