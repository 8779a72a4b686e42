//! Live connection table and frame fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use mcp_core::ConnectionId;
use mcp_rpc::ServerFrame;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::connection::{ConnectionHandle, ConnectionSnapshot};

/// Connected clients indexed by connection ID.
pub struct ConnectionTable {
    connections: RwLock<HashMap<ConnectionId, Arc<ConnectionHandle>>>,
}

impl ConnectionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection.
    pub async fn insert(&self, handle: Arc<ConnectionHandle>) {
        let mut conns = self.connections.write().await;
        let _ = conns.insert(handle.id().clone(), handle);
    }

    /// Remove a connection by ID.
    pub async fn remove(&self, id: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.write().await.remove(id)
    }

    /// Look up a connection.
    pub async fn get(&self, id: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.read().await.get(id).cloned()
    }

    /// Replace a connection's published snapshot. Returns `false` when the
    /// connection is no longer in the table.
    pub async fn publish(&self, snapshot: ConnectionSnapshot) -> bool {
        match self.get(&snapshot.connection_id).await {
            Some(handle) => {
                handle.publish(snapshot);
                true
            }
            None => false,
        }
    }

    /// Latest snapshot of every live connection.
    pub async fn snapshot(&self) -> Vec<Arc<ConnectionSnapshot>> {
        self.handles().await.iter().map(|h| h.snapshot()).collect()
    }

    /// Best-effort send to one connection.
    pub async fn send_to_connection(&self, id: &ConnectionId, frame: &ServerFrame) -> bool {
        match self.get(id).await {
            Some(handle) => handle.send_frame(frame),
            None => {
                debug!(conn_id = %id, "send to unknown connection");
                false
            }
        }
    }

    /// Send `frame` to every connection whose snapshot passes `filter`.
    ///
    /// Iterates a copy of the table, so the lock is not held while sending.
    /// Returns the number of connections the frame was queued for.
    pub async fn broadcast<F>(&self, frame: &ServerFrame, filter: F) -> usize
    where
        F: Fn(&ConnectionSnapshot) -> bool,
    {
        let text = Arc::new(frame.to_text());
        let handles = self.handles().await;
        let mut delivered = 0;
        for handle in handles {
            if !filter(&handle.snapshot()) {
                continue;
            }
            if handle.send(Arc::clone(&text)) {
                delivered += 1;
            } else {
                warn!(conn_id = %handle.id(), "failed to queue broadcast frame");
            }
        }
        debug!(delivered, "broadcast frame");
        delivered
    }

    /// Send `frame` to every connection.
    pub async fn broadcast_all(&self, frame: &ServerFrame) -> usize {
        self.broadcast(frame, |_| true).await
    }

    /// Ask every connection to close. Returns how many close requests were
    /// queued by this call.
    pub async fn close_all(&self, code: u16, reason: &str) -> usize {
        self.handles()
            .await
            .iter()
            .filter(|h| h.close(code, reason))
            .count()
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    async fn handles(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.read().await.values().cloned().collect()
    }
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}
