//! Cooperative shutdown for the gateway.
//!
//! One token fans out to the upgrade handler, every WebSocket session and
//! the listener. Cancelling it does not abort anything:
//!
//! - `/ws` refuses new upgrades with 503
//! - each session stops reading, answers the frames it already read, then
//!   sends a normal closure
//! - the listener waits for the connection table to empty before it stops
//!
//! The binary then waits on the listener task with
//! [`ShutdownCoordinator::graceful_shutdown`].

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Wait used when the caller gives no timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Owner of the gateway's shutdown signal.
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// A coordinator that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token handed to sessions and the listener.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Fire the signal. Later calls are no-ops.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether the signal has fired.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fire the signal and give `handles` up to `timeout` to return.
    ///
    /// Returns `false` when time ran out. Late tasks keep running.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();
        info!(tasks = handles.len(), ?timeout, "waiting for server tasks");

        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(_) => true,
            Err(_) => {
                warn!(?timeout, "server tasks still running after shutdown timeout");
                false
            }
        }
    }
}
