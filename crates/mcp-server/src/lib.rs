//! # mcp-server
//!
//! Axum HTTP + `WebSocket` transport for the MCP gateway.
//!
//! - HTTP endpoints: health check, resource discovery
//! - `WebSocket` gateway: per-connection auth state, frame handling, heartbeat
//! - Connection table with filtered broadcast over immutable snapshots
//! - Cooperative shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod discovery;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use auth::{AuthOutcome, AuthProvider, StaticTokenAuthProvider};
pub use config::ServerConfig;
pub use server::McpServer;
pub use shutdown::ShutdownCoordinator;
pub use websocket::broadcast::ConnectionTable;
pub use websocket::connection::{ConnectionPhase, ConnectionSnapshot, ConnectionState};
