//! WebSocket connection state, frame handling, heartbeat, and fan-out.

pub mod broadcast;
pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod session;
