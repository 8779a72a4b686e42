//! Transport metric names recorded through the `metrics` facade.

/// WebSocket connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "mcp_ws_connections_total";
/// WebSocket connections closed (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "mcp_ws_disconnections_total";
/// Live WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "mcp_ws_connections_active";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "mcp_ws_connection_duration_seconds";
/// Upgrades refused at capacity or during shutdown (counter).
pub const WS_REJECTED_TOTAL: &str = "mcp_ws_rejected_total";
/// Outbound frames dropped on a full or closed send queue (counter).
pub const WS_SEND_DROPS_TOTAL: &str = "mcp_ws_send_drops_total";
/// Inbound frames rejected before dispatch (counter, labels: code).
pub const WS_FRAME_ERRORS_TOTAL: &str = "mcp_ws_frame_errors_total";
