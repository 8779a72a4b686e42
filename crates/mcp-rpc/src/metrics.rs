//! Dispatch metric names recorded through the `metrics` facade.
//!
//! No recorder is installed by this crate; the host process decides where
//! these go.

/// Requests dispatched (counter, labels: resource, action).
pub const REQUESTS_TOTAL: &str = "mcp_requests_total";
/// Non-success responses (counter, labels: resource, action, status).
pub const ERRORS_TOTAL: &str = "mcp_request_errors_total";
/// Handler panics caught by the dispatcher (counter, labels: resource, action).
pub const HANDLER_PANICS_TOTAL: &str = "mcp_handler_panics_total";
/// Dispatch duration in seconds (histogram, labels: resource, action).
pub const REQUEST_DURATION_SECONDS: &str = "mcp_request_duration_seconds";
