//! Read-only resource discovery over HTTP.
//!
//! Both documents are built straight from the registry; discovery never
//! dispatches.

use mcp_core::ResourceSummary;
use mcp_rpc::Registry;
use serde::Serialize;
use serde_json::{Value, json};

/// Path clients upgrade on.
pub const WEBSOCKET_PATH: &str = "/ws";

/// Server block of the discovery document.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
    /// WebSocket path.
    pub websocket: String,
    /// Whether requests need an `auth` frame first.
    pub auth_required: bool,
}

/// `GET /mcp` body.
#[derive(Clone, Debug, Serialize)]
pub struct DiscoveryResponse {
    /// Always `"discovery"`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Server information.
    pub server: ServerInfo,
    /// Every registered resource, ordered by ID.
    pub resources: Vec<ResourceSummary>,
}

/// Build the discovery document.
pub fn discovery(server: ServerInfo, registry: &Registry) -> DiscoveryResponse {
    let mut resources: Vec<ResourceSummary> = registry.list().iter().map(|r| r.summary()).collect();
    resources.sort_by(|a, b| a.id.cmp(&b.id));
    DiscoveryResponse {
        kind: "discovery",
        server,
        resources,
    }
}

/// Full descriptor for one resource, or `None` if unknown.
pub fn resource_detail(registry: &Registry, resource_id: &str) -> Option<Value> {
    let resource = registry.get(resource_id)?;
    serde_json::to_value(resource.as_ref()).ok()
}

/// Body returned when a resource is not registered.
pub fn not_found_body(resource_id: &str) -> Value {
    json!({
        "error": {
            "message": format!("Resource not found: {resource_id}"),
            "code": "not_found",
        }
    })
}
