//! The built-in `system` resource.

use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use mcp_core::{ActionSchema, ParamSpec, Resource, ResourceType};
use mcp_rpc::{ActionHandler, HandlerError, Registry, TimeoutHandler, handler_fn};
use serde_json::{Value, json};

/// Resource ID of the built-in resource.
pub const SYSTEM_RESOURCE_ID: &str = "system";

fn descriptor() -> Resource {
    Resource::new(SYSTEM_RESOURCE_ID, ResourceType::System, "System")
        .with_description("Gateway liveness and introspection")
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_action(
            ActionSchema::new("ping", "Ping")
                .with_description("Round-trip check")
                .with_return_spec(json!({ "pong": "boolean", "timestamp": "string" })),
        )
        .with_action(
            ActionSchema::new("list-resources", "List resources")
                .with_description("Summaries of every registered resource")
                .with_param(
                    "type",
                    ParamSpec::optional("string").with_description("Only resources of this type"),
                )
                .with_return_spec(json!({ "resources": "array" })),
        )
}

/// Register the `system` resource and bind its handlers, each behind a
/// deadline when `timeout` is set.
pub fn register(registry: &Arc<Registry>, timeout: Option<Duration>) -> Result<()> {
    registry
        .register(descriptor())
        .context("Failed to register system resource")?;

    let ping = handler_fn(|_params, _ctx| async {
        Ok::<Value, HandlerError>(json!({
            "pong": true,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))
    });
    bind(registry, "ping", Arc::new(ping), timeout)?;

    let weak: Weak<Registry> = Arc::downgrade(registry);
    let list = handler_fn(move |params, _ctx| {
        let weak = weak.clone();
        async move {
            let registry = weak
                .upgrade()
                .ok_or_else(|| HandlerError::internal("registry dropped"))?;
            let filter = match params.get("type") {
                Some(Value::String(name)) => Some(
                    serde_json::from_value::<ResourceType>(Value::String(name.clone()))
                        .map_err(|_| HandlerError::invalid_params(format!("Unknown resource type: {name}")))?,
                ),
                _ => None,
            };
            let mut resources: Vec<_> = match filter {
                Some(resource_type) => registry.list_by_type(resource_type),
                None => registry.list(),
            }
            .iter()
            .map(|r| r.summary())
            .collect();
            resources.sort_by(|a, b| a.id.cmp(&b.id));
            Ok::<Value, HandlerError>(json!({ "resources": resources }))
        }
    });
    bind(registry, "list-resources", Arc::new(list), timeout)
}

fn bind(
    registry: &Registry,
    action_id: &str,
    handler: Arc<dyn ActionHandler>,
    timeout: Option<Duration>,
) -> Result<()> {
    let handler: Arc<dyn ActionHandler> = match timeout {
        Some(limit) => Arc::new(TimeoutHandler::new(handler, limit)),
        None => handler,
    };
    registry
        .bind_handler(SYSTEM_RESOURCE_ID, action_id, handler)
        .with_context(|| format!("Failed to bind system/{action_id}"))
}
