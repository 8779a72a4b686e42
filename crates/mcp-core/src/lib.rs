//! # mcp-core
//!
//! Shared vocabulary for the MCP gateway crates.
//!
//! - **Branded IDs**: `ConnectionId`, `RequestId` as newtypes over UUID v7 strings
//! - **Resource descriptors**: `Resource`, `ActionSchema`, `ParamSpec`, `ResourceType`
//! - **Lifecycle events**: `EventBus` fan-out for registry and connection events
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod events;
pub mod ids;
pub mod logging;
pub mod resource;

pub use events::{EventBus, EventKind, LifecycleEvent, ListenerHandle};
pub use ids::{ConnectionId, RequestId};
pub use resource::{ActionSchema, ParamSpec, ParamType, Resource, ResourceSummary, ResourceType};
