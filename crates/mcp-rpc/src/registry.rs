//! Resource registry and handler bindings.
//!
//! A single `RwLock` guards both the resource map and the handler map, so a
//! handler can never be bound to an action that is being unregistered. The
//! lock is never held across an await point or while lifecycle events are
//! dispatched.

use std::collections::HashMap;
use std::sync::Arc;

use mcp_core::{ActionSchema, EventBus, EventKind, Resource, ResourceType};
use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::errors::RegistryError;
use crate::handler::ActionHandler;

type HandlerKey = (String, String);

#[derive(Default)]
struct RegistryInner {
    resources: HashMap<String, Arc<Resource>>,
    handlers: HashMap<HandlerKey, Arc<dyn ActionHandler>>,
}

/// Store of known resources and the handlers bound to their actions.
pub struct Registry {
    inner: RwLock<RegistryInner>,
    events: Option<Arc<EventBus>>,
}

impl Registry {
    /// Create an empty registry that emits no events.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            events: None,
        }
    }

    /// Create an empty registry that reports changes on `events`.
    pub fn with_events(events: Arc<EventBus>) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            events: Some(events),
        }
    }

    /// Add a resource. A duplicate ID is rejected and the existing resource
    /// is left untouched.
    pub fn register(&self, resource: Resource) -> Result<(), RegistryError> {
        let id = resource.id.clone();
        let payload = json!({
            "resourceId": id,
            "type": resource.resource_type,
            "actions": sorted_action_ids(&resource),
        });
        {
            let mut inner = self.inner.write();
            if inner.resources.contains_key(&id) {
                return Err(RegistryError::AlreadyExists(id));
            }
            let _ = inner.resources.insert(id.clone(), Arc::new(resource));
        }
        info!(resource_id = %id, "resource registered");
        self.emit(EventKind::ResourceRegistered, payload);
        Ok(())
    }

    /// Remove a resource and every handler bound to its actions.
    pub fn unregister(&self, resource_id: &str) -> Result<Arc<Resource>, RegistryError> {
        let (removed, dropped_handlers) = {
            let mut inner = self.inner.write();
            let removed = inner
                .resources
                .remove(resource_id)
                .ok_or_else(|| RegistryError::ResourceNotFound(resource_id.to_owned()))?;
            let before = inner.handlers.len();
            inner.handlers.retain(|(rid, _), _| rid != resource_id);
            (removed, before - inner.handlers.len())
        };
        info!(resource_id, dropped_handlers, "resource unregistered");
        self.emit(
            EventKind::ResourceUnregistered,
            json!({ "resourceId": resource_id }),
        );
        Ok(removed)
    }

    /// Look up a resource.
    pub fn get(&self, resource_id: &str) -> Option<Arc<Resource>> {
        self.inner.read().resources.get(resource_id).cloned()
    }

    /// Snapshot of every resource, in no particular order.
    pub fn list(&self) -> Vec<Arc<Resource>> {
        self.inner.read().resources.values().cloned().collect()
    }

    /// Snapshot of the resources of one type.
    pub fn list_by_type(&self, resource_type: ResourceType) -> Vec<Arc<Resource>> {
        self.inner
            .read()
            .resources
            .values()
            .filter(|r| r.resource_type == resource_type)
            .cloned()
            .collect()
    }

    /// Look up an action schema.
    pub fn action(&self, resource_id: &str, action_id: &str) -> Option<ActionSchema> {
        self.inner
            .read()
            .resources
            .get(resource_id)
            .and_then(|r| r.action(action_id))
            .cloned()
    }

    /// Bind a handler to a declared action.
    ///
    /// Rejects an unknown resource, an undeclared action, and a second
    /// binding for the same pair.
    pub fn bind_handler(
        &self,
        resource_id: &str,
        action_id: &str,
        handler: Arc<dyn ActionHandler>,
    ) -> Result<(), RegistryError> {
        {
            let mut inner = self.inner.write();
            let resource = inner
                .resources
                .get(resource_id)
                .ok_or_else(|| RegistryError::ResourceNotFound(resource_id.to_owned()))?;
            if resource.action(action_id).is_none() {
                return Err(RegistryError::ActionNotFound {
                    resource_id: resource_id.to_owned(),
                    action_id: action_id.to_owned(),
                });
            }
            let key = (resource_id.to_owned(), action_id.to_owned());
            if inner.handlers.contains_key(&key) {
                return Err(RegistryError::HandlerAlreadyBound {
                    resource_id: resource_id.to_owned(),
                    action_id: action_id.to_owned(),
                });
            }
            let _ = inner.handlers.insert(key, handler);
        }
        debug!(resource_id, action_id, "handler bound");
        self.emit(
            EventKind::HandlerRegistered,
            json!({ "resourceId": resource_id, "actionId": action_id }),
        );
        Ok(())
    }

    /// The handler bound to an action, if any.
    pub fn handler(&self, resource_id: &str, action_id: &str) -> Option<Arc<dyn ActionHandler>> {
        self.inner
            .read()
            .handlers
            .get(&(resource_id.to_owned(), action_id.to_owned()))
            .cloned()
    }

    /// [`Registry::register`] reporting success as a flag.
    pub fn register_resource(&self, resource: Resource) -> bool {
        match self.register(resource) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "resource registration rejected");
                false
            }
        }
    }

    /// [`Registry::bind_handler`] reporting success as a flag.
    pub fn register_handler<H>(&self, resource_id: &str, action_id: &str, handler: H) -> bool
    where
        H: ActionHandler + 'static,
    {
        match self.bind_handler(resource_id, action_id, Arc::new(handler)) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "handler registration rejected");
                false
            }
        }
    }

    /// Number of registered resources.
    pub fn len(&self) -> usize {
        self.inner.read().resources.len()
    }

    /// Whether no resources are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.read().resources.is_empty()
    }

    /// Number of bound handlers.
    pub fn handler_count(&self) -> usize {
        self.inner.read().handlers.len()
    }

    fn emit(&self, kind: EventKind, payload: serde_json::Value) {
        if let Some(events) = &self.events {
            let _ = events.dispatch(kind, payload);
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_action_ids(resource: &Resource) -> Vec<String> {
    let mut ids: Vec<String> = resource.actions.keys().cloned().collect();
    ids.sort();
    ids
}
