//! Lifecycle event fan-out.
//!
//! Listeners are plain synchronous callbacks. [`EventBus::dispatch`] takes a
//! snapshot of the current listeners, releases the lock, then calls each one
//! inside its own `catch_unwind`, so a listener may unsubscribe itself (or
//! panic) without affecting delivery to the rest.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, trace};

/// Lifecycle event categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// A resource was added to the registry.
    ResourceRegistered,
    /// A resource was removed from the registry.
    ResourceUnregistered,
    /// A handler was bound to an action.
    HandlerRegistered,
    /// A realtime client connected.
    ClientConnected,
    /// A realtime client completed an auth exchange.
    ClientAuthenticated,
    /// A realtime client disconnected.
    ClientDisconnected,
    /// The server started listening.
    ServerStarted,
    /// The server began shutting down.
    ServerStopping,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_string(self).unwrap_or_else(|_| "UNKNOWN".to_owned());
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// An event delivered to listeners.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Event category.
    pub kind: EventKind,
    /// Event-specific payload.
    pub payload: Value,
    /// When the event was dispatched.
    pub timestamp: DateTime<Utc>,
}

type Listener = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

#[derive(Default)]
struct ListenerTable {
    by_kind: HashMap<EventKind, Vec<(u64, Listener)>>,
    global: Vec<(u64, Listener)>,
}

impl ListenerTable {
    fn remove(&mut self, id: u64) {
        self.global.retain(|(lid, _)| *lid != id);
        for listeners in self.by_kind.values_mut() {
            listeners.retain(|(lid, _)| *lid != id);
        }
    }
}

/// Typed publish/subscribe bus for lifecycle events.
pub struct EventBus {
    listeners: Arc<RwLock<ListenerTable>>,
    next_id: AtomicU64,
    dispatch_count: AtomicU64,
}

impl EventBus {
    /// Create a bus with no listeners.
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(RwLock::new(ListenerTable::default())),
            next_id: AtomicU64::new(1),
            dispatch_count: AtomicU64::new(0),
        }
    }

    /// Subscribe to one event kind.
    pub fn add_listener<F>(&self, kind: EventKind, listener: F) -> ListenerHandle
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .by_kind
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        ListenerHandle {
            id,
            table: Arc::downgrade(&self.listeners),
        }
    }

    /// Subscribe to every event kind.
    pub fn add_global_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().global.push((id, Arc::new(listener)));
        ListenerHandle {
            id,
            table: Arc::downgrade(&self.listeners),
        }
    }

    /// Deliver an event to the current listeners.
    ///
    /// Returns the number of listeners that completed without panicking.
    pub fn dispatch(&self, kind: EventKind, payload: Value) -> usize {
        let _ = self.dispatch_count.fetch_add(1, Ordering::Relaxed);
        let snapshot: Vec<Listener> = {
            let table = self.listeners.read();
            table
                .by_kind
                .get(&kind)
                .into_iter()
                .flatten()
                .chain(table.global.iter())
                .map(|(_, l)| Arc::clone(l))
                .collect()
        };

        let event = LifecycleEvent {
            kind,
            payload,
            timestamp: Utc::now(),
        };
        trace!(%kind, listeners = snapshot.len(), "dispatching lifecycle event");

        let mut delivered = 0;
        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_owned())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_owned());
                    error!(%kind, reason, "event listener panicked");
                }
            }
        }
        delivered
    }

    /// Number of listeners that would receive `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        let table = self.listeners.read();
        table.by_kind.get(&kind).map_or(0, Vec::len) + table.global.len()
    }

    /// Total events dispatched since creation.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatch_count.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Returned by `add_listener`; removes the listener when unsubscribed.
pub struct ListenerHandle {
    id: u64,
    table: Weak<RwLock<ListenerTable>>,
}

impl ListenerHandle {
    /// Remove the listener. A no-op if the bus is gone.
    pub fn unsubscribe(self) {
        if let Some(table) = self.table.upgrade() {
            table.write().remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&LifecycleEvent) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move |_: &LifecycleEvent| {
            let _ = c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn dispatch_reaches_matching_listeners_only() {
        let bus = EventBus::new();
        let (registered, l1) = counter();
        let (connected, l2) = counter();
        let _h1 = bus.add_listener(EventKind::ResourceRegistered, l1);
        let _h2 = bus.add_listener(EventKind::ClientConnected, l2);

        let delivered = bus.dispatch(EventKind::ResourceRegistered, json!({"id": "r1"}));
        assert_eq!(delivered, 1);
        assert_eq!(registered.load(Ordering::SeqCst), 1);
        assert_eq!(connected.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn payload_is_passed_through() {
        let bus = EventBus::new();
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let s = Arc::clone(&seen);
        let _h = bus.add_listener(EventKind::ClientConnected, move |e| {
            *s.lock() = Some(e.payload.clone());
        });
        let _ = bus.dispatch(EventKind::ClientConnected, json!({"connectionId": "c1"}));
        assert_eq!(seen.lock().clone(), Some(json!({"connectionId": "c1"})));
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (count, l) = counter();
        let handle = bus.add_listener(EventKind::ServerStarted, l);
        let _ = bus.dispatch(EventKind::ServerStarted, Value::Null);
        handle.unsubscribe();
        let _ = bus.dispatch(EventKind::ServerStarted, Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(EventKind::ServerStarted), 0);
    }

    #[test]
    fn panicking_listener_does_not_stop_delivery() {
        let bus = EventBus::new();
        let (before, l1) = counter();
        let (after, l2) = counter();
        let _h1 = bus.add_listener(EventKind::ClientDisconnected, l1);
        let _h2 = bus.add_listener(EventKind::ClientDisconnected, |_| panic!("listener failure"));
        let _h3 = bus.add_listener(EventKind::ClientDisconnected, l2);

        let delivered = bus.dispatch(EventKind::ClientDisconnected, Value::Null);
        assert_eq!(delivered, 2);
        assert_eq!(before.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn global_listener_sees_every_kind() {
        let bus = EventBus::new();
        let (count, l) = counter();
        let _h = bus.add_global_listener(l);
        let _ = bus.dispatch(EventKind::ResourceRegistered, Value::Null);
        let _ = bus.dispatch(EventKind::ClientAuthenticated, Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(bus.listener_count(EventKind::ServerStopping), 1);
    }

    #[test]
    fn listener_may_unsubscribe_during_dispatch() {
        let bus = Arc::new(EventBus::new());
        let slot: Arc<parking_lot::Mutex<Option<ListenerHandle>>> =
            Arc::new(parking_lot::Mutex::new(None));
        let s = Arc::clone(&slot);
        let handle = bus.add_listener(EventKind::ServerStopping, move |_| {
            if let Some(h) = s.lock().take() {
                h.unsubscribe();
            }
        });
        *slot.lock() = Some(handle);

        assert_eq!(bus.dispatch(EventKind::ServerStopping, Value::Null), 1);
        assert_eq!(bus.listener_count(EventKind::ServerStopping), 0);
    }

    #[test]
    fn dispatch_without_listeners_counts() {
        let bus = EventBus::default();
        assert_eq!(bus.dispatch(EventKind::ServerStarted, Value::Null), 0);
        assert_eq!(bus.dispatch_count(), 1);
    }

    #[test]
    fn event_kind_display() {
        assert_eq!(EventKind::ResourceRegistered.to_string(), "RESOURCE_REGISTERED");
    }
}
