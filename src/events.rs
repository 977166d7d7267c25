//! Event listener registry.
//!
//! Connections and sessions each own an [`EventBus`]. Subscribing yields
//! an [`EventSubscription`] guard; dropping the guard (or the bus
//! clearing itself on teardown) unregisters the listener, so consumers
//! cannot leak callbacks across session or world teardown.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;

// ============================================================================
// ProtocolEvent
// ============================================================================

/// An unsolicited protocol notification dispatched to listeners.
#[derive(Debug, Clone)]
pub struct ProtocolEvent {
    /// Event method in `Domain.event` format.
    pub method: Arc<str>,

    /// Event parameters.
    pub params: Value,
}

impl ProtocolEvent {
    /// Creates an event.
    #[inline]
    #[must_use]
    pub fn new(method: impl AsRef<str>, params: Value) -> Self {
        Self {
            method: Arc::from(method.as_ref()),
            params,
        }
    }

    /// Deserializes the params into a typed payload.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] on shape mismatch.
    pub fn params_as<T: serde::de::DeserializeOwned>(&self) -> crate::Result<T> {
        Ok(serde_json::from_value(self.params.clone())?)
    }
}

// ============================================================================
// Types
// ============================================================================

/// Listener callback invoked for each matching event.
pub type EventCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listener<T> {
    /// Only events emitted under this key are delivered; `None` receives
    /// every event.
    filter: Option<Arc<str>>,
    callback: EventCallback<T>,
}

// ============================================================================
// EventBus
// ============================================================================

/// Registry of event listeners with guard-based unsubscription.
///
/// Dispatch happens on the connection's serialized inbound worker, so
/// listeners observe events in arrival order.
pub struct EventBus<T> {
    inner: Arc<BusInner<T>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(BusInner {
                next_id: AtomicU64::new(0),
                listeners: Mutex::new(FxHashMap::default()),
            }),
        }
    }
}

struct BusInner<T> {
    next_id: AtomicU64,
    listeners: Mutex<FxHashMap<u64, Listener<T>>>,
}

impl<T: Send + Sync + 'static> EventBus<T> {
    /// Creates an empty bus.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener.
    ///
    /// Pass `Some(key)` to receive only events emitted under that key
    /// (the protocol method for protocol events), `None` for all. The
    /// listener stays registered until the returned guard is dropped or
    /// the bus is cleared.
    #[must_use]
    pub fn subscribe(&self, filter: Option<&str>, callback: EventCallback<T>) -> EventSubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().insert(
            id,
            Listener {
                filter: filter.map(Arc::from),
                callback,
            },
        );

        let bus = Arc::downgrade(&self.inner);
        EventSubscription {
            unregister: Some(Box::new(move || {
                if let Some(bus) = bus.upgrade() {
                    bus.listeners.lock().remove(&id);
                }
            })),
        }
    }

    /// Dispatches an event under a routing key.
    ///
    /// Callbacks run outside the registry lock, so a listener may
    /// subscribe or unsubscribe re-entrantly.
    pub fn emit(&self, key: &str, event: &T) {
        let matching: Vec<EventCallback<T>> = {
            let listeners = self.inner.listeners.lock();
            listeners
                .values()
                .filter(|listener| match &listener.filter {
                    Some(filter) => **filter == *key,
                    None => true,
                })
                .map(|listener| Arc::clone(&listener.callback))
                .collect()
        };

        for callback in matching {
            callback(event);
        }
    }

    /// Removes every listener. Outstanding guards become no-ops.
    pub fn clear(&self) {
        self.inner.listeners.lock().clear();
    }

    /// Returns the number of registered listeners.
    #[inline]
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

impl EventBus<ProtocolEvent> {
    /// Dispatches a protocol event under its own method.
    #[inline]
    pub fn emit_event(&self, event: &ProtocolEvent) {
        self.emit(&event.method, event);
    }
}

// ============================================================================
// EventSubscription
// ============================================================================

/// Guard returned by [`EventBus::subscribe`]; unregisters on drop.
///
/// Type-erased so guards from differently-typed buses can live in one
/// teardown stack.
#[must_use = "dropping the subscription immediately unregisters the listener"]
pub struct EventSubscription {
    unregister: Option<Box<dyn FnOnce() + Send>>,
}

impl EventSubscription {
    /// Unregisters the listener now instead of at drop time.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(unregister) = self.unregister.take() {
            unregister();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
