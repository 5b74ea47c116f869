//! Synchronous multi-listener pub/sub used by framework bindings.
//!
//! The bus deliberately isolates listeners from each other: every listener
//! runs inside its own panic boundary so one failing subscriber can never
//! break its siblings or the emitting operation. Invocation order matches
//! subscription order.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tracing::warn;

/// Events recognised by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    /// Initial flag and config load completed (successfully or not).
    Ready,
    /// A transport failure was absorbed by the facade.
    Error,
    /// The flag snapshot was replaced.
    FlagsUpdated,
    /// The config snapshot was replaced.
    ConfigsUpdated,
    /// Legacy alias fired alongside [`EventName::ConfigsUpdated`].
    RemoteConfigUpdated,
    /// An AI config changed server-side; no re-fetch is performed.
    AiConfigUpdated,
    /// The push-stream transport was activated or deactivated.
    RealtimeChanged,
}

impl EventName {
    /// Returns the wire name used by the hosted SDKs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Error => "error",
            Self::FlagsUpdated => "flags-updated",
            Self::ConfigsUpdated => "configs-updated",
            Self::RemoteConfigUpdated => "remote-config-updated",
            Self::AiConfigUpdated => "ai-config-updated",
            Self::RealtimeChanged => "realtime-changed",
        }
    }
}

type Listener = dyn Fn(&Value) + Send + Sync;

/// Listener registry keyed by event name.
#[derive(Default)]
struct BusInner {
    listeners: HashMap<EventName, Vec<(u64, Arc<Listener>)>>,
    next_id: u64,
}

/// Synchronous pub/sub bus.
///
/// Cloning is cheap; clones share the same listener registry.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl std::fmt::Debug for EventBus {
    /// Prints listener counts without leaking closures.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .inner
            .lock()
            .map(|inner| inner.listeners.values().map(Vec::len).sum::<usize>())
            .unwrap_or(0);
        f.debug_struct("EventBus").field("listeners", &count).finish()
    }
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener and returns a handle that removes it.
    pub fn on(
        &self,
        event: EventName,
        listener: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        let mut inner = self.inner.lock().expect("event bus poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .listeners
            .entry(event)
            .or_default()
            .push((id, Arc::new(listener)));
        Subscription {
            bus: Arc::downgrade(&self.inner),
            event,
            id,
        }
    }

    /// Invokes every current listener for `event`, in subscription order.
    ///
    /// Listeners are snapshotted before invocation so a listener that
    /// subscribes or unsubscribes mid-emit does not affect this delivery.
    /// Panics are caught per listener and logged, never propagated.
    pub fn emit(&self, event: EventName, payload: &Value) {
        let snapshot: Vec<Arc<Listener>> = {
            let inner = self.inner.lock().expect("event bus poisoned");
            inner
                .listeners
                .get(&event)
                .map(|entries| entries.iter().map(|(_, l)| l.clone()).collect())
                .unwrap_or_default()
        };
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(payload))).is_err() {
                warn!(event = event.as_str(), "event listener panicked; discarding");
            }
        }
    }

    /// Removes every listener for every event.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("event bus poisoned");
        inner.listeners.clear();
    }
}

/// Handle returned by [`EventBus::on`]; dropping it keeps the listener alive,
/// calling [`Subscription::unsubscribe`] removes it.
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<Mutex<BusInner>>,
    event: EventName,
    id: u64,
}

impl Subscription {
    /// Removes the listener this handle refers to. Safe to call after the
    /// bus itself was destroyed.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.bus.upgrade() {
            let mut inner = inner.lock().expect("event bus poisoned");
            if let Some(entries) = inner.listeners.get_mut(&self.event) {
                entries.retain(|(id, _)| *id != self.id);
            }
        }
    }
}
