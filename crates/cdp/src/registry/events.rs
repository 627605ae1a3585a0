//! Event Subscriber Registry
//!
//! event name -> subscribers in insertion order. Handlers are never called
//! from in here: `get` hands out a snapshot and the receive loop invokes it
//! after the shard lock is released, so a handler may freely subscribe,
//! unsubscribe or send commands.

use dashmap::DashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::protocol::Event;

/// Event subscriber callback
pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Opaque token identifying one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// A callback plus the identity used to remove it
#[derive(Clone)]
pub struct Subscriber {
    id: HandlerId,
    callback: EventCallback,
}

impl Subscriber {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Invoke the callback, containing any panic. Returns false if it panicked.
    pub fn invoke(&self, event: &Event) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.callback)(event))) {
            Ok(()) => true,
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(
                    "Handler {:?} for {} panicked: {}",
                    self.id,
                    event.method,
                    reason
                );
                false
            }
        }
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish()
    }
}

#[derive(Debug)]
pub struct EventRegistry {
    subscribers: DashMap<String, Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Wrap a callback in a subscriber with a fresh identity
    pub fn subscriber(&self, callback: EventCallback) -> Subscriber {
        Subscriber {
            id: HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            callback,
        }
    }

    /// Append a subscriber for `event`; existing ones are kept
    pub fn add(&self, event: impl Into<String>, subscriber: Subscriber) -> HandlerId {
        let id = subscriber.id;
        self.subscribers
            .entry(event.into())
            .or_default()
            .push(subscriber);
        id
    }

    /// Remove a subscriber by identity. Unknown ids are a no-op.
    pub fn remove(&self, event: &str, id: HandlerId) -> bool {
        let removed = match self.subscribers.get_mut(event) {
            Some(mut list) => match list.iter().position(|s| s.id == id) {
                Some(pos) => {
                    list.remove(pos);
                    true
                }
                None => false,
            },
            None => false,
        };

        if removed {
            self.subscribers.remove_if(event, |_, list| list.is_empty());
        }
        removed
    }

    /// Snapshot of the subscribers for `event`, in invocation order
    pub fn get(&self, event: &str) -> Vec<Subscriber> {
        self.subscribers
            .get(event)
            .map(|list| list.value().clone())
            .unwrap_or_default()
    }

    /// Swap the whole list for `event`, returning the previous one
    pub fn replace(&self, event: impl Into<String>, subscribers: Vec<Subscriber>) -> Vec<Subscriber> {
        let event = event.into();
        if subscribers.is_empty() {
            return self
                .subscribers
                .remove(&event)
                .map(|(_, old)| old)
                .unwrap_or_default();
        }
        self.subscribers
            .insert(event, subscribers)
            .unwrap_or_default()
    }

    pub fn count(&self, event: &str) -> usize {
        self.subscribers.get(event).map_or(0, |list| list.len())
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    fn event(method: &str) -> Event {
        Event {
            method: method.to_string(),
            params: Value::Null,
            session_id: None,
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> EventCallback {
        let log = log.clone();
        Arc::new(move |_: &Event| log.lock().unwrap().push(tag))
    }

    #[test]
    fn test_insertion_order_preserved() {
        let registry = EventRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let subscriber = registry.subscriber(recorder(&log, tag));
            registry.add("X.changed", subscriber);
        }

        let ev = event("X.changed");
        for subscriber in registry.get("X.changed") {
            subscriber.invoke(&ev);
        }
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_remove_by_identity() {
        let registry = EventRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let a = registry.add("X.changed", registry.subscriber(recorder(&log, "a")));
        let b = registry.add("X.changed", registry.subscriber(recorder(&log, "b")));

        assert!(registry.remove("X.changed", a));
        assert!(!registry.remove("X.changed", a));
        assert!(!registry.remove("Y.other", b));

        let remaining: Vec<HandlerId> = registry.get("X.changed").iter().map(Subscriber::id).collect();
        assert_eq!(remaining, vec![b]);

        assert!(registry.remove("X.changed", b));
        assert_eq!(registry.count("X.changed"), 0);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let registry = EventRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = registry.add("X.changed", registry.subscriber(recorder(&log, "a")));

        let snapshot = registry.get("X.changed");
        registry.remove("X.changed", id);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.count("X.changed"), 0);
    }

    #[test]
    fn test_replace_swaps_list() {
        let registry = EventRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let old = registry.add("X.changed", registry.subscriber(recorder(&log, "old")));

        let fresh = vec![
            registry.subscriber(recorder(&log, "new1")),
            registry.subscriber(recorder(&log, "new2")),
        ];
        let previous = registry.replace("X.changed", fresh);
        assert_eq!(previous.iter().map(Subscriber::id).collect::<Vec<_>>(), vec![old]);
        assert_eq!(registry.count("X.changed"), 2);

        let cleared = registry.replace("X.changed", Vec::new());
        assert_eq!(cleared.len(), 2);
        assert_eq!(registry.count("X.changed"), 0);
    }

    #[test]
    fn test_handler_may_mutate_registry() {
        let registry = Arc::new(EventRegistry::new());
        let inner = registry.clone();
        registry.add(
            "X.changed",
            registry.subscriber(Arc::new(move |_: &Event| {
                inner.add("Y.other", inner.subscriber(Arc::new(|_: &Event| {})));
            })),
        );

        let ev = event("X.changed");
        for subscriber in registry.get("X.changed") {
            assert!(subscriber.invoke(&ev));
        }
        assert_eq!(registry.count("Y.other"), 1);
    }

    #[test]
    fn test_panicking_handler_contained() {
        let registry = EventRegistry::new();
        let subscriber = registry.subscriber(Arc::new(|event: &Event| {
            if event.params == json!({ "boom": true }) {
                panic!("handler exploded");
            }
        }));

        let mut ev = event("X.changed");
        assert!(subscriber.invoke(&ev));
        ev.params = json!({ "boom": true });
        assert!(!subscriber.invoke(&ev));
    }
}
