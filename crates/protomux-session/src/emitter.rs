//! Listener registry used by sessions to fan out events.
//!
//! The registry is a plain capability: it knows nothing about requests or
//! disposal. Listeners are invoked from a snapshot, so a listener may add
//! or remove listeners (itself included) while an event is being emitted;
//! such changes apply from the next emit on.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tracing::error;

use crate::lock;

/// Listener for a single event name.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Listener receiving every event together with its name.
pub type AnyListener = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Handle returned on registration, used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    once: bool,
    listener: Listener,
}

#[derive(Default)]
struct Registry {
    by_event: HashMap<String, Vec<Registration>>,
    any: Vec<(ListenerId, AnyListener)>,
}

/// Event name to listeners map.
#[derive(Default)]
pub struct EventEmitter {
    next_id: AtomicU64,
    registry: Mutex<Registry>,
}

impl EventEmitter {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn register(&self, event: &str, once: bool, listener: Listener) -> ListenerId {
        let id = self.allocate_id();
        lock(&self.registry)
            .by_event
            .entry(event.to_string())
            .or_default()
            .push(Registration { id, once, listener });
        id
    }

    /// Registers `listener` for every emit of `event`.
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.register(event, false, Arc::new(listener))
    }

    /// Registers `listener` for the next emit of `event` only.
    pub fn once<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.register(event, true, Arc::new(listener))
    }

    /// Registers `listener` for every event regardless of name.
    pub fn on_any<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        lock(&self.registry).any.push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener registered with [`on`](Self::on) or
    /// [`once`](Self::once). Returns false if it was not registered.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut registry = lock(&self.registry);
        let Some(list) = registry.by_event.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|registration| registration.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            registry.by_event.remove(event);
        }
        removed
    }

    /// Removes a wildcard listener.
    pub fn off_any(&self, id: ListenerId) -> bool {
        let mut registry = lock(&self.registry);
        let before = registry.any.len();
        registry.any.retain(|(registered, _)| *registered != id);
        registry.any.len() != before
    }

    /// Removes every listener of `event`, or every listener at all.
    pub fn remove_all_listeners(&self, event: Option<&str>) {
        let mut registry = lock(&self.registry);
        match event {
            Some(event) => {
                registry.by_event.remove(event);
            }
            None => {
                registry.by_event.clear();
                registry.any.clear();
            }
        }
    }

    /// Number of listeners registered for `event`, wildcards excluded.
    pub fn listener_count(&self, event: &str) -> usize {
        lock(&self.registry)
            .by_event
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Invokes every listener of `event`, then every wildcard listener.
    ///
    /// Returns how many listeners were invoked. A panicking listener is
    /// logged and does not prevent the others from running.
    pub fn emit(&self, event: &str, params: &Value) -> usize {
        let (named, any) = {
            let mut registry = lock(&self.registry);
            let named: Vec<Listener> = match registry.by_event.get_mut(event) {
                Some(list) => {
                    let snapshot = list
                        .iter()
                        .map(|registration| Arc::clone(&registration.listener))
                        .collect();
                    list.retain(|registration| !registration.once);
                    if list.is_empty() {
                        registry.by_event.remove(event);
                    }
                    snapshot
                }
                None => Vec::new(),
            };
            let any: Vec<AnyListener> = registry
                .any
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect();
            (named, any)
        };

        for listener in &named {
            if catch_unwind(AssertUnwindSafe(|| listener(params))).is_err() {
                error!(event, "event listener panicked");
            }
        }
        for listener in &any {
            if catch_unwind(AssertUnwindSafe(|| listener(event, params))).is_err() {
                error!(event, "wildcard event listener panicked");
            }
        }

        named.len() + any.len()
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = lock(&self.registry);
        f.debug_struct("EventEmitter")
            .field("events", &registry.by_event.keys().collect::<Vec<_>>())
            .field("any", &registry.any.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Value) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        (count, move |_: &Value| {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn emit_without_listeners_is_noop() {
        let emitter = EventEmitter::new();
        assert_eq!(emitter.emit("Foo.bar", &json!({})), 0);
    }

    #[test]
    fn all_listeners_receive_params() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b"] {
            let seen = Arc::clone(&seen);
            emitter.on("Foo.bar", move |params| {
                seen.lock().unwrap().push((tag, params.clone()));
            });
        }

        assert_eq!(emitter.emit("Foo.bar", &json!({"x": 1})), 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("a", json!({"x": 1})), ("b", json!({"x": 1}))]
        );
    }

    #[test]
    fn once_fires_once() {
        let emitter = EventEmitter::new();
        let (count, listener) = counter();
        emitter.once("Page.loaded", listener);

        emitter.emit("Page.loaded", &Value::Null);
        emitter.emit("Page.loaded", &Value::Null);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count("Page.loaded"), 0);
    }

    #[test]
    fn off_removes_listener() {
        let emitter = EventEmitter::new();
        let (count, listener) = counter();
        let id = emitter.on("A.b", listener);

        assert!(emitter.off("A.b", id));
        assert!(!emitter.off("A.b", id));
        emitter.emit("A.b", &Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn listener_can_remove_itself_during_emit() {
        let emitter = Arc::new(EventEmitter::new());
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let (count, bump) = counter();

        let inner = Arc::clone(&emitter);
        let own_id = Arc::clone(&slot);
        let id = emitter.on("A.b", move |params| {
            bump(params);
            if let Some(id) = *own_id.lock().unwrap() {
                inner.off("A.b", id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        emitter.emit("A.b", &Value::Null);
        emitter.emit("A.b", &Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_can_register_during_emit() {
        let emitter = Arc::new(EventEmitter::new());
        let inner = Arc::clone(&emitter);
        emitter.once("A.b", move |_| {
            inner.on("A.b", |_| {});
        });

        assert_eq!(emitter.emit("A.b", &Value::Null), 1);
        assert_eq!(emitter.listener_count("A.b"), 1);
    }

    #[test]
    fn wildcard_listener_sees_event_names() {
        let emitter = EventEmitter::new();
        let names = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&names);
        let id = emitter.on_any(move |event, _| sink.lock().unwrap().push(event.to_string()));

        emitter.emit("A.b", &Value::Null);
        emitter.emit("C.d", &Value::Null);
        assert!(emitter.off_any(id));
        emitter.emit("E.f", &Value::Null);

        assert_eq!(*names.lock().unwrap(), vec!["A.b", "C.d"]);
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let emitter = EventEmitter::new();
        let (count, listener) = counter();
        emitter.on("A.b", |_| panic!("listener failure"));
        emitter.on("A.b", listener);

        assert_eq!(emitter.emit("A.b", &Value::Null), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_all_listeners() {
        let emitter = EventEmitter::new();
        emitter.on("A.b", |_| {});
        emitter.on("C.d", |_| {});
        emitter.on_any(|_, _| {});

        emitter.remove_all_listeners(Some("A.b"));
        assert_eq!(emitter.listener_count("A.b"), 0);
        assert_eq!(emitter.listener_count("C.d"), 1);

        emitter.remove_all_listeners(None);
        assert_eq!(emitter.listener_count("C.d"), 0);
        assert_eq!(emitter.emit("C.d", &Value::Null), 0);
    }
}
