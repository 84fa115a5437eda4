//! Publish/subscribe event bus with producer authorization.
//!
//! Unlike a broadcast channel, delivery here is fully synchronous:
//! `publish` returns only after every subscriber for the event kind has
//! run, in the order they subscribed.  Handlers that need non-blocking
//! behavior must hand the event off internally (e.g. onto an `mpsc`
//! channel) and return.
//!
//! Each [`EventKind`] has exactly one authorized producer, registered
//! via [`EventBus::declare_producer`] before the first publish.  A
//! publish from any other component is rejected without delivering
//! anything.

use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;
use tracing::{debug, error, trace, warn};

use crate::error::{BusError, BusResult};
use crate::event::{Component, Event, EventKind};

/// Default capacity of the diagnostic history ring.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Handler return type.  An `Err` is logged and counted but never stops
/// delivery to later subscribers.
pub type HandlerResult = anyhow::Result<()>;

type Handler = Arc<dyn Fn(&Arc<Event>) -> HandlerResult + Send + Sync>;

/// Opaque handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionToken {
    kind: EventKind,
    id: u64,
}

#[derive(Clone)]
struct Subscriber {
    id: u64,
    handler: Handler,
}

/// Per-kind delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindStats {
    /// Events of this kind accepted for delivery.
    pub published: u64,
    /// Individual handler invocations that completed without error.
    pub delivered: u64,
    /// Handler invocations that returned an error or panicked.
    pub handler_failures: u64,
}

#[derive(Default)]
struct Registry {
    producers: HashMap<EventKind, Component>,
    subscribers: HashMap<EventKind, Vec<Subscriber>>,
}

struct Diagnostics {
    history: VecDeque<Arc<Event>>,
    capacity: usize,
    stats: HashMap<EventKind, KindStats>,
}

/// The event bus.  Cheaply cloneable and `Send + Sync`.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    registry: RwLock<Registry>,
    diagnostics: Mutex<Diagnostics>,
    next_token: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus whose history ring holds at most `history_capacity`
    /// events.
    #[must_use]
    pub fn new(history_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry: RwLock::new(Registry::default()),
                diagnostics: Mutex::new(Diagnostics {
                    history: VecDeque::with_capacity(history_capacity),
                    capacity: history_capacity,
                    stats: HashMap::new(),
                }),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    /// Register `component` as the single authorized producer of `kind`.
    ///
    /// Re-declaring the same pairing is a no-op; declaring a different
    /// component for an already-owned kind fails with
    /// [`BusError::ProducerConflict`].
    pub fn declare_producer(&self, kind: EventKind, component: Component) -> BusResult<()> {
        let mut registry = self.inner.registry.write().expect("registry lock poisoned");
        match registry.producers.get(&kind) {
            Some(existing) if *existing == component => Ok(()),
            Some(existing) => Err(BusError::ProducerConflict {
                kind,
                registered: *existing,
                attempted: component,
            }),
            None => {
                debug!(kind = %kind, producer = %component, "producer registered");
                registry.producers.insert(kind, component);
                Ok(())
            }
        }
    }

    /// Subscribe `handler` to all future events of `kind`.
    ///
    /// Handlers run synchronously inside `publish`, in subscription
    /// order.  Events published before this call are not replayed.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionToken
    where
        F: Fn(&Arc<Event>) -> HandlerResult + Send + Sync + 'static,
    {
        let id = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let mut registry = self.inner.registry.write().expect("registry lock poisoned");
        registry.subscribers.entry(kind).or_default().push(Subscriber {
            id,
            handler: Arc::new(handler),
        });
        trace!(kind = %kind, token = id, "subscriber added");
        SubscriptionToken { kind, id }
    }

    /// Remove a subscription.  Unknown or already-removed tokens are
    /// ignored.
    pub fn unsubscribe(&self, token: SubscriptionToken) {
        let mut registry = self.inner.registry.write().expect("registry lock poisoned");
        if let Some(subs) = registry.subscribers.get_mut(&token.kind) {
            subs.retain(|s| s.id != token.id);
        }
    }

    /// Publish an event, delivering it synchronously to every subscriber
    /// of `kind` in subscription order.
    ///
    /// Returns the number of handlers that completed without error.
    /// Fails without delivering anything if `source` is not the
    /// registered producer of `kind`.
    pub fn publish(&self, source: Component, kind: EventKind, payload: Value) -> BusResult<usize> {
        // Authorization check and handler snapshot under one read lock;
        // handlers run with no lock held so they may publish themselves.
        let handlers: Vec<Subscriber> = {
            let registry = self.inner.registry.read().expect("registry lock poisoned");
            match registry.producers.get(&kind) {
                None => return Err(BusError::UnknownProducer { kind }),
                Some(registered) if *registered != source => {
                    warn!(kind = %kind, source = %source, registered = %registered,
                          "unauthorized publish rejected");
                    return Err(BusError::UnauthorizedProducer {
                        kind,
                        source_component: source,
                        registered: *registered,
                    });
                }
                Some(_) => {}
            }
            registry.subscribers.get(&kind).cloned().unwrap_or_default()
        };

        let event = Arc::new(Event::new(kind, source, payload));
        trace!(kind = %kind, event_id = %event.id, subscribers = handlers.len(), "publishing event");

        self.record_published(&event);

        let mut delivered = 0usize;
        let mut failures = 0u64;
        for sub in &handlers {
            match catch_unwind(AssertUnwindSafe(|| (sub.handler)(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    failures += 1;
                    error!(kind = %kind, event_id = %event.id, token = sub.id, %err,
                           "event handler failed");
                }
                Err(_) => {
                    failures += 1;
                    error!(kind = %kind, event_id = %event.id, token = sub.id,
                           "event handler panicked");
                }
            }
        }

        self.record_delivered(kind, delivered as u64, failures);
        Ok(delivered)
    }

    /// Most recent events, newest last, optionally filtered by kind.
    pub fn recent(&self, count: usize, kind: Option<EventKind>) -> Vec<Arc<Event>> {
        let diag = self.inner.diagnostics.lock().expect("diagnostics lock poisoned");
        let mut events: Vec<Arc<Event>> = diag
            .history
            .iter()
            .rev()
            .filter(|e| kind.is_none_or(|k| e.kind == k))
            .take(count)
            .cloned()
            .collect();
        events.reverse();
        events
    }

    /// Delivery counters for a single event kind.
    pub fn kind_stats(&self, kind: EventKind) -> KindStats {
        let diag = self.inner.diagnostics.lock().expect("diagnostics lock poisoned");
        diag.stats.get(&kind).copied().unwrap_or_default()
    }

    /// Number of subscribers currently registered for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        let registry = self.inner.registry.read().expect("registry lock poisoned");
        registry.subscribers.get(&kind).map_or(0, Vec::len)
    }

    fn record_published(&self, event: &Arc<Event>) {
        let mut diag = self.inner.diagnostics.lock().expect("diagnostics lock poisoned");
        if diag.history.len() == diag.capacity {
            diag.history.pop_front();
        }
        diag.history.push_back(Arc::clone(event));
        diag.stats.entry(event.kind).or_default().published += 1;
    }

    fn record_delivered(&self, kind: EventKind, delivered: u64, failures: u64) {
        let mut diag = self.inner.diagnostics.lock().expect("diagnostics lock poisoned");
        let stats = diag.stats.entry(kind).or_default();
        stats.delivered += delivered;
        stats.handler_failures += failures;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    fn test_bus() -> EventBus {
        let bus = EventBus::new(DEFAULT_HISTORY_CAPACITY);
        bus.declare_producer(EventKind::InputReceived, Component::Test)
            .unwrap();
        bus
    }

    #[test]
    fn publish_delivers_to_subscriber() {
        let bus = test_bus();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = Arc::clone(&seen);
        bus.subscribe(EventKind::InputReceived, move |event| {
            seen_clone.lock().unwrap().push(event.payload.clone());
            Ok(())
        });

        let delivered = bus
            .publish(Component::Test, EventKind::InputReceived, json!({"text": "hi"}))
            .unwrap();

        assert_eq!(delivered, 1);
        assert_eq!(seen.lock().unwrap().as_slice(), &[json!({"text": "hi"})]);
    }

    #[test]
    fn unauthorized_publish_is_rejected_and_delivers_nothing() {
        let bus = test_bus();
        let seen = Arc::new(Mutex::new(0u32));

        let seen_clone = Arc::clone(&seen);
        bus.subscribe(EventKind::InputReceived, move |_| {
            *seen_clone.lock().unwrap() += 1;
            Ok(())
        });

        let err = bus
            .publish(Component::Coordinator, EventKind::InputReceived, json!({}))
            .unwrap_err();

        assert!(matches!(err, BusError::UnauthorizedProducer { .. }));
        assert_eq!(*seen.lock().unwrap(), 0);
        assert!(bus.recent(10, None).is_empty());
    }

    #[test]
    fn publish_without_declared_producer_fails() {
        let bus = EventBus::default();
        let err = bus
            .publish(Component::Test, EventKind::SessionStarted, json!({}))
            .unwrap_err();
        assert!(matches!(err, BusError::UnknownProducer { .. }));
    }

    #[test]
    fn producer_declaration_conflicts() {
        let bus = EventBus::default();
        bus.declare_producer(EventKind::SessionStarted, Component::SessionManager)
            .unwrap();
        // Same pairing again is fine.
        bus.declare_producer(EventKind::SessionStarted, Component::SessionManager)
            .unwrap();
        let err = bus
            .declare_producer(EventKind::SessionStarted, Component::Coordinator)
            .unwrap_err();
        assert!(matches!(err, BusError::ProducerConflict { .. }));
    }

    #[test]
    fn handlers_run_in_subscription_order() {
        let bus = test_bus();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            bus.subscribe(EventKind::InputReceived, move |_| {
                order.lock().unwrap().push(label);
                Ok(())
            });
        }

        bus.publish(Component::Test, EventKind::InputReceived, json!({}))
            .unwrap();
        assert_eq!(order.lock().unwrap().as_slice(), &["first", "second", "third"]);
    }

    #[test]
    fn handler_error_does_not_stop_later_handlers() {
        let bus = test_bus();
        let reached = Arc::new(Mutex::new(false));

        bus.subscribe(EventKind::InputReceived, |_| {
            anyhow::bail!("boom")
        });
        let reached_clone = Arc::clone(&reached);
        bus.subscribe(EventKind::InputReceived, move |_| {
            *reached_clone.lock().unwrap() = true;
            Ok(())
        });

        let delivered = bus
            .publish(Component::Test, EventKind::InputReceived, json!({}))
            .unwrap();

        assert_eq!(delivered, 1);
        assert!(*reached.lock().unwrap());

        let stats = bus.kind_stats(EventKind::InputReceived);
        assert_eq!(stats.published, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.handler_failures, 1);
    }

    #[test]
    fn handler_panic_is_isolated() {
        let bus = test_bus();
        let reached = Arc::new(Mutex::new(false));

        bus.subscribe(EventKind::InputReceived, |_| panic!("handler bug"));
        let reached_clone = Arc::clone(&reached);
        bus.subscribe(EventKind::InputReceived, move |_| {
            *reached_clone.lock().unwrap() = true;
            Ok(())
        });

        bus.publish(Component::Test, EventKind::InputReceived, json!({}))
            .unwrap();
        assert!(*reached.lock().unwrap());
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus = test_bus();
        let count = Arc::new(Mutex::new(0u32));

        let count_clone = Arc::clone(&count);
        let token = bus.subscribe(EventKind::InputReceived, move |_| {
            *count_clone.lock().unwrap() += 1;
            Ok(())
        });

        bus.unsubscribe(token);
        bus.unsubscribe(token);

        bus.publish(Component::Test, EventKind::InputReceived, json!({}))
            .unwrap();
        assert_eq!(*count.lock().unwrap(), 0);
        assert_eq!(bus.subscriber_count(EventKind::InputReceived), 0);
    }

    #[test]
    fn history_ring_is_bounded() {
        let bus = EventBus::new(3);
        bus.declare_producer(EventKind::InputReceived, Component::Test)
            .unwrap();

        for i in 0..5 {
            bus.publish(Component::Test, EventKind::InputReceived, json!({"i": i}))
                .unwrap();
        }

        let recent = bus.recent(10, None);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].payload, json!({"i": 2}));
        assert_eq!(recent[2].payload, json!({"i": 4}));
    }

    #[test]
    fn recent_keeps_newest_events_oldest_first() {
        let bus = test_bus();

        for i in 0..5 {
            bus.publish(Component::Test, EventKind::InputReceived, json!({"i": i}))
                .unwrap();
        }

        // A count smaller than the history keeps the newest events,
        // still ordered oldest to newest.
        let recent = bus.recent(2, None);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].payload, json!({"i": 3}));
        assert_eq!(recent[1].payload, json!({"i": 4}));
    }

    #[test]
    fn recent_filters_by_kind() {
        let bus = test_bus();
        bus.declare_producer(EventKind::SessionStarted, Component::Test)
            .unwrap();

        bus.publish(Component::Test, EventKind::InputReceived, json!({}))
            .unwrap();
        bus.publish(Component::Test, EventKind::SessionStarted, json!({}))
            .unwrap();
        bus.publish(Component::Test, EventKind::InputReceived, json!({}))
            .unwrap();

        let filtered = bus.recent(10, Some(EventKind::SessionStarted));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].kind, EventKind::SessionStarted);
    }

    #[test]
    fn subscribers_share_one_event_allocation() {
        let bus = test_bus();
        let captured: Arc<Mutex<Vec<Arc<Event>>>> = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..2 {
            let captured = Arc::clone(&captured);
            bus.subscribe(EventKind::InputReceived, move |event| {
                captured.lock().unwrap().push(Arc::clone(event));
                Ok(())
            });
        }

        bus.publish(Component::Test, EventKind::InputReceived, json!({}))
            .unwrap();

        let captured = captured.lock().unwrap();
        assert!(Arc::ptr_eq(&captured[0], &captured[1]));
    }
}
