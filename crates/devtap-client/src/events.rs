//! Event fan-out: persistent listeners and one-shot waiters.
//!
//! Every inbound event is offered to both mechanisms independently. A
//! one-shot waiter consumes exactly one occurrence of its event name, in
//! registration order; persistent listeners see every occurrence.

use std::collections::{HashMap, VecDeque};
use std::future::{Future, IntoFuture};
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;

use crate::error::CdpError;
use crate::protocol::{decode_value, CdpEvent};
use crate::slot::Slot;

/// Error type listeners may return; it is logged and otherwise ignored.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

type Handler = Arc<dyn Fn(&CdpEvent) -> Result<(), ListenerError> + Send + Sync>;

/// Identifies a persistent listener for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    /// Only events with this method are delivered when set.
    filter: Option<String>,
    handler: Handler,
}

#[derive(Default)]
struct Waiters {
    queues: HashMap<String, VecDeque<Slot>>,
    closed: Option<CdpError>,
}

/// Registry of persistent listeners and one-shot waiter queues.
pub struct EventRegistry {
    waiters: Mutex<Waiters>,
    listeners: RwLock<Vec<Listener>>,
    next_listener: AtomicU64,
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("listeners", &self.listeners.read().len())
            .field("waiting", &self.waiting_count())
            .finish()
    }
}

impl EventRegistry {
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(Waiters::default()),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    // -----------------------------------------------------------------------
    // Persistent listeners
    // -----------------------------------------------------------------------

    /// Add a listener for every event (`filter = None`) or for one method.
    pub fn subscribe<F>(&self, filter: Option<&str>, handler: F) -> ListenerId
    where
        F: Fn(&CdpEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push(Listener {
            id,
            filter: filter.map(str::to_owned),
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove a listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Invoke every matching listener with `event`.
    ///
    /// A listener that errors or panics is logged and skipped; the rest
    /// still run. Returns how many listeners failed.
    pub fn notify_listeners(&self, event: &CdpEvent) -> usize {
        // Snapshot so handlers may (un)subscribe without deadlocking.
        let handlers: Vec<(ListenerId, Handler)> = self
            .listeners
            .read()
            .iter()
            .filter(|l| l.filter.as_deref().is_none_or(|m| m == event.method))
            .map(|l| (l.id, Arc::clone(&l.handler)))
            .collect();

        let mut failures = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::warn!(listener = id.0, method = %event.method, error = %e, "event listener failed");
                }
                Err(_) => {
                    failures += 1;
                    tracing::warn!(listener = id.0, method = %event.method, "event listener panicked");
                }
            }
        }
        failures
    }

    // -----------------------------------------------------------------------
    // One-shot waiters
    // -----------------------------------------------------------------------

    /// Queue a one-shot waiter for the next occurrence of `method`.
    pub fn await_once(&self, method: &str) -> Result<Slot, CdpError> {
        let mut waiters = self.waiters.lock();
        if let Some(err) = &waiters.closed {
            return Err(err.clone());
        }
        let slot = Slot::new();
        waiters
            .queues
            .entry(method.to_owned())
            .or_default()
            .push_back(slot.clone());
        Ok(slot)
    }

    /// Hand `event` to the oldest live waiter for its method.
    ///
    /// Waiters whose caller has gone away are discarded without consuming
    /// the occurrence. Returns `true` if a waiter was settled.
    pub fn deliver(&self, event: &CdpEvent) -> bool {
        let mut waiters = self.waiters.lock();
        let Some(queue) = waiters.queues.get_mut(&event.method) else {
            return false;
        };

        let mut delivered = false;
        while let Some(slot) = queue.pop_front() {
            // The queue's own handle is the only one left: abandoned.
            if slot.holders() == 1 {
                continue;
            }
            delivered = slot.settle(Ok(event.params.clone()));
            if delivered {
                break;
            }
        }

        if queue.is_empty() {
            waiters.queues.remove(&event.method);
        }
        delivered
    }

    /// Fail every queued waiter with `err` and refuse new ones.
    pub fn drain_all(&self, err: CdpError) -> usize {
        let drained: Vec<Slot> = {
            let mut waiters = self.waiters.lock();
            waiters.closed = Some(err.clone());
            waiters
                .queues
                .drain()
                .flat_map(|(_, queue)| queue)
                .collect()
        };
        let count = drained.len();
        for slot in drained {
            slot.settle(Err(err.clone()));
        }
        count
    }

    pub fn waiting_count(&self) -> usize {
        self.waiters.lock().queues.values().map(VecDeque::len).sum()
    }
}

// ---------------------------------------------------------------------------
// EventWait
// ---------------------------------------------------------------------------

/// A registered one-shot wait for an event, decoded to `T` when awaited.
///
/// Registration happens when the wait is created, so a command that
/// triggers the event can be sent afterwards without missing it. Dropping
/// the wait abandons it.
#[must_use = "an event wait does nothing unless awaited"]
pub struct EventWait<T> {
    method: String,
    slot: Slot,
    _shape: PhantomData<fn() -> T>,
}

impl<T> EventWait<T> {
    pub(crate) fn new(method: &str, slot: Slot) -> Self {
        Self {
            method: method.to_owned(),
            slot,
            _shape: PhantomData,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl<T> std::fmt::Debug for EventWait<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWait")
            .field("method", &self.method)
            .field("settled", &self.slot.is_settled())
            .finish()
    }
}

impl<T> IntoFuture for EventWait<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = Result<T, CdpError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            let params = self.slot.wait().await?;
            decode_value(params)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;

    fn event(method: &str, params: Value) -> CdpEvent {
        CdpEvent::new(method, params)
    }

    #[test]
    fn waiters_are_satisfied_in_registration_order() {
        let registry = EventRegistry::new();
        let first = registry.await_once("Page.loadEventFired").unwrap();
        let second = registry.await_once("Page.loadEventFired").unwrap();

        assert!(registry.deliver(&event("Page.loadEventFired", json!({"t": 1}))));
        assert_eq!(first.peek().unwrap().unwrap(), json!({"t": 1}));
        assert!(second.peek().is_none());

        assert!(registry.deliver(&event("Page.loadEventFired", json!({"t": 2}))));
        assert_eq!(second.peek().unwrap().unwrap(), json!({"t": 2}));
        assert_eq!(registry.waiting_count(), 0);
    }

    #[test]
    fn occurrence_without_waiter_is_not_remembered() {
        let registry = EventRegistry::new();
        assert!(!registry.deliver(&event("Page.loadEventFired", json!({"t": 1}))));
        let late = registry.await_once("Page.loadEventFired").unwrap();
        assert!(late.peek().is_none());
    }

    #[test]
    fn other_methods_do_not_satisfy_waiters() {
        let registry = EventRegistry::new();
        let slot = registry.await_once("Page.loadEventFired").unwrap();
        assert!(!registry.deliver(&event("Page.frameNavigated", json!({}))));
        assert!(slot.peek().is_none());
    }

    #[test]
    fn abandoned_waiters_do_not_consume_events() {
        let registry = EventRegistry::new();
        drop(registry.await_once("Network.loadingFinished").unwrap());
        let live = registry.await_once("Network.loadingFinished").unwrap();
        assert!(registry.deliver(&event("Network.loadingFinished", json!({"requestId": "1"}))));
        assert_eq!(live.peek().unwrap().unwrap()["requestId"], "1");
    }

    #[test]
    fn listeners_see_every_event_alongside_waiters() {
        let registry = EventRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        registry.subscribe(None, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let slot = registry.await_once("A.b").unwrap();
        for i in 0..3 {
            let e = event("A.b", json!({ "i": i }));
            registry.deliver(&e);
            registry.notify_listeners(&e);
        }
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert_eq!(slot.peek().unwrap().unwrap(), json!({"i": 0}));
    }

    #[test]
    fn failing_listener_does_not_block_others() {
        let registry = EventRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));

        registry.subscribe(None, |_| Err("listener refused".into()));
        registry.subscribe(None, |_| panic!("listener exploded"));
        let counter = Arc::clone(&seen);
        registry.subscribe(None, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(registry.notify_listeners(&event("A.b", Value::Null)), 2);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn filtered_listener_and_unsubscribe() {
        let registry = EventRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let id = registry.subscribe(Some("Page.loadEventFired"), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        registry.notify_listeners(&event("Page.frameNavigated", Value::Null));
        registry.notify_listeners(&event("Page.loadEventFired", Value::Null));
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        registry.notify_listeners(&event("Page.loadEventFired", Value::Null));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drain_fails_waiters_and_rejects_new_ones() {
        let registry = EventRegistry::new();
        let a = registry.await_once("A.a").unwrap();
        let b = registry.await_once("B.b").unwrap();
        assert_eq!(registry.drain_all(CdpError::ConnectionClosed), 2);
        assert!(matches!(a.peek(), Some(Err(CdpError::ConnectionClosed))));
        assert!(matches!(b.peek(), Some(Err(CdpError::ConnectionClosed))));
        assert!(registry.await_once("A.a").is_err());
    }

    #[tokio::test]
    async fn event_wait_decodes_payload() {
        #[derive(serde::Deserialize)]
        struct Loaded {
            t: u32,
        }

        let registry = EventRegistry::new();
        let wait: EventWait<Loaded> =
            EventWait::new("Page.loadEventFired", registry.await_once("Page.loadEventFired").unwrap());
        registry.deliver(&event("Page.loadEventFired", json!({"t": 1})));
        assert_eq!(wait.await.unwrap().t, 1);
    }
}
