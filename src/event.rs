//! Synchronous publish/subscribe
//!
//! Listeners are invoked on the emitting thread, in registration order.
//! A listener may subscribe or unsubscribe (itself included) while an emit
//! is in progress; changes take effect from the next emit.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

/// An event that can be routed by kind
pub trait Event: Clone + Send + 'static {
    /// Discriminant used to route the event to listeners
    type Kind: Copy + Eq + fmt::Debug + Send + Sync + 'static;

    /// The kind of this event
    fn kind(&self) -> Self::Kind;
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Listener<E: Event> {
    id: ListenerId,
    /// `None` receives every event
    kind: Option<E::Kind>,
    handler: Handler<E>,
}

/// Event bus with synchronous fan-out
pub struct EventBus<E: Event> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Listener<E>>>,
}

impl<E: Event> EventBus<E> {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<Listener<E>>> {
        // A panicking listener must not take the bus down with it
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, kind: Option<E::Kind>, handler: Handler<E>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners().push(Listener { id, kind, handler });
        id
    }

    /// Register a listener for one event kind
    pub fn subscribe<F>(&self, kind: E::Kind, handler: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(handler))
    }

    /// Register a listener for every event
    pub fn subscribe_all<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    /// Remove every listener
    pub fn clear(&self) {
        self.listeners().clear();
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }

    /// Deliver an event to every matching listener
    ///
    /// Returns the number of listeners invoked.
    pub fn emit(&self, event: &E) -> usize {
        let kind = event.kind();
        let targets: Vec<Handler<E>> = self
            .listeners()
            .iter()
            .filter(|l| l.kind.map_or(true, |k| k == kind))
            .map(|l| Arc::clone(&l.handler))
            .collect();

        for handler in &targets {
            handler(event);
        }
        targets.len()
    }

    /// Emit one event per change, then the aggregate if anything changed
    ///
    /// Returns true if at least one change was emitted.
    pub fn emit_changes<I>(&self, changes: I, aggregate: Option<E>) -> bool
    where
        I: IntoIterator<Item = E>,
    {
        let mut any = false;
        for change in changes {
            self.emit(&change);
            any = true;
        }
        if any {
            if let Some(ref event) = aggregate {
                self.emit(event);
            }
        }
        any
    }

    /// Forward every event into an unbounded channel
    ///
    /// The listener removes itself once the receiver is dropped.
    pub fn channel(self: &Arc<Self>) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let bus = Arc::downgrade(self);
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let own_id = Arc::clone(&slot);

        let id = self.subscribe_all(move |event: &E| {
            if tx.send(event.clone()).is_err() {
                let id = *own_id.lock().unwrap_or_else(|e| e.into_inner());
                if let (Some(bus), Some(id)) = (bus.upgrade(), id) {
                    bus.unsubscribe(id);
                }
            }
        });
        *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(id);
        rx
    }
}

impl<E: Event> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
