// src/chat/bus.rs
// In-process broadcast of submitted commands to open stream relays

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tracing::debug;

use super::types::CommandEvent;

/// Handle identifying one registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Command bus shared by the submission endpoint and every relay
///
/// `publish` fans an event out synchronously to all listeners in
/// registration order. Every listener receives the same `Arc`, so the
/// context is shared rather than copied. Events published while nobody
/// listens are dropped.
#[derive(Debug, Default)]
pub struct CommandBus {
    inner: Mutex<Listeners>,
}

#[derive(Debug, Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(SubscriptionId, mpsc::UnboundedSender<Arc<CommandEvent>>)>,
}

impl CommandBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn listeners(&self) -> MutexGuard<'_, Listeners> {
        // The lock is never held across an await or a panic-prone call
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deliver `event` to every current listener, returning how many got it
    pub fn publish(&self, event: CommandEvent) -> usize {
        let event = Arc::new(event);
        let mut listeners = self.listeners();

        let mut delivered = 0;
        listeners.entries.retain(|(id, tx)| {
            if tx.send(Arc::clone(&event)).is_ok() {
                delivered += 1;
                true
            } else {
                debug!(subscription = id.0, "pruning listener with dropped receiver");
                false
            }
        });

        if delivered == 0 {
            debug!(command = %event.command, "no listeners, command dropped");
        }
        delivered
    }

    /// Register a new listener
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut listeners = self.listeners();
        let id = SubscriptionId(listeners.next_id);
        listeners.next_id += 1;
        listeners.entries.push((id, tx));

        Subscription {
            id,
            rx,
            bus: Arc::downgrade(self),
            active: true,
        }
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.entries.len();
        listeners.entries.retain(|(entry, _)| *entry != id);
        listeners.entries.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners().entries.len()
    }
}

/// A live registration on the bus; dropping it unsubscribes
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<Arc<CommandEvent>>,
    bus: Weak<CommandBus>,
    active: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Next event delivered to this listener.
    ///
    /// Events already queued before `unsubscribe` are still handed out;
    /// `None` once unsubscribed and drained, or when the bus is gone.
    pub async fn recv(&mut self) -> Option<Arc<CommandEvent>> {
        self.rx.recv().await
    }

    /// Detach from the bus; safe to call any number of times
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
