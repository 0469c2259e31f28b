//! Fan-out of session events to any number of listeners.
//!
//! Each listener holds a [`Subscription`]. Dropping it removes the listener
//! from the hub, so nothing keeps delivering into a channel nobody reads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;
use tracing::trace;

type Listeners<T> = Mutex<HashMap<u64, mpsc::UnboundedSender<T>>>;

struct HubInner<T> {
    next_id: AtomicU64,
    listeners: Listeners<T>,
}

impl<T> HubInner<T> {
    fn listeners(&self) -> MutexGuard<'_, HashMap<u64, mpsc::UnboundedSender<T>>> {
        // A panicking listener cannot leave the map half-updated
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct EventHub<T> {
    inner: Arc<HubInner<T>>,
}

impl<T> Clone for EventHub<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone> Default for EventHub<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> EventHub<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                next_id: AtomicU64::new(0),
                listeners: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.listeners().insert(id, tx);
        Subscription {
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every live listener. Listeners whose receiver is
    /// gone are dropped on the way.
    pub fn publish(&self, event: T) {
        self.inner
            .listeners()
            .retain(|id, tx| match tx.send(event.clone()) {
                Ok(()) => true,
                Err(_) => {
                    trace!("Listener {} went away", id);
                    false
                }
            });
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners().len()
    }
}

/// Receiving end of an [`EventHub`]. Unsubscribes on drop.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::UnboundedReceiver<T>,
    hub: Weak<HubInner<T>>,
}

impl<T> Subscription<T> {
    /// Next event, or `None` once the hub is gone and the backlog drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.listeners().remove(&self.id);
        }
    }
}
