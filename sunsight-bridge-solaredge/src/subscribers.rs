//! Push notification of new readings to interested listeners.
//!
//! The registry keeps an immutable snapshot of its observers. Subscribing and
//! unsubscribing build a new snapshot under a lock and swap it in; broadcasts
//! load the current snapshot without taking the lock. An observer added or
//! removed while a broadcast is in flight may or may not see that broadcast.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::poller::PollError;
use crate::status::PhotovoltaicStatus;

/// Receives readings published by the poller.
pub trait StatusObserver: Send + Sync {
    /// A new status was read.
    fn on_next(&self, status: &Arc<PhotovoltaicStatus>);

    /// The poller stopped because of an unrecoverable error.
    fn on_error(&self, error: &PollError);

    /// The poller was shut down.
    fn on_completed(&self);
}

/// Event delivered to channel subscribers.
#[derive(Debug, Clone)]
pub enum StatusEvent {
    Next(Arc<PhotovoltaicStatus>),
    Failed(String),
    Completed,
}

/// Identifies one subscription within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Entry = (SubscriptionId, Arc<dyn StatusObserver>);

#[derive(Default)]
struct Inner {
    snapshot: ArcSwap<Vec<Entry>>,
    write_lock: Mutex<()>,
    next_id: AtomicU64,
}

impl Inner {
    fn remove(&self, id: SubscriptionId) -> bool {
        let _guard = self.write_lock.lock();
        let current = self.snapshot.load();

        if !current.iter().any(|(entry_id, _)| *entry_id == id) {
            return false;
        }

        let next: Vec<Entry> = current
            .iter()
            .filter(|(entry_id, _)| *entry_id != id)
            .cloned()
            .collect();
        self.snapshot.store(Arc::new(next));
        true
    }
}

/// Thread-safe set of [`StatusObserver`]s.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<Inner>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. It stays registered until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    pub fn subscribe(&self, observer: Arc<dyn StatusObserver>) -> Subscription {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));

        {
            let _guard = self.inner.write_lock.lock();
            let current = self.inner.snapshot.load();
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push((id, observer));
            self.inner.snapshot.store(Arc::new(next));
        }

        debug!(subscription = id.0, "Observer subscribed");

        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Register a channel that receives every event.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(Arc::new(ChannelObserver { tx }));
        (subscription, rx)
    }

    /// Remove an observer. Removing an unknown id is a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if self.inner.remove(id) {
            debug!(subscription = id.0, "Observer unsubscribed");
        }
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.inner.snapshot.load().len()
    }

    /// Whether no observer is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver a new status to every current observer.
    pub fn broadcast_next(&self, status: &Arc<PhotovoltaicStatus>) {
        for (_, observer) in self.inner.snapshot.load_full().iter() {
            observer.on_next(status);
        }
    }

    /// Deliver a fatal error to every current observer.
    pub fn broadcast_error(&self, error: &PollError) {
        for (_, observer) in self.inner.snapshot.load_full().iter() {
            observer.on_error(error);
        }
    }

    /// Signal completion to every current observer.
    pub fn broadcast_complete(&self) {
        for (_, observer) in self.inner.snapshot.load_full().iter() {
            observer.on_completed();
        }
    }
}

/// Handle for a registered observer; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes its observer"]
pub struct Subscription {
    id: SubscriptionId,
    registry: Weak<Inner>,
}

impl Subscription {
    /// The id of this subscription.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Unsubscribe now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .finish()
    }
}

struct ChannelObserver {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl StatusObserver for ChannelObserver {
    fn on_next(&self, status: &Arc<PhotovoltaicStatus>) {
        // A closed receiver just means nobody is listening anymore
        let _ = self.tx.send(StatusEvent::Next(status.clone()));
    }

    fn on_error(&self, error: &PollError) {
        let _ = self.tx.send(StatusEvent::Failed(error.to_string()));
    }

    fn on_completed(&self) {
        let _ = self.tx.send(StatusEvent::Completed);
    }
}
