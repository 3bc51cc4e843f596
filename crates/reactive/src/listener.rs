//! Listener management for subscriptions.
//!
//! This module provides listener IDs and a set for tracking the callbacks
//! attached to one subscription.

use crate::event::SubscriptionEvent;
use hashbrown::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Unique identifier for a listener.
pub type ListenerId = u64;

/// Callback type for subscription events.
pub type Listener = Arc<dyn Fn(&SubscriptionEvent) + Send + Sync>;

/// The listeners of one subscription.
pub struct ListenerSet {
    /// Active listeners
    listeners: HashMap<ListenerId, Listener>,
    /// Registration order, so events reach listeners deterministically
    order: Vec<ListenerId>,
    /// Senders of channel listeners, checked for dropped receivers
    channels: HashMap<ListenerId, mpsc::UnboundedSender<SubscriptionEvent>>,
    /// Next listener ID to assign
    next_id: ListenerId,
}

impl Default for ListenerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerSet {
    /// Creates a new listener set.
    pub fn new() -> Self {
        Self {
            listeners: HashMap::new(),
            order: Vec::new(),
            channels: HashMap::new(),
            next_id: 1,
        }
    }

    /// Adds a listener.
    ///
    /// Returns the listener ID that can be used to remove it.
    pub fn add<F>(&mut self, callback: F) -> ListenerId
    where
        F: Fn(&SubscriptionEvent) + Send + Sync + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.insert(id, Arc::new(callback));
        self.order.push(id);
        id
    }

    /// Adds a listener that forwards every event into a channel. It is
    /// removed once the receiver is dropped.
    pub fn channel(&mut self) -> (ListenerId, mpsc::UnboundedReceiver<SubscriptionEvent>) {
        self.prune();
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = tx.clone();
        let id = self.add(move |event| {
            let _ = sender.send(event.clone());
        });
        self.channels.insert(id, tx);
        (id, rx)
    }

    /// Removes channel listeners whose receiver is gone. Returns how many.
    pub fn prune(&mut self) -> usize {
        let closed: Vec<ListenerId> = self
            .channels
            .iter()
            .filter(|(_, tx)| tx.is_closed())
            .map(|(id, _)| *id)
            .collect();
        for id in &closed {
            self.remove(*id);
        }
        closed.len()
    }

    /// Removes a listener by ID.
    ///
    /// Returns true if the listener was found and removed.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        if self.listeners.remove(&id).is_some() {
            self.order.retain(|l| *l != id);
            self.channels.remove(&id);
            true
        } else {
            false
        }
    }

    /// Clones the current listeners out, in registration order, so they can
    /// be invoked without holding the lock that guards this set. Closed
    /// channel listeners are pruned first.
    pub fn snapshot(&mut self) -> Vec<Listener> {
        self.prune();
        self.order
            .iter()
            .filter_map(|id| self.listeners.get(id).cloned())
            .collect()
    }

    /// Returns the number of listeners.
    #[inline]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns true if there are no listeners.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Removes every listener.
    pub fn clear(&mut self) {
        self.listeners.clear();
        self.order.clear();
        self.channels.clear();
    }
}

/// Invokes each listener with `event`.
pub(crate) fn emit(listeners: &[Listener], event: &SubscriptionEvent) {
    for listener in listeners {
        listener(event);
    }
}
