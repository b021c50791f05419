//! Explicit observer registration over `std::sync::mpsc` channels.
//!
//! Producers call [`EventBus::publish`]; consumers hold a [`Subscription`] and
//! drain its receiver at their own pace. Dropping a subscription (or calling
//! [`EventBus::unsubscribe`]) detaches it; dead senders are pruned on the next
//! publish.

use log::trace;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

pub type SubscriptionId = u64;

/// Receiving end of one subscription.
#[derive(Debug)]
pub struct Subscription<E> {
    pub id: SubscriptionId,
    pub receiver: Receiver<E>,
}

impl<E> Subscription<E> {
    /// Everything published since the last drain, oldest first.
    pub fn drain(&self) -> Vec<E> {
        self.receiver.try_iter().collect()
    }
}

#[derive(Debug)]
pub struct EventBus<E> {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, Sender<E>)>>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription<E> {
        let (tx, rx) = mpsc::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.subscribers.lock() {
            Ok(mut subs) => subs.push((id, tx)),
            Err(poisoned) => poisoned.into_inner().push((id, tx)),
        }
        Subscription { id, receiver: rx }
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = subs.len();
        subs.retain(|(sub, _)| *sub != id);
        before != subs.len()
    }

    pub fn publish(&self, event: E) {
        let mut subs = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subs.retain(|(id, tx)| {
            let alive = tx.send(event.clone()).is_ok();
            if !alive {
                trace!("Pruning disconnected subscriber {id}");
            }
            alive
        });
    }

    pub fn subscriber_count(&self) -> usize {
        match self.subscribers.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let bus = EventBus::new();
        let first = bus.subscribe();
        let second = bus.subscribe();

        bus.publish(1u32);
        bus.publish(2u32);

        assert_eq!(first.drain(), [1, 2]);
        assert_eq!(second.drain(), [1, 2]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        assert!(bus.unsubscribe(sub.id));
        assert!(!bus.unsubscribe(sub.id));

        bus.publish("ignored");
        assert!(sub.drain().is_empty());
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());

        bus.publish('x');
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.drain(), ['x']);
    }
}
