//! Observation bus: fan-out of committed event batches to subscribers.
//!
//! The bus is a cloneable handle around shared state. Delivery is
//! best-effort per subscriber: a full queue drops the batch for that
//! subscriber and counts it as lag; a disconnected receiver is pruned on
//! the next delivery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam::channel::{bounded, Receiver, RecvError, Sender, TryRecvError, TrySendError};
use thiserror::Error;

use crate::events::{EventSink, EventState, EventStateCollection, ObservationManager};
use crate::limits::Limits;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ObservationError {
    #[error("too many event subscribers (max {max})")]
    TooManySubscribers { max: usize },
}

/// A registered subscriber's receiving end.
#[derive(Debug)]
pub struct EventSubscription {
    receiver: Receiver<Vec<EventState>>,
}

impl EventSubscription {
    pub fn recv(&self) -> Result<Vec<EventState>, RecvError> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> Result<Vec<EventState>, TryRecvError> {
        self.receiver.try_recv()
    }
}

struct BusInner {
    subscribers: Mutex<Vec<Sender<Vec<EventState>>>>,
    limits: Limits,
    lagged_batches: AtomicU64,
}

/// Cloneable observation bus handle.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(limits: Limits) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                limits,
                lagged_batches: AtomicU64::new(0),
            }),
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Sender<Vec<EventState>>>> {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> Result<EventSubscription, ObservationError> {
        let mut subscribers = self.subscribers();
        if subscribers.len() >= self.inner.limits.max_event_subscribers {
            return Err(ObservationError::TooManySubscribers {
                max: self.inner.limits.max_event_subscribers,
            });
        }
        let (sender, receiver) = bounded(self.inner.limits.event_queue_depth);
        subscribers.push(sender);
        Ok(EventSubscription { receiver })
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    /// Batches dropped because a subscriber's queue was full.
    pub fn lagged_batches(&self) -> u64 {
        self.inner.lagged_batches.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Limits::default())
    }
}

impl EventSink for EventBus {
    fn deliver(&self, events: Vec<EventState>) {
        let mut subscribers = self.subscribers();
        subscribers.retain(|sender| match sender.try_send(events.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.inner.lagged_batches.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(batch = events.len(), "subscriber lagging, batch dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

impl ObservationManager for EventBus {
    fn create_event_state_collection(&self) -> EventStateCollection {
        EventStateCollection::new(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use arbor_core::identity::{ItemId, NodeId};

    fn batch() -> Vec<EventState> {
        vec![EventState {
            kind: EventKind::NodeAdded,
            id: ItemId::Node(NodeId::random()),
            parent: NodeId::random(),
            path: "/a".into(),
            primary_type: None,
        }]
    }

    #[test]
    fn delivery_reaches_every_subscriber() {
        let bus = EventBus::default();
        let first = bus.subscribe().unwrap();
        let second = bus.subscribe().unwrap();

        bus.deliver(batch());
        assert_eq!(first.recv().unwrap().len(), 1);
        assert_eq!(second.recv().unwrap().len(), 1);
    }

    #[test]
    fn subscriber_limit_is_enforced() {
        let bus = EventBus::new(Limits {
            max_event_subscribers: 1,
            event_queue_depth: 4,
        });
        let _held = bus.subscribe().unwrap();
        assert_eq!(
            bus.subscribe().unwrap_err(),
            ObservationError::TooManySubscribers { max: 1 }
        );
    }

    #[test]
    fn full_queues_drop_batches_and_count_lag() {
        let bus = EventBus::new(Limits {
            max_event_subscribers: 4,
            event_queue_depth: 1,
        });
        let subscription = bus.subscribe().unwrap();
        bus.deliver(batch());
        bus.deliver(batch());
        assert_eq!(bus.lagged_batches(), 1);
        assert_eq!(subscription.recv().unwrap().len(), 1);
        assert!(subscription.try_recv().is_err());
    }

    #[test]
    fn dropped_subscriptions_are_pruned() {
        let bus = EventBus::default();
        let subscription = bus.subscribe().unwrap();
        drop(subscription);
        bus.deliver(batch());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn bus_backs_event_collections() {
        let bus = EventBus::default();
        let subscription = bus.subscribe().unwrap();
        let mut collection = bus.create_event_state_collection();
        assert!(collection.events().is_empty());
        collection.prepare();
        collection.dispatch();
        // Empty batches are not delivered.
        assert!(subscription.try_recv().is_err());
    }
}
