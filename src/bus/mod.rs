//! In-process publish/subscribe broker
//!
//! One bounded broadcast channel per topic. Delivery is fan-out to every
//! subscriber present at publish time; subscribers joining later do not
//! receive earlier events. Ordering is FIFO within a topic relative to the
//! publish order of a single producer. A slow subscriber lags and drops its
//! own oldest messages (`RecvError::Lagged`) instead of blocking the
//! publisher or its peers; each subscriber runs in its own task, so one
//! failing consumer cannot affect the bus.

use tokio::sync::broadcast;
use tracing::trace;

use crate::events::{Event, Topic};

/// Default per-topic buffer. Sized so the store can fall behind a burst of
/// transcript segments without losing records.
pub const DEFAULT_TOPIC_CAPACITY: usize = 256;

pub struct EventBus {
    senders: Vec<broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let senders = Topic::ALL
            .iter()
            .map(|_| broadcast::channel(capacity).0)
            .collect();
        Self { senders }
    }

    fn sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        &self.senders[topic as usize]
    }

    /// Publish an event to its topic. Returns the number of subscribers that
    /// will observe it; zero subscribers is not an error.
    pub fn publish(&self, event: Event) -> usize {
        let topic = event.topic();
        trace!(topic = topic.name(), "publish");
        self.sender(topic).send(event).unwrap_or(0)
    }

    /// Register a consumer for a topic. Dropping the receiver unsubscribes.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event> {
        self.sender(topic).subscribe()
    }

    /// Number of current subscribers on a topic.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.sender(topic).receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_CAPACITY)
    }
}
