//! Typed event fan-out.
//!
//! [`Topic`] is a small multi-subscriber broadcast used for membership and
//! cluster join/leave events. Events are infrequent (topology changes), so
//! subscribers get unbounded channels and closed subscribers are pruned on
//! publish.

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// A named-subscriber broadcast topic.
pub struct Topic<T> {
    subscribers: Mutex<Vec<(String, mpsc::UnboundedSender<T>)>>,
}

impl<T: Clone> Topic<T> {
    /// Creates an empty topic.
    #[must_use]
    pub fn new() -> Self {
        Self { subscribers: Mutex::new(Vec::new()) }
    }

    /// Registers a subscriber. The name only appears in logs.
    pub fn subscribe(&self, name: impl Into<String>) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push((name.into(), tx));
        rx
    }

    /// Delivers `event` to every live subscriber, pruning closed ones.
    pub fn publish(&self, event: T) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|(name, tx)| {
            if tx.send(event.clone()).is_err() {
                tracing::debug!(subscriber = %name, "dropping closed topic subscriber");
                false
            } else {
                true
            }
        });
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<T: Clone> Default for Topic<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_all_subscribers() {
        let topic: Topic<u32> = Topic::new();
        let mut a = topic.subscribe("a");
        let mut b = topic.subscribe("b");

        topic.publish(7);
        assert_eq!(a.recv().await, Some(7));
        assert_eq!(b.recv().await, Some(7));
    }

    #[tokio::test]
    async fn prunes_dropped_subscribers() {
        let topic: Topic<u32> = Topic::new();
        let a = topic.subscribe("a");
        let mut b = topic.subscribe("b");
        drop(a);

        topic.publish(1);
        assert_eq!(topic.subscriber_count(), 1);
        assert_eq!(b.recv().await, Some(1));
    }

    #[tokio::test]
    async fn events_queue_until_read() {
        let topic: Topic<u32> = Topic::new();
        let mut rx = topic.subscribe("slow");
        topic.publish(1);
        topic.publish(2);
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
    }
}
