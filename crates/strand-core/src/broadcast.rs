//! Broadcaster: fans committed events out to room subscribers.
//!
//! An explicit capability handle injected into the gateway instead of an
//! ambient socket global. Publishing is a non-blocking in-memory ring push;
//! the slow path (socket writes) lives in per-connection forwarder tasks,
//! so a publisher holding a salon's serialization token is never held up by
//! network I/O. Delivery is at-most-once: lagged receivers skip ahead,
//! closed receivers are dropped, nothing is persisted or retried.

use crate::event::Event;
use crate::registry::RoomRegistry;
use std::sync::Arc;
use tracing::{debug, trace};

/// Fan-out handle over a room registry.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<RoomRegistry>,
}

impl Broadcaster {
    /// Create a broadcaster over a registry.
    #[must_use]
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this broadcaster delivers through.
    #[must_use]
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Deliver an event to every connection in the topic's room at the
    /// moment of publish. Per-topic delivery order matches publish order.
    /// Returns the number of live receivers; a topic nobody watches
    /// delivers to zero.
    pub fn publish(&self, topic: &str, event: &Arc<Event>) -> usize {
        let delivered = self.registry.send_to(topic, Arc::clone(event));
        if delivered == 0 {
            trace!(topic = %topic, kind = %event.kind, "No subscribers for event");
        } else {
            debug!(
                topic = %topic,
                kind = %event.kind,
                seq = event.seq,
                recipients = delivered,
                "Published event"
            );
        }
        delivered
    }

    /// Deliver one event to several topics, e.g. a booking change going to
    /// the salon room, the customer's user room, and the staff role room.
    /// Returns the total receiver count across topics.
    pub fn publish_many(&self, topics: &[String], event: &Arc<Event>) -> usize {
        topics.iter().map(|topic| self.publish(topic, event)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::room::{role_topic, salon_topic, user_topic};
    use serde_json::json;

    fn event(salon: &str, seq: u64) -> Arc<Event> {
        Arc::new(Event::new(
            EventKind::QueueEntryUpdated,
            salon,
            seq,
            json!({}),
        ))
    }

    #[tokio::test]
    async fn test_publish_reaches_room_members() {
        let registry = Arc::new(RoomRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let mut rx1 = registry.subscribe("conn-1", "salon:s1").unwrap();
        let mut rx2 = registry.subscribe("conn-2", "salon:s1").unwrap();

        let delivered = broadcaster.publish(&salon_topic("s1"), &event("s1", 1));
        assert_eq!(delivered, 2);
        assert_eq!(rx1.recv().await.unwrap().seq, 1);
        assert_eq!(rx2.recv().await.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let registry = Arc::new(RoomRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let mut rx_x = registry.subscribe("conn-x", "salon:x").unwrap();
        let mut rx_y = registry.subscribe("conn-y", "salon:y").unwrap();

        broadcaster.publish(&salon_topic("x"), &event("x", 1));

        assert_eq!(rx_x.recv().await.unwrap().salon_id, "x");
        // The salon:y subscriber saw nothing.
        assert!(matches!(
            rx_y.try_recv(),
            Err(tokio::sync::broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_publish_to_empty_topic_is_best_effort() {
        let registry = Arc::new(RoomRegistry::new());
        let broadcaster = Broadcaster::new(registry);
        assert_eq!(broadcaster.publish(&salon_topic("nobody"), &event("nobody", 1)), 0);
    }

    #[tokio::test]
    async fn test_publish_many_fans_out_once_per_topic() {
        let registry = Arc::new(RoomRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let mut salon_rx = registry.subscribe("conn-1", "salon:s1").unwrap();
        let mut user_rx = registry.subscribe("conn-2", "user:u1").unwrap();
        let mut role_rx = registry.subscribe("conn-3", "role:staff").unwrap();

        let topics = vec![salon_topic("s1"), user_topic("u1"), role_topic("staff")];
        let delivered = broadcaster.publish_many(&topics, &event("s1", 5));
        assert_eq!(delivered, 3);

        for rx in [&mut salon_rx, &mut user_rx, &mut role_rx] {
            assert_eq!(rx.recv().await.unwrap().seq, 5);
        }
    }

    #[tokio::test]
    async fn test_per_topic_order_matches_publish_order() {
        let registry = Arc::new(RoomRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let mut rx = registry.subscribe("conn-1", "salon:s1").unwrap();

        for seq in 1..=10 {
            broadcaster.publish(&salon_topic("s1"), &event("s1", seq));
        }
        for expected in 1..=10 {
            assert_eq!(rx.recv().await.unwrap().seq, expected);
        }
    }
}
