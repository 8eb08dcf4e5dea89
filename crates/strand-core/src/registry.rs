//! Room registry: which connections are subscribed to which topics.
//!
//! Membership is mutated by many connections concurrently, so the registry
//! carries its own fine-grained synchronization (a sharded map per topic)
//! and is never blocked by a salon mutation. Subscribe and unsubscribe are
//! idempotent; dropping a connection removes it from every room.

use crate::event::Event;
use crate::room::{validate_topic, Room, Topic};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Topic name failed validation.
    #[error("invalid topic: {0}")]
    InvalidTopic(&'static str),

    /// Room cap reached.
    #[error("maximum room count reached")]
    MaxRoomsReached,

    /// Per-connection subscription cap reached.
    #[error("maximum subscriptions per connection reached")]
    MaxSubscriptionsReached,
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of live rooms.
    pub max_rooms: usize,
    /// Maximum subscriptions per connection.
    pub max_subscriptions_per_connection: usize,
    /// Broadcast capacity per room.
    pub room_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_rooms: 10_000,
            max_subscriptions_per_connection: 64,
            room_capacity: 1024,
        }
    }
}

/// Tracks room membership for every connection.
pub struct RoomRegistry {
    rooms: DashMap<Topic, Room>,
    subscriptions: DashMap<String, DashSet<Topic>>,
    config: RegistryConfig,
}

impl RoomRegistry {
    /// Create a registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            rooms: DashMap::new(),
            subscriptions: DashMap::new(),
            config,
        }
    }

    /// Subscribe a connection to a topic, creating the room on first touch.
    ///
    /// Idempotent: re-subscribing keeps a single membership and simply
    /// hands back a fresh receiver.
    ///
    /// # Errors
    ///
    /// Fails on an invalid topic name or when a limit is hit.
    pub fn subscribe(
        &self,
        connection_id: &str,
        topic: &str,
    ) -> Result<broadcast::Receiver<Arc<Event>>, RegistryError> {
        validate_topic(topic).map_err(RegistryError::InvalidTopic)?;

        let conn_subs = self
            .subscriptions
            .entry(connection_id.to_string())
            .or_default();
        if !conn_subs.contains(topic)
            && conn_subs.len() >= self.config.max_subscriptions_per_connection
        {
            return Err(RegistryError::MaxSubscriptionsReached);
        }

        if !self.rooms.contains_key(topic) && self.rooms.len() >= self.config.max_rooms {
            return Err(RegistryError::MaxRoomsReached);
        }

        let mut room = self
            .rooms
            .entry(topic.to_string())
            .or_insert_with(|| Room::with_capacity(topic, self.config.room_capacity));
        let receiver = room.join(connection_id);
        conn_subs.insert(topic.to_string());

        debug!(
            topic = %topic,
            connection = %connection_id,
            members = room.member_count(),
            "Subscribed"
        );
        Ok(receiver)
    }

    /// Unsubscribe a connection from a topic. Idempotent: unknown
    /// memberships are a no-op.
    pub fn unsubscribe(&self, connection_id: &str, topic: &str) {
        if let Some(conn_subs) = self.subscriptions.get(connection_id) {
            conn_subs.remove(topic);
        }
        self.leave_room(connection_id, topic);
    }

    /// Remove a connection from every room it belongs to. Safe to call for
    /// a connection that never subscribed to anything.
    pub fn drop_connection(&self, connection_id: &str) {
        if let Some((_, topics)) = self.subscriptions.remove(connection_id) {
            for topic in topics.iter() {
                self.leave_room(connection_id, topic.as_str());
            }
        }
        debug!(connection = %connection_id, "Dropped connection from all rooms");
    }

    fn leave_room(&self, connection_id: &str, topic: &str) {
        if let Some(mut room) = self.rooms.get_mut(topic) {
            room.leave(connection_id);
            // Empty rooms are deleted so the map tracks live topics only.
            if room.is_empty() {
                drop(room);
                self.rooms.remove(topic);
                debug!(topic = %topic, "Deleted empty room");
            }
        }
    }

    /// Member connection ids of a topic; empty when the room does not exist.
    #[must_use]
    pub fn members_of(&self, topic: &str) -> Vec<String> {
        self.rooms
            .get(topic)
            .map(|room| room.members())
            .unwrap_or_default()
    }

    /// Whether a room currently exists.
    #[must_use]
    pub fn room_exists(&self, topic: &str) -> bool {
        self.rooms.contains_key(topic)
    }

    /// Topics a connection is subscribed to.
    #[must_use]
    pub fn topics_of(&self, connection_id: &str) -> Vec<Topic> {
        self.subscriptions
            .get(connection_id)
            .map(|subs| subs.iter().map(|t| t.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of live rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of connections with at least one subscription.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Deliver an event to a topic's current members. Returns the number of
    /// live receivers.
    pub(crate) fn send_to(&self, topic: &str, event: Arc<Event>) -> usize {
        self.rooms
            .get(topic)
            .map(|room| room.send(event))
            .unwrap_or(0)
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
