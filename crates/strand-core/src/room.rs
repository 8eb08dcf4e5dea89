//! Rooms: named broadcast topics that connections subscribe to.
//!
//! Three topic families exist: `salon:{id}` for everyone watching a salon,
//! `user:{id}` for one signed-in customer, and `role:{name}` for staff
//! groups. A room fans events out over a capacity-bounded
//! `tokio::sync::broadcast` channel; per-room emission order is the order
//! events were published.

use crate::event::Event;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Maximum topic name length.
pub const MAX_TOPIC_LENGTH: usize = 128;

/// Default broadcast capacity per room.
const DEFAULT_ROOM_CAPACITY: usize = 1024;

/// A topic identifier.
pub type Topic = String;

/// Topic for everyone watching a salon.
#[must_use]
pub fn salon_topic(salon_id: &str) -> Topic {
    format!("salon:{salon_id}")
}

/// Topic for one signed-in user.
#[must_use]
pub fn user_topic(user_id: &str) -> Topic {
    format!("user:{user_id}")
}

/// Topic for a role group.
#[must_use]
pub fn role_topic(role: &str) -> Topic {
    format!("role:{role}")
}

/// Validate a topic name.
///
/// # Errors
///
/// Returns a message when the topic is empty, too long, contains
/// non-printable characters, or is outside the three known families.
pub fn validate_topic(topic: &str) -> Result<(), &'static str> {
    if topic.is_empty() {
        return Err("topic cannot be empty");
    }
    if topic.len() > MAX_TOPIC_LENGTH {
        return Err("topic too long");
    }
    if !topic.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("topic contains invalid characters");
    }
    let known_family = ["salon:", "user:", "role:"]
        .iter()
        .any(|prefix| topic.len() > prefix.len() && topic.starts_with(prefix));
    if !known_family {
        return Err("topic must be salon:{id}, user:{id}, or role:{name}");
    }
    Ok(())
}

/// A single broadcast room.
#[derive(Debug)]
pub struct Room {
    topic: Topic,
    sender: broadcast::Sender<Arc<Event>>,
    members: HashSet<String>,
}

impl Room {
    /// Create a room with the default capacity.
    #[must_use]
    pub fn new(topic: impl Into<Topic>) -> Self {
        Self::with_capacity(topic, DEFAULT_ROOM_CAPACITY)
    }

    /// Create a room with a specific broadcast capacity.
    #[must_use]
    pub fn with_capacity(topic: impl Into<Topic>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            topic: topic.into(),
            sender,
            members: HashSet::new(),
        }
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_member(&self, connection_id: &str) -> bool {
        self.members.contains(connection_id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Join a connection and hand back a receiver for the room's events.
    ///
    /// Joining twice is harmless; membership is a set.
    pub fn join(&mut self, connection_id: impl Into<String>) -> broadcast::Receiver<Arc<Event>> {
        let conn_id = connection_id.into();
        if self.members.insert(conn_id.clone()) {
            debug!(topic = %self.topic, connection = %conn_id, "Joined room");
        }
        self.sender.subscribe()
    }

    /// Remove a connection. Returns `true` if it was a member.
    pub fn leave(&mut self, connection_id: &str) -> bool {
        let removed = self.members.remove(connection_id);
        if removed {
            debug!(topic = %self.topic, connection = %connection_id, "Left room");
        }
        removed
    }

    /// Current member connection ids.
    #[must_use]
    pub fn members(&self) -> Vec<String> {
        self.members.iter().cloned().collect()
    }

    /// Hand an event to every live receiver. Returns the receiver count;
    /// a room whose receivers are all gone simply delivers to nobody.
    pub fn send(&self, event: Arc<Event>) -> usize {
        trace!(topic = %self.topic, seq = event.seq, "Room delivery");
        self.sender.send(event).unwrap_or_default()
    }
}
