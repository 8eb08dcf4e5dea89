//! Events describing committed mutations.
//!
//! An event is produced once a mutation has committed and is never mutated
//! afterwards. The per-salon sequence number is assigned while the salon's
//! serialization token is held, so the sequence over any salon topic matches
//! commit order exactly.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Per-salon sequence number, monotonically increasing from 1.
pub type Seq = u64;

/// Current time as unix milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// The kind of mutation an event describes.
///
/// Serialized forms double as the event names clients see on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "queue:entry_added")]
    QueueEntryAdded,
    #[serde(rename = "queue:entry_updated")]
    QueueEntryUpdated,
    #[serde(rename = "queue:positions_updated")]
    QueuePositionsUpdated,
    #[serde(rename = "booking:created")]
    BookingCreated,
    #[serde(rename = "booking:updated")]
    BookingUpdated,
    #[serde(rename = "booking:cancelled")]
    BookingCancelled,
}

impl EventKind {
    /// Wire name of this event kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::QueueEntryAdded => "queue:entry_added",
            EventKind::QueueEntryUpdated => "queue:entry_updated",
            EventKind::QueuePositionsUpdated => "queue:positions_updated",
            EventKind::BookingCreated => "booking:created",
            EventKind::BookingUpdated => "booking:updated",
            EventKind::BookingCancelled => "booking:cancelled",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable record of one committed mutation.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// Salon whose state changed.
    pub salon_id: String,
    /// Per-salon sequence number assigned at commit.
    pub seq: Seq,
    /// Snapshot of the affected aggregate(s).
    pub payload: serde_json::Value,
    /// When the mutation committed, unix milliseconds.
    pub timestamp: u64,
}

impl Event {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn new(
        kind: EventKind,
        salon_id: impl Into<String>,
        seq: Seq,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            salon_id: salon_id.into(),
            seq,
            payload,
            timestamp: now_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind_names() {
        assert_eq!(EventKind::QueueEntryAdded.as_str(), "queue:entry_added");
        assert_eq!(EventKind::BookingCancelled.as_str(), "booking:cancelled");
    }

    #[test]
    fn test_event_creation() {
        let event = Event::new(
            EventKind::QueueEntryAdded,
            "salon-1",
            7,
            json!({"entry": {"id": "e-1"}}),
        );
        assert_eq!(event.salon_id, "salon-1");
        assert_eq!(event.seq, 7);
        assert!(event.timestamp > 0);
    }

    #[test]
    fn test_event_kind_serde_roundtrip() {
        let kind: EventKind = serde_json::from_str("\"queue:positions_updated\"").unwrap();
        assert_eq!(kind, EventKind::QueuePositionsUpdated);
        assert_eq!(
            serde_json::to_string(&EventKind::BookingUpdated).unwrap(),
            "\"booking:updated\""
        );
    }
}
