//! Frame types for the Strand subscription protocol.
//!
//! Clients never publish through this protocol; mutations travel over HTTP
//! and the socket only carries subscription management downstream event
//! pushes. Frames are serialized with MessagePack.

use serde::{Deserialize, Serialize};

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Subscribe = 0x01,
    Unsubscribe = 0x02,
    Event = 0x03,
    Ack = 0x04,
    Error = 0x05,
    Ping = 0x06,
    Pong = 0x07,
    Connect = 0x08,
    Connected = 0x09,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Subscribe),
            0x02 => Ok(FrameType::Unsubscribe),
            0x03 => Ok(FrameType::Event),
            0x04 => Ok(FrameType::Ack),
            0x05 => Ok(FrameType::Error),
            0x06 => Ok(FrameType::Ping),
            0x07 => Ok(FrameType::Pong),
            0x08 => Ok(FrameType::Connect),
            0x09 => Ok(FrameType::Connected),
            _ => Err("invalid frame type"),
        }
    }
}

/// Error codes carried by [`Frame::Error`].
pub mod error_codes {
    /// Topic failed validation or is outside the caller's reach.
    pub const BAD_TOPIC: u16 = 1001;
    /// Subscription rejected (limits).
    pub const SUBSCRIBE_FAILED: u16 = 1002;
    /// Frame could not be handled in the current connection state.
    pub const UNEXPECTED_FRAME: u16 = 1003;
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Initial handshake from the client.
    #[serde(rename = "connect")]
    Connect {
        /// Protocol version.
        version: u8,
        /// Opaque token from the auth layer.
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Connection established response.
    #[serde(rename = "connected")]
    Connected {
        /// Unique connection identifier.
        connection_id: String,
        /// Negotiated protocol version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Join a room.
    #[serde(rename = "subscribe")]
    Subscribe {
        /// Request id for acknowledgment.
        id: u64,
        /// Topic to join, e.g. `salon:42`.
        topic: String,
    },

    /// Leave a room.
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        /// Request id for acknowledgment.
        id: u64,
        /// Topic to leave.
        topic: String,
    },

    /// Server push of a committed mutation.
    #[serde(rename = "event")]
    Event {
        /// Room the event was published to.
        topic: String,
        /// Event name, e.g. `queue:entry_added`.
        event: String,
        /// Per-salon commit sequence number.
        seq: u64,
        /// JSON-encoded payload snapshot.
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// Acknowledgment of a request.
    #[serde(rename = "ack")]
    Ack {
        /// Id of the acknowledged request.
        id: u64,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// Id of the failed request (0 if not applicable).
        id: u64,
        /// Error code, see [`error_codes`].
        code: u16,
        /// Human-readable message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connect { .. } => FrameType::Connect,
            Frame::Connected { .. } => FrameType::Connected,
            Frame::Subscribe { .. } => FrameType::Subscribe,
            Frame::Unsubscribe { .. } => FrameType::Unsubscribe,
            Frame::Event { .. } => FrameType::Event,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    /// Create a Subscribe frame.
    #[must_use]
    pub fn subscribe(id: u64, topic: impl Into<String>) -> Self {
        Frame::Subscribe {
            id,
            topic: topic.into(),
        }
    }

    /// Create an Unsubscribe frame.
    #[must_use]
    pub fn unsubscribe(id: u64, topic: impl Into<String>) -> Self {
        Frame::Unsubscribe {
            id,
            topic: topic.into(),
        }
    }

    /// Create an Event frame from an already-serialized payload.
    #[must_use]
    pub fn event(
        topic: impl Into<String>,
        event: impl Into<String>,
        seq: u64,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Frame::Event {
            topic: topic.into(),
            event: event.into(),
            seq,
            payload: payload.into(),
        }
    }

    /// Create an Ack frame.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    /// Create an Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Create a Ping frame.
    #[must_use]
    pub fn ping(timestamp: Option<u64>) -> Self {
        Frame::Ping { timestamp }
    }

    /// Create a Pong frame echoing a ping's timestamp.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    /// Create a Connect frame.
    #[must_use]
    pub fn connect(version: u8, token: Option<String>) -> Self {
        Frame::Connect { version, token }
    }

    /// Create a Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: u8, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version,
            heartbeat,
        }
    }
}
