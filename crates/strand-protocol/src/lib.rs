//! # strand-protocol
//!
//! Wire protocol for Strand realtime subscribers.
//!
//! The socket protocol is one-directional for data: clients manage room
//! subscriptions and receive event pushes; all mutations travel over HTTP.
//!
//! ## Frame Types
//!
//! - `Connect` / `Connected` - handshake
//! - `Subscribe` / `Unsubscribe` - room membership
//! - `Event` - server push of a committed mutation
//! - `Ack` / `Error` - acknowledgments and errors
//! - `Ping` / `Pong` - keepalive
//!
//! ## Example
//!
//! ```rust
//! use strand_protocol::{codec, Frame};
//!
//! let frame = Frame::subscribe(1, "salon:42");
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{decode, encode, WireError};
pub use frames::{error_codes, Frame, FrameType};
pub use version::{Version, PROTOCOL_VERSION};
