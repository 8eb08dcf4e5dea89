//! # strand-core
//!
//! Queue, booking, and room state for the Strand realtime sync engine.
//!
//! This crate provides the building blocks the gateway composes:
//!
//! - **Queue** - per-salon daily service queue with dense positions and
//!   wait estimates
//! - **BookingLedger** - per-salon daily bookings with slot-conflict
//!   detection
//! - **StateStore** - per-salon sharded state; the write half of a salon's
//!   lock is its mutation serialization token
//! - **RoomRegistry** / **Broadcaster** - topic rooms and ordered,
//!   at-most-once event fan-out
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Gateway   │────▶│ StateStore  │────▶│ Queue /     │
//! └─────────────┘     │ (per salon) │     │ Ledger      │
//!        │            └─────────────┘     └─────────────┘
//!        ▼
//! ┌─────────────┐     ┌─────────────┐
//! │ Broadcaster │────▶│ RoomRegistry│
//! └─────────────┘     └─────────────┘
//! ```

pub mod booking;
pub mod broadcast;
pub mod error;
pub mod event;
pub mod queue;
pub mod registry;
pub mod room;
pub mod store;

pub use booking::{Availability, Booking, BookingId, BookingLedger, BookingStatus, NewBooking, TimeOfDay};
pub use broadcast::Broadcaster;
pub use error::SyncError;
pub use event::{Event, EventKind, Seq};
pub use queue::{EntryId, EntryStatus, NewEntry, Queue, QueueEntry};
pub use registry::{RegistryConfig, RegistryError, RoomRegistry};
pub use room::{role_topic, salon_topic, user_topic, Topic};
pub use store::{SalonDefaults, SalonHandle, SalonState, Service, ServiceCatalog, StateStore};
