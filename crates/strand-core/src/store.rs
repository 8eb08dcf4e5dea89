//! Authoritative in-memory state, sharded per salon.
//!
//! Each salon's queues and booking ledgers live behind one `RwLock`; the
//! write half is the salon's serialization token, so exactly one mutation
//! per salon is in flight while different salons proceed in parallel. Reads
//! take the read half and see a stale-but-consistent view.

use crate::booking::{Booking, BookingLedger};
use crate::event::Seq;
use crate::queue::{Queue, QueueEntry};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Tunables applied when a salon is first seen.
#[derive(Debug, Clone)]
pub struct SalonDefaults {
    /// Average historical service duration, used for wait estimates.
    pub avg_service_minutes: u32,
}

impl Default for SalonDefaults {
    fn default() -> Self {
        Self {
            avg_service_minutes: 30,
        }
    }
}

/// A bookable service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub minutes: u16,
}

/// Service id → duration lookup, seeded at startup.
///
/// Unknown ids fall back to the configured default duration rather than
/// failing the reservation.
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    services: HashMap<String, Service>,
    default_minutes: u16,
}

impl ServiceCatalog {
    /// Create an empty catalog with a fallback duration.
    #[must_use]
    pub fn new(default_minutes: u16) -> Self {
        Self {
            services: HashMap::new(),
            default_minutes,
        }
    }

    /// Register or replace a service.
    pub fn register(&mut self, service: Service) {
        self.services.insert(service.id.clone(), service);
    }

    /// Look up a service.
    #[must_use]
    pub fn get(&self, service_id: &str) -> Option<&Service> {
        self.services.get(service_id)
    }

    /// Duration for a service id, falling back to the default.
    #[must_use]
    pub fn duration_minutes(&self, service_id: &str) -> u16 {
        self.services
            .get(service_id)
            .map(|s| s.minutes)
            .unwrap_or(self.default_minutes)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// All mutable state for one salon: date-keyed queues and booking ledgers
/// plus the per-salon event sequence counter.
#[derive(Debug)]
pub struct SalonState {
    salon_id: String,
    avg_service_minutes: u32,
    queues: HashMap<String, Queue>,
    ledgers: HashMap<String, BookingLedger>,
    seq: Seq,
}

impl SalonState {
    fn new(salon_id: impl Into<String>, avg_service_minutes: u32) -> Self {
        Self {
            salon_id: salon_id.into(),
            avg_service_minutes,
            queues: HashMap::new(),
            ledgers: HashMap::new(),
            seq: 0,
        }
    }

    #[must_use]
    pub fn salon_id(&self) -> &str {
        &self.salon_id
    }

    /// Sequence number of the most recently committed mutation.
    #[must_use]
    pub fn seq(&self) -> Seq {
        self.seq
    }

    /// Assign the next commit sequence number. Caller must hold the write
    /// half of the salon lock.
    pub fn next_seq(&mut self) -> Seq {
        self.seq += 1;
        self.seq
    }

    /// The queue for a date, created on first touch.
    pub fn queue_mut(&mut self, date: &str) -> &mut Queue {
        let salon_id = self.salon_id.clone();
        let avg = self.avg_service_minutes;
        self.queues
            .entry(date.to_string())
            .or_insert_with(|| Queue::new(salon_id, date, avg))
    }

    #[must_use]
    pub fn queue(&self, date: &str) -> Option<&Queue> {
        self.queues.get(date)
    }

    /// The booking ledger for a date, created on first touch.
    pub fn ledger_mut(&mut self, date: &str) -> &mut BookingLedger {
        self.ledgers.entry(date.to_string()).or_default()
    }

    #[must_use]
    pub fn ledger(&self, date: &str) -> Option<&BookingLedger> {
        self.ledgers.get(date)
    }
}

/// Handle to one salon's state. The write half is the salon's
/// serialization token.
pub type SalonHandle = Arc<RwLock<SalonState>>;

/// Where an entry or booking lives.
#[derive(Debug, Clone)]
pub struct AggregateRef {
    pub salon_id: String,
    pub date: String,
}

/// The store: per-salon shards plus id indexes for bare-id lookups.
///
/// The id indexes are maintained while holding the owning salon's write
/// guard, so a located aggregate is always found under its salon lock.
pub struct StateStore {
    salons: DashMap<String, SalonHandle>,
    entry_index: DashMap<String, AggregateRef>,
    booking_index: DashMap<String, AggregateRef>,
    defaults: SalonDefaults,
}

impl StateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new(defaults: SalonDefaults) -> Self {
        Self {
            salons: DashMap::new(),
            entry_index: DashMap::new(),
            booking_index: DashMap::new(),
            defaults,
        }
    }

    /// Handle for a salon, created on first touch.
    #[must_use]
    pub fn salon(&self, salon_id: &str) -> SalonHandle {
        self.salons
            .entry(salon_id.to_string())
            .or_insert_with(|| {
                debug!(salon = %salon_id, "Creating salon state");
                Arc::new(RwLock::new(SalonState::new(
                    salon_id,
                    self.defaults.avg_service_minutes,
                )))
            })
            .clone()
    }

    /// Number of salons with live state.
    #[must_use]
    pub fn salon_count(&self) -> usize {
        self.salons.len()
    }

    pub fn index_entry(&self, entry_id: &str, salon_id: &str, date: &str) {
        self.entry_index.insert(
            entry_id.to_string(),
            AggregateRef {
                salon_id: salon_id.to_string(),
                date: date.to_string(),
            },
        );
    }

    pub fn unindex_entry(&self, entry_id: &str) {
        self.entry_index.remove(entry_id);
    }

    #[must_use]
    pub fn locate_entry(&self, entry_id: &str) -> Option<AggregateRef> {
        self.entry_index.get(entry_id).map(|r| r.value().clone())
    }

    pub fn index_booking(&self, booking_id: &str, salon_id: &str, date: &str) {
        self.booking_index.insert(
            booking_id.to_string(),
            AggregateRef {
                salon_id: salon_id.to_string(),
                date: date.to_string(),
            },
        );
    }

    #[must_use]
    pub fn locate_booking(&self, booking_id: &str) -> Option<AggregateRef> {
        self.booking_index.get(booking_id).map(|r| r.value().clone())
    }

    /// Read-path queue snapshot; an untouched salon/date yields an empty
    /// list.
    pub async fn queue_snapshot(&self, salon_id: &str, date: &str) -> Vec<QueueEntry> {
        let handle = self.salon(salon_id);
        let state = handle.read().await;
        state.queue(date).map(Queue::snapshot).unwrap_or_default()
    }

    /// Read-path booking snapshot.
    pub async fn bookings_snapshot(&self, salon_id: &str, date: &str) -> Vec<Booking> {
        let handle = self.salon(salon_id);
        let state = handle.read().await;
        state
            .ledger(date)
            .map(BookingLedger::snapshot)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::NewEntry;

    fn new_entry(name: &str) -> NewEntry {
        NewEntry {
            customer_name: name.to_string(),
            customer_phone: "555-0100".to_string(),
            service_name: "haircut".to_string(),
            booking_id: None,
        }
    }

    #[test]
    fn test_catalog_fallback_duration() {
        let mut catalog = ServiceCatalog::new(30);
        catalog.register(Service {
            id: "color".to_string(),
            name: "Coloring".to_string(),
            minutes: 90,
        });

        assert_eq!(catalog.duration_minutes("color"), 90);
        assert_eq!(catalog.duration_minutes("unknown"), 30);
    }

    #[tokio::test]
    async fn test_salon_vivification_and_reuse() {
        let store = StateStore::new(SalonDefaults::default());
        let first = store.salon("salon-1");
        let second = store.salon("salon-1");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.salon_count(), 1);
    }

    #[tokio::test]
    async fn test_salons_lock_independently() {
        let store = StateStore::new(SalonDefaults::default());
        let a = store.salon("salon-a");
        let b = store.salon("salon-b");

        // Holding one salon's write guard does not block another's.
        let _guard_a = a.write().await;
        let guard_b = b.try_write();
        assert!(guard_b.is_ok());
    }

    #[tokio::test]
    async fn test_seq_is_per_salon() {
        let store = StateStore::new(SalonDefaults::default());
        {
            let handle = store.salon("salon-a");
            let mut state = handle.write().await;
            assert_eq!(state.next_seq(), 1);
            assert_eq!(state.next_seq(), 2);
        }
        {
            let handle = store.salon("salon-b");
            let mut state = handle.write().await;
            assert_eq!(state.next_seq(), 1);
        }
    }

    #[tokio::test]
    async fn test_entry_index_roundtrip() {
        let store = StateStore::new(SalonDefaults::default());
        let handle = store.salon("salon-1");
        let entry = {
            let mut state = handle.write().await;
            let entry = state
                .queue_mut("2025-06-02")
                .add_entry(new_entry("Alice"), 0)
                .unwrap();
            state.next_seq();
            entry
        };
        store.index_entry(&entry.id, "salon-1", "2025-06-02");

        let loc = store.locate_entry(&entry.id).unwrap();
        assert_eq!(loc.salon_id, "salon-1");
        assert_eq!(loc.date, "2025-06-02");

        store.unindex_entry(&entry.id);
        assert!(store.locate_entry(&entry.id).is_none());
    }

    #[tokio::test]
    async fn test_snapshot_of_untouched_date_is_empty() {
        let store = StateStore::new(SalonDefaults::default());
        assert!(store.queue_snapshot("salon-1", "2025-06-02").await.is_empty());
        assert!(store
            .bookings_snapshot("salon-1", "2025-06-02")
            .await
            .is_empty());
    }
}
