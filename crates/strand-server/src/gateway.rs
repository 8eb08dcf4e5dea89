//! The sync gateway: accepts mutation requests, serializes them per salon,
//! and publishes the resulting events.
//!
//! One mutation per salon is in flight at a time (the write half of the
//! salon's lock); mutations for different salons proceed fully in parallel.
//! Events are handed to the broadcaster immediately before the guard is
//! released. The handoff is an in-memory ring push, so the token is never
//! held across socket I/O, and per-salon publish order always matches
//! commit order.

use crate::metrics;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use strand_core::event::now_millis;
use strand_core::{
    role_topic, salon_topic, user_topic, Availability, Booking, BookingStatus, Broadcaster,
    EntryStatus, Event, EventKind, NewBooking, NewEntry, QueueEntry, ServiceCatalog, StateStore,
    SyncError, TimeOfDay,
};

/// Identity of the mutating caller, supplied by the upstream auth layer.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: Option<String>,
    pub role: String,
}

impl Caller {
    /// An unauthenticated caller.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            user_id: None,
            role: "customer".to_string(),
        }
    }

    fn is_staff(&self) -> bool {
        matches!(self.role.as_str(), "staff" | "admin")
    }

    fn may_mutate(&self, booking: &Booking) -> bool {
        self.is_staff() || self.user_id.as_deref() == Some(booking.customer_id.as_str())
    }
}

/// Body of `POST /queue`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddQueueEntryRequest {
    pub salon_id: String,
    pub date: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub service_name: String,
    #[serde(default)]
    pub booking_id: Option<String>,
}

/// Body of `POST /bookings`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub salon_id: String,
    pub service_id: String,
    pub date: String,
    pub start_time: String,
    pub customer_id: String,
    pub customer_name: String,
}

/// The public-facing mutation surface.
pub struct Gateway {
    store: StateStore,
    catalog: ServiceCatalog,
    broadcaster: Broadcaster,
    retention_ms: u64,
}

impl Gateway {
    /// Create a gateway over a store and broadcaster.
    #[must_use]
    pub fn new(
        store: StateStore,
        catalog: ServiceCatalog,
        broadcaster: Broadcaster,
        queue_retention_minutes: u64,
    ) -> Self {
        Self {
            store,
            catalog,
            broadcaster,
            retention_ms: queue_retention_minutes * 60_000,
        }
    }

    /// Append a customer to a salon's queue.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when identifiers or customer fields are malformed;
    /// nothing is committed and no event is emitted on failure.
    pub async fn add_queue_entry(
        &self,
        req: AddQueueEntryRequest,
    ) -> Result<QueueEntry, SyncError> {
        require_id(&req.salon_id, "salonId")?;
        validate_date(&req.date)?;

        let handle = self.store.salon(&req.salon_id);
        let mut state = handle.write().await;
        let now = now_millis();

        let queue = state.queue_mut(&req.date);
        for stale in queue.prune_terminal(self.retention_ms, now) {
            self.store.unindex_entry(&stale);
        }
        let entry = queue.add_entry(
            NewEntry {
                customer_name: req.customer_name,
                customer_phone: req.customer_phone,
                service_name: req.service_name,
                booking_id: req.booking_id,
            },
            now,
        )?;
        self.store.index_entry(&entry.id, &req.salon_id, &req.date);

        let seq = state.next_seq();
        let event = Arc::new(Event::new(
            EventKind::QueueEntryAdded,
            req.salon_id.as_str(),
            seq,
            json!({ "entry": &entry }),
        ));
        self.publish(&salon_topic(&req.salon_id), &event);
        metrics::record_mutation("queue_add");
        Ok(entry)
    }

    /// Move a queue entry along the status graph.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, `InvalidTransition` for an illegal
    /// edge.
    pub async fn transition_queue_entry(
        &self,
        entry_id: &str,
        target: EntryStatus,
    ) -> Result<QueueEntry, SyncError> {
        let loc = self
            .store
            .locate_entry(entry_id)
            .ok_or_else(|| SyncError::NotFound(format!("queue entry {entry_id}")))?;

        let handle = self.store.salon(&loc.salon_id);
        let mut state = handle.write().await;
        let now = now_millis();

        let entry = state.queue_mut(&loc.date).transition(entry_id, target, now)?;
        let waiting = state
            .queue(&loc.date)
            .map(|q| q.waiting())
            .unwrap_or_default();

        let topic = salon_topic(&loc.salon_id);
        let updated = Arc::new(Event::new(
            EventKind::QueueEntryUpdated,
            loc.salon_id.as_str(),
            state.next_seq(),
            json!({ "entry": &entry }),
        ));
        let positions = Arc::new(Event::new(
            EventKind::QueuePositionsUpdated,
            loc.salon_id.as_str(),
            state.next_seq(),
            json!({ "salonId": &loc.salon_id, "entries": waiting }),
        ));
        self.publish(&topic, &updated);
        self.publish(&topic, &positions);
        metrics::record_mutation("queue_transition");
        Ok(entry)
    }

    /// Remove a WAITING entry outright (customer cancelled their spot).
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, `InvalidTransition` when the entry is
    /// no longer waiting.
    pub async fn remove_queue_entry(&self, entry_id: &str) -> Result<(), SyncError> {
        let loc = self
            .store
            .locate_entry(entry_id)
            .ok_or_else(|| SyncError::NotFound(format!("queue entry {entry_id}")))?;

        let handle = self.store.salon(&loc.salon_id);
        let mut state = handle.write().await;
        let now = now_millis();

        state.queue_mut(&loc.date).remove(entry_id, now)?;
        self.store.unindex_entry(entry_id);
        let waiting = state
            .queue(&loc.date)
            .map(|q| q.waiting())
            .unwrap_or_default();

        let positions = Arc::new(Event::new(
            EventKind::QueuePositionsUpdated,
            loc.salon_id.as_str(),
            state.next_seq(),
            json!({ "salonId": &loc.salon_id, "entries": waiting }),
        ));
        self.publish(&salon_topic(&loc.salon_id), &positions);
        metrics::record_mutation("queue_remove");
        Ok(())
    }

    /// Current queue for a salon/date, in arrival order. Read path; runs
    /// without the serialization token.
    pub async fn queue_snapshot(
        &self,
        salon_id: &str,
        date: &str,
    ) -> Result<Vec<QueueEntry>, SyncError> {
        require_id(salon_id, "salonId")?;
        validate_date(date)?;
        Ok(self.store.queue_snapshot(salon_id, date).await)
    }

    /// Informational availability check. Advisory only: the verdict can go
    /// stale before a reserve commits.
    pub async fn check_availability(
        &self,
        salon_id: &str,
        date: &str,
        service_id: &str,
        start: &str,
    ) -> Result<Availability, SyncError> {
        require_id(salon_id, "salonId")?;
        validate_date(date)?;
        let start = TimeOfDay::parse(start)?;
        let duration = self.catalog.duration_minutes(service_id);

        let handle = self.store.salon(salon_id);
        let state = handle.read().await;
        Ok(state
            .ledger(date)
            .map(|ledger| ledger.check(start, duration))
            .unwrap_or(Availability {
                start,
                end: start.plus_minutes(duration),
                available: true,
                conflicting_booking_id: None,
            }))
    }

    /// Reserve a booking slot.
    ///
    /// # Errors
    ///
    /// `SlotTaken` with the winning booking's id when the slot was claimed
    /// between check and commit; `InvalidInput` for malformed fields.
    pub async fn create_booking(&self, req: CreateBookingRequest) -> Result<Booking, SyncError> {
        require_id(&req.salon_id, "salonId")?;
        require_id(&req.service_id, "serviceId")?;
        require_id(&req.customer_id, "customerId")?;
        validate_date(&req.date)?;
        let start = TimeOfDay::parse(&req.start_time)?;
        if req.customer_name.trim().is_empty() {
            return Err(SyncError::InvalidInput(
                "customerName must be non-empty".to_string(),
            ));
        }
        let duration = self.catalog.duration_minutes(&req.service_id);

        let handle = self.store.salon(&req.salon_id);
        let mut state = handle.write().await;
        let now = now_millis();

        let booking = state.ledger_mut(&req.date).reserve(
            &req.salon_id,
            &req.date,
            NewBooking {
                service_id: req.service_id,
                start,
                duration_minutes: duration,
                customer_id: req.customer_id,
                customer_name: req.customer_name,
            },
            now,
        )?;
        self.store
            .index_booking(&booking.id, &req.salon_id, &req.date);

        let event = Arc::new(Event::new(
            EventKind::BookingCreated,
            req.salon_id.as_str(),
            state.next_seq(),
            json!({ "booking": &booking, "salonId": &req.salon_id }),
        ));
        self.publish_booking(&booking, &event);
        metrics::record_mutation("booking_create");
        Ok(booking)
    }

    /// Move a booking along its monotonic status graph.
    ///
    /// # Errors
    ///
    /// `Forbidden` when the caller is neither staff nor the booking's
    /// customer; `NotFound` / `InvalidTransition` as usual.
    pub async fn update_booking(
        &self,
        caller: &Caller,
        booking_id: &str,
        target: BookingStatus,
    ) -> Result<Booking, SyncError> {
        let loc = self
            .store
            .locate_booking(booking_id)
            .ok_or_else(|| SyncError::NotFound(format!("booking {booking_id}")))?;

        let handle = self.store.salon(&loc.salon_id);
        let mut state = handle.write().await;

        let ledger = state.ledger_mut(&loc.date);
        let current = ledger
            .booking(booking_id)
            .ok_or_else(|| SyncError::NotFound(format!("booking {booking_id}")))?;
        if !caller.may_mutate(current) {
            return Err(SyncError::Forbidden(
                "caller may not mutate this booking".to_string(),
            ));
        }
        let booking = ledger.transition(booking_id, target)?;

        let event = Arc::new(Event::new(
            EventKind::BookingUpdated,
            loc.salon_id.as_str(),
            state.next_seq(),
            json!({ "booking": &booking, "salonId": &loc.salon_id }),
        ));
        self.publish_booking(&booking, &event);
        metrics::record_mutation("booking_update");
        Ok(booking)
    }

    /// Cancel a booking, releasing its slot.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when the booking is already terminal (the interface
    /// reports that as a bad request); `Forbidden` / `NotFound` as usual.
    pub async fn cancel_booking(
        &self,
        caller: &Caller,
        booking_id: &str,
        reason: Option<String>,
    ) -> Result<Booking, SyncError> {
        let loc = self
            .store
            .locate_booking(booking_id)
            .ok_or_else(|| SyncError::NotFound(format!("booking {booking_id}")))?;

        let handle = self.store.salon(&loc.salon_id);
        let mut state = handle.write().await;

        let ledger = state.ledger_mut(&loc.date);
        let current = ledger
            .booking(booking_id)
            .ok_or_else(|| SyncError::NotFound(format!("booking {booking_id}")))?;
        if !caller.may_mutate(current) {
            return Err(SyncError::Forbidden(
                "caller may not cancel this booking".to_string(),
            ));
        }
        if current.status.is_terminal() {
            return Err(SyncError::InvalidInput(format!(
                "booking {booking_id} is already {}",
                current.status
            )));
        }
        let booking = ledger.transition(booking_id, BookingStatus::Cancelled)?;

        let event = Arc::new(Event::new(
            EventKind::BookingCancelled,
            loc.salon_id.as_str(),
            state.next_seq(),
            json!({ "booking": &booking, "salonId": &loc.salon_id, "reason": reason }),
        ));
        self.publish_booking(&booking, &event);
        metrics::record_mutation("booking_cancel");
        Ok(booking)
    }

    fn publish(&self, topic: &str, event: &Arc<Event>) {
        self.broadcaster.publish(topic, event);
        metrics::record_event(event.kind.as_str());
    }

    fn publish_booking(&self, booking: &Booking, event: &Arc<Event>) {
        let topics = [
            salon_topic(&booking.salon_id),
            user_topic(&booking.customer_id),
            role_topic("staff"),
        ];
        self.broadcaster.publish_many(&topics, event);
        metrics::record_event(event.kind.as_str());
    }
}

fn require_id(value: &str, field: &str) -> Result<(), SyncError> {
    if value.trim().is_empty() {
        return Err(SyncError::InvalidInput(format!(
            "{field} must be non-empty"
        )));
    }
    Ok(())
}

/// Dates are opaque `YYYY-MM-DD` keys supplied by callers.
fn validate_date(date: &str) -> Result<(), SyncError> {
    let bytes = date.as_bytes();
    let shape_ok = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && date
            .chars()
            .enumerate()
            .all(|(i, c)| matches!(i, 4 | 7) || c.is_ascii_digit());
    if shape_ok {
        let month: u32 = date[5..7].parse().unwrap_or(0);
        let day: u32 = date[8..10].parse().unwrap_or(0);
        if (1..=12).contains(&month) && (1..=31).contains(&day) {
            return Ok(());
        }
    }
    Err(SyncError::InvalidInput(format!(
        "invalid date {date:?}, expected YYYY-MM-DD"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::{RoomRegistry, SalonDefaults, Service};
    use tokio::sync::broadcast::error::TryRecvError;

    const DATE: &str = "2025-06-02";

    fn gateway() -> (Arc<Gateway>, Arc<RoomRegistry>) {
        let registry = Arc::new(RoomRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let mut catalog = ServiceCatalog::new(30);
        catalog.register(Service {
            id: "cut45".to_string(),
            name: "Haircut".to_string(),
            minutes: 45,
        });
        let store = StateStore::new(SalonDefaults {
            avg_service_minutes: 30,
        });
        (
            Arc::new(Gateway::new(store, catalog, broadcaster, 720)),
            registry,
        )
    }

    fn add_req(salon: &str, name: &str) -> AddQueueEntryRequest {
        AddQueueEntryRequest {
            salon_id: salon.to_string(),
            date: DATE.to_string(),
            customer_name: name.to_string(),
            customer_phone: "555-0100".to_string(),
            service_name: "haircut".to_string(),
            booking_id: None,
        }
    }

    fn booking_req(salon: &str, customer: &str, start: &str) -> CreateBookingRequest {
        CreateBookingRequest {
            salon_id: salon.to_string(),
            service_id: "cut45".to_string(),
            date: DATE.to_string(),
            start_time: start.to_string(),
            customer_id: customer.to_string(),
            customer_name: "Alice".to_string(),
        }
    }

    fn staff() -> Caller {
        Caller {
            user_id: Some("staff-1".to_string()),
            role: "staff".to_string(),
        }
    }

    fn customer(id: &str) -> Caller {
        Caller {
            user_id: Some(id.to_string()),
            role: "customer".to_string(),
        }
    }

    #[test]
    fn test_validate_date() {
        assert!(validate_date("2025-06-02").is_ok());
        assert!(validate_date("2025-12-31").is_ok());
        for bad in ["2025-6-2", "20250602", "2025-13-01", "2025-00-10", "2025-01-32", ""] {
            assert!(validate_date(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[tokio::test]
    async fn test_add_emits_entry_added() {
        let (gateway, registry) = gateway();
        let mut rx = registry.subscribe("viewer", "salon:s1").unwrap();

        let entry = gateway.add_queue_entry(add_req("s1", "Alice")).await.unwrap();
        assert_eq!(entry.position, Some(1));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::QueueEntryAdded);
        assert_eq!(event.seq, 1);
        assert_eq!(event.payload["entry"]["id"], json!(entry.id));
    }

    #[tokio::test]
    async fn test_failed_mutation_emits_nothing() {
        let (gateway, registry) = gateway();
        let mut rx = registry.subscribe("viewer", "salon:s1").unwrap();

        let mut req = add_req("s1", "Alice");
        req.customer_name = String::new();
        assert!(matches!(
            gateway.add_queue_entry(req).await,
            Err(SyncError::InvalidInput(_))
        ));

        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert!(gateway.queue_snapshot("s1", DATE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transition_emits_update_then_positions() {
        let (gateway, registry) = gateway();
        let entry = gateway.add_queue_entry(add_req("s1", "Alice")).await.unwrap();
        let _other = gateway.add_queue_entry(add_req("s1", "Bob")).await.unwrap();

        let mut rx = registry.subscribe("viewer", "salon:s1").unwrap();
        gateway
            .transition_queue_entry(&entry.id, EntryStatus::InService)
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::QueueEntryUpdated);
        assert_eq!(second.kind, EventKind::QueuePositionsUpdated);
        assert_eq!(second.seq, first.seq + 1);
        // Bob compacted to the front of the waiting line.
        assert_eq!(second.payload["entries"][0]["position"], json!(1));
    }

    #[tokio::test]
    async fn test_remove_unindexes_entry() {
        let (gateway, _registry) = gateway();
        let entry = gateway.add_queue_entry(add_req("s1", "Alice")).await.unwrap();

        gateway.remove_queue_entry(&entry.id).await.unwrap();
        assert!(matches!(
            gateway
                .transition_queue_entry(&entry.id, EntryStatus::InService)
                .await,
            Err(SyncError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mutations_publish_in_commit_order() {
        let (gateway, registry) = gateway();
        let mut rx = registry.subscribe("viewer", "salon:s1").unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let gateway = Arc::clone(&gateway);
            handles.push(tokio::spawn(async move {
                gateway
                    .add_queue_entry(add_req("s1", &format!("c{i}")))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Every subscriber sees seq 1..=16 with no reordering.
        for expected in 1..=16u64 {
            assert_eq!(rx.recv().await.unwrap().seq, expected);
        }
    }

    #[tokio::test]
    async fn test_booking_conflict_scenario() {
        let (gateway, registry) = gateway();
        let mut rx = registry.subscribe("viewer", "salon:s1").unwrap();

        let first = gateway
            .create_booking(booking_req("s1", "u1", "10:00"))
            .await
            .unwrap();
        assert_eq!(first.end.to_string(), "10:45");

        let err = gateway
            .create_booking(booking_req("s1", "u2", "10:30"))
            .await
            .unwrap_err();
        match err {
            SyncError::SlotTaken { conflicting } => assert_eq!(conflicting, first.id),
            other => panic!("expected SlotTaken, got {other:?}"),
        }

        // Adjacent slot is fine under half-open semantics.
        gateway
            .create_booking(booking_req("s1", "u3", "10:45"))
            .await
            .unwrap();

        // Two booking:created events; the losing reserve emitted nothing.
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::BookingCreated);
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::BookingCreated);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_booking_events_fan_out_to_user_and_staff_rooms() {
        let (gateway, registry) = gateway();
        let mut user_rx = registry.subscribe("customer-conn", "user:u1").unwrap();
        let mut staff_rx = registry.subscribe("staff-conn", "role:staff").unwrap();

        gateway
            .create_booking(booking_req("s1", "u1", "09:00"))
            .await
            .unwrap();

        assert_eq!(user_rx.recv().await.unwrap().kind, EventKind::BookingCreated);
        assert_eq!(staff_rx.recv().await.unwrap().kind, EventKind::BookingCreated);
    }

    #[tokio::test]
    async fn test_update_booking_authorization() {
        let (gateway, _registry) = gateway();
        let booking = gateway
            .create_booking(booking_req("s1", "u1", "10:00"))
            .await
            .unwrap();

        // A different customer may not touch it.
        assert!(matches!(
            gateway
                .update_booking(&customer("u2"), &booking.id, BookingStatus::Confirmed)
                .await,
            Err(SyncError::Forbidden(_))
        ));

        // The owner and staff may.
        gateway
            .update_booking(&customer("u1"), &booking.id, BookingStatus::Confirmed)
            .await
            .unwrap();
        let updated = gateway
            .update_booking(&staff(), &booking.id, BookingStatus::InProgress)
            .await
            .unwrap();
        assert_eq!(updated.status, BookingStatus::InProgress);
    }

    #[tokio::test]
    async fn test_cancel_terminal_booking_is_bad_request() {
        let (gateway, _registry) = gateway();
        let booking = gateway
            .create_booking(booking_req("s1", "u1", "10:00"))
            .await
            .unwrap();

        gateway
            .cancel_booking(&customer("u1"), &booking.id, Some("sick".to_string()))
            .await
            .unwrap();
        assert!(matches!(
            gateway.cancel_booking(&staff(), &booking.id, None).await,
            Err(SyncError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_availability_is_advisory() {
        let (gateway, _registry) = gateway();
        let verdict = gateway
            .check_availability("s1", DATE, "cut45", "10:00")
            .await
            .unwrap();
        assert!(verdict.available);
        assert_eq!(verdict.end.to_string(), "10:45");

        gateway
            .create_booking(booking_req("s1", "u1", "10:00"))
            .await
            .unwrap();
        let verdict = gateway
            .check_availability("s1", DATE, "cut45", "10:30")
            .await
            .unwrap();
        assert!(!verdict.available);
        assert!(verdict.conflicting_booking_id.is_some());
    }
}
