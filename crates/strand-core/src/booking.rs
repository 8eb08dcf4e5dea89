//! Bookings and slot-conflict detection.
//!
//! A `BookingLedger` holds one salon's bookings for a single date and is the
//! authority on slot conflicts: two non-cancelled bookings may never hold
//! overlapping `[start, end)` intervals. Availability checks are advisory;
//! `reserve` re-validates under the salon's serialization token so a lost
//! race always surfaces as `SlotTaken` instead of a double booking.

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// A booking identifier.
pub type BookingId = String;

/// Minutes since midnight, parsed from `"HH:MM"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    /// Parse a wall-clock time like `"09:30"`.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for anything that is not a zero-padded 24h `HH:MM`.
    pub fn parse(s: &str) -> Result<Self, SyncError> {
        let invalid = || SyncError::InvalidInput(format!("invalid time of day: {s:?}"));

        let (hours, minutes) = s.split_once(':').ok_or_else(invalid)?;
        if hours.len() != 2 || minutes.len() != 2 {
            return Err(invalid());
        }
        let hours: u16 = hours.parse().map_err(|_| invalid())?;
        let minutes: u16 = minutes.parse().map_err(|_| invalid())?;
        if hours >= 24 || minutes >= 60 {
            return Err(invalid());
        }
        Ok(Self(hours * 60 + minutes))
    }

    /// Total minutes since midnight.
    #[must_use]
    pub fn minutes(self) -> u16 {
        self.0
    }

    /// The moment `minutes` later. Services may run past midnight; the
    /// result is simply a larger minute count.
    #[must_use]
    pub fn plus_minutes(self, minutes: u16) -> TimeOfDay {
        TimeOfDay(self.0.saturating_add(minutes))
    }
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        TimeOfDay::parse(&s).map_err(|e| e.to_string())
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> String {
        t.to_string()
    }
}

/// Status of a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    /// Wire name of this status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::InProgress => "IN_PROGRESS",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::NoShow => "NO_SHOW",
        }
    }

    /// Whether this status ends the booking's lifecycle.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::NoShow
        )
    }

    /// Only cancellation releases the slot; a no-show keeps its interval
    /// blocked for the day.
    #[must_use]
    pub fn occupies_slot(self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }

    fn forward_rank(self) -> Option<u8> {
        match self {
            BookingStatus::Pending => Some(0),
            BookingStatus::Confirmed => Some(1),
            BookingStatus::InProgress => Some(2),
            BookingStatus::Completed => Some(3),
            BookingStatus::Cancelled | BookingStatus::NoShow => None,
        }
    }

    /// Transitions are monotonic along PENDING→CONFIRMED→IN_PROGRESS→
    /// COMPLETED (forward jumps allowed); CANCELLED and NO_SHOW are
    /// reachable from any non-terminal state.
    #[must_use]
    pub fn can_transition_to(self, target: BookingStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.forward_rank(), target.forward_rank()) {
            (_, None) => true,
            (Some(from), Some(to)) => to > from,
            (None, Some(_)) => false,
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scheduled appointment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: BookingId,
    pub salon_id: String,
    pub service_id: String,
    pub date: String,
    pub start: TimeOfDay,
    /// Start plus the service duration.
    pub end: TimeOfDay,
    pub customer_id: String,
    pub customer_name: String,
    pub status: BookingStatus,
    /// Unix milliseconds.
    pub created_at: u64,
}

impl Booking {
    /// Half-open interval test: a booking ending exactly when another
    /// starts is not a conflict.
    #[must_use]
    pub fn overlaps(&self, start: TimeOfDay, end: TimeOfDay) -> bool {
        self.start < end && start < self.end
    }
}

/// Request fields for a new booking.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub service_id: String,
    pub start: TimeOfDay,
    pub duration_minutes: u16,
    pub customer_id: String,
    pub customer_name: String,
}

/// Verdict of an availability check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicting_booking_id: Option<BookingId>,
}

/// One salon's bookings for one calendar date, in creation order.
#[derive(Debug, Default)]
pub struct BookingLedger {
    bookings: Vec<Booking>,
}

impl BookingLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    /// Look up a booking by id.
    #[must_use]
    pub fn booking(&self, booking_id: &str) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == booking_id)
    }

    /// First slot-occupying booking whose interval overlaps `[start, end)`,
    /// in ledger iteration order.
    #[must_use]
    pub fn first_conflict(&self, start: TimeOfDay, end: TimeOfDay) -> Option<&Booking> {
        self.bookings
            .iter()
            .find(|b| b.status.occupies_slot() && b.overlaps(start, end))
    }

    /// Advisory availability check for a candidate slot.
    #[must_use]
    pub fn check(&self, start: TimeOfDay, duration_minutes: u16) -> Availability {
        let end = start.plus_minutes(duration_minutes);
        let conflict = self.first_conflict(start, end);
        Availability {
            start,
            end,
            available: conflict.is_none(),
            conflicting_booking_id: conflict.map(|b| b.id.clone()),
        }
    }

    /// Re-validate the slot and commit the booking.
    ///
    /// Called under the salon's serialization token; the re-check exists
    /// because time passes between a client's availability check and its
    /// commit.
    ///
    /// # Errors
    ///
    /// `SlotTaken` with the winning booking's id when the race was lost;
    /// nothing is committed in that case.
    pub fn reserve(
        &mut self,
        salon_id: &str,
        date: &str,
        new: NewBooking,
        now: u64,
    ) -> Result<Booking, SyncError> {
        let end = new.start.plus_minutes(new.duration_minutes);
        if let Some(conflict) = self.first_conflict(new.start, end) {
            return Err(SyncError::SlotTaken {
                conflicting: conflict.id.clone(),
            });
        }

        let booking = Booking {
            id: Uuid::new_v4().to_string(),
            salon_id: salon_id.to_string(),
            service_id: new.service_id,
            date: date.to_string(),
            start: new.start,
            end,
            customer_id: new.customer_id,
            customer_name: new.customer_name,
            status: BookingStatus::Pending,
            created_at: now,
        };
        self.bookings.push(booking.clone());
        debug!(
            salon = %salon_id,
            date = %date,
            booking = %booking.id,
            start = %booking.start,
            end = %booking.end,
            "Booking reserved"
        );
        Ok(booking)
    }

    /// Move a booking along the status graph.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, `InvalidTransition` for a move against
    /// the monotonic direction or out of a terminal state.
    pub fn transition(
        &mut self,
        booking_id: &str,
        target: BookingStatus,
    ) -> Result<Booking, SyncError> {
        let booking = self
            .bookings
            .iter_mut()
            .find(|b| b.id == booking_id)
            .ok_or_else(|| SyncError::NotFound(format!("booking {booking_id}")))?;

        if !booking.status.can_transition_to(target) {
            return Err(SyncError::invalid_transition(booking.status, target));
        }
        booking.status = target;
        Ok(booking.clone())
    }

    /// All bookings in creation order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Booking> {
        self.bookings.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_booking(start: &str, minutes: u16) -> NewBooking {
        NewBooking {
            service_id: "cut".to_string(),
            start: TimeOfDay::parse(start).unwrap(),
            duration_minutes: minutes,
            customer_id: "u-1".to_string(),
            customer_name: "Alice".to_string(),
        }
    }

    #[test]
    fn test_time_of_day_parse() {
        assert_eq!(TimeOfDay::parse("00:00").unwrap().minutes(), 0);
        assert_eq!(TimeOfDay::parse("10:45").unwrap().minutes(), 645);
        assert_eq!(TimeOfDay::parse("23:59").unwrap().minutes(), 1439);

        for bad in ["24:00", "10:60", "9:30", "1030", "aa:bb", ""] {
            assert!(TimeOfDay::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_time_of_day_display() {
        assert_eq!(TimeOfDay::parse("09:05").unwrap().to_string(), "09:05");
        assert_eq!(
            TimeOfDay::parse("10:00").unwrap().plus_minutes(45).to_string(),
            "10:45"
        );
    }

    #[test]
    fn test_reserve_conflicts_half_open() {
        let mut ledger = BookingLedger::new();

        // 10:00-10:45 commits.
        let first = ledger
            .reserve("salon-1", "2025-06-02", new_booking("10:00", 45), 0)
            .unwrap();

        // 10:30 overlaps and loses.
        let err = ledger
            .reserve("salon-1", "2025-06-02", new_booking("10:30", 45), 0)
            .unwrap_err();
        match err {
            SyncError::SlotTaken { conflicting } => assert_eq!(conflicting, first.id),
            other => panic!("expected SlotTaken, got {other:?}"),
        }
        assert_eq!(ledger.len(), 1);

        // Exactly adjacent at 10:45 is fine.
        ledger
            .reserve("salon-1", "2025-06-02", new_booking("10:45", 45), 0)
            .unwrap();
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_cancelled_booking_releases_slot() {
        let mut ledger = BookingLedger::new();
        let first = ledger
            .reserve("salon-1", "2025-06-02", new_booking("10:00", 45), 0)
            .unwrap();
        ledger
            .transition(&first.id, BookingStatus::Cancelled)
            .unwrap();

        assert!(ledger.check(TimeOfDay::parse("10:15").unwrap(), 30).available);
        ledger
            .reserve("salon-1", "2025-06-02", new_booking("10:15", 30), 0)
            .unwrap();
    }

    #[test]
    fn test_no_show_still_occupies_slot() {
        let mut ledger = BookingLedger::new();
        let first = ledger
            .reserve("salon-1", "2025-06-02", new_booking("10:00", 45), 0)
            .unwrap();
        ledger.transition(&first.id, BookingStatus::NoShow).unwrap();

        let verdict = ledger.check(TimeOfDay::parse("10:15").unwrap(), 30);
        assert!(!verdict.available);
        assert_eq!(verdict.conflicting_booking_id, Some(first.id));
    }

    #[test]
    fn test_no_pair_of_occupying_bookings_overlaps() {
        let mut ledger = BookingLedger::new();
        for (start, minutes) in [("09:00", 30), ("09:15", 30), ("09:30", 45), ("10:00", 20)] {
            let _ = ledger.reserve("salon-1", "2025-06-02", new_booking(start, minutes), 0);
        }

        let all = ledger.snapshot();
        let occupied: Vec<&Booking> = all.iter().filter(|b| b.status.occupies_slot()).collect();
        for (i, a) in occupied.iter().enumerate() {
            for b in &occupied[i + 1..] {
                assert!(!a.overlaps(b.start, b.end), "{} overlaps {}", a.id, b.id);
            }
        }
    }

    #[test]
    fn test_status_monotonic_direction() {
        use BookingStatus::*;

        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(InProgress));
        assert!(Confirmed.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(InProgress.can_transition_to(NoShow));

        assert!(!Confirmed.can_transition_to(Pending));
        assert!(!InProgress.can_transition_to(Confirmed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(!NoShow.can_transition_to(Completed));
    }

    #[test]
    fn test_transition_unknown_booking() {
        let mut ledger = BookingLedger::new();
        assert!(matches!(
            ledger.transition("missing", BookingStatus::Confirmed),
            Err(SyncError::NotFound(_))
        ));
    }
}
