//! Salon service queues.
//!
//! A `Queue` holds one salon's arrival-ordered entries for a single date.
//! Every structural change runs the recompute pass, which keeps WAITING
//! positions dense (1..N, arrival order) and refreshes wait estimates. The
//! aggregate is owned by the state store and only mutated while the salon's
//! serialization token is held.

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// A queue entry identifier.
pub type EntryId = String;

/// Status of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Waiting,
    InService,
    Completed,
    NoShow,
}

impl EntryStatus {
    /// Wire name of this status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Waiting => "WAITING",
            EntryStatus::InService => "IN_SERVICE",
            EntryStatus::Completed => "COMPLETED",
            EntryStatus::NoShow => "NO_SHOW",
        }
    }

    /// Whether this status ends the entry's lifecycle.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, EntryStatus::Completed | EntryStatus::NoShow)
    }

    /// Legal edges: WAITING→IN_SERVICE, IN_SERVICE→COMPLETED,
    /// WAITING→NO_SHOW, IN_SERVICE→NO_SHOW. Everything else is rejected.
    #[must_use]
    pub fn can_transition_to(self, target: EntryStatus) -> bool {
        matches!(
            (self, target),
            (EntryStatus::Waiting, EntryStatus::InService)
                | (EntryStatus::InService, EntryStatus::Completed)
                | (EntryStatus::Waiting, EntryStatus::NoShow)
                | (EntryStatus::InService, EntryStatus::NoShow)
        )
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One customer's live position record in a salon's daily queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: EntryId,
    pub salon_id: String,
    /// Linked booking, when the customer arrived with an appointment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<String>,
    pub customer_name: String,
    pub customer_phone: String,
    pub service_name: String,
    pub status: EntryStatus,
    /// 1-based rank among WAITING entries; `None` once the entry has left
    /// the waiting line.
    pub position: Option<u32>,
    pub estimated_wait_minutes: u32,
    /// Unix milliseconds.
    pub created_at: u64,
    /// Set when service began, unix milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
}

/// Request fields for a new queue entry.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub customer_name: String,
    pub customer_phone: String,
    pub service_name: String,
    pub booking_id: Option<String>,
}

/// One salon's queue for one calendar date, in arrival order.
#[derive(Debug)]
pub struct Queue {
    salon_id: String,
    date: String,
    entries: Vec<QueueEntry>,
    avg_service_minutes: u32,
}

impl Queue {
    /// Create an empty queue.
    #[must_use]
    pub fn new(salon_id: impl Into<String>, date: impl Into<String>, avg_service_minutes: u32) -> Self {
        Self {
            salon_id: salon_id.into(),
            date: date.into(),
            entries: Vec::new(),
            avg_service_minutes,
        }
    }

    #[must_use]
    pub fn salon_id(&self) -> &str {
        &self.salon_id
    }

    #[must_use]
    pub fn date(&self) -> &str {
        &self.date
    }

    #[must_use]
    pub fn avg_service_minutes(&self) -> u32 {
        self.avg_service_minutes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by id.
    #[must_use]
    pub fn entry(&self, entry_id: &str) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.id == entry_id)
    }

    /// Append a new WAITING entry at the end of the arrival order.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if any customer/service field is empty; nothing is
    /// committed in that case.
    pub fn add_entry(&mut self, new: NewEntry, now: u64) -> Result<QueueEntry, SyncError> {
        if new.customer_name.trim().is_empty()
            || new.customer_phone.trim().is_empty()
            || new.service_name.trim().is_empty()
        {
            return Err(SyncError::InvalidInput(
                "customer name, phone, and service must be non-empty".to_string(),
            ));
        }

        let entry = QueueEntry {
            id: Uuid::new_v4().to_string(),
            salon_id: self.salon_id.clone(),
            booking_id: new.booking_id,
            customer_name: new.customer_name,
            customer_phone: new.customer_phone,
            service_name: new.service_name,
            status: EntryStatus::Waiting,
            position: None,
            estimated_wait_minutes: 0,
            created_at: now,
            started_at: None,
        };
        self.entries.push(entry);

        if let Err(e) = self.recompute(now) {
            self.entries.pop();
            return Err(e);
        }

        let entry = self
            .entries
            .last()
            .cloned()
            .ok_or_else(|| SyncError::Internal("entry vanished during recompute".to_string()))?;
        debug!(
            salon = %self.salon_id,
            date = %self.date,
            entry = %entry.id,
            position = ?entry.position,
            "Queue entry added"
        );
        Ok(entry)
    }

    /// Move an entry along the status graph and recompute the waiting line.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, `InvalidTransition` for an edge outside
    /// the graph; the entry is left unchanged on failure.
    pub fn transition(
        &mut self,
        entry_id: &str,
        target: EntryStatus,
        now: u64,
    ) -> Result<QueueEntry, SyncError> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.id == entry_id)
            .ok_or_else(|| SyncError::NotFound(format!("queue entry {entry_id}")))?;

        let from = self.entries[idx].status;
        if !from.can_transition_to(target) {
            return Err(SyncError::invalid_transition(from, target));
        }

        {
            let entry = &mut self.entries[idx];
            entry.status = target;
            if target == EntryStatus::InService {
                entry.started_at = Some(now);
            }
        }
        self.recompute(now)?;

        let entry = self.entries[idx].clone();
        debug!(
            salon = %self.salon_id,
            entry = %entry.id,
            from = %from,
            to = %target,
            "Queue entry transitioned"
        );
        Ok(entry)
    }

    /// Remove a WAITING entry outright (customer-initiated cancellation).
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id; `InvalidTransition` when the entry is
    /// no longer waiting.
    pub fn remove(&mut self, entry_id: &str, now: u64) -> Result<QueueEntry, SyncError> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.id == entry_id)
            .ok_or_else(|| SyncError::NotFound(format!("queue entry {entry_id}")))?;

        if self.entries[idx].status != EntryStatus::Waiting {
            return Err(SyncError::invalid_transition(
                self.entries[idx].status,
                "REMOVED",
            ));
        }

        let entry = self.entries.remove(idx);
        self.recompute(now)?;
        debug!(salon = %self.salon_id, entry = %entry.id, "Queue entry removed");
        Ok(entry)
    }

    /// All entries in arrival order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        self.entries.clone()
    }

    /// Entries still holding a WAITING position, in position order.
    #[must_use]
    pub fn waiting(&self) -> Vec<QueueEntry> {
        self.entries
            .iter()
            .filter(|e| e.status == EntryStatus::Waiting)
            .cloned()
            .collect()
    }

    /// Drop terminal entries older than the retention window.
    ///
    /// Returns the removed ids. Waiting positions are untouched: terminal
    /// entries no longer occupy a slot.
    pub fn prune_terminal(&mut self, retention_ms: u64, now: u64) -> Vec<EntryId> {
        let removed: Vec<EntryId> = self
            .entries
            .iter()
            .filter(|e| e.status.is_terminal() && now.saturating_sub(e.created_at) > retention_ms)
            .map(|e| e.id.clone())
            .collect();

        if !removed.is_empty() {
            self.entries
                .retain(|e| !e.status.is_terminal() || now.saturating_sub(e.created_at) <= retention_ms);
            debug!(salon = %self.salon_id, count = removed.len(), "Pruned terminal queue entries");
        }
        removed
    }

    /// Reassign dense WAITING positions and refresh wait estimates.
    ///
    /// Estimated wait at position k is the remaining service time of every
    /// IN_SERVICE entry plus (k-1) average service durations.
    fn recompute(&mut self, now: u64) -> Result<(), SyncError> {
        let mut base: u32 = 0;
        for entry in self.entries.iter().filter(|e| e.status == EntryStatus::InService) {
            let elapsed_min = entry
                .started_at
                .map(|t| (now.saturating_sub(t) / 60_000) as u32)
                .unwrap_or(0);
            base += self.avg_service_minutes.saturating_sub(elapsed_min);
        }

        let mut pos: u32 = 0;
        for entry in self.entries.iter_mut() {
            if entry.status == EntryStatus::Waiting {
                pos += 1;
                entry.position = Some(pos);
                entry.estimated_wait_minutes = base + (pos - 1) * self.avg_service_minutes;
            } else {
                entry.position = None;
                entry.estimated_wait_minutes = 0;
            }
        }

        self.verify_positions()
    }

    /// WAITING positions must form a dense 1..=N sequence in arrival order.
    fn verify_positions(&self) -> Result<(), SyncError> {
        let mut expected: u32 = 0;
        for entry in self.entries.iter().filter(|e| e.status == EntryStatus::Waiting) {
            expected += 1;
            if entry.position != Some(expected) {
                return Err(SyncError::Internal(format!(
                    "position recompute produced a gap at entry {}: got {:?}, expected {}",
                    entry.id, entry.position, expected
                )));
            }
        }
        Ok(())
    }
}
