//! Error taxonomy for mutation operations.
//!
//! Every variant is returned synchronously to the caller of the failing
//! operation; nothing is retried automatically and a failed mutation never
//! commits state or emits an event.

use thiserror::Error;

/// Errors surfaced by queue, booking, and gateway operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed or missing request fields. Nothing was committed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Status change outside the allowed transition graph.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Unknown entry or booking id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Requested slot overlaps an existing booking.
    #[error("slot taken: conflicts with booking {conflicting}")]
    SlotTaken { conflicting: String },

    /// Caller is not allowed to mutate this aggregate.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Invariant violation. Indicates state corruption; logged and surfaced,
    /// never silently repaired.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Build an `InvalidTransition` from any pair of displayable statuses.
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        SyncError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Short machine-readable code, used in HTTP error bodies and logs.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::InvalidInput(_) => "InvalidInput",
            SyncError::InvalidTransition { .. } => "InvalidTransition",
            SyncError::NotFound(_) => "NotFound",
            SyncError::SlotTaken { .. } => "SlotTaken",
            SyncError::Forbidden(_) => "Forbidden",
            SyncError::Internal(_) => "Internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SyncError::InvalidInput("x".into()).code(), "InvalidInput");
        assert_eq!(
            SyncError::SlotTaken {
                conflicting: "b-1".into()
            }
            .code(),
            "SlotTaken"
        );
    }

    #[test]
    fn test_transition_display() {
        let err = SyncError::invalid_transition("COMPLETED", "WAITING");
        assert_eq!(err.to_string(), "invalid transition: COMPLETED -> WAITING");
    }
}
