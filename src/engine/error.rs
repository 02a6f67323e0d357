use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::BookingStatus;

/// Malformed input, rejected before anything is touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("check-out date must be after check-in date")]
    CheckOutNotAfterCheckIn,
    #[error("check-in date must be in the future")]
    CheckInNotInFuture,
    #[error("minimum stay is {0} nights")]
    BelowMinimumStay(u32),
    #[error("end date must not be before start date")]
    EndBeforeStart,
    #[error("invalid listing terms: {0}")]
    InvalidTerms(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("selected dates are not available")]
    NotAvailable,
    /// The covering interval vanished between the check and the lock.
    #[error("dates are no longer available for booking {0}")]
    Conflict(Ulid),
    #[error("cannot {action} booking {id}: status is {status}")]
    InvalidState {
        id: Ulid,
        status: BookingStatus,
        action: &'static str,
    },
    #[error("cancellation window for booking {id} closed on {deadline}")]
    CancellationWindowClosed { id: Ulid, deadline: NaiveDate },
    #[error("dates overlap calendar entry {0}")]
    Overlap(Ulid),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    /// Nothing was applied; retrying the whole operation is safe.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_user_facing() {
        let e: EngineError = ValidationError::BelowMinimumStay(3).into();
        assert_eq!(e.to_string(), "minimum stay is 3 nights");
        assert_eq!(
            EngineError::NotAvailable.to_string(),
            "selected dates are not available"
        );
        let id = Ulid::new();
        let e = EngineError::InvalidState {
            id,
            status: BookingStatus::Cancelled,
            action: "confirm",
        };
        assert_eq!(
            e.to_string(),
            format!("cannot confirm booking {id}: status is cancelled")
        );
    }

    #[test]
    fn only_storage_failures_are_retryable() {
        assert!(EngineError::Storage("disk full".into()).is_retryable());
        assert!(!EngineError::Conflict(Ulid::new()).is_retryable());
        assert!(!EngineError::NotAvailable.is_retryable());
    }
}
