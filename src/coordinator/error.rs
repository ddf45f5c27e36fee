use std::fmt;

use chrono::NaiveTime;
use ulid::Ulid;

use crate::store::StoreError;

/// Which lock table a timed-out acquisition was waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Resource,
    Requester,
}

impl LockScope {
    pub fn as_str(self) -> &'static str {
        match self {
            LockScope::Resource => "resource",
            LockScope::Requester => "requester",
        }
    }
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("invalid range: start {start} must be before end {end}")]
    InvalidRange { start: NaiveTime, end: NaiveTime },
    #[error("resource not found: {0}")]
    ResourceNotFound(Ulid),
    #[error("reservation not found: {0}")]
    ReservationNotFound(Ulid),
    #[error("resource {resource_id} already booked for this time slot (conflicts with {conflicting})")]
    ResourceOverlap { resource_id: Ulid, conflicting: Ulid },
    #[error("requester {requester_id} already has a booking at this time (conflicts with {conflicting})")]
    RequesterOverlap { requester_id: Ulid, conflicting: Ulid },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("timed out waiting for {scope} lock on {key}")]
    LockTimeout { scope: LockScope, key: Ulid },
    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),
}

impl BookingError {
    /// The requested slot is taken; the caller should pick another time.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            BookingError::ResourceOverlap { .. } | BookingError::RequesterOverlap { .. }
        )
    }

    /// The system is degraded; the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::LockTimeout { .. } | BookingError::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_and_infrastructure_are_disjoint() {
        let conflict = BookingError::ResourceOverlap {
            resource_id: Ulid::new(),
            conflicting: Ulid::new(),
        };
        assert!(conflict.is_conflict());
        assert!(!conflict.is_retryable());

        let timeout = BookingError::LockTimeout {
            scope: LockScope::Resource,
            key: Ulid::new(),
        };
        assert!(timeout.is_retryable());
        assert!(!timeout.is_conflict());

        let store = BookingError::from(StoreError::WriterClosed);
        assert!(store.is_retryable());

        let not_found = BookingError::ResourceNotFound(Ulid::new());
        assert!(!not_found.is_conflict() && !not_found.is_retryable());
    }

    #[test]
    fn messages_name_the_failed_check() {
        let err = BookingError::RequesterOverlap {
            requester_id: Ulid::nil(),
            conflicting: Ulid::nil(),
        };
        assert!(err.to_string().contains("already has a booking at this time"));

        let err = BookingError::InvalidRange {
            start: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        };
        assert_eq!(
            err.to_string(),
            "invalid range: start 11:00:00 must be before end 10:00:00"
        );
    }
}
