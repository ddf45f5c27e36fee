use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Span {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Returns `None` unless `start < end`.
    pub fn try_new(start: NaiveTime, end: NaiveTime) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration(&self) -> chrono::TimeDelta {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A bookable shared entity, e.g. a meeting room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub floor: i32,
}

impl Resource {
    pub fn new(name: impl Into<String>, capacity: u32, floor: i32) -> Self {
        Self {
            id: Ulid::new(),
            name: name.into(),
            capacity,
            floor,
        }
    }
}

/// A committed booking of one resource by one requester on one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub requester_id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
}

/// Input to the booking path. The range is validated by the coordinator,
/// so `start` and `end` are kept raw here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingRequest {
    pub resource_id: Ulid,
    pub requester_id: Ulid,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Flat event records; this is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceRegistered(Resource),
    ReservationConfirmed(Reservation),
    ReservationCancelled { id: Ulid, resource_id: Ulid },
}

impl Event {
    /// Resource the event belongs to, used for notification routing.
    pub fn resource_id(&self) -> Ulid {
        match self {
            Event::ResourceRegistered(r) => r.id,
            Event::ReservationConfirmed(r) => r.resource_id,
            Event::ReservationCancelled { resource_id, .. } => *resource_id,
        }
    }
}

/// Reservations of one scope (a resource or a requester) on one date,
/// sorted by `span.start`.
#[derive(Debug, Clone, Default)]
pub struct DaySchedule {
    pub reservations: Vec<Reservation>,
}

impl DaySchedule {
    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn reservation(start: NaiveTime, end: NaiveTime) -> Reservation {
        Reservation {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            requester_id: Ulid::new(),
            date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            span: Span::new(start, end),
        }
    }

    #[test]
    fn span_try_new_rejects_empty_and_inverted() {
        assert!(Span::try_new(t(10, 0), t(11, 0)).is_some());
        assert!(Span::try_new(t(10, 0), t(10, 0)).is_none());
        assert!(Span::try_new(t(11, 0), t(10, 0)).is_none());
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(t(10, 0), t(11, 0));
        let b = Span::new(t(10, 30), t(11, 30));
        let c = Span::new(t(11, 0), t(12, 0));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert_eq!(a.duration(), chrono::TimeDelta::hours(1));
    }

    #[test]
    fn schedule_keeps_start_order() {
        let mut day = DaySchedule::default();
        day.insert(reservation(t(14, 0), t(15, 0)));
        day.insert(reservation(t(9, 0), t(10, 0)));
        day.insert(reservation(t(11, 0), t(12, 0)));
        let starts: Vec<_> = day.reservations.iter().map(|r| r.span.start).collect();
        assert_eq!(starts, vec![t(9, 0), t(11, 0), t(14, 0)]);
    }

    #[test]
    fn schedule_remove_middle_preserves_order() {
        let mut day = DaySchedule::default();
        let rs: Vec<_> = (9..12).map(|h| reservation(t(h, 0), t(h, 30))).collect();
        for r in &rs {
            day.insert(r.clone());
        }
        assert_eq!(day.remove(rs[1].id), Some(rs[1].clone()));
        assert_eq!(day.len(), 2);
        assert_eq!(day.reservations[0].id, rs[0].id);
        assert_eq!(day.reservations[1].id, rs[2].id);
        assert!(day.remove(Ulid::new()).is_none());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationConfirmed(reservation(t(10, 0), t(11, 0)));
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
