use std::collections::HashSet;

use chrono::{NaiveDate, NaiveTime, TimeDelta};
use ulid::Ulid;

use crate::model::*;
use crate::overlap;
use crate::store::ReservationStore;

use super::{BookingError, Coordinator};

fn window(start: NaiveTime, end: NaiveTime) -> Result<Span, BookingError> {
    Span::try_new(start, end).ok_or(BookingError::InvalidRange { start, end })
}

/// Read-side queries. None of these take a lock; they may miss a write that is
/// in flight.
impl<S: ReservationStore> Coordinator<S> {
    /// Resources with no reservation intersecting `[start, end)` on `date`,
    /// ordered by name.
    pub async fn available_resources(
        &self,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Vec<Resource>, BookingError> {
        let query = window(start, end)?;
        let booked: HashSet<Ulid> = self
            .store
            .reservations_on(date)
            .await?
            .into_iter()
            .filter(|r| r.span.overlaps(&query))
            .map(|r| r.resource_id)
            .collect();

        let mut free: Vec<Resource> = self
            .store
            .resources()
            .await?
            .into_iter()
            .filter(|r| !booked.contains(&r.id))
            .collect();
        free.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(free)
    }

    /// Free sub-spans of `[start, end)` on one resource, optionally dropping
    /// gaps shorter than `min_duration`.
    pub async fn free_spans(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        min_duration: Option<TimeDelta>,
    ) -> Result<Vec<Span>, BookingError> {
        let query = window(start, end)?;
        if self.store.resource(resource_id).await?.is_none() {
            return Err(BookingError::ResourceNotFound(resource_id));
        }
        let taken = self.store.reservations_for_resource(resource_id, date).await?;
        let mut free = overlap::free_spans(&query, &taken);
        if let Some(min) = min_duration {
            free.retain(|span| span.duration() >= min);
        }
        Ok(free)
    }

    pub async fn reservations_for_resource(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Reservation>, BookingError> {
        Ok(self.store.reservations_for_resource(resource_id, date).await?)
    }

    /// Everything one requester holds, ordered by date then start time.
    pub async fn reservations_for_requester(&self, requester_id: Ulid) -> Result<Vec<Reservation>, BookingError> {
        let mut held: Vec<Reservation> = self
            .store
            .all_reservations()
            .await?
            .into_iter()
            .filter(|r| r.requester_id == requester_id)
            .collect();
        held.sort_by_key(|r| (r.date, r.span.start));
        Ok(held)
    }

    /// Every reservation in the store, ordered by date, start time, resource.
    pub async fn list_reservations(&self) -> Result<Vec<Reservation>, BookingError> {
        let mut all = self.store.all_reservations().await?;
        all.sort_by_key(|r| (r.date, r.span.start, r.resource_id));
        Ok(all)
    }
}
