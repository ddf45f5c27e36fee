use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

use super::{ReservationStore, StoreError};

/// In-memory reservation store. Also the materialized state behind `WalStore`.
pub struct MemoryStore {
    resources: DashMap<Ulid, Resource>,
    by_resource: DashMap<(Ulid, NaiveDate), DaySchedule>,
    by_requester: DashMap<(Ulid, NaiveDate), DaySchedule>,
    /// Reverse lookup: reservation id → (resource id, requester id, date)
    index: DashMap<Ulid, (Ulid, Ulid, NaiveDate)>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
            by_resource: DashMap::new(),
            by_requester: DashMap::new(),
            index: DashMap::new(),
        }
    }

    // ── Resources ────────────────────────────────────────────

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn contains_resource(&self, id: &Ulid) -> bool {
        self.resources.contains_key(id)
    }

    // ── Reservations ─────────────────────────────────────────

    pub fn reservation_count(&self) -> usize {
        self.index.len()
    }

    pub fn contains_reservation(&self, id: &Ulid) -> bool {
        self.index.contains_key(id)
    }

    fn lookup(&self, id: &Ulid) -> Option<Reservation> {
        let (resource_id, _, date) = *self.index.get(id)?.value();
        self.by_resource
            .get(&(resource_id, date))?
            .reservations
            .iter()
            .find(|r| r.id == *id)
            .cloned()
    }

    fn schedule(map: &DashMap<(Ulid, NaiveDate), DaySchedule>, key: (Ulid, NaiveDate)) -> Vec<Reservation> {
        map.get(&key)
            .map(|day| day.reservations.clone())
            .unwrap_or_default()
    }

    // ── Event application ────────────────────────────────────

    /// Apply a WAL event to the indexes. Validation happened before the event
    /// was written, so application is infallible.
    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::ResourceRegistered(resource) => {
                self.resources.insert(resource.id, resource.clone());
            }
            Event::ReservationConfirmed(reservation) => {
                self.by_resource
                    .entry((reservation.resource_id, reservation.date))
                    .or_default()
                    .insert(reservation.clone());
                self.by_requester
                    .entry((reservation.requester_id, reservation.date))
                    .or_default()
                    .insert(reservation.clone());
                self.index.insert(
                    reservation.id,
                    (reservation.resource_id, reservation.requester_id, reservation.date),
                );
            }
            Event::ReservationCancelled { id, .. } => {
                self.unlink(id);
            }
        }
    }

    fn unlink(&self, id: &Ulid) -> Option<Reservation> {
        let (_, (resource_id, requester_id, date)) = self.index.remove(id)?;
        let removed = self
            .by_resource
            .get_mut(&(resource_id, date))
            .and_then(|mut day| day.remove(*id));
        self.by_resource
            .remove_if(&(resource_id, date), |_, day| day.is_empty());
        if let Some(mut day) = self.by_requester.get_mut(&(requester_id, date)) {
            day.remove(*id);
        }
        self.by_requester
            .remove_if(&(requester_id, date), |_, day| day.is_empty());
        removed
    }

    /// Events that recreate the current state, resources first.
    pub fn snapshot(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .resources
            .iter()
            .map(|e| Event::ResourceRegistered(e.value().clone()))
            .collect();
        for day in self.by_resource.iter() {
            events.extend(
                day.value()
                    .reservations
                    .iter()
                    .cloned()
                    .map(Event::ReservationConfirmed),
            );
        }
        events
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn resource(&self, id: Ulid) -> Result<Option<Resource>, StoreError> {
        Ok(self.resources.get(&id).map(|e| e.value().clone()))
    }

    async fn resources(&self) -> Result<Vec<Resource>, StoreError> {
        Ok(self.resources.iter().map(|e| e.value().clone()).collect())
    }

    async fn insert_resource(&self, resource: &Resource) -> Result<(), StoreError> {
        if self.contains_resource(&resource.id) {
            return Err(StoreError::DuplicateResource(resource.id));
        }
        self.apply_event(&Event::ResourceRegistered(resource.clone()));
        Ok(())
    }

    async fn reservations_for_resource(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Reservation>, StoreError> {
        Ok(Self::schedule(&self.by_resource, (resource_id, date)))
    }

    async fn reservations_for_requester(
        &self,
        requester_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Reservation>, StoreError> {
        Ok(Self::schedule(&self.by_requester, (requester_id, date)))
    }

    async fn reservation(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        Ok(self.lookup(&id))
    }

    async fn reservations_on(&self, date: NaiveDate) -> Result<Vec<Reservation>, StoreError> {
        Ok(self
            .by_resource
            .iter()
            .filter(|e| e.key().1 == date)
            .flat_map(|e| e.value().reservations.clone())
            .collect())
    }

    async fn all_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        Ok(self
            .by_resource
            .iter()
            .flat_map(|e| e.value().reservations.clone())
            .collect())
    }

    async fn insert_reservation(&self, reservation: &Reservation) -> Result<(), StoreError> {
        if self.contains_reservation(&reservation.id) {
            return Err(StoreError::DuplicateReservation(reservation.id));
        }
        self.apply_event(&Event::ReservationConfirmed(reservation.clone()));
        Ok(())
    }

    async fn remove_reservation(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        Ok(self.unlink(&id))
    }
}
