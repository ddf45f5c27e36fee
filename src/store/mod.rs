mod durable;
mod memory;
pub mod wal;

pub use durable::WalStore;
pub use memory::MemoryStore;

use std::io;

use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{Reservation, Resource};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("WAL writer shut down")]
    WriterClosed,
    #[error("resource already exists: {0}")]
    DuplicateResource(Ulid),
    #[error("reservation already exists: {0}")]
    DuplicateReservation(Ulid),
}

/// Persistence capability consumed by the coordinator.
///
/// Implementations do no conflict checking of their own: the coordinator
/// only calls `insert_reservation` / `remove_reservation` while holding the
/// resource's lock, and that is what keeps the schedule consistent.
#[async_trait]
pub trait ReservationStore: Send + Sync + 'static {
    async fn resource(&self, id: Ulid) -> Result<Option<Resource>, StoreError>;

    async fn resources(&self) -> Result<Vec<Resource>, StoreError>;

    async fn insert_resource(&self, resource: &Resource) -> Result<(), StoreError>;

    /// Reservations of one resource on one date, sorted by start time.
    async fn reservations_for_resource(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// Reservations held by one requester on one date across all resources.
    async fn reservations_for_requester(
        &self,
        requester_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Reservation>, StoreError>;

    async fn reservation(&self, id: Ulid) -> Result<Option<Reservation>, StoreError>;

    /// Every reservation on `date`, any resource.
    async fn reservations_on(&self, date: NaiveDate) -> Result<Vec<Reservation>, StoreError>;

    async fn all_reservations(&self) -> Result<Vec<Reservation>, StoreError>;

    async fn insert_reservation(&self, reservation: &Reservation) -> Result<(), StoreError>;

    async fn remove_reservation(&self, id: Ulid) -> Result<Option<Reservation>, StoreError>;
}
