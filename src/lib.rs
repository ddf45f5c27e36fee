//! Conflict-free reservation of shared resources.
//!
//! [`Coordinator`] is the booking path: it serializes attempts per resource,
//! runs the resource and requester overlap checks, and writes through an
//! injected [`ReservationStore`].

pub mod compactor;
pub mod config;
pub mod coordinator;
pub mod limits;
pub mod locks;
pub mod model;
pub mod notify;
pub mod observability;
pub mod overlap;
pub mod store;

pub use config::Config;
pub use coordinator::{BookingError, Coordinator, LockScope};
pub use model::{BookingRequest, Event, Reservation, Resource, Span};
pub use store::{MemoryStore, ReservationStore, StoreError, WalStore};
