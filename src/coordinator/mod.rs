mod error;
mod queries;

pub use error::{BookingError, LockScope};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::compactor;
use crate::config::Config;
use crate::limits::*;
use crate::locks::{KeyGuard, KeyedLocks};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::overlap::first_conflict;
use crate::store::{ReservationStore, StoreError, WalStore};

const MAX_LOCK_WAIT: Duration = Duration::from_millis(MAX_LOCK_WAIT_MS);

/// Serializes booking decisions per resource.
///
/// Every attempt for one resource runs its read → decide → write sequence
/// under that resource's lock, so two attempts can never both see a free slot
/// and both insert. Attempts for different resources share no lock.
///
/// Lock order is resource, then requester. Nothing acquires a resource lock
/// while holding a requester lock, so the two tables cannot deadlock.
pub struct Coordinator<S> {
    store: Arc<S>,
    resource_locks: KeyedLocks<Ulid>,
    requester_locks: KeyedLocks<Ulid>,
    notify: Arc<NotifyHub>,
    lock_timeout: Duration,
}

impl Coordinator<WalStore> {
    /// Replay the WAL under `config.data_dir` and start the background compactor.
    pub fn open(config: &Config) -> Result<Arc<Self>, StoreError> {
        std::fs::create_dir_all(&config.data_dir)?;
        let store = Arc::new(WalStore::open(&config.wal_path(), config.wal_channel_capacity)?);
        let coordinator = Arc::new(Self::new(store, Arc::new(NotifyHub::new()), config.lock_timeout));

        tokio::spawn(compactor::run_compactor(
            Arc::downgrade(&coordinator),
            config.compact_threshold,
            config.compact_interval,
        ));
        info!(
            "roomlock ready: data_dir={}, lock_timeout={:?}",
            config.data_dir.display(),
            config.lock_timeout
        );
        Ok(coordinator)
    }
}

impl<S: ReservationStore> Coordinator<S> {
    /// `lock_timeout` is capped at `MAX_LOCK_WAIT_MS`.
    pub fn new(store: Arc<S>, notify: Arc<NotifyHub>, lock_timeout: Duration) -> Self {
        Self {
            store,
            resource_locks: KeyedLocks::new(),
            requester_locks: KeyedLocks::new(),
            notify,
            lock_timeout: lock_timeout.min(MAX_LOCK_WAIT),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn subscribe(&self, resource_id: Ulid) -> broadcast::Receiver<Event> {
        self.notify.subscribe(resource_id)
    }

    /// Make a resource known to the booking path.
    pub async fn register_resource(&self, resource: Resource) -> Result<Resource, BookingError> {
        if resource.name.len() > MAX_NAME_LEN {
            return Err(BookingError::LimitExceeded("resource name too long"));
        }
        self.store.insert_resource(&resource).await?;
        self.notify.send(&Event::ResourceRegistered(resource.clone()));
        debug!("registered resource {} ({})", resource.id, resource.name);
        Ok(resource)
    }

    /// Book with the configured lock timeout as the deadline.
    pub async fn attempt_booking(&self, request: BookingRequest) -> Result<Reservation, BookingError> {
        self.attempt_booking_until(request, Instant::now() + self.lock_timeout)
            .await
    }

    /// Book, giving up on lock acquisition at `deadline` or after
    /// `MAX_LOCK_WAIT_MS`, whichever comes first.
    pub async fn attempt_booking_until(
        &self,
        request: BookingRequest,
        deadline: Instant,
    ) -> Result<Reservation, BookingError> {
        let started = Instant::now();
        let deadline = deadline.min(started + MAX_LOCK_WAIT);
        let result = self.book(&request, deadline).await;

        metrics::counter!(
            observability::BOOKING_ATTEMPTS_TOTAL,
            "outcome" => observability::outcome_label(&result)
        )
        .increment(1);
        metrics::histogram!(observability::BOOKING_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(r) => info!(
                "booked {} on {} {} [{}, {}) for {}",
                r.resource_id, r.date, r.id, r.span.start, r.span.end, r.requester_id
            ),
            Err(e) if e.is_retryable() => warn!("booking on {} failed: {e}", request.resource_id),
            Err(e) => debug!("booking on {} rejected: {e}", request.resource_id),
        }
        result
    }

    /// Checks run in a fixed order: range, existence, resource overlap,
    /// requester overlap. Guards drop on every return path.
    async fn book(&self, request: &BookingRequest, deadline: Instant) -> Result<Reservation, BookingError> {
        let span = Span::try_new(request.start, request.end).ok_or(BookingError::InvalidRange {
            start: request.start,
            end: request.end,
        })?;
        // Checked before locking: resources are never removed. A removal
        // path would have to take the resource lock and re-check here.
        if self.store.resource(request.resource_id).await?.is_none() {
            return Err(BookingError::ResourceNotFound(request.resource_id));
        }

        let _resource_guard = self
            .acquire(LockScope::Resource, request.resource_id, deadline)
            .await?;

        let on_resource = self
            .store
            .reservations_for_resource(request.resource_id, request.date)
            .await?;
        if let Some(hit) = first_conflict(&on_resource, &span) {
            return Err(BookingError::ResourceOverlap {
                resource_id: request.resource_id,
                conflicting: hit.id,
            });
        }
        if on_resource.len() >= MAX_RESERVATIONS_PER_RESOURCE_DAY {
            return Err(BookingError::LimitExceeded("too many reservations on resource for date"));
        }

        let _requester_guard = self
            .acquire(LockScope::Requester, request.requester_id, deadline)
            .await?;

        let held = self
            .store
            .reservations_for_requester(request.requester_id, request.date)
            .await?;
        if let Some(hit) = first_conflict(&held, &span) {
            return Err(BookingError::RequesterOverlap {
                requester_id: request.requester_id,
                conflicting: hit.id,
            });
        }

        let reservation = Reservation {
            id: Ulid::new(),
            resource_id: request.resource_id,
            requester_id: request.requester_id,
            date: request.date,
            span,
        };
        self.store.insert_reservation(&reservation).await?;
        self.notify.send(&Event::ReservationConfirmed(reservation.clone()));
        Ok(reservation)
    }

    /// Cancel a reservation under its resource's lock.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<Reservation, BookingError> {
        let result = self.cancel(id).await;
        let outcome = match &result {
            Ok(_) => "cancelled",
            Err(_) => observability::outcome_label(&result),
        };
        metrics::counter!(observability::CANCELLATIONS_TOTAL, "outcome" => outcome).increment(1);
        if let Ok(r) = &result {
            info!("cancelled {} on {} {}", r.id, r.resource_id, r.date);
        }
        result
    }

    async fn cancel(&self, id: Ulid) -> Result<Reservation, BookingError> {
        let existing = self
            .store
            .reservation(id)
            .await?
            .ok_or(BookingError::ReservationNotFound(id))?;
        let _guard = self
            .acquire(
                LockScope::Resource,
                existing.resource_id,
                Instant::now() + self.lock_timeout,
            )
            .await?;
        // A concurrent cancel may have won the lock first.
        let removed = self
            .store
            .remove_reservation(id)
            .await?
            .ok_or(BookingError::ReservationNotFound(id))?;
        self.notify.send(&Event::ReservationCancelled {
            id,
            resource_id: removed.resource_id,
        });
        Ok(removed)
    }

    async fn acquire(&self, scope: LockScope, key: Ulid, deadline: Instant) -> Result<KeyGuard, BookingError> {
        let locks = match scope {
            LockScope::Resource => &self.resource_locks,
            LockScope::Requester => &self.requester_locks,
        };
        let wait_start = Instant::now();
        let acquired = locks.acquire(&key, deadline).await;
        metrics::histogram!(observability::LOCK_WAIT_SECONDS, "scope" => scope.as_str())
            .record(wait_start.elapsed().as_secs_f64());
        acquired.map_err(|_| {
            metrics::counter!(observability::LOCK_TIMEOUTS_TOTAL, "scope" => scope.as_str())
                .increment(1);
            BookingError::LockTimeout { scope, key }
        })
    }

    /// Drop lock-table entries and notification channels nobody uses.
    pub fn prune_idle(&self) -> usize {
        let pruned = self.resource_locks.prune_idle() + self.requester_locks.prune_idle();
        self.notify.prune();
        metrics::gauge!(observability::LOCK_ENTRIES)
            .set((self.resource_locks.len() + self.requester_locks.len()) as f64);
        pruned
    }

    #[cfg(test)]
    pub(crate) fn lock_entries(&self) -> usize {
        self.resource_locks.len() + self.requester_locks.len()
    }
}
