use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use futures::future::join_all;
use tokio::sync::{Barrier, Notify};
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use roomlock::notify::NotifyHub;
use roomlock::{
    BookingError, BookingRequest, Config, Coordinator, LockScope, MemoryStore, Reservation,
    ReservationStore, Resource, StoreError,
};

// ── Test infrastructure ──────────────────────────────────────

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()
}

fn req(resource_id: Ulid, requester_id: Ulid, start: NaiveTime, end: NaiveTime) -> BookingRequest {
    BookingRequest {
        resource_id,
        requester_id,
        date: day(),
        start,
        end,
    }
}

/// Memory store that parks inserts for one resource until released.
struct GatedStore {
    inner: MemoryStore,
    gated: Ulid,
    entered: Notify,
    release: Notify,
}

impl GatedStore {
    fn new(gated: Ulid) -> Self {
        Self {
            inner: MemoryStore::new(),
            gated,
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl ReservationStore for GatedStore {
    async fn resource(&self, id: Ulid) -> Result<Option<Resource>, StoreError> {
        self.inner.resource(id).await
    }
    async fn resources(&self) -> Result<Vec<Resource>, StoreError> {
        self.inner.resources().await
    }
    async fn insert_resource(&self, resource: &Resource) -> Result<(), StoreError> {
        self.inner.insert_resource(resource).await
    }
    async fn reservations_for_resource(&self, resource_id: Ulid, date: NaiveDate) -> Result<Vec<Reservation>, StoreError> {
        self.inner.reservations_for_resource(resource_id, date).await
    }
    async fn reservations_for_requester(&self, requester_id: Ulid, date: NaiveDate) -> Result<Vec<Reservation>, StoreError> {
        self.inner.reservations_for_requester(requester_id, date).await
    }
    async fn reservation(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        self.inner.reservation(id).await
    }
    async fn reservations_on(&self, date: NaiveDate) -> Result<Vec<Reservation>, StoreError> {
        self.inner.reservations_on(date).await
    }
    async fn all_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        self.inner.all_reservations().await
    }
    async fn insert_reservation(&self, reservation: &Reservation) -> Result<(), StoreError> {
        if reservation.resource_id == self.gated {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.insert_reservation(reservation).await
    }
    async fn remove_reservation(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        self.inner.remove_reservation(id).await
    }
}

fn coordinator<S: ReservationStore>(store: Arc<S>) -> Arc<Coordinator<S>> {
    Arc::new(Coordinator::new(store, Arc::new(NotifyHub::new()), Duration::from_secs(5)))
}

// ── Contention on one slot ───────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn many_requesters_one_slot_exactly_one_wins() {
    let c = coordinator(Arc::new(MemoryStore::new()));
    let room = c.register_resource(Resource::new("Room A", 10, 3)).await.unwrap();

    let attempts = (0..32).map(|_| {
        let c = c.clone();
        tokio::spawn(async move { c.attempt_booking(req(room.id, Ulid::new(), t(14, 0), t(15, 0))).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for r in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(r, Err(BookingError::ResourceOverlap { .. })), "{r:?}");
    }
    assert_eq!(c.reservations_for_resource(room.id, day()).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_cancels_exactly_one_succeeds() {
    let c = coordinator(Arc::new(MemoryStore::new()));
    let room = c.register_resource(Resource::new("Room A", 4, 1)).await.unwrap();
    let booked = assert_ok!(c.attempt_booking(req(room.id, Ulid::new(), t(9, 0), t(10, 0))).await);

    let barrier = Arc::new(Barrier::new(2));
    let cancels = (0..2).map(|_| {
        let c = c.clone();
        let barrier = barrier.clone();
        tokio::spawn(async move {
            barrier.wait().await;
            c.cancel_booking(booked.id).await
        })
    });
    let results: Vec<_> = join_all(cancels).await.into_iter().map(|r| r.unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(BookingError::ReservationNotFound(_)))));
}

// ── Stalled holder ───────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stalled_resource_does_not_block_other_resources() {
    let stalled = Resource::new("Room A", 4, 1);
    let store = Arc::new(GatedStore::new(stalled.id));
    let c = coordinator(store.clone());
    c.register_resource(stalled.clone()).await.unwrap();
    let other = c.register_resource(Resource::new("Room B", 4, 1)).await.unwrap();

    let holder = {
        let c = c.clone();
        tokio::spawn(async move { c.attempt_booking(req(stalled.id, Ulid::new(), t(9, 0), t(10, 0))).await })
    };
    store.entered.notified().await;

    // Another resource proceeds while Room A's lock is held.
    let quick = tokio::time::timeout(
        Duration::from_secs(1),
        c.attempt_booking(req(other.id, Ulid::new(), t(9, 0), t(10, 0))),
    )
    .await
    .expect("booking on an unrelated resource should not wait");
    assert_ok!(quick);

    // A second attempt on Room A gives up at its deadline.
    let deadline = Instant::now() + Duration::from_millis(100);
    let waited = c
        .attempt_booking_until(req(stalled.id, Ulid::new(), t(11, 0), t(12, 0)), deadline)
        .await;
    match assert_err!(waited) {
        BookingError::LockTimeout { scope, key } => {
            assert_eq!(scope, LockScope::Resource);
            assert_eq!(key, stalled.id);
        }
        other => panic!("expected LockTimeout, got {other:?}"),
    }

    store.release.notify_one();
    assert_ok!(holder.await.unwrap());
    assert_eq!(c.reservations_for_resource(stalled.id, day()).await.unwrap().len(), 1);
}

// ── Durable store ────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_persist_across_reopen() {
    let config = Config {
        data_dir: std::env::temp_dir().join(format!("roomlock_int_test_{}", Ulid::new())),
        ..Config::default()
    };

    let rooms: Vec<Ulid>;
    let booked: usize;
    {
        let c = Coordinator::open(&config).unwrap();
        let mut ids = Vec::new();
        for i in 0..4 {
            let r = c.register_resource(Resource::new(format!("Room {i}"), 8, i)).await.unwrap();
            ids.push(r.id);
        }

        // Sixteen distinct room/hour slots, all submitted at once.
        let attempts = (0..16u32).map(|i| {
            let c = c.clone();
            let room = ids[i as usize % ids.len()];
            let requester = Ulid::new();
            tokio::spawn(async move {
                c.attempt_booking(req(room, requester, t(8 + i / 4, 0), t(9 + i / 4, 0))).await
            })
        });
        let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();
        booked = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(booked, 16);
        rooms = ids;
    }

    let c = Coordinator::open(&config).unwrap();
    let mut total = 0;
    for room in &rooms {
        total += c.reservations_for_resource(*room, day()).await.unwrap().len();
    }
    assert_eq!(total, booked);
    assert_eq!(c.store().reservation_count(), booked);
    let _ = std::fs::remove_dir_all(&config.data_dir);
}
