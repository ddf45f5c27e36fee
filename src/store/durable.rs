use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::wal::Wal;
use super::{MemoryStore, ReservationStore, StoreError};

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One fsync for the whole batch, then answer every sender.
///
/// A batch commits or fails as a unit: on failure the WAL is cut back to its
/// length before the batch and every sender gets the error.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut events = vec![event];
        let mut responders = vec![response];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => {
                    events.push(event);
                    responders.push(response);
                }
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(events.len() as f64);
        let flush_start = Instant::now();
        let result = wal.append_batch(&events);
        metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            warn!("WAL batch of {} events failed: {e}", events.len());
        }
        respond_batch(responders, &result);

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
    debug!("WAL writer for {} stopped", wal.path().display());
}

fn respond_batch(responders: Vec<oneshot::Sender<io::Result<()>>>, result: &io::Result<()>) {
    for tx in responders {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let _ = response.send(wal.append_batch(std::slice::from_ref(&event)));
        }
    }
}

/// Durable store: a `MemoryStore` whose every mutation is first committed to a WAL.
///
/// A mutation is visible only after its record is fsynced; if the append
/// fails nothing is applied.
pub struct WalStore {
    state: MemoryStore,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Writers hold it shared; compaction holds it exclusively so no event can
    /// land in the old log after the snapshot was taken.
    compaction_gate: RwLock<()>,
    path: PathBuf,
}

impl WalStore {
    /// Replay the log at `path`, cutting off any torn tail, and start its
    /// writer task. Must be called inside a tokio runtime.
    pub fn open(path: &Path, channel_capacity: usize) -> Result<Self, StoreError> {
        let (wal, events) = Wal::recover(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(channel_capacity.max(1));
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let state = MemoryStore::new();
        for event in &events {
            state.apply_event(event);
        }
        info!(
            "replayed {} WAL events from {}: {} resources, {} reservations",
            events.len(),
            path.display(),
            state.resource_count(),
            state.reservation_count()
        );

        Ok(Self {
            state,
            wal_tx,
            compaction_gate: RwLock::new(()),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reservation_count(&self) -> usize {
        self.state.reservation_count()
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WriterClosed)?;
        rx.await.map_err(|_| StoreError::WriterClosed)??;
        Ok(())
    }

    /// WAL-append then apply, under the shared side of the compaction gate.
    async fn persist_and_apply(&self, event: Event) -> Result<(), StoreError> {
        let _gate = self.compaction_gate.read().await;
        self.wal_append(&event).await?;
        self.state.apply_event(&event);
        Ok(())
    }

    /// Rewrite the log with only the events needed to recreate current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _gate = self.compaction_gate.write().await;
        let events = self.state.snapshot();
        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::WriterClosed)?;
        rx.await.map_err(|_| StoreError::WriterClosed)??;
        info!("compacted WAL {} to {count} events", self.path.display());
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl ReservationStore for WalStore {
    async fn resource(&self, id: Ulid) -> Result<Option<Resource>, StoreError> {
        self.state.resource(id).await
    }

    async fn resources(&self) -> Result<Vec<Resource>, StoreError> {
        self.state.resources().await
    }

    async fn insert_resource(&self, resource: &Resource) -> Result<(), StoreError> {
        if self.state.contains_resource(&resource.id) {
            return Err(StoreError::DuplicateResource(resource.id));
        }
        self.persist_and_apply(Event::ResourceRegistered(resource.clone()))
            .await
    }

    async fn reservations_for_resource(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Reservation>, StoreError> {
        self.state.reservations_for_resource(resource_id, date).await
    }

    async fn reservations_for_requester(
        &self,
        requester_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Reservation>, StoreError> {
        self.state.reservations_for_requester(requester_id, date).await
    }

    async fn reservation(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        self.state.reservation(id).await
    }

    async fn reservations_on(&self, date: NaiveDate) -> Result<Vec<Reservation>, StoreError> {
        self.state.reservations_on(date).await
    }

    async fn all_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        self.state.all_reservations().await
    }

    async fn insert_reservation(&self, reservation: &Reservation) -> Result<(), StoreError> {
        if self.state.contains_reservation(&reservation.id) {
            return Err(StoreError::DuplicateReservation(reservation.id));
        }
        self.persist_and_apply(Event::ReservationConfirmed(reservation.clone()))
            .await
    }

    async fn remove_reservation(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        let Some(existing) = self.state.reservation(id).await? else {
            return Ok(None);
        };
        self.persist_and_apply(Event::ReservationCancelled {
            id,
            resource_id: existing.resource_id,
        })
        .await?;
        Ok(Some(existing))
    }
}
