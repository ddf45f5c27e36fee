use std::sync::Weak;
use std::time::Duration;

use tracing::{debug, error};

use crate::coordinator::Coordinator;
use crate::observability;
use crate::store::{StoreError, WalStore};

/// Compact when at least `threshold` events were appended since the last
/// compaction. Returns whether a compaction ran.
pub async fn compact_if_needed(store: &WalStore, threshold: u64) -> Result<bool, StoreError> {
    if store.appends_since_compact().await < threshold {
        return Ok(false);
    }
    store.compact().await?;
    metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
    Ok(true)
}

/// Background task: periodic WAL compaction plus lock-table pruning.
/// Exits once the coordinator has been dropped.
pub async fn run_compactor(coordinator: Weak<Coordinator<WalStore>>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await; // first tick fires immediately
    loop {
        interval.tick().await;
        let Some(coordinator) = coordinator.upgrade() else {
            debug!("coordinator dropped, compactor exiting");
            return;
        };

        let pruned = coordinator.prune_idle();
        if pruned > 0 {
            debug!("pruned {pruned} idle lock entries");
        }
        if let Err(e) = compact_if_needed(coordinator.store(), threshold).await {
            error!("WAL compaction failed: {e}");
        }
    }
}
