use std::net::SocketAddr;

use crate::coordinator::BookingError;

// ── Booking path ────────────────────────────────────────────────

/// Counter: booking attempts. Labels: outcome.
pub const BOOKING_ATTEMPTS_TOTAL: &str = "roomlock_booking_attempts_total";

/// Histogram: end-to-end attempt latency in seconds, lock wait included.
pub const BOOKING_DURATION_SECONDS: &str = "roomlock_booking_duration_seconds";

/// Counter: cancellations. Labels: outcome.
pub const CANCELLATIONS_TOTAL: &str = "roomlock_cancellations_total";

// ── Lock coordinator ────────────────────────────────────────────

/// Histogram: time spent waiting for a resource or requester lock. Labels: scope.
pub const LOCK_WAIT_SECONDS: &str = "roomlock_lock_wait_seconds";

/// Counter: lock acquisitions abandoned at the deadline. Labels: scope.
pub const LOCK_TIMEOUTS_TOTAL: &str = "roomlock_lock_timeouts_total";

/// Gauge: entries currently in the keyed lock tables.
pub const LOCK_ENTRIES: &str = "roomlock_lock_entries";

// ── Durable store ───────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomlock_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomlock_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "roomlock_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Install the fmt subscriber. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().try_init();
}

/// Map a booking result to a short label for metrics.
pub fn outcome_label<T>(result: &Result<T, BookingError>) -> &'static str {
    match result {
        Ok(_) => "confirmed",
        Err(BookingError::InvalidRange { .. }) => "invalid_range",
        Err(BookingError::ResourceNotFound(_)) => "resource_not_found",
        Err(BookingError::ReservationNotFound(_)) => "reservation_not_found",
        Err(BookingError::ResourceOverlap { .. }) => "resource_overlap",
        Err(BookingError::RequesterOverlap { .. }) => "requester_overlap",
        Err(BookingError::LimitExceeded(_)) => "limit_exceeded",
        Err(BookingError::LockTimeout { .. }) => "lock_timeout",
        Err(BookingError::Store(_)) => "store_error",
    }
}
