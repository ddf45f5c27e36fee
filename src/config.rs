use std::path::PathBuf;
use std::time::Duration;

use crate::limits::MAX_LOCK_WAIT_MS;

/// Runtime settings, read from `ROOMLOCK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding `reservations.wal`.
    pub data_dir: PathBuf,
    /// Default deadline for acquiring a resource or requester lock.
    pub lock_timeout: Duration,
    /// Compact once this many events were appended since the last compaction.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub wal_channel_capacity: usize,
    /// Prometheus listener port; `None` leaves the exporter off.
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            lock_timeout: Duration::from_millis(5_000),
            compact_threshold: 1_000,
            compact_interval: Duration::from_secs(30),
            wal_channel_capacity: 4_096,
            metrics_port: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let lock_timeout_ms: u64 = env_parse("ROOMLOCK_LOCK_TIMEOUT_MS")
            .unwrap_or(defaults.lock_timeout.as_millis() as u64);
        Self {
            data_dir: std::env::var("ROOMLOCK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            lock_timeout: Duration::from_millis(lock_timeout_ms.min(MAX_LOCK_WAIT_MS)),
            compact_threshold: env_parse("ROOMLOCK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            compact_interval: env_parse("ROOMLOCK_COMPACT_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.compact_interval),
            wal_channel_capacity: env_parse("ROOMLOCK_WAL_CHANNEL_CAPACITY")
                .unwrap_or(defaults.wal_channel_capacity),
            metrics_port: env_parse("ROOMLOCK_METRICS_PORT"),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}
