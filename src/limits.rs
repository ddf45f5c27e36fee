/// Reservations one resource may hold on a single date.
pub const MAX_RESERVATIONS_PER_RESOURCE_DAY: usize = 1_000;

/// Upper bound on a resource display name, in bytes.
pub const MAX_NAME_LEN: usize = 100;

/// Lock acquisition is never allowed to wait longer than this,
/// whatever deadline the caller passes.
pub const MAX_LOCK_WAIT_MS: u64 = 60_000;

/// Largest WAL record payload, in bytes. Longer length words are read as a
/// corrupt tail; longer events are refused at append time.
pub const MAX_RECORD_LEN: usize = 1 << 20;
