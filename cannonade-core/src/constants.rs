use std::time::Duration;

pub const DEFAULT_CONNECTIONS: usize = 10;

pub const DEFAULT_DURATION: Duration = Duration::from_secs(10);

/// Default per-request timeout. A timed-out request is recorded and its
/// connection recycled; the run continues.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect attempts per pool slot before the slot is counted as failed.
pub const DEFAULT_CONNECT_RETRIES: usize = 3;

pub const CONNECT_RETRY_BACKOFF: Duration = Duration::from_millis(100);
