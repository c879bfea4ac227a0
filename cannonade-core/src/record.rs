use std::time::{Duration, Instant};

/// Terminal state of a single request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A complete response was read; carries the HTTP status code.
    Success(u16),
    /// The per-request timeout elapsed before the response completed.
    Timeout,
    /// The transport failed mid-request (reset, refused, broken pipe).
    ConnectionError,
    /// The peer sent bytes hyper could not parse as a response.
    ProtocolError,
    /// The request was dropped at shutdown or by open-loop backpressure
    /// before a response could complete. Never retried.
    Aborted,
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RequestOutcome::Success(_))
    }
}

/// One completed (or abandoned) request, produced by a worker and consumed
/// immediately by the aggregator. Records are not retained individually;
/// only summary statistics persist.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub issued: Instant,
    pub completed: Instant,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub outcome: RequestOutcome,
}

impl RequestRecord {
    pub fn latency(&self) -> Duration {
        self.completed.duration_since(self.issued)
    }
}
