use crate::{LatencySketch, RequestOutcome};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Per-outcome request counts. The conservation invariant
/// `issued == success + timeout + connection_error + protocol_error + aborted`
/// holds for every finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub success: u64,
    pub timeout: u64,
    pub connection_error: u64,
    pub protocol_error: u64,
    pub aborted: u64,
}

impl OutcomeCounts {
    pub fn observe(&mut self, outcome: RequestOutcome) {
        match outcome {
            RequestOutcome::Success(_) => self.success += 1,
            RequestOutcome::Timeout => self.timeout += 1,
            RequestOutcome::ConnectionError => self.connection_error += 1,
            RequestOutcome::ProtocolError => self.protocol_error += 1,
            RequestOutcome::Aborted => self.aborted += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.success + self.errors()
    }

    pub fn errors(&self) -> u64 {
        self.timeout + self.connection_error + self.protocol_error + self.aborted
    }
}

/// Response status distribution: per-class counters plus exact counts for
/// every non-2xx status seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusHistogram {
    pub informational: u64,
    pub success: u64,
    pub redirect: u64,
    pub client_error: u64,
    pub server_error: u64,
    pub non_2xx: BTreeMap<u16, u64>,
}

impl StatusHistogram {
    pub fn observe(&mut self, status: u16) {
        match status {
            100..=199 => self.informational += 1,
            200..=299 => self.success += 1,
            300..=399 => self.redirect += 1,
            400..=499 => self.client_error += 1,
            _ => self.server_error += 1,
        }
        if !(200..=299).contains(&status) {
            *self.non_2xx.entry(status).or_insert(0) += 1;
        }
    }
}

/// Latency distribution of completed responses, in milliseconds. Requests
/// that timed out, failed or were aborted contribute no latency sample.
///
/// Percentiles are approximate (t-digest, bounded relative error); min, max,
/// mean and stddev are exact.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LatencySummary {
    pub p50_ms: f64,
    pub p75_ms: f64,
    pub p90_ms: f64,
    pub p99_ms: f64,
    pub p99_9_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub stddev_ms: f64,
}

impl LatencySummary {
    pub fn from_sketch(sketch: &LatencySketch) -> Self {
        Self {
            p50_ms: millis(sketch.quantile(0.5)),
            p75_ms: millis(sketch.quantile(0.75)),
            p90_ms: millis(sketch.quantile(0.9)),
            p99_ms: millis(sketch.quantile(0.99)),
            p99_9_ms: millis(sketch.quantile(0.999)),
            min_ms: millis(sketch.min()),
            max_ms: millis(sketch.max()),
            mean_ms: millis(sketch.mean()),
            stddev_ms: millis(sketch.stddev()),
        }
    }
}

/// Final aggregate of a run. A plain record of numbers, serializable as-is;
/// report formatting lives outside the engine.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// Requests handed to a connection or dropped by backpressure.
    pub issued: u64,
    pub outcomes: OutcomeCounts,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub latency: LatencySummary,
    /// Completed requests per second of actual wall time (drain included).
    pub requests_per_sec: f64,
    pub bytes_per_sec: f64,
    /// Wall time actually elapsed, which can exceed the configured duration
    /// by up to the drain grace.
    pub elapsed_ms: f64,
    pub status: StatusHistogram,
    /// Failed connect or reconnect attempts that gave up a pool slot. These
    /// are not requests and do not count against `issued`.
    pub connect_failures: u64,
    /// High-water mark of simultaneously in-flight requests. Never exceeds
    /// `connections * pipelining`.
    pub max_in_flight: u64,
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} requests in {:.2}s, {:.2} req/s, {} bytes read",
            self.issued,
            self.elapsed_ms / 1_000.,
            self.requests_per_sec,
            self.bytes_received,
        )?;
        writeln!(
            f,
            "latency: p50={:.2}ms p90={:.2}ms p99={:.2}ms max={:.2}ms",
            self.latency.p50_ms, self.latency.p90_ms, self.latency.p99_ms, self.latency.max_ms,
        )?;
        write!(
            f,
            "outcomes: {} ok, {} timeout, {} conn, {} proto, {} aborted",
            self.outcomes.success,
            self.outcomes.timeout,
            self.outcomes.connection_error,
            self.outcomes.protocol_error,
            self.outcomes.aborted,
        )
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.
}
