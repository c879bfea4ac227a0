//! Statistics aggregation.
//!
//! Workers never share mutable statistics state. Every completion is sent as
//! a [`RequestRecord`] over an unbounded channel to a single-owner task which
//! applies records in arrival order. Counters and streaming moments are
//! order-independent; quantiles vary only within the t-digest's approximation
//! error.
use cannonade_core::{
    LatencySketch, LatencySummary, OutcomeCounts, RequestOutcome, RequestRecord, RunResult,
    StatusHistogram,
};
use std::time::Duration;
use tokio::sync::mpsc;
#[allow(unused)]
use tracing::{debug, error, trace, warn};

pub(crate) enum Event {
    Record(RequestRecord),
    ConnectFailure,
}

/// Cloneable sender side, handed to every worker and the pool.
#[derive(Clone)]
pub(crate) struct StatsHandle {
    tx: mpsc::UnboundedSender<Event>,
}

impl StatsHandle {
    pub fn record(&self, record: RequestRecord) {
        // The receiver outlives all workers; a send failure means the run is
        // already tearing down.
        let _ = self.tx.send(Event::Record(record));
    }

    pub fn connect_failure(&self) {
        let _ = self.tx.send(Event::ConnectFailure);
    }
}

pub(crate) struct Aggregator {
    rx: mpsc::UnboundedReceiver<Event>,
    state: AggregateState,
}

impl Aggregator {
    pub fn new() -> (Self, StatsHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx,
                state: AggregateState::default(),
            },
            StatsHandle { tx },
        )
    }

    /// Consumes events until every handle is dropped, then yields the final
    /// state.
    pub async fn run(mut self) -> AggregateState {
        while let Some(event) = self.rx.recv().await {
            self.state.apply(event);
        }
        self.state
    }
}

#[derive(Debug, Default)]
pub(crate) struct AggregateState {
    issued: u64,
    outcomes: OutcomeCounts,
    bytes_sent: u64,
    bytes_received: u64,
    status: StatusHistogram,
    sketch: LatencySketch,
    connect_failures: u64,
}

impl AggregateState {
    fn apply(&mut self, event: Event) {
        let record = match event {
            Event::Record(record) => record,
            Event::ConnectFailure => {
                self.connect_failures += 1;
                #[cfg(feature = "metrics")]
                metrics::counter!("cannonade_connect_failures").increment(1);
                return;
            }
        };

        self.issued += 1;
        self.outcomes.observe(record.outcome);
        self.bytes_sent += record.bytes_sent;
        self.bytes_received += record.bytes_received;

        if let RequestOutcome::Success(status) = record.outcome {
            self.status.observe(status);
            self.sketch.insert(record.latency());
        }

        #[cfg(feature = "metrics")]
        {
            metrics::counter!("cannonade_requests", "outcome" => outcome_label(record.outcome))
                .increment(1);
            if record.outcome.is_success() {
                metrics::histogram!("cannonade_latency")
                    .record(record.latency().as_nanos() as f64);
            }
        }
    }

    /// Computes the final result. Pure with respect to the accumulated
    /// state: calling it again returns an identical result.
    pub fn finalize(&self, elapsed: Duration, max_in_flight: u64) -> RunResult {
        let secs = elapsed.as_secs_f64();
        // Aborted requests never completed; they are excluded from the
        // throughput numerator but not from the conservation total.
        let completed = self.issued - self.outcomes.aborted;

        RunResult {
            issued: self.issued,
            outcomes: self.outcomes,
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            latency: LatencySummary::from_sketch(&self.sketch),
            requests_per_sec: if secs > 0. { completed as f64 / secs } else { 0. },
            bytes_per_sec: if secs > 0. {
                self.bytes_received as f64 / secs
            } else {
                0.
            },
            elapsed_ms: secs * 1_000.,
            status: self.status.clone(),
            connect_failures: self.connect_failures,
            max_in_flight,
        }
    }
}

#[cfg(feature = "metrics")]
fn outcome_label(outcome: RequestOutcome) -> &'static str {
    match outcome {
        RequestOutcome::Success(_) => "success",
        RequestOutcome::Timeout => "timeout",
        RequestOutcome::ConnectionError => "connection_error",
        RequestOutcome::ProtocolError => "protocol_error",
        RequestOutcome::Aborted => "aborted",
    }
}
