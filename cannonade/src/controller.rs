//! Run lifecycle: `Idle -> Running -> Draining -> Finished`.
//!
//! The controller owns the monotonic clock for the run and broadcasts phase
//! changes on a watch channel. Workers observe the channel at every issue
//! point, and the per-request timeout bounds how long any single worker can
//! lag behind a phase change. Together with the drain grace this guarantees
//! the run terminates in bounded time regardless of how the target behaves.
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

const TICK_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum RunPhase {
    Idle,
    Running,
    Draining,
    Finished,
}

pub(crate) struct DurationController {
    phase_tx: watch::Sender<RunPhase>,
    started: Option<Instant>,
}

impl DurationController {
    pub fn new() -> (Self, watch::Receiver<RunPhase>) {
        let (phase_tx, phase_rx) = watch::channel(RunPhase::Idle);
        (
            Self {
                phase_tx,
                started: None,
            },
            phase_rx,
        )
    }

    /// Enters Running and starts the clock. Called once the pool has
    /// attempted every connection.
    pub fn start(&mut self) -> Instant {
        let now = Instant::now();
        self.started = Some(now);
        let _ = self.phase_tx.send(RunPhase::Running);
        now
    }

    /// Ticks until the configured duration elapses, then signals Draining.
    /// No new requests are issued after this returns.
    pub async fn run_window(&mut self, duration: Duration) {
        let started = match self.started {
            Some(started) => started,
            None => self.start(),
        };

        let mut timer = interval(TICK_INTERVAL);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            // NOTE: First tick completes instantly
            timer.tick().await;
            if started.elapsed() >= duration {
                break;
            }
        }

        debug!("duration elapsed, draining");
        let _ = self.phase_tx.send(RunPhase::Draining);
    }

    pub fn finish(&mut self) {
        let _ = self.phase_tx.send(RunPhase::Finished);
    }

    pub fn elapsed(&self) -> Duration {
        self.started.map(|s| s.elapsed()).unwrap_or_default()
    }
}

/// Waits until the run has stopped issuing new requests. Used as a select
/// arm by everything that must observe the stop signal promptly.
pub(crate) async fn stopped(phase_rx: &mut watch::Receiver<RunPhase>) {
    let _ = phase_rx.wait_for(|phase| *phase >= RunPhase::Draining).await;
}
