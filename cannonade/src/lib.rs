//! A concurrent HTTP load-generator engine.
//!
//! `cannonade` drives a fixed budget of persistent connections against one
//! HTTP/1.1 or HTTP/2 target for a fixed duration and aggregates per-request
//! latency and throughput into a bounded-memory summary. The engine is a
//! library: argument parsing, config loading and report formatting are the
//! caller's business. Feed it a [`RunConfig`], get back a [`RunResult`].
//!
//! ```no_run
//! use cannonade::RunConfig;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), cannonade::EngineError> {
//! let config = RunConfig::parse("http://localhost:8181")?
//!     .connections(100)
//!     .duration(Duration::from_secs(10));
//! let result = cannonade::run(config).await?;
//! println!("{result}");
//! # Ok(())
//! # }
//! ```
//!
//! A finished run always yields a `RunResult`, possibly with a 100% error
//! rate; only invalid configuration or a target no connection could ever
//! reach abort with an [`EngineError`].

mod aggregator;
mod controller;
mod pool;
mod scheduler;
mod transport;

use crate::aggregator::Aggregator;
use crate::controller::DurationController;
use crate::pool::Pool;
use crate::scheduler::Scheduler;
use crate::transport::RequestTemplate;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::timeout;
#[allow(unused)]
use tracing::{debug, error, info, instrument, trace, warn};

pub use cannonade_core::{
    EngineError, LatencySummary, OutcomeCounts, RequestOutcome, RequestRecord, RunConfig,
    RunResult, StatusHistogram,
};

/// Runs one load-generation pass and returns the aggregate result.
///
/// Mid-run failures (timeouts, dropped connections, malformed responses)
/// are absorbed into the result; the run keeps going. Total wall time is
/// bounded by `duration + drain grace` no matter what the target does.
#[instrument(name = "run", skip_all, fields(target = %config.url))]
pub async fn run(config: RunConfig) -> Result<RunResult, EngineError> {
    config.validate()?;
    let config = Arc::new(config);

    let template =
        RequestTemplate::new(&config).map_err(|err| EngineError::InvalidUrl {
            url: config.url.to_string(),
            reason: err.to_string(),
        })?;

    let (aggregator, stats) = Aggregator::new();
    let stats_task = tokio::spawn(aggregator.run());

    let pool = Arc::new(Pool::open(config.clone(), stats.clone()).await?);
    info!(
        "running for {:?} across {} connections",
        config.duration,
        pool.live()
    );

    let (mut controller, phase_rx) = DurationController::new();
    let scheduler = Scheduler::new(
        config.clone(),
        pool.clone(),
        Arc::new(template),
        stats.clone(),
        phase_rx,
    );
    let mut workers = JoinSet::new();
    scheduler.spawn(&mut workers);

    controller.start();
    controller.run_window(config.duration).await;

    // Drain: dispatched requests may finish or time out, bounded by the
    // grace period. Whatever is still outstanding afterwards is cut off and
    // recorded as aborted so the accounting stays exact.
    let grace = config.resolved_drain_grace();
    let drained = timeout(grace, async {
        while workers.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("drain grace ({grace:?}) expired with requests outstanding");
        workers.abort_all();
        while workers.join_next().await.is_some() {}
        scheduler.record_forced_aborts();
    }
    scheduler.drain_tickets();
    pool.drain();
    controller.finish();
    let elapsed = controller.elapsed();
    debug!("run finished in {elapsed:?}");

    let max_in_flight = scheduler.max_in_flight();
    drop(scheduler);
    drop(pool);
    drop(stats);

    let state = stats_task
        .await
        .expect("statistics task does not panic");
    Ok(state.finalize(elapsed, max_in_flight))
}
