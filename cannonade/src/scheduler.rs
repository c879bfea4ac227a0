//! Request scheduling.
//!
//! One worker task per live connection. Closed-loop by default: a worker
//! issues the next request only after the previous response completed or
//! timed out. With a configured rate the run is open-loop instead: a
//! dispatcher paces tickets through a rate limiter into a bounded queue
//! standing in for the per-connection request queues, and a full queue drops
//! the ticket as `Aborted` (backpressure). Workers consume tickets, so
//! issuance no longer depends on response completion while the connection
//! count still bounds actual in-flight requests.
//!
//! With `pipelining` above 1 (http2 only) each worker multiplexes up to that
//! many concurrent requests over its one connection, so the in-flight bound
//! becomes `connections * pipelining`.
use crate::aggregator::StatsHandle;
use crate::controller::{stopped, RunPhase};
use crate::pool::{Connection, Pool};
use crate::transport::{RequestTemplate, SendError, Transport};
use arc_swap::ArcSwap;
use cannonade_core::{RequestOutcome, RequestRecord, RunConfig};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{error::Elapsed, timeout};
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// In-flight request accounting shared by all workers. Entries are paired
/// with exits only through recorded completions, so after a forced abort the
/// residual count is exactly the number of requests that never completed.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    current: AtomicU64,
    high_water: AtomicU64,
}

impl InFlight {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    pub fn high_water(&self) -> u64 {
        self.high_water.load(Ordering::SeqCst)
    }
}

pub(crate) struct Scheduler {
    config: Arc<RunConfig>,
    pool: Arc<Pool>,
    template: Arc<RequestTemplate>,
    stats: StatsHandle,
    phase_rx: watch::Receiver<RunPhase>,
    in_flight: Arc<InFlight>,
    tickets: Option<(async_channel::Sender<()>, async_channel::Receiver<()>)>,
    limiter: Option<Arc<ArcSwap<DefaultDirectRateLimiter>>>,
}

impl Scheduler {
    pub fn new(
        config: Arc<RunConfig>,
        pool: Arc<Pool>,
        template: Arc<RequestTemplate>,
        stats: StatsHandle,
        phase_rx: watch::Receiver<RunPhase>,
    ) -> Self {
        let (tickets, limiter) = match config.rate {
            Some(rate) => {
                let capacity = config.connections * config.pipelining;
                (
                    Some(async_channel::bounded(capacity)),
                    Some(Arc::new(ArcSwap::new(Arc::new(rate_limiter(rate))))),
                )
            }
            None => (None, None),
        };

        Self {
            config,
            pool,
            template,
            stats,
            phase_rx,
            in_flight: Arc::new(InFlight::default()),
            tickets,
            limiter,
        }
    }

    /// Spawns one worker per live connection, plus the dispatcher when the
    /// run is open-loop.
    pub fn spawn(&self, tasks: &mut JoinSet<()>) {
        if let (Some((tickets_tx, _)), Some(limiter)) = (&self.tickets, &self.limiter) {
            let limiter = limiter.clone();
            let tickets_tx = tickets_tx.clone();
            let stats = self.stats.clone();
            let phase_rx = self.phase_rx.clone();
            tasks.spawn(dispatch_loop(limiter, tickets_tx, stats, phase_rx));
        }

        for _ in 0..self.pool.live() {
            let ctx = WorkerContext {
                config: self.config.clone(),
                pool: self.pool.clone(),
                template: self.template.clone(),
                stats: self.stats.clone(),
                phase_rx: self.phase_rx.clone(),
                in_flight: self.in_flight.clone(),
                tickets_rx: self.tickets.as_ref().map(|(_, rx)| rx.clone()),
            };
            tasks.spawn(worker_loop(ctx));
        }
    }

    pub fn max_in_flight(&self) -> u64 {
        self.in_flight.high_water()
    }

    /// Accounts for requests that were still on the wire when the drain
    /// grace expired and their workers were aborted.
    pub fn record_forced_aborts(&self) {
        let leftover = self.in_flight.current();
        if leftover == 0 {
            return;
        }
        warn!("{leftover} requests still in flight after drain grace, recording as aborted");
        let now = std::time::Instant::now();
        for _ in 0..leftover {
            self.stats.record(RequestRecord {
                issued: now,
                completed: now,
                bytes_sent: self.template.size(),
                bytes_received: 0,
                outcome: RequestOutcome::Aborted,
            });
        }
    }

    /// Accounts for open-loop tickets that were queued but never picked up
    /// by a worker.
    pub fn drain_tickets(&self) {
        if let Some((tickets_tx, tickets_rx)) = &self.tickets {
            tickets_tx.close();
            while tickets_rx.try_recv().is_ok() {
                self.stats.record(aborted_ticket());
            }
        }
    }
}

struct WorkerContext {
    config: Arc<RunConfig>,
    pool: Arc<Pool>,
    template: Arc<RequestTemplate>,
    stats: StatsHandle,
    phase_rx: watch::Receiver<RunPhase>,
    in_flight: Arc<InFlight>,
    tickets_rx: Option<async_channel::Receiver<()>>,
}

async fn worker_loop(mut ctx: WorkerContext) {
    loop {
        if *ctx.phase_rx.borrow() >= RunPhase::Draining {
            break;
        }

        if ctx.config.pipelining > 1 {
            let conn = tokio::select! {
                conn = ctx.pool.acquire() => match conn {
                    Some(conn) => conn,
                    None => break,
                },
                _ = stopped(&mut ctx.phase_rx) => break,
            };
            issue_pipelined(&mut ctx, conn).await;
            continue;
        }

        // Open-loop: a ticket must be paced out before a connection is
        // taken, so queued tickets model requests waiting at the connection.
        let mut holds_ticket = false;
        if let Some(tickets_rx) = &ctx.tickets_rx {
            let ticket = tokio::select! {
                ticket = tickets_rx.recv() => ticket,
                _ = stopped(&mut ctx.phase_rx) => break,
            };
            if ticket.is_err() {
                break;
            }
            holds_ticket = true;
        }

        let conn = tokio::select! {
            conn = ctx.pool.acquire() => conn,
            _ = stopped(&mut ctx.phase_rx) => None,
        };
        let Some(conn) = conn else {
            // The ticket was already paced out; it must not vanish from the
            // accounting just because the stop signal won the acquire.
            if holds_ticket {
                ctx.stats.record(aborted_ticket());
            }
            break;
        };

        issue_one(&mut ctx, conn).await;
    }
}

/// Issues a single request on the given connection, records the outcome,
/// and returns the connection to the pool (recycling it after a failure).
/// Deliberately not raced against the stop signal: an in-flight request is
/// allowed to complete or time out during drain.
async fn issue_one(ctx: &mut WorkerContext, mut conn: Connection) {
    ctx.in_flight.enter();
    let issued = std::time::Instant::now();

    let result = timeout(
        ctx.config.timeout,
        conn.transport.send(ctx.template.build()),
    )
    .await;

    let completed = std::time::Instant::now();
    let (outcome, bytes_received) = classify(result);

    ctx.stats.record(RequestRecord {
        issued,
        completed,
        bytes_sent: ctx.template.size(),
        bytes_received,
        outcome,
    });
    ctx.in_flight.exit();

    let stopping = *ctx.phase_rx.borrow() >= RunPhase::Draining;
    if outcome.is_success() {
        ctx.pool.release(conn);
    } else if stopping {
        // No point reconnecting a broken transport during drain.
        drop(conn);
    } else {
        ctx.pool.recycle(conn).await;
    }
}

/// Drives up to `pipelining` concurrent requests multiplexed over one http2
/// connection, then hands the connection back. Outstanding requests are
/// allowed to finish or time out during drain.
async fn issue_pipelined(ctx: &mut WorkerContext, conn: Connection) {
    let depth = ctx.config.pipelining;
    let mut requests: JoinSet<bool> = JoinSet::new();
    let mut healthy = true;

    while healthy && *ctx.phase_rx.borrow() < RunPhase::Draining {
        if requests.len() >= depth {
            tokio::select! {
                Some(done) = requests.join_next() => {
                    healthy &= done.unwrap_or(false);
                }
                _ = stopped(&mut ctx.phase_rx) => break,
            }
            continue;
        }

        if let Some(tickets_rx) = &ctx.tickets_rx {
            tokio::select! {
                ticket = tickets_rx.recv() => {
                    if ticket.is_err() {
                        break;
                    }
                }
                Some(done) = requests.join_next() => {
                    healthy &= done.unwrap_or(false);
                    continue;
                }
                _ = stopped(&mut ctx.phase_rx) => break,
            }
        }

        match conn.transport.multiplex() {
            Some(transport) => {
                requests.spawn(issue_multiplexed(
                    transport,
                    ctx.template.clone(),
                    ctx.stats.clone(),
                    ctx.in_flight.clone(),
                    ctx.config.timeout,
                ));
            }
            None => {
                // Validation rules this out (pipelining above 1 requires
                // http2), but a consumed ticket still has to be accounted.
                if ctx.tickets_rx.is_some() {
                    ctx.stats.record(aborted_ticket());
                }
                break;
            }
        }
    }

    while let Some(done) = requests.join_next().await {
        healthy &= done.unwrap_or(false);
    }

    let stopping = *ctx.phase_rx.borrow() >= RunPhase::Draining;
    if healthy {
        ctx.pool.release(conn);
    } else if stopping {
        drop(conn);
    } else {
        ctx.pool.recycle(conn).await;
    }
}

/// One request on its own h2 stream. Returns whether the underlying
/// connection is still usable: cancelling a timed-out stream resets the
/// stream without killing the connection, transport errors do.
async fn issue_multiplexed(
    mut transport: Transport,
    template: Arc<RequestTemplate>,
    stats: StatsHandle,
    in_flight: Arc<InFlight>,
    request_timeout: Duration,
) -> bool {
    in_flight.enter();
    let issued = std::time::Instant::now();

    let result = timeout(request_timeout, transport.send(template.build())).await;

    let completed = std::time::Instant::now();
    let (outcome, bytes_received) = classify(result);
    let healthy = !matches!(
        outcome,
        RequestOutcome::ConnectionError | RequestOutcome::ProtocolError
    );

    stats.record(RequestRecord {
        issued,
        completed,
        bytes_sent: template.size(),
        bytes_received,
        outcome,
    });
    in_flight.exit();
    healthy
}

fn classify(result: Result<Result<(u16, u64), SendError>, Elapsed>) -> (RequestOutcome, u64) {
    match result {
        Ok(Ok((status, bytes))) => (RequestOutcome::Success(status), bytes),
        Ok(Err(SendError::Protocol(err))) => {
            trace!("protocol error: {err}");
            (RequestOutcome::ProtocolError, 0)
        }
        Ok(Err(SendError::Connection(err))) => {
            trace!("connection error: {err}");
            (RequestOutcome::ConnectionError, 0)
        }
        Err(_) => (RequestOutcome::Timeout, 0),
    }
}

async fn dispatch_loop(
    limiter: Arc<ArcSwap<DefaultDirectRateLimiter>>,
    tickets_tx: async_channel::Sender<()>,
    stats: StatsHandle,
    mut phase_rx: watch::Receiver<RunPhase>,
) {
    loop {
        let paced = {
            tokio::select! {
                _ = async {
                    let limiter = limiter.load();
                    limiter.until_ready().await;
                } => true,
                _ = stopped(&mut phase_rx) => false,
            }
        };
        if !paced {
            break;
        }

        match tickets_tx.try_send(()) {
            Ok(()) => {}
            Err(async_channel::TrySendError::Full(())) => {
                // Every connection already has a full queue; the open-loop
                // request is dropped, not deferred.
                stats.record(aborted_ticket());
            }
            Err(async_channel::TrySendError::Closed(())) => break,
        }
    }
}

fn aborted_ticket() -> RequestRecord {
    let now = std::time::Instant::now();
    RequestRecord {
        issued: now,
        completed: now,
        bytes_sent: 0,
        bytes_received: 0,
        outcome: RequestOutcome::Aborted,
    }
}

fn rate_limiter(rate: NonZeroU32) -> DefaultDirectRateLimiter {
    RateLimiter::direct(Quota::per_second(rate).allow_burst(NonZeroU32::new(1).unwrap()))
}
