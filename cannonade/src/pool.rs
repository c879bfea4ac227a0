//! Fixed-size connection pool.
//!
//! `open` establishes every slot up front, each with bounded connect
//! retries. Idle connections sit on an async channel; workers acquire one,
//! drive a request, and either release it or hand it back for recycling
//! when the transport misbehaved. The pool never grows past the configured
//! connection count.
use crate::aggregator::StatsHandle;
use crate::transport::Transport;
use cannonade_core::{EngineError, RunConfig, CONNECT_RETRY_BACKOFF};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::sleep;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

pub(crate) struct Connection {
    pub id: usize,
    pub transport: Transport,
}

pub(crate) struct Pool {
    idle_tx: async_channel::Sender<Connection>,
    idle_rx: async_channel::Receiver<Connection>,
    config: Arc<RunConfig>,
    stats: StatsHandle,
    live: AtomicUsize,
}

impl Pool {
    /// Opens all slots concurrently. A slot that exhausts its retries is
    /// reported to the aggregator and abandoned; if every slot fails the
    /// whole run is aborted.
    pub async fn open(config: Arc<RunConfig>, stats: StatsHandle) -> Result<Self, EngineError> {
        let (idle_tx, idle_rx) = async_channel::bounded(config.connections);

        let mut attempts = JoinSet::new();
        for id in 0..config.connections {
            let config = config.clone();
            attempts.spawn(async move { (id, connect_with_retry(&config).await) });
        }

        let mut live = 0;
        while let Some(joined) = attempts.join_next().await {
            match joined {
                Ok((id, Ok(transport))) => {
                    live += 1;
                    // Capacity equals the slot count, so this never blocks.
                    let _ = idle_tx.try_send(Connection { id, transport });
                }
                Ok((id, Err(err))) => {
                    warn!("connection {id} failed to open: {err}");
                    stats.connect_failure();
                }
                Err(err) => {
                    error!("connect task failed: {err}");
                    stats.connect_failure();
                }
            }
        }

        if live == 0 {
            return Err(EngineError::NoConnectionsAvailable {
                target: config.url.to_string(),
                attempted: config.connections,
            });
        }

        debug!("pool open with {live}/{} connections", config.connections);
        Ok(Self {
            idle_tx,
            idle_rx,
            config,
            stats,
            live: AtomicUsize::new(live),
        })
    }

    /// Waits for an idle connection. Returns `None` once the pool is
    /// drained (or every connection has died).
    pub async fn acquire(&self) -> Option<Connection> {
        self.idle_rx.recv().await.ok()
    }

    pub fn release(&self, conn: Connection) {
        let _ = self.idle_tx.try_send(conn);
    }

    /// Replaces a broken connection with a fresh one. If the reconnect
    /// fails the slot is given up and the live count shrinks.
    pub async fn recycle(&self, conn: Connection) {
        let id = conn.id;
        drop(conn);

        // A target that accepts sockets but fails every request must not
        // turn recycling into a reconnect hot loop.
        sleep(CONNECT_RETRY_BACKOFF).await;
        match connect_with_retry(&self.config).await {
            Ok(transport) => {
                trace!("connection {id} recycled");
                let _ = self.idle_tx.try_send(Connection { id, transport });
            }
            Err(err) => {
                warn!("connection {id} could not reconnect: {err}");
                self.stats.connect_failure();
                self.live.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Closes the idle queue and drops every idle connection. In-flight
    /// connections are owned by their workers and close when those finish.
    pub fn drain(&self) {
        self.idle_rx.close();
        while let Ok(conn) = self.idle_rx.try_recv() {
            drop(conn);
        }
    }
}

async fn connect_with_retry(config: &RunConfig) -> io::Result<Transport> {
    let retries = config.connect_retries.max(1);
    let mut last_err = None;
    for attempt in 0..retries {
        if attempt > 0 {
            sleep(CONNECT_RETRY_BACKOFF).await;
        }
        match Transport::connect(config).await {
            Ok(transport) => return Ok(transport),
            Err(err) => {
                debug!(
                    "connect attempt {}/{} failed: {err}",
                    attempt + 1,
                    retries
                );
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::other("no connect attempt made")))
}
