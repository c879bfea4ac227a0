use axum::{debug_handler, extract::Path, http::StatusCode, routing::get, Router};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

pub fn app() -> Router {
    Router::new()
        .route("/", get(root))
        .route("/delay/ms/:delay_ms", get(delay))
        .route("/status/:code", get(status))
        .route("/inflight/peak", get(inflight_peak))
        .route("/inflight/reset", get(inflight_reset))
}

/// Binds an ephemeral local port and serves in the background. Returns the
/// bound address for clients to hit.
pub async fn serve() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app()).await.unwrap();
    });
    addr
}

pub async fn run(addr: SocketAddr) {
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app()).await.unwrap();
}

#[debug_handler]
pub async fn root() -> &'static str {
    track(|| async {}).await;
    "ok"
}

#[debug_handler]
pub async fn delay(Path(delay_ms): Path<u64>) -> &'static str {
    track(|| tokio::time::sleep(Duration::from_millis(delay_ms))).await;
    "ok"
}

#[debug_handler]
pub async fn status(Path(code): Path<u16>) -> StatusCode {
    debug!("MOCK SERVER ___ status {code}");
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/** Concurrency tracking **/

static INFLIGHT: AtomicU64 = AtomicU64::new(0);
static INFLIGHT_PEAK: AtomicU64 = AtomicU64::new(0);

async fn track<F, Fut>(f: F)
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let now = INFLIGHT.fetch_add(1, Ordering::SeqCst) + 1;
    INFLIGHT_PEAK.fetch_max(now, Ordering::SeqCst);
    f().await;
    INFLIGHT.fetch_sub(1, Ordering::SeqCst);
}

/// Highest number of requests this server has seen in flight at once.
#[debug_handler]
pub async fn inflight_peak() -> String {
    INFLIGHT_PEAK.load(Ordering::SeqCst).to_string()
}

#[debug_handler]
pub async fn inflight_reset() -> &'static str {
    INFLIGHT.store(0, Ordering::SeqCst);
    INFLIGHT_PEAK.store(0, Ordering::SeqCst);
    "ok"
}
