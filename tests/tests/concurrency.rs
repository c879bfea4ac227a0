//! Runs alone in its own binary: the mock service's in-flight tracking is
//! process-global, and other tests hitting the same statics would skew the
//! peak.
mod utils;
#[allow(unused)]
use utils::*;

use cannonade::RunConfig;
use std::time::Duration;

#[tokio::test]
#[ntest::timeout(30_000)]
async fn in_flight_never_exceeds_connection_count() {
    init();
    let addr = mock_service::serve().await;

    let client = |path: &str| format!("http://{addr}{path}");

    // Slow enough responses that all connections stay busy.
    let config = RunConfig::parse(&client("/delay/ms/20"))
        .unwrap()
        .connections(3)
        .duration(Duration::from_secs(1));

    let result = cannonade::run(config).await.unwrap();

    // Engine-side instrumentation.
    assert!(result.max_in_flight >= 1);
    assert!(
        result.max_in_flight <= 3,
        "max_in_flight={}",
        result.max_in_flight
    );

    // Server-side high-water mark agrees.
    let body = plain_get(&client("/inflight/peak")).await;
    let peak: u64 = body.trim().parse().unwrap();
    assert!(peak >= 1);
    assert!(peak <= 3, "server saw {peak} concurrent requests");
}

/// Minimal one-shot GET so this test does not need an HTTP client crate.
async fn plain_get(url: &str) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let rest = url.strip_prefix("http://").unwrap();
    let (authority, path) = rest.split_once('/').unwrap();
    let mut stream = tokio::net::TcpStream::connect(authority).await.unwrap();
    let request = format!(
        "GET /{path} HTTP/1.1\r\nHost: {authority}\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8(response).unwrap();
    response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default()
}
