mod utils;
#[allow(unused)]
use utils::*;

use cannonade::{EngineError, RunConfig};
use std::time::{Duration, Instant};

#[tokio::test]
#[ntest::timeout(30_000)]
async fn responsive_target_yields_only_successes() {
    init();
    let addr = mock_service::serve().await;

    let config = RunConfig::parse(&format!("http://{addr}/"))
        .unwrap()
        .connections(1)
        .duration(Duration::from_secs(1));

    let result = cannonade::run(config).await.unwrap();

    assert!(result.issued > 0);
    assert_eq!(result.outcomes.success, result.issued);
    assert_eq!(result.outcomes.errors(), 0);
    assert_eq!(result.status.success, result.issued);
    assert!(result.max_in_flight <= 1);
    assert!(result.requests_per_sec > 0.);
    assert!(result.bytes_received > 0);
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn unreachable_target_is_fatal() {
    init();
    let url = refused_url().await;

    let config = RunConfig::parse(&url)
        .unwrap()
        .connections(5)
        .duration(Duration::from_secs(2));

    let err = cannonade::run(config).await.err().unwrap();
    assert!(matches!(err, EngineError::NoConnectionsAvailable { .. }));
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn mute_server_times_every_request_out() {
    init();
    let url = silent_listener().await;

    let config = RunConfig::parse(&url)
        .unwrap()
        .connections(2)
        .duration(Duration::from_secs(1))
        .timeout(Duration::from_millis(200));

    let result = cannonade::run(config).await.unwrap();

    assert!(result.issued > 0);
    assert_eq!(result.outcomes.success, 0);
    assert_eq!(result.outcomes.timeout, result.issued);
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn slow_responses_are_aborted_after_grace() {
    init();
    let addr = mock_service::serve().await;

    // Responses take 5s; the run stops issuing at 500ms and only waits
    // another 500ms for stragglers. The per-request timeout is deliberately
    // longer than the grace so the leftovers end as aborted, not timed out.
    let config = RunConfig::parse(&format!("http://{addr}/delay/ms/5000"))
        .unwrap()
        .connections(2)
        .duration(Duration::from_millis(500))
        .timeout(Duration::from_secs(10))
        .drain_grace(Duration::from_millis(500));

    let started = Instant::now();
    let result = cannonade::run(config).await.unwrap();
    let wall = started.elapsed();

    assert!(result.outcomes.aborted >= 1);
    assert_eq!(result.outcomes.success, 0);
    // duration + grace + scheduling slack
    assert!(wall < Duration::from_secs(3), "run took {wall:?}");
    // The result reflects the overrun, not the configured duration.
    assert!(result.elapsed_ms >= 500.);
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn every_issued_request_is_accounted_for() {
    init();
    let addr = mock_service::serve().await;

    let config = RunConfig::parse(&format!("http://{addr}/delay/ms/1"))
        .unwrap()
        .connections(5)
        .duration(Duration::from_secs(1));

    let result = cannonade::run(config).await.unwrap();

    assert!(result.issued > 0);
    assert_eq!(
        result.issued,
        result.outcomes.success
            + result.outcomes.timeout
            + result.outcomes.connection_error
            + result.outcomes.protocol_error
            + result.outcomes.aborted
    );
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn non_2xx_statuses_are_successful_requests() {
    init();
    let addr = mock_service::serve().await;

    let config = RunConfig::parse(&format!("http://{addr}/status/503"))
        .unwrap()
        .connections(2)
        .duration(Duration::from_millis(500));

    let result = cannonade::run(config).await.unwrap();

    // A 503 is a completed request, not an engine error.
    assert_eq!(result.outcomes.success, result.issued);
    assert_eq!(result.outcomes.errors(), 0);
    assert_eq!(result.status.server_error, result.issued);
    assert_eq!(result.status.non_2xx.get(&503), Some(&result.issued));
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn open_loop_rate_caps_issuance() {
    init();
    let addr = mock_service::serve().await;

    let config = RunConfig::parse(&format!("http://{addr}/delay/ms/1"))
        .unwrap()
        .connections(4)
        .duration(Duration::from_secs(1))
        .rate(std::num::NonZeroU32::new(100).unwrap());

    let result = cannonade::run(config).await.unwrap();

    assert!(result.outcomes.success > 10);
    // Pacing holds issuance well under what 4 closed-loop connections
    // against a 1ms endpoint would reach.
    assert!(result.issued <= 130, "issued={}", result.issued);
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn open_loop_backpressure_drops_as_aborted() {
    init();
    let addr = mock_service::serve().await;

    // One connection busy for 200ms per request, paced at 500 req/s with a
    // queue depth of one: almost every ticket overflows.
    let config = RunConfig::parse(&format!("http://{addr}/delay/ms/200"))
        .unwrap()
        .connections(1)
        .duration(Duration::from_secs(1))
        .rate(std::num::NonZeroU32::new(500).unwrap());

    let result = cannonade::run(config).await.unwrap();

    assert!(result.outcomes.aborted > 0);
    assert_eq!(
        result.issued,
        result.outcomes.success + result.outcomes.timeout + result.outcomes.aborted
    );
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn failing_requests_do_not_storm_reconnects() {
    init();
    let url = closing_listener().await;

    // The target accepts sockets and kills them immediately. Recycling
    // backs off between reconnects, so a 500ms run stays far from the
    // thousands of attempts an unthrottled loop would make.
    let config = RunConfig::parse(&url)
        .unwrap()
        .connections(1)
        .duration(Duration::from_millis(500))
        .timeout(Duration::from_secs(1));

    let result = cannonade::run(config).await.unwrap();

    assert_eq!(result.outcomes.success, 0);
    assert!(result.issued >= 1);
    assert!(result.issued < 50, "issued={}", result.issued);
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn http2_prior_knowledge_round_trip() {
    init();
    let addr = mock_service::serve().await;

    let config = RunConfig::parse(&format!("http://{addr}/"))
        .unwrap()
        .connections(2)
        .duration(Duration::from_millis(500))
        .http2(true);

    let result = cannonade::run(config).await.unwrap();

    assert!(result.outcomes.success > 0);
    assert_eq!(result.outcomes.errors(), 0);
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn pipelining_multiplexes_over_http2() {
    init();
    let addr = mock_service::serve().await;

    // One connection, responses take 100ms: serial issue tops out around
    // 10 requests in a second, four multiplexed streams close to 40.
    let config = RunConfig::parse(&format!("http://{addr}/delay/ms/100"))
        .unwrap()
        .connections(1)
        .duration(Duration::from_secs(1))
        .http2(true)
        .pipelining(4);

    let result = cannonade::run(config).await.unwrap();

    assert!(result.outcomes.success >= 15, "success={}", result.outcomes.success);
    assert!(result.max_in_flight >= 2);
    assert!(result.max_in_flight <= 4, "max_in_flight={}", result.max_in_flight);
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn run_terminates_within_duration_plus_grace() {
    init();
    let addr = mock_service::serve().await;

    let config = RunConfig::parse(&format!("http://{addr}/delay/ms/10"))
        .unwrap()
        .connections(3)
        .duration(Duration::from_secs(1))
        .timeout(Duration::from_millis(500));

    let started = Instant::now();
    let result = cannonade::run(config).await.unwrap();
    let wall = started.elapsed();

    // duration (1s) + grace (2 x 500ms) + slack
    assert!(wall < Duration::from_millis(2_500), "run took {wall:?}");
    assert!(result.elapsed_ms >= 1_000.);
}
