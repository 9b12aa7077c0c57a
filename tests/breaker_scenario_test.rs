// Circuit breaker lifecycle driven end to end through the router: repeated
// timeouts open the breaker, an open breaker fails fast without touching the
// transport, and a recovered backend closes it again through half-open.

use fleet_config::{CircuitBreakerConfig, RoutingConfig};
use fleet_core::{
    CircuitBreakerManager, CircuitState, CorrelationRegistry, DispatchTable, InMemoryTransport,
    Method, OutboundRequest, RequestRouter, ResponseListener, ServiceRequestConsumer,
};
use fleet_error::CoreError;
use futures::FutureExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn routing() -> RoutingConfig {
    RoutingConfig {
        services: vec!["gps".to_string()],
        request_topic_prefix: "fleet.requests.".to_string(),
        reply_queue: "fleet.responses.core".to_string(),
    }
}

fn request() -> OutboundRequest {
    OutboundRequest {
        service: "gps".to_string(),
        endpoint: "/positions".to_string(),
        method: Method::Get,
        data: json!({}),
        user_context: json!({"user_id": "u-1"}),
    }
}

#[tokio::test]
async fn breaker_opens_fails_fast_and_recovers_through_half_open() {
    let transport = Arc::new(InMemoryTransport::new());
    let registry = Arc::new(CorrelationRegistry::new());
    let breakers = Arc::new(CircuitBreakerManager::new(CircuitBreakerConfig {
        failure_threshold: 3,
        success_threshold: 2,
        recovery_timeout: Duration::from_millis(200),
        call_timeout: Duration::from_secs(1),
    }));

    ResponseListener::start(transport.as_ref(), "fleet.responses.core", registry.clone())
        .await
        .unwrap();
    let router = RequestRouter::new(
        transport.clone(),
        registry.clone(),
        breakers.clone(),
        routing(),
    );

    // No gps consumer yet: three consecutive caller timeouts open the breaker.
    for _ in 0..3 {
        let result = router.send(request(), Duration::from_millis(50)).await;
        assert!(matches!(result, Err(CoreError::Timeout { .. })));
    }
    let breaker = breakers.get("gps").await;
    assert_eq!(breaker.state().await, CircuitState::Open);

    // Open breaker: fail fast, nothing reaches the transport.
    let published_before = transport.publish_count("fleet.requests.gps").await;
    let result = router.send(request(), Duration::from_millis(50)).await;
    assert!(matches!(result, Err(CoreError::CircuitOpen { .. })));
    assert_eq!(
        transport.publish_count("fleet.requests.gps").await,
        published_before
    );

    // Bring the backend up and let the recovery window pass.
    let table = DispatchTable::new().route(
        Method::Get,
        "/positions",
        Arc::new(|_data, _ctx| async move { Ok(json!({"positions": []})) }.boxed()),
    );
    Arc::new(ServiceRequestConsumer::new("gps", transport.clone(), table))
        .start("fleet.requests.gps")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    // First trial call goes through in half-open.
    let first = router.send(request(), Duration::from_secs(1)).await.unwrap();
    assert_eq!(first, json!({"positions": []}));
    assert_eq!(breaker.state().await, CircuitState::HalfOpen);

    // Second success closes the breaker.
    router.send(request(), Duration::from_secs(1)).await.unwrap();
    assert_eq!(breaker.state().await, CircuitState::Closed);
}

#[tokio::test]
async fn failure_during_half_open_reopens_the_breaker() {
    let transport = Arc::new(InMemoryTransport::new());
    let registry = Arc::new(CorrelationRegistry::new());
    let breakers = Arc::new(CircuitBreakerManager::new(CircuitBreakerConfig {
        failure_threshold: 2,
        success_threshold: 2,
        recovery_timeout: Duration::from_millis(100),
        call_timeout: Duration::from_secs(1),
    }));

    ResponseListener::start(transport.as_ref(), "fleet.responses.core", registry.clone())
        .await
        .unwrap();
    let router = RequestRouter::new(
        transport.clone(),
        registry.clone(),
        breakers.clone(),
        routing(),
    );

    for _ in 0..2 {
        let result = router.send(request(), Duration::from_millis(50)).await;
        assert!(matches!(result, Err(CoreError::Timeout { .. })));
    }
    let breaker = breakers.get("gps").await;
    assert_eq!(breaker.state().await, CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(150)).await;

    // Backend still down: the half-open trial times out and reopens.
    let result = router.send(request(), Duration::from_millis(50)).await;
    assert!(matches!(result, Err(CoreError::Timeout { .. })));
    assert_eq!(breaker.state().await, CircuitState::Open);

    // And callers fail fast again immediately.
    let result = router.send(request(), Duration::from_millis(50)).await;
    assert!(matches!(result, Err(CoreError::CircuitOpen { .. })));
}
