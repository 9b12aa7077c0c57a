use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_histogram, Counter, Encoder, Histogram, TextEncoder,
};

/// Requests routed to a backend (publish issued)
pub static REQUESTS_ROUTED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "fleet_requests_routed_total",
        "Total number of requests routed to backend services"
    )
    .expect("Failed to register fleet_requests_routed_total metric")
});

/// Routed requests that timed out waiting for a reply
pub static REQUEST_TIMEOUTS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "fleet_request_timeouts_total",
        "Total number of routed requests that timed out"
    )
    .expect("Failed to register fleet_request_timeouts_total metric")
});

/// Calls rejected by an open circuit breaker (no transport attempt)
pub static BREAKER_REJECTIONS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "fleet_breaker_rejections_total",
        "Total number of calls rejected by an open circuit breaker"
    )
    .expect("Failed to register fleet_breaker_rejections_total metric")
});

/// Successful broker publishes
pub static PUBLISH_SUCCESS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "fleet_publish_success_total",
        "Total number of successful broker publish operations"
    )
    .expect("Failed to register fleet_publish_success_total metric")
});

/// Failed broker publishes
pub static PUBLISH_FAILURE: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "fleet_publish_failure_total",
        "Total number of failed broker publish operations"
    )
    .expect("Failed to register fleet_publish_failure_total metric")
});

/// Broker publish latency
pub static PUBLISH_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "fleet_publish_latency_seconds",
        "Broker publish latency in seconds",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register fleet_publish_latency_seconds metric")
});

/// Consumer-side messages dispatched and answered successfully
pub static CONSUMER_PROCESSED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "fleet_consumer_processed_total",
        "Total number of request envelopes processed by service consumers"
    )
    .expect("Failed to register fleet_consumer_processed_total metric")
});

/// Consumer-side messages rejected (decode or validation failure)
pub static CONSUMER_REJECTED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "fleet_consumer_rejected_total",
        "Total number of request envelopes rejected by service consumers"
    )
    .expect("Failed to register fleet_consumer_rejected_total metric")
});

/// Render all registered metrics in the Prometheus text format.
pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
