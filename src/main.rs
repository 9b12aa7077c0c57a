// Fleet gateway binary.
//
// Wires config, transport, correlation registry, breakers, router and
// response listener, then serves the operational HTTP surface (/health,
// /metrics). Route handlers that build OutboundRequests from REST calls
// live with the HTTP layer, not here.

use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use fleet_config::Config;
use fleet_core::{
    CircuitBreakerManager, CorrelationRegistry, KafkaTransport, RequestRouter, ResponseListener,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

struct GatewayState {
    registry: Arc<CorrelationRegistry>,
    breakers: Arc<CircuitBreakerManager>,
    router: Arc<RequestRouter>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    let filter = EnvFilter::try_new(&config.logging.filter)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    if config.logging.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!(services = ?config.routing.services, "Starting fleet gateway");

    let transport = Arc::new(
        KafkaTransport::connect(&config.broker)
            .await
            .context("Failed to connect to broker")?,
    );

    let registry = Arc::new(CorrelationRegistry::new());
    let breakers = Arc::new(CircuitBreakerManager::new(config.breaker.clone()));

    ResponseListener::start(
        transport.as_ref(),
        &config.routing.reply_queue,
        registry.clone(),
    )
    .await
    .context("Failed to start response listener")?;

    let router = Arc::new(RequestRouter::new(
        transport.clone(),
        registry.clone(),
        breakers.clone(),
        config.routing.clone(),
    ));

    let state = Arc::new(GatewayState {
        registry,
        breakers,
        router,
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    info!(address = %config.bind_address, "Gateway HTTP surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    transport.flush(Duration::from_secs(5)).ok();
    info!("Gateway stopped");
    Ok(())
}

async fn health(State(state): State<Arc<GatewayState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "reply_queue": state.router.reply_queue(),
        "pending_requests": state.registry.pending().await,
        "circuit_breakers": state.breakers.all_snapshots().await,
    }))
}

async fn metrics() -> String {
    fleet_core::metrics::gather_metrics().unwrap_or_default()
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
