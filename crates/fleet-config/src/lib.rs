// ============================================================================
// Fleet Config - Centralized configuration management
// ============================================================================
//
// This crate provides centralized configuration for the fleet-core gateway
// and backend services. Everything loads from environment variables with
// sensible defaults, so a bare `Config::from_env()` works in development.
//
// ============================================================================

mod breaker;
mod broker;
mod constants;
mod logging;
mod routing;

pub use breaker::CircuitBreakerConfig;
pub use broker::BrokerConfig;
pub use constants::{
    DEFAULT_PORT, DEFAULT_PROBE_TTL_SECS, DEFAULT_REPLY_QUEUE, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_REQUEST_TOPIC_PREFIX,
};
pub use logging::LoggingConfig;
pub use routing::RoutingConfig;

use anyhow::Result;
use std::time::Duration;

/// Main configuration structure for fleet-core services
#[derive(Clone, Debug)]
pub struct Config {
    /// HTTP bind port for the gateway surface
    pub port: u16,
    pub bind_address: String,

    /// Default caller timeout applied when a route does not supply one
    pub request_timeout: Duration,

    /// Freshness window for the backend connectivity probe cache
    pub probe_ttl: Duration,

    // Sub-configurations
    pub broker: BrokerConfig,
    pub breaker: CircuitBreakerConfig,
    pub routing: RoutingConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(constants::DEFAULT_PORT);

        Ok(Self {
            port,
            bind_address: format!("[::]:{}", port),
            request_timeout: Duration::from_secs(
                std::env::var("REQUEST_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(constants::DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            probe_ttl: Duration::from_secs(
                std::env::var("PROBE_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(constants::DEFAULT_PROBE_TTL_SECS),
            ),
            broker: BrokerConfig::from_env(),
            breaker: CircuitBreakerConfig::from_env(),
            routing: RoutingConfig::from_env(),
            logging: LoggingConfig::from_env(),
        })
    }
}
