use crate::constants::{DEFAULT_REPLY_QUEUE, DEFAULT_REQUEST_TOPIC_PREFIX};

/// Service-name to broker-destination resolution.
///
/// Every backend module (Sblock) owns one request destination named
/// `{request_topic_prefix}{service}`. Resolution is deterministic; an unknown
/// service name is a configuration error at the call site, never a retry.
#[derive(Clone, Debug)]
pub struct RoutingConfig {
    /// Logical backend names the gateway may route to
    pub services: Vec<String>,
    /// Prefix for request destinations
    pub request_topic_prefix: String,
    /// Destination the gateway consumes replies from
    pub reply_queue: String,
}

impl RoutingConfig {
    pub(crate) fn from_env() -> Self {
        let services = std::env::var("FLEET_SERVICES")
            .unwrap_or_else(|_| "management,maintenance,gps,trips,security,users".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            services,
            request_topic_prefix: std::env::var("FLEET_REQUEST_TOPIC_PREFIX")
                .unwrap_or_else(|_| DEFAULT_REQUEST_TOPIC_PREFIX.to_string()),
            reply_queue: std::env::var("FLEET_REPLY_QUEUE")
                .unwrap_or_else(|_| DEFAULT_REPLY_QUEUE.to_string()),
        }
    }

    /// Resolve a logical service name to its request destination.
    /// Returns `None` for services not in the routing table.
    pub fn destination_for(&self, service: &str) -> Option<String> {
        if self.services.iter().any(|s| s == service) {
            Some(format!("{}{}", self.request_topic_prefix, service))
        } else {
            None
        }
    }
}
