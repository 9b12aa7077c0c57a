// Shared defaults used across fleet-core services.

pub const DEFAULT_PORT: u16 = 8000;

/// Default caller-side timeout for a routed request, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// How long a backend's connectivity-probe result stays fresh, in seconds.
pub const DEFAULT_PROBE_TTL_SECS: u64 = 5;

/// Reply destination the gateway listens on for backend responses.
pub const DEFAULT_REPLY_QUEUE: &str = "fleet.responses.core";

/// Prefix for per-service request destinations (`{prefix}{service}`).
pub const DEFAULT_REQUEST_TOPIC_PREFIX: &str = "fleet.requests.";
