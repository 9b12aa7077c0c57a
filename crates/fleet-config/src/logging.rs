/// Logging configuration for fleet-core binaries.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// tracing filter directive (RUST_LOG syntax)
    pub filter: String,
    /// Emit JSON-formatted log lines instead of human-readable ones
    pub json: bool,
}

impl LoggingConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            filter: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            json: std::env::var("LOG_JSON")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
        }
    }
}
