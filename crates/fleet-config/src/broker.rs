/// Broker connection configuration.
///
/// Covers everything needed to build producer and consumer clients:
/// bootstrap servers, optional SSL/SASL, producer reliability settings and
/// the bounded connect-retry policy applied at transport construction.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Comma-separated list of brokers (e.g. "kafka1:9092,kafka2:9092")
    pub brokers: String,
    /// Consumer group ID used by subscribers
    pub consumer_group: String,
    /// SSL/TLS enabled
    pub ssl_enabled: bool,
    /// SASL mechanism (e.g. "SCRAM-SHA-256", "PLAIN")
    pub sasl_mechanism: Option<String>,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,

    // Producer reliability settings
    pub producer_acks: String,
    pub producer_enable_idempotence: bool,
    pub producer_compression: String,
    pub producer_linger_ms: u32,
    pub producer_request_timeout_ms: u32,
    /// Hard bound on a single publish, in milliseconds. A publish while the
    /// broker is unreachable fails after this instead of hanging.
    pub publish_timeout_ms: u64,

    // Connect-retry policy (transport construction)
    pub connect_max_attempts: u32,
    pub connect_retry_delay_ms: u64,
}

impl BrokerConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            brokers: std::env::var("BROKER_URLS").unwrap_or_else(|_| "localhost:9092".to_string()),
            consumer_group: std::env::var("BROKER_CONSUMER_GROUP")
                .unwrap_or_else(|_| "fleet-core".to_string()),
            ssl_enabled: std::env::var("BROKER_SSL_ENABLED")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            sasl_mechanism: std::env::var("BROKER_SASL_MECHANISM").ok(),
            sasl_username: std::env::var("BROKER_SASL_USERNAME").ok(),
            sasl_password: std::env::var("BROKER_SASL_PASSWORD").ok(),
            producer_acks: std::env::var("BROKER_PRODUCER_ACKS")
                .unwrap_or_else(|_| "all".to_string()),
            producer_enable_idempotence: std::env::var("BROKER_PRODUCER_ENABLE_IDEMPOTENCE")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            producer_compression: std::env::var("BROKER_PRODUCER_COMPRESSION")
                .unwrap_or_else(|_| "snappy".to_string()),
            producer_linger_ms: std::env::var("BROKER_PRODUCER_LINGER_MS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            producer_request_timeout_ms: std::env::var("BROKER_PRODUCER_REQUEST_TIMEOUT_MS")
                .unwrap_or_else(|_| "30000".to_string())
                .parse()
                .unwrap_or(30000),
            publish_timeout_ms: std::env::var("BROKER_PUBLISH_TIMEOUT_MS")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()
                .unwrap_or(2000),
            connect_max_attempts: std::env::var("BROKER_CONNECT_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            connect_retry_delay_ms: std::env::var("BROKER_CONNECT_RETRY_DELAY_MS")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()
                .unwrap_or(2000),
        }
    }
}
