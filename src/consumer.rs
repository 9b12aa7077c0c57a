// ============================================================================
// Service Request Consumer
// ============================================================================
//
// Backend side of the request/reply exchange. One reusable component shared
// by every backend module (Sblock), parameterized by an endpoint-dispatch
// table - the per-module copies of this protocol collapse into this one
// type.
//
// Per-message lifecycle: received -> validated -> dispatched -> responded ->
// acknowledged, with rejected as the terminal state for validation failure.
// A malformed message is never silently dropped and never crashes the
// consumer loop: whenever a correlation id and reply destination can be
// recovered, an error response envelope goes back before the message is
// acknowledged.
//
// ============================================================================

use async_trait::async_trait;
use fleet_error::CoreError;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::envelope::{Method, RequestEnvelope, ResponseEnvelope};
use crate::metrics;
use crate::transport::{MessageHandler, Transport};

/// Handler for one `(method, endpoint)` pair. Receives `(data, user_context)`
/// and produces the response payload.
pub type EndpointHandler =
    Arc<dyn Fn(Value, Value) -> BoxFuture<'static, Result<Value, CoreError>> + Send + Sync>;

/// Dispatch table mapping `(method, endpoint)` to handlers.
///
/// Supplied by the backend module's business-logic layer; the consumer only
/// looks up and delegates.
#[derive(Default, Clone)]
pub struct DispatchTable {
    handlers: HashMap<(Method, String), EndpointHandler>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same pair.
    pub fn route(mut self, method: Method, endpoint: impl Into<String>, handler: EndpointHandler) -> Self {
        self.handlers.insert((method, endpoint.into()), handler);
        self
    }

    fn get(&self, method: Method, endpoint: &str) -> Option<&EndpointHandler> {
        self.handlers.get(&(method, endpoint.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Lightweight connectivity check for the module's local dependency
/// (typically its data store).
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn check(&self) -> bool;
}

/// Cached probe result. The freshness window lives here, next to the value
/// it qualifies, not in the cache key.
struct ProbeStatus {
    healthy: bool,
    checked_at: Instant,
}

/// Consumes one backend module's request queue and answers every message.
pub struct ServiceRequestConsumer {
    service: String,
    transport: Arc<dyn Transport>,
    table: DispatchTable,
    probe: Option<Arc<dyn ConnectivityProbe>>,
    probe_cache: Mutex<Option<ProbeStatus>>,
    probe_ttl: Duration,
}

impl ServiceRequestConsumer {
    pub fn new(
        service: impl Into<String>,
        transport: Arc<dyn Transport>,
        table: DispatchTable,
    ) -> Self {
        Self {
            service: service.into(),
            transport,
            table,
            probe: None,
            probe_cache: Mutex::new(None),
            probe_ttl: Duration::from_secs(fleet_config::DEFAULT_PROBE_TTL_SECS),
        }
    }

    /// Attach a connectivity probe, consulted (through a TTL cache) before
    /// dispatching, to fail fast with a clear error instead of hanging on a
    /// dead dependency.
    pub fn with_probe(mut self, probe: Arc<dyn ConnectivityProbe>, ttl: Duration) -> Self {
        self.probe = Some(probe);
        self.probe_ttl = ttl;
        self
    }

    /// Subscribe to this module's request destination and start answering.
    pub async fn start(self: Arc<Self>, destination: &str) -> Result<(), CoreError> {
        let consumer = self.clone();
        let handler: MessageHandler = Arc::new(move |payload: Vec<u8>| {
            let consumer = consumer.clone();
            async move {
                consumer.handle_message(&payload).await;
            }
            .boxed()
        });

        self.transport.subscribe(destination, handler).await?;
        info!(
            service = %self.service,
            destination = %destination,
            "Service request consumer started"
        );
        Ok(())
    }

    /// Pure dispatch: validate `(method, data, endpoint)` shape, look up the
    /// handler and delegate. No I/O besides the matched handler itself.
    pub async fn route_request(
        &self,
        method: &str,
        data: &Value,
        endpoint: &str,
        user_context: &Value,
    ) -> Result<Value, CoreError> {
        let method: Method = method.parse()?;

        if !data.is_object() {
            return Err(CoreError::validation("data must be an object"));
        }
        if endpoint.is_empty() {
            return Err(CoreError::validation("endpoint is required"));
        }

        let handler = self.table.get(method, endpoint).ok_or_else(|| {
            CoreError::validation(format!("unknown endpoint '{} {}'", method, endpoint))
        })?;

        handler(data.clone(), user_context.clone()).await
    }

    /// Handle one raw message from the request queue.
    ///
    /// Always returns (the transport acknowledges afterwards); every failure
    /// mode either answers with an error envelope or, when no correlation id
    /// is recoverable, logs and discards.
    pub async fn handle_message(&self, payload: &[u8]) {
        let envelope: RequestEnvelope = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                metrics::CONSUMER_REJECTED.inc();
                self.reply_to_undecodable(payload, &e.to_string()).await;
                return;
            }
        };

        if let Err(e) = envelope.validate() {
            metrics::CONSUMER_REJECTED.inc();
            // Answer only when a reply destination exists; a missing
            // reply_to may itself be the validation failure.
            if envelope.reply_to.is_empty() {
                error!(
                    service = %self.service,
                    correlation_id = %envelope.correlation_id,
                    error = %e,
                    "Rejected envelope has no reply destination, discarded"
                );
            } else {
                warn!(
                    service = %self.service,
                    correlation_id = %envelope.correlation_id,
                    error = %e,
                    "Request envelope rejected"
                );
                self.send_error_reply(&envelope.reply_to, &envelope.correlation_id, &e)
                    .await;
            }
            return;
        }

        debug!(
            service = %self.service,
            correlation_id = %envelope.correlation_id,
            endpoint = %envelope.endpoint,
            method = %envelope.method,
            trace_id = %envelope.trace_id,
            "Request received"
        );

        if !self.dependencies_healthy().await {
            metrics::CONSUMER_REJECTED.inc();
            let e = CoreError::DependencyUnavailable(format!(
                "{} data store unreachable",
                self.service
            ));
            self.send_error_reply(&envelope.reply_to, &envelope.correlation_id, &e)
                .await;
            return;
        }

        let method = envelope.method.to_string();
        let result = self
            .route_request(
                &method,
                &envelope.data,
                &envelope.endpoint,
                &envelope.user_context,
            )
            .await;

        let response = match result {
            Ok(data) => {
                metrics::CONSUMER_PROCESSED.inc();
                ResponseEnvelope::success(&envelope.correlation_id, data)
            }
            Err(e) => {
                metrics::CONSUMER_REJECTED.inc();
                warn!(
                    service = %self.service,
                    correlation_id = %envelope.correlation_id,
                    endpoint = %envelope.endpoint,
                    error = %e,
                    "Request dispatch failed"
                );
                ResponseEnvelope::error(&envelope.correlation_id, e.user_message(), e.error_code())
            }
        };

        self.publish_reply(&envelope.reply_to, &response).await;
    }

    /// Attempt to answer a message whose body failed to decode as a request
    /// envelope. If `correlation_id` and `reply_to` can be recovered from
    /// the partial JSON, an error response still goes back; otherwise the
    /// message is logged and discarded (nothing to correlate a reply with).
    async fn reply_to_undecodable(&self, payload: &[u8], decode_error: &str) {
        let partial: Option<Value> = serde_json::from_slice(payload).ok();
        let recovered = partial.as_ref().and_then(|v| {
            let correlation_id = v.get("correlation_id")?.as_str()?;
            let reply_to = v.get("reply_to")?.as_str()?;
            if correlation_id.is_empty() || reply_to.is_empty() {
                return None;
            }
            Some((correlation_id.to_string(), reply_to.to_string()))
        });

        match recovered {
            Some((correlation_id, reply_to)) => {
                warn!(
                    service = %self.service,
                    correlation_id = %correlation_id,
                    error = %decode_error,
                    "Malformed request envelope, answering with decode error"
                );
                let e = CoreError::decode(decode_error);
                self.send_error_reply(&reply_to, &correlation_id, &e).await;
            }
            None => {
                error!(
                    service = %self.service,
                    error = %decode_error,
                    payload_len = payload.len(),
                    "Unparseable message discarded, no correlation id recoverable"
                );
            }
        }
    }

    async fn send_error_reply(&self, reply_to: &str, correlation_id: &str, error: &CoreError) {
        let response =
            ResponseEnvelope::error(correlation_id, error.user_message(), error.error_code());
        self.publish_reply(reply_to, &response).await;
    }

    async fn publish_reply(&self, reply_to: &str, response: &ResponseEnvelope) {
        let payload = match serde_json::to_vec(response) {
            Ok(payload) => payload,
            Err(e) => {
                error!(service = %self.service, error = %e, "Failed to encode response envelope");
                return;
            }
        };

        if let Err(e) = self.transport.publish(reply_to, payload).await {
            // The requester will hit its own timeout; nothing more to do here.
            error!(
                service = %self.service,
                correlation_id = %response.correlation_id,
                reply_to = %reply_to,
                error = %e,
                "Failed to publish response envelope"
            );
        }
    }

    /// Consult the connectivity probe through its TTL cache. No probe means
    /// always healthy.
    async fn dependencies_healthy(&self) -> bool {
        let Some(probe) = &self.probe else {
            return true;
        };

        let mut cache = self.probe_cache.lock().await;
        if let Some(status) = cache.as_ref() {
            if status.checked_at.elapsed() < self.probe_ttl {
                return status.healthy;
            }
        }

        let healthy = probe.check().await;
        *cache = Some(ProbeStatus {
            healthy,
            checked_at: Instant::now(),
        });
        if !healthy {
            warn!(service = %self.service, "Connectivity probe reports dependency down");
        }
        healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryTransport;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn echo_table() -> DispatchTable {
        DispatchTable::new().route(
            Method::Get,
            "/vehicles",
            Arc::new(|data, _ctx| async move { Ok(json!({"echo": data})) }.boxed()),
        )
    }

    fn consumer_with(
        transport: Arc<InMemoryTransport>,
        table: DispatchTable,
    ) -> Arc<ServiceRequestConsumer> {
        Arc::new(ServiceRequestConsumer::new(
            "management",
            transport,
            table,
        ))
    }

    /// Collects everything published to a destination.
    async fn capture(transport: &InMemoryTransport, destination: &str) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(16);
        let handler: MessageHandler = Arc::new(move |payload: Vec<u8>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(payload).await;
            }
            .boxed()
        });
        transport.subscribe(destination, handler).await.unwrap();
        rx
    }

    #[tokio::test]
    async fn route_request_rejects_malformed_inputs_without_side_effects() {
        let called = Arc::new(AtomicUsize::new(0));
        let counter = called.clone();
        let table = DispatchTable::new().route(
            Method::Get,
            "/health",
            Arc::new(move |_data, _ctx| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"status": "ok"}))
                }
                .boxed()
            }),
        );
        let transport = Arc::new(InMemoryTransport::new());
        let consumer = consumer_with(transport, table);

        // Missing/garbage method
        assert!(consumer
            .route_request("", &json!({}), "/health", &json!({}))
            .await
            .is_err());
        // Non-object data
        assert!(consumer
            .route_request("GET", &json!("not-an-object"), "/health", &json!({}))
            .await
            .is_err());
        // Unknown endpoint
        assert!(consumer
            .route_request("GET", &json!({}), "/no-such-endpoint", &json!({}))
            .await
            .is_err());

        // None of the rejected calls reached the handler.
        assert_eq!(called.load(Ordering::SeqCst), 0);

        assert!(consumer
            .route_request("GET", &json!({}), "/health", &json!({}))
            .await
            .is_ok());
        assert_eq!(called.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn valid_request_produces_success_reply() {
        let transport = Arc::new(InMemoryTransport::new());
        let consumer = consumer_with(transport.clone(), echo_table());
        let mut replies = capture(&transport, "fleet.responses.core").await;

        let request = RequestEnvelope::new(
            "management",
            "/vehicles",
            Method::Get,
            json!({"page": 2}),
            json!({"user_id": "u-1"}),
            "fleet.responses.core",
        );
        consumer
            .handle_message(&serde_json::to_vec(&request).unwrap())
            .await;

        let reply: ResponseEnvelope =
            serde_json::from_slice(&replies.recv().await.unwrap()).unwrap();
        assert_eq!(reply.correlation_id, request.correlation_id);
        assert_eq!(reply.data.unwrap(), json!({"echo": {"page": 2}}));
    }

    #[tokio::test]
    async fn unknown_endpoint_produces_error_reply_with_same_correlation_id() {
        let transport = Arc::new(InMemoryTransport::new());
        let consumer = consumer_with(transport.clone(), echo_table());
        let mut replies = capture(&transport, "fleet.responses.core").await;

        let request = RequestEnvelope::new(
            "management",
            "/unknown",
            Method::Delete,
            json!({}),
            json!({}),
            "fleet.responses.core",
        );
        consumer
            .handle_message(&serde_json::to_vec(&request).unwrap())
            .await;

        let reply: ResponseEnvelope =
            serde_json::from_slice(&replies.recv().await.unwrap()).unwrap();
        assert_eq!(reply.correlation_id, request.correlation_id);
        assert_eq!(reply.error.unwrap().code, "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn decode_failure_with_recoverable_fields_still_answers() {
        let transport = Arc::new(InMemoryTransport::new());
        let consumer = consumer_with(transport.clone(), echo_table());
        let mut replies = capture(&transport, "fleet.responses.core").await;

        // Valid JSON, but not a valid envelope (method is missing).
        let body = json!({
            "correlation_id": "c-99",
            "reply_to": "fleet.responses.core",
            "endpoint": "/vehicles"
        });
        consumer
            .handle_message(&serde_json::to_vec(&body).unwrap())
            .await;

        let reply: ResponseEnvelope =
            serde_json::from_slice(&replies.recv().await.unwrap()).unwrap();
        assert_eq!(reply.correlation_id, "c-99");
        assert_eq!(reply.error.unwrap().code, "DECODE_ERROR");
    }

    #[tokio::test]
    async fn rejected_envelope_without_reply_destination_is_discarded() {
        let transport = Arc::new(InMemoryTransport::new());
        let consumer = consumer_with(transport.clone(), echo_table());

        // Decodes fine but fails validation on the empty reply_to, so there
        // is nowhere to send the error reply.
        let request = RequestEnvelope::new(
            "management",
            "/vehicles",
            Method::Get,
            json!({}),
            json!({}),
            "",
        );
        consumer
            .handle_message(&serde_json::to_vec(&request).unwrap())
            .await;

        assert_eq!(transport.publish_count("").await, 0);
        assert_eq!(transport.publish_count("fleet.responses.core").await, 0);
    }

    #[tokio::test]
    async fn totally_unparseable_message_is_discarded_without_panic() {
        let transport = Arc::new(InMemoryTransport::new());
        let consumer = consumer_with(transport.clone(), echo_table());

        consumer.handle_message(b"\x00\x01 definitely not json").await;
        // No reply destination is known, so nothing must have been published.
        assert_eq!(transport.publish_count("fleet.responses.core").await, 0);
    }

    struct FlakyProbe {
        healthy: AtomicBool,
        checks: AtomicUsize,
    }

    #[async_trait]
    impl ConnectivityProbe for FlakyProbe {
        async fn check(&self) -> bool {
            self.checks.fetch_add(1, Ordering::SeqCst);
            self.healthy.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn dead_dependency_fails_fast_with_error_reply() {
        let transport = Arc::new(InMemoryTransport::new());
        let probe = Arc::new(FlakyProbe {
            healthy: AtomicBool::new(false),
            checks: AtomicUsize::new(0),
        });
        let consumer = Arc::new(
            ServiceRequestConsumer::new("management", transport.clone(), echo_table())
                .with_probe(probe.clone(), Duration::from_secs(60)),
        );
        let mut replies = capture(&transport, "fleet.responses.core").await;

        let request = RequestEnvelope::new(
            "management",
            "/vehicles",
            Method::Get,
            json!({}),
            json!({}),
            "fleet.responses.core",
        );
        consumer
            .handle_message(&serde_json::to_vec(&request).unwrap())
            .await;

        let reply: ResponseEnvelope =
            serde_json::from_slice(&replies.recv().await.unwrap()).unwrap();
        assert_eq!(reply.error.unwrap().code, "DEPENDENCY_UNAVAILABLE");
    }

    #[tokio::test]
    async fn probe_result_is_cached_within_ttl() {
        let transport = Arc::new(InMemoryTransport::new());
        let probe = Arc::new(FlakyProbe {
            healthy: AtomicBool::new(true),
            checks: AtomicUsize::new(0),
        });
        let consumer = Arc::new(
            ServiceRequestConsumer::new("management", transport.clone(), echo_table())
                .with_probe(probe.clone(), Duration::from_secs(60)),
        );

        for _ in 0..3 {
            let request = RequestEnvelope::new(
                "management",
                "/vehicles",
                Method::Get,
                json!({}),
                json!({}),
                "fleet.responses.core",
            );
            consumer
                .handle_message(&serde_json::to_vec(&request).unwrap())
                .await;
        }

        // Three messages inside one freshness window: one real check.
        assert_eq!(probe.checks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_probe_result_is_refreshed() {
        let transport = Arc::new(InMemoryTransport::new());
        let probe = Arc::new(FlakyProbe {
            healthy: AtomicBool::new(true),
            checks: AtomicUsize::new(0),
        });
        let consumer = Arc::new(
            ServiceRequestConsumer::new("management", transport.clone(), echo_table())
                .with_probe(probe.clone(), Duration::from_millis(20)),
        );

        let request = RequestEnvelope::new(
            "management",
            "/vehicles",
            Method::Get,
            json!({}),
            json!({}),
            "fleet.responses.core",
        );
        consumer
            .handle_message(&serde_json::to_vec(&request).unwrap())
            .await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        consumer
            .handle_message(&serde_json::to_vec(&request).unwrap())
            .await;

        assert_eq!(probe.checks.load(Ordering::SeqCst), 2);
    }
}
