// ============================================================================
// Request Router
// ============================================================================
//
// Gateway side of the request/reply exchange. Turns one inbound synchronous
// call into an asynchronous, correlation-tracked message exchange with
// exactly one backend module:
//
// 1. Resolve the logical service name to its request destination
// 2. Gate through the service's circuit breaker (OPEN -> fail fast, no
//    network call)
// 3. Register a pending-request waiter under the correlation id
// 4. Publish the request envelope, bounded by the breaker's call timeout
// 5. Await the waiter up to the caller-supplied timeout
//
// Timing out never cancels the in-flight backend computation; it only stops
// the caller from waiting and counts as a breaker failure. A late reply is
// dropped by the correlation registry.
//
// ============================================================================

use fleet_config::RoutingConfig;
use fleet_error::CoreError;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::breaker::CircuitBreakerManager;
use crate::correlation::CorrelationRegistry;
use crate::envelope::{Method, RequestEnvelope, ResponseStatus};
use crate::metrics;
use crate::transport::Transport;

/// One outbound call, as supplied by the HTTP layer.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub service: String,
    pub endpoint: String,
    pub method: Method,
    pub data: Value,
    pub user_context: Value,
}

/// Routes gateway calls to backend services over the transport.
pub struct RequestRouter {
    transport: Arc<dyn Transport>,
    registry: Arc<CorrelationRegistry>,
    breakers: Arc<CircuitBreakerManager>,
    routing: RoutingConfig,
}

impl RequestRouter {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<CorrelationRegistry>,
        breakers: Arc<CircuitBreakerManager>,
        routing: RoutingConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            breakers,
            routing,
        }
    }

    /// Send `request` and wait for the correlated reply, generating a fresh
    /// correlation id.
    pub async fn send(&self, request: OutboundRequest, timeout: Duration) -> Result<Value, CoreError> {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        self.send_request_and_wait(request, correlation_id, timeout)
            .await
    }

    /// Send `request` under a caller-supplied correlation id and wait up to
    /// `timeout` for the reply.
    ///
    /// The id must be unique for the lifetime of the pending request;
    /// reusing a live id is a caller error, not a retry path.
    pub async fn send_request_and_wait(
        &self,
        request: OutboundRequest,
        correlation_id: String,
        timeout: Duration,
    ) -> Result<Value, CoreError> {
        let destination = self
            .routing
            .destination_for(&request.service)
            .ok_or_else(|| CoreError::UnknownService(request.service.clone()))?;

        let breaker = self.breakers.get(&request.service).await;
        breaker.acquire().await?;

        let mut envelope = RequestEnvelope::new(
            &request.service,
            &request.endpoint,
            request.method,
            request.data,
            request.user_context,
            &self.routing.reply_queue,
        );
        envelope.correlation_id = correlation_id.clone();
        envelope.validate()?;

        let payload = serde_json::to_vec(&envelope)?;

        let waiter = self
            .registry
            .register(&correlation_id, Instant::now() + timeout, &request.service)
            .await?;

        if let Err(e) = breaker
            .guard(self.transport.publish(&destination, payload))
            .await
        {
            // Publish never made it out; drop the waiter we just registered.
            self.registry.expire(&correlation_id).await;
            return Err(e);
        }

        metrics::REQUESTS_ROUTED.inc();
        debug!(
            correlation_id = %correlation_id,
            service = %request.service,
            endpoint = %envelope.endpoint,
            method = %envelope.method,
            destination = %destination,
            "Request routed"
        );

        match tokio::time::timeout(timeout, waiter).await {
            Ok(Ok(response)) => {
                // The backend answered: the service is alive regardless of
                // whether the answer is an application error.
                breaker.record_success().await;
                match response.status {
                    ResponseStatus::Success => Ok(response.data.unwrap_or(Value::Null)),
                    ResponseStatus::Error => {
                        let detail = response.error.unwrap_or_else(|| crate::envelope::ErrorDetail {
                            message: "backend returned an error without detail".to_string(),
                            code: "BACKEND_ERROR".to_string(),
                        });
                        Err(CoreError::Backend {
                            message: detail.message,
                            code: detail.code,
                        })
                    }
                }
            }
            Ok(Err(_recv)) => {
                // Waiter sender dropped without a send; registry invariants
                // make this unreachable in practice.
                self.registry.expire(&correlation_id).await;
                Err(CoreError::internal("response waiter dropped"))
            }
            Err(_elapsed) => {
                self.registry.expire(&correlation_id).await;
                breaker.record_failure().await;
                metrics::REQUEST_TIMEOUTS.inc();
                warn!(
                    correlation_id = %correlation_id,
                    service = %request.service,
                    timeout_ms = timeout.as_millis() as u64,
                    "No response within caller timeout"
                );
                Err(CoreError::Timeout {
                    service: request.service,
                    timeout,
                })
            }
        }
    }

    /// Reply destination this router stamps into outbound envelopes.
    pub fn reply_queue(&self) -> &str {
        &self.routing.reply_queue
    }
}
