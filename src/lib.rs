//! Request-routing core for the fleet-management platform.
//!
//! The gateway ("Core") exposes HTTP; backend modules ("Sblocks") receive no
//! HTTP directly. Every inbound call becomes an asynchronous,
//! correlation-tracked message exchange: the [`router::RequestRouter`]
//! publishes a [`envelope::RequestEnvelope`] to the backend's request
//! destination and awaits the matching [`envelope::ResponseEnvelope`] on the
//! gateway's reply destination, gated by a per-service
//! [`breaker::CircuitBreaker`]. On the backend, one reusable
//! [`consumer::ServiceRequestConsumer`] decodes, dispatches, and replies.

pub mod breaker;
pub mod consumer;
pub mod correlation;
pub mod envelope;
pub mod listener;
pub mod metrics;
pub mod router;
pub mod transport;

pub use breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerManager, CircuitState};
pub use consumer::{ConnectivityProbe, DispatchTable, EndpointHandler, ServiceRequestConsumer};
pub use correlation::CorrelationRegistry;
pub use envelope::{ErrorDetail, Method, RequestEnvelope, ResponseEnvelope, ResponseStatus};
pub use listener::ResponseListener;
pub use router::{OutboundRequest, RequestRouter};
pub use transport::{InMemoryTransport, KafkaTransport, MessageHandler, Transport};
