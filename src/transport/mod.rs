// Transport layer for gateway <-> backend message exchange.
//
// The adapter knows destinations and bytes, nothing about envelopes or
// routing. Delivery is at-least-once and unordered across correlation ids;
// subscribers must tolerate duplicate delivery of the same payload.

pub mod kafka;
pub mod memory;

pub use kafka::KafkaTransport;
pub use memory::InMemoryTransport;

use async_trait::async_trait;
use fleet_error::CoreError;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Callback invoked once per delivered message. The transport acknowledges
/// the message only after the returned future completes.
pub type MessageHandler = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Thin wrapper over the message broker.
///
/// Implementations must make `publish` fail fast while disconnected rather
/// than hang, and must keep publish/subscribe safe to interleave from
/// concurrent tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish an encoded envelope to a named destination.
    async fn publish(&self, destination: &str, payload: Vec<u8>) -> Result<(), CoreError>;

    /// Deliver every message arriving on `destination` to `handler`.
    /// Returns once the subscription is established; delivery runs in a
    /// background task for the life of the process.
    async fn subscribe(&self, destination: &str, handler: MessageHandler) -> Result<(), CoreError>;
}
