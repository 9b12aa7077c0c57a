// In-process transport adapter.
//
// Backs unit/integration tests and single-process deployments where the
// gateway and a backend module run in the same binary. Semantics match the
// broker adapter where it matters: delivery is asynchronous (a published
// message is handled on a spawned task, never inline in `publish`) and a
// destination without subscribers drops the message, as an unconsumed topic
// would.

use async_trait::async_trait;
use fleet_error::CoreError;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

use super::{MessageHandler, Transport};

#[derive(Default)]
pub struct InMemoryTransport {
    subscribers: Mutex<HashMap<String, Vec<MessageHandler>>>,
    /// Every publish ever issued, for test assertions
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of publishes issued against `destination` so far.
    pub async fn publish_count(&self, destination: &str) -> usize {
        self.published
            .lock()
            .await
            .iter()
            .filter(|(dest, _)| dest == destination)
            .count()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, destination: &str, payload: Vec<u8>) -> Result<(), CoreError> {
        self.published
            .lock()
            .await
            .push((destination.to_string(), payload.clone()));

        let handlers = {
            let subscribers = self.subscribers.lock().await;
            subscribers.get(destination).cloned().unwrap_or_default()
        };

        if handlers.is_empty() {
            debug!(destination = %destination, "No subscriber, message dropped");
            return Ok(());
        }

        for handler in handlers {
            let payload = payload.clone();
            tokio::spawn(async move {
                handler(payload).await;
            });
        }
        Ok(())
    }

    async fn subscribe(&self, destination: &str, handler: MessageHandler) -> Result<(), CoreError> {
        self.subscribers
            .lock()
            .await
            .entry(destination.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }
}

// MessageHandler is an Arc, so the subscriber list clones cheaply.
impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn delivers_to_subscriber() {
        let transport = InMemoryTransport::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        let handler: MessageHandler = Arc::new(move |payload: Vec<u8>| {
            let counter = counter.clone();
            async move {
                assert_eq!(payload, b"ping");
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        });

        transport.subscribe("fleet.requests.gps", handler).await.unwrap();
        transport
            .publish("fleet.requests.gps", b"ping".to_vec())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn publish_without_subscriber_is_dropped_not_an_error() {
        let transport = InMemoryTransport::new();
        transport
            .publish("fleet.requests.nowhere", b"lost".to_vec())
            .await
            .unwrap();
        assert_eq!(transport.publish_count("fleet.requests.nowhere").await, 1);
    }
}
