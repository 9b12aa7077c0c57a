// Response listener - gateway side.
//
// Subscribes to the gateway's reply destination and resolves the waiter
// matching each inbound response envelope. Late and duplicate replies hit
// the registry's no-op path and are dropped; an undecodable reply is logged
// and dropped (no correlation id is recoverable, so nothing else can be
// done).

use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::correlation::CorrelationRegistry;
use crate::envelope::ResponseEnvelope;
use crate::transport::{MessageHandler, Transport};

pub struct ResponseListener;

impl ResponseListener {
    /// Attach the registry to `reply_queue` on the given transport.
    pub async fn start(
        transport: &dyn Transport,
        reply_queue: &str,
        registry: Arc<CorrelationRegistry>,
    ) -> Result<(), fleet_error::CoreError> {
        let handler: MessageHandler = Arc::new(move |payload: Vec<u8>| {
            let registry = registry.clone();
            async move {
                match serde_json::from_slice::<ResponseEnvelope>(&payload) {
                    Ok(response) => {
                        let correlation_id = response.correlation_id.clone();
                        if registry.resolve(response).await {
                            debug!(correlation_id = %correlation_id, "Response delivered to waiter");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Undecodable response envelope dropped");
                    }
                }
            }
            .boxed()
        });

        transport.subscribe(reply_queue, handler).await?;
        info!(reply_queue = %reply_queue, "Response listener started");
        Ok(())
    }
}
