// ============================================================================
// Correlation Registry
// ============================================================================
//
// Concurrent map from correlation id to a pending-response waiter. Owned by
// the gateway process; one live entry per in-flight routed request.
//
// Invariant: exactly one of {resolve, expire} completes a given waiter; the
// other is a no-op. A response arriving after its caller timed out is the
// normal late-reply case, logged and dropped.
//
// ============================================================================

use crate::envelope::ResponseEnvelope;
use fleet_error::CoreError;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

struct PendingEntry {
    waiter: oneshot::Sender<ResponseEnvelope>,
    deadline: Instant,
    service: String,
}

/// Registry of pending routed requests, keyed by correlation id.
#[derive(Default)]
pub struct CorrelationRegistry {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `correlation_id`.
    ///
    /// Fails if the id already has a live entry - correlation ids must never
    /// be reused while a request is in flight (caller bug, not a race).
    pub async fn register(
        &self,
        correlation_id: &str,
        deadline: Instant,
        service: &str,
    ) -> Result<oneshot::Receiver<ResponseEnvelope>, CoreError> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(correlation_id) {
            return Err(CoreError::DuplicateCorrelation(correlation_id.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        entries.insert(
            correlation_id.to_string(),
            PendingEntry {
                waiter: tx,
                deadline,
                service: service.to_string(),
            },
        );
        Ok(rx)
    }

    /// Resolve the waiter registered under the response's correlation id.
    ///
    /// Returns `false` (after a debug log) when no live entry exists - the
    /// normal case for a reply that arrives after the caller timed out.
    /// Removes the entry on success, so a duplicate delivery of the same
    /// correlation id is a no-op.
    pub async fn resolve(&self, response: ResponseEnvelope) -> bool {
        let entry = {
            let mut entries = self.entries.lock().await;
            entries.remove(&response.correlation_id)
        };

        match entry {
            Some(entry) => {
                let correlation_id = response.correlation_id.clone();
                if entry.waiter.send(response).is_err() {
                    // Receiver dropped between timeout and removal; same as late.
                    debug!(
                        correlation_id = %correlation_id,
                        service = %entry.service,
                        "Waiter already gone, response dropped"
                    );
                    return false;
                }
                true
            }
            None => {
                debug!(
                    correlation_id = %response.correlation_id,
                    "No pending entry for response (late or duplicate), dropped"
                );
                false
            }
        }
    }

    /// Remove the entry for `correlation_id` after its deadline elapsed.
    ///
    /// The in-flight backend computation is not cancelled - the gateway only
    /// stops waiting. Returns `false` if the entry was already resolved.
    pub async fn expire(&self, correlation_id: &str) -> bool {
        let removed = self.entries.lock().await.remove(correlation_id);
        if let Some(entry) = &removed {
            debug!(
                correlation_id = %correlation_id,
                service = %entry.service,
                overdue_ms = entry.deadline.elapsed().as_millis() as u64,
                "Pending request expired"
            );
        }
        removed.is_some()
    }

    /// Number of live pending entries (diagnostics).
    pub async fn pending(&self) -> usize {
        self.entries.lock().await.len()
    }
}
