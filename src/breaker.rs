// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Per-backend-service guard for outbound routed calls.
//
// States:
// - Closed: normal operation, calls pass through
// - Open: too many failures, calls fail immediately without touching the
//   transport
// - HalfOpen: probing recovery with live traffic
//
// The OPEN -> HALF_OPEN check happens lazily on the next call attempt, not
// on a background timer: a breaker with no traffic sits OPEN until a call
// arrives after the recovery window.
//
// ============================================================================

use fleet_config::CircuitBreakerConfig;
use fleet_error::CoreError;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Counters are meaningful only within the current state and are zeroed on
/// every transition.
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

/// Point-in-time view of one breaker, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Seconds since the last recorded failure, if any
    pub last_failure_age_secs: Option<u64>,
}

/// Circuit breaker for a single backend service.
///
/// All state access goes through one mutex so concurrent callers observe a
/// consistent state and counters cannot be corrupted by races.
pub struct CircuitBreaker {
    service: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            }),
        }
    }

    /// Gate a call attempt.
    ///
    /// CLOSED and HALF_OPEN pass. OPEN fails fast unless the recovery window
    /// has elapsed, in which case this attempt transitions the breaker to
    /// HALF_OPEN and is allowed through as the recovery probe.
    pub async fn acquire(&self) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let recovered = inner
                    .last_failure_time
                    .is_some_and(|t| t.elapsed() >= self.config.recovery_timeout);
                if recovered {
                    info!(service = %self.service, "Circuit breaker probing recovery (half-open)");
                    inner.state = CircuitState::HalfOpen;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    Ok(())
                } else {
                    metrics::BREAKER_REJECTIONS.inc();
                    Err(CoreError::CircuitOpen {
                        service: self.service.clone(),
                    })
                }
            }
        }
    }

    /// Run `operation` under the breaker's own call timeout.
    ///
    /// This bound is independent of the router's caller-supplied timeout: it
    /// caps how long the breaker waits before counting the attempt as a
    /// failure. Errors and timeouts are recorded here; success is recorded
    /// by the caller once the logical call resolves.
    pub async fn guard<T, F>(&self, operation: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, CoreError>>,
    {
        match tokio::time::timeout(self.config.call_timeout, operation).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => {
                self.record_failure().await;
                Err(error)
            }
            Err(_elapsed) => {
                self.record_failure().await;
                Err(CoreError::Timeout {
                    service: self.service.clone(),
                    timeout: self.config.call_timeout,
                })
            }
        }
    }

    /// Record a successful call.
    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    info!(service = %self.service, "Circuit breaker closed - service recovered");
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.last_failure_time = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    warn!(
                        service = %self.service,
                        failures = inner.failure_count,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker opened"
                    );
                    inner.state = CircuitState::Open;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                }
            }
            CircuitState::HalfOpen => {
                // A single failure while probing reopens immediately.
                warn!(service = %self.service, "Circuit breaker reopened after half-open failure");
                inner.state = CircuitState::Open;
                inner.failure_count = 0;
                inner.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Snapshot of current state and counters.
    pub async fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().await;
        BreakerSnapshot {
            service: self.service.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_age_secs: inner.last_failure_time.map(|t| t.elapsed().as_secs()),
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Force the circuit closed (manual recovery).
    pub async fn force_close(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure_time = None;
        info!(service = %self.service, "Circuit breaker manually closed");
    }

    /// Force the circuit open (manual intervention).
    pub async fn force_open(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = CircuitState::Open;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure_time = Some(Instant::now());
        warn!(service = %self.service, "Circuit breaker manually opened");
    }
}

/// Holds one breaker per logical backend name, created lazily on first use.
/// Breaker state is process-lifetime; instances are never destroyed.
pub struct CircuitBreakerManager {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerManager {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Get the breaker for `service`, creating it on first reference.
    pub async fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().await;
            if let Some(breaker) = breakers.get(service) {
                return breaker.clone();
            }
        }

        let mut breakers = self.breakers.write().await;
        breakers
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(service, self.config.clone())))
            .clone()
    }

    /// Snapshots of every breaker created so far.
    pub async fn all_snapshots(&self) -> Vec<BreakerSnapshot> {
        let breakers = self.breakers.read().await;
        let mut snapshots = Vec::with_capacity(breakers.len());
        for breaker in breakers.values() {
            snapshots.push(breaker.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.service.cmp(&b.service));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            recovery_timeout: Duration::from_millis(100),
            call_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new("gps", test_config());

        for _ in 0..2 {
            breaker.record_failure().await;
            assert_eq!(breaker.state().await, CircuitState::Closed);
        }
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        // While open, acquire fails without touching anything.
        assert!(matches!(
            breaker.acquire().await,
            Err(CoreError::CircuitOpen { .. })
        ));
    }

    #[tokio::test]
    async fn success_resets_failure_count_in_closed() {
        let breaker = CircuitBreaker::new("gps", test_config());
        breaker.record_failure().await;
        breaker.record_failure().await;
        breaker.record_success().await;
        breaker.record_failure().await;
        breaker.record_failure().await;
        // Only 2 consecutive failures - still closed.
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_after_recovery_window_then_closes() {
        let breaker = CircuitBreaker::new("gps", test_config());
        for _ in 0..3 {
            breaker.record_failure().await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(150)).await;

        // Lazy transition happens on the call attempt, not on a timer.
        assert!(breaker.acquire().await.is_ok());
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        breaker.record_success().await;
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
        breaker.record_success().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn single_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("gps", test_config());
        for _ in 0..3 {
            breaker.record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(breaker.acquire().await.is_ok());
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn stays_open_within_recovery_window() {
        let breaker = CircuitBreaker::new("gps", test_config());
        for _ in 0..3 {
            breaker.record_failure().await;
        }
        // Recovery window not yet elapsed.
        assert!(breaker.acquire().await.is_err());
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn guard_times_out_and_counts_as_failure() {
        let breaker = CircuitBreaker::new("gps", test_config());

        let result = breaker
            .guard(async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok::<_, CoreError>(42)
            })
            .await;

        assert!(matches!(result, Err(CoreError::Timeout { .. })));
        assert_eq!(breaker.snapshot().await.failure_count, 1);
    }

    #[tokio::test]
    async fn counters_reset_on_transition() {
        let breaker = CircuitBreaker::new("gps", test_config());
        for _ in 0..3 {
            breaker.record_failure().await;
        }
        let snapshot = breaker.snapshot().await;
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.success_count, 0);
    }

    #[tokio::test]
    async fn manager_creates_lazily_and_reuses() {
        let manager = CircuitBreakerManager::new(test_config());
        let a = manager.get("gps").await;
        let b = manager.get("gps").await;
        assert!(Arc::ptr_eq(&a, &b));

        manager.get("maintenance").await;
        let snapshots = manager.all_snapshots().await;
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].service, "gps");
        assert_eq!(snapshots[1].service, "maintenance");
    }

    #[tokio::test]
    async fn force_open_and_close() {
        let breaker = CircuitBreaker::new("gps", test_config());
        breaker.force_open().await;
        assert!(breaker.acquire().await.is_err());
        breaker.force_close().await;
        assert!(breaker.acquire().await.is_ok());
    }
}
