use std::time::Duration;

/// Circuit breaker tuning, shared by every per-service breaker instance.
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in CLOSED before the circuit opens
    pub failure_threshold: u32,
    /// Consecutive successes in HALF_OPEN before the circuit closes
    pub success_threshold: u32,
    /// How long an OPEN circuit waits before the next call may probe recovery
    pub recovery_timeout: Duration,
    /// Hard upper bound on a single guarded call
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
            call_timeout: Duration::from_secs(3),
        }
    }
}

impl CircuitBreakerConfig {
    pub(crate) fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            failure_threshold: std::env::var("BREAKER_FAILURE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.failure_threshold),
            success_threshold: std::env::var("BREAKER_SUCCESS_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.success_threshold),
            recovery_timeout: std::env::var("BREAKER_RECOVERY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.recovery_timeout),
            call_timeout: std::env::var("BREAKER_CALL_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.call_timeout),
        }
    }
}
