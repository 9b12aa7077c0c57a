use axum::{http::StatusCode, response::IntoResponse};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

/// Error taxonomy for the request-routing core.
///
/// Every failure a routed call can hit is recovered at the router/consumer
/// boundary and translated into one of these; none propagates as a crash.
/// The HTTP mapping keeps "backend is circuit-broken" (503) distinguishable
/// from "backend is slow" (504) for operators.
#[derive(Error, Debug)]
pub enum CoreError {
    // ===== Routing Errors =====
    #[error("Unknown service '{0}' - not present in the routing table")]
    UnknownService(String),

    #[error("Circuit breaker is open for service '{service}'")]
    CircuitOpen { service: String },

    #[error("No response from service '{service}' within {timeout:?}")]
    Timeout { service: String, timeout: Duration },

    /// The backend answered with an error-status response envelope.
    #[error("Service error from backend: {code}: {message}")]
    Backend { message: String, code: String },

    // ===== Consumer Errors =====
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Backend dependency unavailable: {0}")]
    DependencyUnavailable(String),

    // ===== Gateway-Local Errors =====
    /// Caller bug: a correlation id was reused while its entry was live.
    #[error("Correlation id '{0}' already has a pending request")]
    DuplicateCorrelation(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// HTTP status code for this error at the gateway boundary
    pub fn status_code(&self) -> StatusCode {
        match self {
            CoreError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            CoreError::Validation(_) | CoreError::Decode(_) => StatusCode::BAD_REQUEST,
            CoreError::Backend { .. } | CoreError::Transport(_) => StatusCode::BAD_GATEWAY,
            CoreError::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::UnknownService(_)
            | CoreError::DuplicateCorrelation(_)
            | CoreError::Json(_)
            | CoreError::Config(_)
            | CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable code for programmatic handling; also used as the `code` field
    /// of error response envelopes.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::UnknownService(_) => "UNKNOWN_SERVICE",
            CoreError::CircuitOpen { .. } => "SERVICE_UNAVAILABLE",
            CoreError::Timeout { .. } => "GATEWAY_TIMEOUT",
            CoreError::Backend { .. } => "BACKEND_ERROR",
            CoreError::Validation(_) => "VALIDATION_ERROR",
            CoreError::Decode(_) => "DECODE_ERROR",
            CoreError::DependencyUnavailable(_) => "DEPENDENCY_UNAVAILABLE",
            CoreError::DuplicateCorrelation(_) => "DUPLICATE_CORRELATION_ID",
            CoreError::Transport(_) => "TRANSPORT_ERROR",
            CoreError::Json(_) => "JSON_ERROR",
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// User-facing message without internal details
    pub fn user_message(&self) -> String {
        match self {
            CoreError::UnknownService(service) => format!("Unknown service: {}", service),
            CoreError::CircuitOpen { service } => {
                format!("Service '{}' is temporarily unavailable", service)
            }
            CoreError::Timeout { service, .. } => {
                format!("Service '{}' did not respond in time", service)
            }
            CoreError::Backend { message, .. } => message.clone(),
            CoreError::Validation(msg) => format!("Validation error: {}", msg),
            CoreError::Decode(_) => "Malformed request payload".to_string(),
            CoreError::DependencyUnavailable(_) => {
                "A backend dependency is unavailable".to_string()
            }
            _ => "Internal server error".to_string(),
        }
    }

    /// Log this error at a level matching its severity
    pub fn log(&self) {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(error = %self, error_code = %code, status = %status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self, error_code = %code, "Client error");
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        CoreError::Decode(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        CoreError::Transport(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        CoreError::Internal(msg.into())
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> axum::response::Response {
        self.log();

        let status = self.status_code();
        let error_code = self.error_code();

        let body = if status.is_server_error()
            && status != StatusCode::SERVICE_UNAVAILABLE
            && status != StatusCode::GATEWAY_TIMEOUT
        {
            // Don't leak internals for 5xx other than the deliberate 503/504 signals
            json!({
                "error": "Internal server error",
                "error_code": error_code,
                "status": status.as_u16(),
            })
        } else {
            json!({
                "error": self.user_message(),
                "error_code": error_code,
                "status": status.as_u16(),
            })
        };

        (status, axum::Json(body)).into_response()
    }
}
