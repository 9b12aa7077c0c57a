use fleet_error::CoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Verb a backend dispatches on. Mirrors the HTTP method of the original
/// gateway call; serialized uppercase on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

impl FromStr for Method {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            other => Err(CoreError::validation(format!(
                "unsupported method '{}'",
                other
            ))),
        }
    }
}

/// Request envelope - the only payload that crosses the wire outbound.
///
/// Serialized to JSON and published to the destination backend's request
/// queue. `data` and `user_context` are opaque to the routing layer; the
/// backend's own handlers interpret them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique per call; pairs this request with exactly one response
    pub correlation_id: String,
    /// Logical resource path the backend dispatches on (e.g. "/vehicles")
    pub endpoint: String,
    pub method: Method,
    /// Query params / body, opaque here
    #[serde(default)]
    pub data: Value,
    /// Caller identity/permission snapshot, forwarded for backend authorization
    #[serde(default)]
    pub user_context: Value,
    /// Destination backend's logical name
    pub service: String,
    /// ISO-8601, observability only
    pub timestamp: String,
    /// Observability only, not used for correctness
    pub trace_id: String,
    /// Destination the backend must publish its response to
    pub reply_to: String,
}

impl RequestEnvelope {
    pub fn new(
        service: impl Into<String>,
        endpoint: impl Into<String>,
        method: Method,
        data: Value,
        user_context: Value,
        reply_to: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            endpoint: endpoint.into(),
            method,
            data,
            user_context,
            service: service.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            trace_id: uuid::Uuid::new_v4().to_string(),
            reply_to: reply_to.into(),
        }
    }

    /// Validate envelope structure before publishing or dispatching.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.correlation_id.is_empty() {
            return Err(CoreError::validation("correlation_id is required"));
        }
        if self.endpoint.is_empty() {
            return Err(CoreError::validation("endpoint is required"));
        }
        if self.service.is_empty() {
            return Err(CoreError::validation("service is required"));
        }
        if self.reply_to.is_empty() {
            return Err(CoreError::validation("reply_to is required"));
        }
        Ok(())
    }
}

/// Success/error marker on a response envelope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Error payload carried by an error-status response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(default)]
    pub code: String,
}

/// Response envelope published by a backend to the requester's `reply_to`.
/// The correlation id must equal the request's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub correlation_id: String,
    pub status: ResponseStatus,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<ErrorDetail>,
}

impl ResponseEnvelope {
    pub fn success(correlation_id: impl Into<String>, data: Value) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status: ResponseStatus::Success,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(
        correlation_id: impl Into<String>,
        message: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status: ResponseStatus::Error,
            data: None,
            error: Some(ErrorDetail {
                message: message.into(),
                code: code.into(),
            }),
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.correlation_id.is_empty() {
            return Err(CoreError::validation("correlation_id is required"));
        }
        if self.status == ResponseStatus::Error && self.error.is_none() {
            return Err(CoreError::validation(
                "error detail is required for error-status responses",
            ));
        }
        Ok(())
    }
}
