use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};

/// Version identifier for the gateway HTTP contract.
pub const GATEWAY_CONTRACT_VERSION: &str = "v1";

/// Standard typed response envelope for gateway APIs.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ApiEnvelope<T> {
    pub version: String,
    pub trace_id: String,
    pub data: T,
}

impl<T> ApiEnvelope<T> {
    pub fn success(trace_id: impl Into<String>, data: T) -> Self {
        Self {
            version: GATEWAY_CONTRACT_VERSION.to_string(),
            trace_id: trace_id.into(),
            data,
        }
    }
}

/// Stable API error code catalog for clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    InvalidRequest,
    NotFound,
    Timeout,
    Transport,
    Conflict,
    StorageFailed,
    InternalError,
}

impl ApiErrorCode {
    /// HTTP status code a handler should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            ApiErrorCode::InvalidRequest => 400,
            ApiErrorCode::NotFound => 404,
            ApiErrorCode::Conflict => 409,
            ApiErrorCode::Transport => 502,
            ApiErrorCode::StorageFailed => 503,
            ApiErrorCode::Timeout => 504,
            ApiErrorCode::InternalError => 500,
        }
    }
}

impl From<ErrorKind> for ApiErrorCode {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NotFound => ApiErrorCode::NotFound,
            ErrorKind::Timeout => ApiErrorCode::Timeout,
            ErrorKind::Transport => ApiErrorCode::Transport,
            ErrorKind::Conflict => ApiErrorCode::Conflict,
            ErrorKind::InvalidRequest => ApiErrorCode::InvalidRequest,
            ErrorKind::Storage => ApiErrorCode::StorageFailed,
            ErrorKind::Internal => ApiErrorCode::InternalError,
        }
    }
}

/// Standardized typed API error body.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ApiErrorBody {
    pub code: ApiErrorCode,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiErrorBody {
    pub fn new(code: ApiErrorCode, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code,
            message: message.into(),
            retryable,
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<&Error> for ApiErrorBody {
    fn from(err: &Error) -> Self {
        ApiErrorBody::new(err.kind().into(), err.to_string(), err.is_retryable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_contract_envelope_serialization_is_stable() {
        let envelope = ApiEnvelope::success(
            "trace-123",
            serde_json::json!({
                "delivered": 3,
            }),
        );
        let value = serde_json::to_value(envelope).expect("serialize envelope");

        assert_eq!(value["version"], "v1");
        assert_eq!(value["trace_id"], "trace-123");
        assert_eq!(value["data"]["delivered"], 3);
    }

    #[test]
    fn gateway_errors_map_to_codes() {
        let body = ApiErrorBody::from(&Error::not_found("agent planner/a"));
        let value = serde_json::to_value(&body).expect("serialize error");

        assert_eq!(value["code"], "NOT_FOUND");
        assert_eq!(value["retryable"], false);
        assert_eq!(body.code.http_status(), 404);

        let body = ApiErrorBody::from(&Error::cancelled("read"))
            .with_details(serde_json::json!({ "agent": "planner/a" }));
        assert_eq!(body.code, ApiErrorCode::Timeout);
        assert!(body.retryable);
        assert_eq!(body.code.http_status(), 504);
        assert_eq!(body.details.unwrap()["agent"], "planner/a");
    }
}
