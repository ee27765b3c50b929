//! RPC request and response envelopes routed through the gateway.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::agent::AgentId;
use crate::error::{Error, Result};

/// A call addressed to one agent instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RpcRequest {
    /// Correlation id. Assigned by the router when left empty.
    #[serde(default)]
    pub request_id: String,
    /// Agent that should handle the call.
    pub target: AgentId,
    /// Calling agent, if the call originates from another agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<AgentId>,
    /// Method name understood by the target agent.
    pub method: String,
    /// Call arguments.
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl RpcRequest {
    pub fn new(target: AgentId, method: impl Into<String>, payload: Value) -> Self {
        Self {
            request_id: String::new(),
            target,
            source: None,
            method: method.into(),
            payload,
            metadata: HashMap::new(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_source(mut self, source: AgentId) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Reject requests that cannot be routed.
    pub fn validate(&self) -> Result<()> {
        self.target.validate()?;
        if self.method.trim().is_empty() {
            return Err(Error::invalid_request(format!(
                "request to {} has an empty method",
                self.target
            )));
        }
        Ok(())
    }
}

/// Outcome reported by the target agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RpcStatus {
    Ok,
    Error,
}

/// The single response to an [`RpcRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RpcResponse {
    pub request_id: String,
    pub status: RpcStatus,
    #[serde(default)]
    pub payload: Value,
    /// Agent-side error message when `status` is `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl RpcResponse {
    pub fn ok(request_id: impl Into<String>, payload: Value) -> Self {
        Self {
            request_id: request_id.into(),
            status: RpcStatus::Ok,
            payload,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            status: RpcStatus::Error,
            payload: Value::Null,
            error: Some(message.into()),
            metadata: HashMap::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == RpcStatus::Ok
    }
}
