//! Agent identity and persisted agent state.

use bytes::Bytes;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Identifier of one addressable agent instance.
///
/// An agent is named by its type (what kind of agent it is, and therefore
/// which connections can host it) and a key (which instance of that type).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub struct AgentId {
    /// Agent type, e.g. `"planner"`.
    #[serde(rename = "type")]
    pub agent_type: String,
    /// Instance key within the type.
    pub key: String,
}

impl AgentId {
    pub fn new(agent_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            key: key.into(),
        }
    }

    /// Reject ids with an empty type or key.
    pub fn validate(&self) -> Result<()> {
        if self.agent_type.trim().is_empty() {
            return Err(Error::invalid_request("agent id has an empty type"));
        }
        if self.key.trim().is_empty() {
            return Err(Error::invalid_request(format!(
                "agent id of type '{}' has an empty key",
                self.agent_type
            )));
        }
        Ok(())
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.agent_type, self.key)
    }
}

impl FromStr for AgentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (agent_type, key) = s
            .split_once('/')
            .ok_or_else(|| Error::invalid_request(format!("malformed agent id: {}", s)))?;
        let id = AgentId::new(agent_type, key);
        id.validate()?;
        Ok(id)
    }
}

/// Opaque version marker assigned by the state store on every write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ETag(pub String);

impl ETag {
    /// Generate a fresh version marker.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ETag {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Serialized state owned by one agent.
///
/// On read, `etag` is the version currently stored. On write, `etag` is an
/// optional precondition: `None` overwrites unconditionally, `Some` only
/// succeeds if it matches the stored version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: AgentId,
    pub payload: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<ETag>,
}

impl AgentState {
    pub fn new(agent_id: AgentId, payload: impl Into<Bytes>) -> Self {
        Self {
            agent_id,
            payload: payload.into(),
            etag: None,
        }
    }

    /// Make the write conditional on `etag` being the stored version.
    pub fn with_etag(mut self, etag: ETag) -> Self {
        self.etag = Some(etag);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_id_parses_type_and_key() {
        let id: AgentId = "planner/session-42".parse().unwrap();
        assert_eq!(id.agent_type, "planner");
        assert_eq!(id.key, "session-42");
        assert_eq!(id.to_string(), "planner/session-42");
    }

    #[test]
    fn agent_id_rejects_empty_parts() {
        assert!("planner/".parse::<AgentId>().is_err());
        assert!("/key".parse::<AgentId>().is_err());
        assert!("no-separator".parse::<AgentId>().is_err());
        assert!(AgentId::new(" ", "k").validate().is_err());
    }

    #[test]
    fn agent_id_serializes_type_field() {
        let value = serde_json::to_value(AgentId::new("coder", "1")).unwrap();
        assert_eq!(value["type"], "coder");
        assert_eq!(value["key"], "1");
    }
}
