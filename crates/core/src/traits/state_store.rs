//! Durable state backend seam.
//!
//! Backends are plain key-value stores keyed by [`AgentId`]. Version checks
//! and per-agent ordering live above them, in the state store adapter.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{AgentId, ETag};

/// What a backend persists for one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredState {
    pub payload: Bytes,
    pub etag: ETag,
    /// Unix timestamp (seconds) of the write.
    pub updated_at: i64,
}

/// Key-value store for agent state.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Get the stored record, or `None` if the agent never stored state.
    async fn get(&self, agent_id: &AgentId) -> Result<Option<StoredState>>;

    /// Atomically replace the record for `agent_id`.
    async fn put(&self, agent_id: &AgentId, state: StoredState) -> Result<()>;

    /// Remove the record. Returns whether one existed.
    async fn delete(&self, agent_id: &AgentId) -> Result<bool>;

    /// Short backend name for logs and metrics.
    fn name(&self) -> &'static str;
}
