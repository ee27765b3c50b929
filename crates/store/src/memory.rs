//! In-memory state backend implementation using DashMap.

use async_trait::async_trait;
use dashmap::DashMap;

use agent_gateway_core::{
    traits::{StateBackend, StoredState},
    types::AgentId,
    Result,
};

/// In-memory agent state backend using DashMap for concurrent access.
///
/// State lives only as long as the process. Suitable for development,
/// tests, and single-instance deployments that tolerate loss on restart.
#[derive(Debug, Default)]
pub struct InMemoryStateBackend {
    /// Thread-safe concurrent hashmap.
    data: DashMap<AgentId, StoredState>,
}

impl InMemoryStateBackend {
    /// Create a new in-memory backend.
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Number of agents with stored state.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Total payload bytes held (approximate memory usage).
    pub fn memory_usage(&self) -> usize {
        self.data.iter().map(|r| r.value().payload.len()).sum()
    }
}

#[async_trait]
impl StateBackend for InMemoryStateBackend {
    async fn get(&self, agent_id: &AgentId) -> Result<Option<StoredState>> {
        Ok(self.data.get(agent_id).map(|r| r.value().clone()))
    }

    async fn put(&self, agent_id: &AgentId, state: StoredState) -> Result<()> {
        tracing::trace!(
            agent_id = %agent_id,
            size = state.payload.len(),
            etag = %state.etag,
            "Storing agent state in memory"
        );
        self.data.insert(agent_id.clone(), state);
        Ok(())
    }

    async fn delete(&self, agent_id: &AgentId) -> Result<bool> {
        Ok(self.data.remove(agent_id).is_some())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
