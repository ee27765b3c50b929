//! Redis implementation of StateBackend.

use async_trait::async_trait;
use redis::{AsyncCommands, Client};
use secrecy::{ExposeSecret, Secret};

use agent_gateway_core::{
    traits::{StateBackend, StoredState},
    types::AgentId,
    Error, Result,
};

/// Redis persistence for agent state.
///
/// Each agent is one key holding the JSON-encoded [`StoredState`]. Keys
/// never expire; the gateway does not delete state implicitly.
pub struct RedisStateBackend {
    client: Client,
    prefix: String,
}

impl RedisStateBackend {
    /// Create a new Redis state backend.
    pub fn new(url: &Secret<String>, prefix: &str) -> Result<Self> {
        let client = Client::open(url.expose_secret().as_str())
            .map_err(|e| Error::storage(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self {
            client,
            prefix: prefix.to_string(),
        })
    }

    fn key(&self, agent_id: &AgentId) -> String {
        state_key(&self.prefix, agent_id)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::storage(format!("Redis connection error: {}", e)))
    }
}

/// `{prefix}:{len(type)}:{type}:{key}`. The length prefix keeps a `:` in
/// the type or key from making two agents share a key.
fn state_key(prefix: &str, agent_id: &AgentId) -> String {
    format!(
        "{}:{}:{}:{}",
        prefix,
        agent_id.agent_type.len(),
        agent_id.agent_type,
        agent_id.key
    )
}

#[async_trait]
impl StateBackend for RedisStateBackend {
    async fn get(&self, agent_id: &AgentId) -> Result<Option<StoredState>> {
        let mut conn = self.connection().await?;

        let data: Option<String> = conn
            .get(self.key(agent_id))
            .await
            .map_err(|e| Error::storage(format!("Redis get error: {}", e)))?;

        match data {
            Some(json) => {
                let state = serde_json::from_str(&json).map_err(|e| {
                    Error::storage(format!("Failed to deserialize state of {}: {}", agent_id, e))
                })?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, agent_id: &AgentId, state: StoredState) -> Result<()> {
        let mut conn = self.connection().await?;

        let json = serde_json::to_string(&state)
            .map_err(|e| Error::storage(format!("Failed to serialize state: {}", e)))?;

        let _: () = conn
            .set(self.key(agent_id), json)
            .await
            .map_err(|e| Error::storage(format!("Redis set error: {}", e)))?;

        Ok(())
    }

    async fn delete(&self, agent_id: &AgentId) -> Result<bool> {
        let mut conn = self.connection().await?;

        let removed: u64 = conn
            .del(self.key(agent_id))
            .await
            .map_err(|e| Error::storage(format!("Redis delete error: {}", e)))?;

        Ok(removed > 0)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
