#![deny(unused)]
//! Durable agent state for the gateway.
//!
//! This crate provides the [`AgentStateStore`] adapter, which serializes
//! operations per agent and enforces optional ETag preconditions, plus the
//! backends it can sit on (memory, SQLite, Redis).

pub mod adapter;
pub mod memory;
pub mod redis;
pub mod sqlite;

use std::sync::Arc;

use agent_gateway_core::{
    config::{StoreBackendKind, StoreConfig},
    traits::StateBackend,
    Error, Result,
};

pub use adapter::AgentStateStore;
pub use memory::InMemoryStateBackend;
pub use redis::RedisStateBackend;
pub use sqlite::SqliteStateBackend;

/// Build the backend selected by configuration.
pub fn build_backend(config: &StoreConfig) -> Result<Arc<dyn StateBackend>> {
    let backend: Arc<dyn StateBackend> = match config.backend {
        StoreBackendKind::Memory => {
            tracing::info!("Initializing In-Memory State Backend");
            Arc::new(InMemoryStateBackend::new())
        }
        StoreBackendKind::Sqlite => {
            tracing::info!(path = %config.sqlite_path, "Initializing SQLite State Backend");
            Arc::new(SqliteStateBackend::new(&config.sqlite_path)?)
        }
        StoreBackendKind::Redis => {
            let url = config.redis_url.as_ref().ok_or_else(|| {
                Error::storage("store.redis_url is required for the redis backend")
            })?;
            tracing::info!(prefix = %config.key_prefix, "Initializing Redis State Backend");
            Arc::new(RedisStateBackend::new(url, &config.key_prefix)?)
        }
    };
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_gateway_core::config::AppConfig;

    #[test]
    fn test_build_memory_backend() {
        let config = AppConfig::default().store;
        let backend = build_backend(&config).unwrap();
        assert_eq!(backend.name(), "memory");
    }

    #[test]
    fn test_build_sqlite_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default().store;
        config.backend = StoreBackendKind::Sqlite;
        config.sqlite_path = dir.path().join("state.db").to_string_lossy().into_owned();

        let backend = build_backend(&config).unwrap();
        assert_eq!(backend.name(), "sqlite");
    }

    #[test]
    fn test_redis_backend_requires_url() {
        let mut config = AppConfig::default().store;
        config.backend = StoreBackendKind::Redis;

        let err = build_backend(&config).err().unwrap();
        assert!(matches!(err, Error::Storage(_)));
    }
}
