//! SQLite-backed durable state backend.

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;

use agent_gateway_core::{
    traits::{StateBackend, StoredState},
    types::{AgentId, ETag},
    Error, Result,
};

/// Agent state persisted in a single SQLite table.
pub struct SqliteStateBackend {
    conn: Arc<tokio::sync::Mutex<Connection>>,
}

impl SqliteStateBackend {
    /// Open (or create) the database at `path`.
    pub fn new(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::storage(format!("SQLite open error: {}", e)))?;
        Self::init(conn)
    }

    /// Private in-memory database, mainly for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::storage(format!("SQLite open error: {}", e)))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS agent_state (
                agent_type TEXT NOT NULL,
                agent_key TEXT NOT NULL,
                payload BLOB NOT NULL,
                etag TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (agent_type, agent_key)
            )",
            [],
        )
        .map_err(|e| Error::storage(format!("Schema error: {}", e)))?;

        Ok(Self {
            conn: Arc::new(tokio::sync::Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl StateBackend for SqliteStateBackend {
    async fn get(&self, agent_id: &AgentId) -> Result<Option<StoredState>> {
        let conn = self.conn.clone();
        let id = agent_id.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.query_row(
                "SELECT payload, etag, updated_at FROM agent_state
                 WHERE agent_type = ?1 AND agent_key = ?2",
                params![id.agent_type, id.key],
                |row| {
                    let payload: Vec<u8> = row.get(0)?;
                    let etag: String = row.get(1)?;
                    Ok(StoredState {
                        payload: Bytes::from(payload),
                        etag: ETag(etag),
                        updated_at: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(|e| Error::storage(format!("Select error: {}", e)))
        })
        .await
        .map_err(|e| Error::internal(e.to_string()))?
    }

    async fn put(&self, agent_id: &AgentId, state: StoredState) -> Result<()> {
        let conn = self.conn.clone();
        let id = agent_id.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT OR REPLACE INTO agent_state (agent_type, agent_key, payload, etag, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.agent_type,
                    id.key,
                    state.payload.as_ref(),
                    state.etag.0,
                    state.updated_at
                ],
            )
            .map_err(|e| Error::storage(format!("Insert error: {}", e)))?;
            Ok(())
        })
        .await
        .map_err(|e| Error::internal(e.to_string()))?
    }

    async fn delete(&self, agent_id: &AgentId) -> Result<bool> {
        let conn = self.conn.clone();
        let id = agent_id.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let count = conn
                .execute(
                    "DELETE FROM agent_state WHERE agent_type = ?1 AND agent_key = ?2",
                    params![id.agent_type, id.key],
                )
                .map_err(|e| Error::storage(format!("Delete error: {}", e)))?;
            Ok(count > 0)
        })
        .await
        .map_err(|e| Error::internal(e.to_string()))?
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
