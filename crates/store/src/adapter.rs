//! Agent state adapter over a pluggable [`StateBackend`].
//!
//! Adds what a raw key-value backend does not give us:
//! - operations on the same agent are serialized by a per-agent async lock
//! - optional ETag preconditions on writes
//! - cancellation before a write or delete is issued

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use agent_gateway_core::{
    traits::{StateBackend, StoredState},
    types::{AgentId, AgentState, ETag},
    Error, Result,
};

/// Per-agent state store used by the gateway.
pub struct AgentStateStore {
    backend: Arc<dyn StateBackend>,
    /// One lock per agent with an operation in flight.
    locks: DashMap<AgentId, Arc<Mutex<()>>>,
}

impl AgentStateStore {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self {
            backend,
            locks: DashMap::new(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Agents with an operation currently holding or waiting on a lock.
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    /// Persist `state`, overwriting whatever the agent stored before.
    ///
    /// When `state.etag` is set the write only happens if it equals the
    /// stored version; otherwise it fails with [`Error::Conflict`].
    pub async fn store(&self, state: AgentState, cancel: &CancellationToken) -> Result<()> {
        state.agent_id.validate()?;
        let lock = self.lock_for(&state.agent_id);
        let result = self.store_locked(&lock.lock, state, cancel).await;
        drop(lock);
        record_operation("store", &result);
        result
    }

    /// Latest state of `agent_id`, or [`Error::NotFound`] if it never stored any.
    pub async fn read(&self, agent_id: &AgentId, cancel: &CancellationToken) -> Result<AgentState> {
        agent_id.validate()?;
        let lock = self.lock_for(agent_id);
        let result = self.read_locked(&lock.lock, agent_id, cancel).await;
        drop(lock);
        record_operation("read", &result);
        result
    }

    /// Explicitly remove an agent's state. Returns whether any existed.
    ///
    /// A delete canceled before it reaches the backend leaves the state in
    /// place.
    pub async fn delete(&self, agent_id: &AgentId, cancel: &CancellationToken) -> Result<bool> {
        agent_id.validate()?;
        let lock = self.lock_for(agent_id);
        let result = self.delete_locked(&lock.lock, agent_id, cancel).await;
        drop(lock);
        record_operation("delete", &result);
        if let Ok(removed) = &result {
            tracing::info!(agent_id = %agent_id, removed = *removed, "Agent state deleted");
        }
        result
    }

    async fn store_locked(
        &self,
        lock: &Mutex<()>,
        state: AgentState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled("store")),
            guard = lock.lock() => guard,
        };
        let AgentState {
            agent_id,
            payload,
            etag,
        } = state;

        if let Some(expected) = &etag {
            let current = self.backend.get(&agent_id).await?;
            check_precondition(&agent_id, expected, current.as_ref())?;
        }

        // Past this point the write is issued and allowed to finish, so a
        // canceled store never leaves its outcome unknown.
        if cancel.is_cancelled() {
            return Err(Error::cancelled("store"));
        }

        let size = payload.len();
        let record = StoredState {
            payload,
            etag: ETag::generate(),
            updated_at: current_timestamp(),
        };
        self.backend.put(&agent_id, record).await?;

        tracing::debug!(
            agent_id = %agent_id,
            size,
            backend = self.backend.name(),
            "Agent state stored"
        );
        Ok(())
    }

    async fn read_locked(
        &self,
        lock: &Mutex<()>,
        agent_id: &AgentId,
        cancel: &CancellationToken,
    ) -> Result<AgentState> {
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled("read")),
            guard = lock.lock() => guard,
        };

        let stored = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled("read")),
            stored = self.backend.get(agent_id) => stored?,
        };

        stored
            .map(|s| AgentState {
                agent_id: agent_id.clone(),
                payload: s.payload,
                etag: Some(s.etag),
            })
            .ok_or_else(|| Error::not_found(format!("no state stored for agent {}", agent_id)))
    }

    async fn delete_locked(
        &self,
        lock: &Mutex<()>,
        agent_id: &AgentId,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled("delete")),
            guard = lock.lock() => guard,
        };
        if cancel.is_cancelled() {
            return Err(Error::cancelled("delete"));
        }
        self.backend.delete(agent_id).await
    }

    fn lock_for(&self, agent_id: &AgentId) -> AgentLock<'_> {
        let lock = self
            .locks
            .entry(agent_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        AgentLock {
            locks: &self.locks,
            agent_id: agent_id.clone(),
            lock,
        }
    }
}

/// A handle on one agent's lock entry.
///
/// Dropping it forgets the entry once no other operation holds a handle,
/// including when the owning future is dropped mid-operation.
struct AgentLock<'a> {
    locks: &'a DashMap<AgentId, Arc<Mutex<()>>>,
    agent_id: AgentId,
    lock: Arc<Mutex<()>>,
}

impl Drop for AgentLock<'_> {
    fn drop(&mut self) {
        // The map's handle plus ours.
        self.locks.remove_if(&self.agent_id, |_, lock| {
            Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2
        });
    }
}

fn check_precondition(
    agent_id: &AgentId,
    expected: &ETag,
    current: Option<&StoredState>,
) -> Result<()> {
    match current {
        Some(stored) if stored.etag == *expected => Ok(()),
        Some(stored) => Err(Error::Conflict {
            agent_id: agent_id.to_string(),
            expected: expected.to_string(),
            actual: stored.etag.to_string(),
        }),
        None => Err(Error::Conflict {
            agent_id: agent_id.to_string(),
            expected: expected.to_string(),
            actual: "<none>".to_string(),
        }),
    }
}

fn record_operation<T>(op: &'static str, result: &Result<T>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.kind().as_str(),
    };
    metrics::counter!("gateway_state_operations_total", "op" => op, "outcome" => outcome)
        .increment(1);
}

fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
