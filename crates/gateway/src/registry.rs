//! Registry of live connections, the agent types they host, and where
//! agent instances are currently placed.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

use agent_gateway_core::{
    event_type_matches,
    traits::{Connection, GatewayObserver},
    types::{AgentId, ConnectionId, ConnectionInfo},
    Error, Result,
};

struct Registration {
    /// Non-owning; the transport layer owns the connection.
    handle: Weak<dyn Connection>,
    agent_types: BTreeSet<String>,
    subscriptions: Vec<String>,
    connected_at: DateTime<Utc>,
}

impl Registration {
    fn info(&self, id: &ConnectionId) -> ConnectionInfo {
        ConnectionInfo {
            id: id.clone(),
            agent_types: self.agent_types.iter().cloned().collect(),
            subscriptions: self.subscriptions.clone(),
            connected_at: self.connected_at,
        }
    }

    fn wants(&self, event_type: &str) -> bool {
        self.subscriptions.is_empty()
            || self
                .subscriptions
                .iter()
                .any(|pattern| event_type_matches(pattern, event_type))
    }
}

/// Concurrent registry of connections eligible to receive messages.
///
/// Lookups hand out strong handles, so a send that already resolved its
/// connection is never affected by a concurrent unregister.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Registration>,
    /// Agent instance -> connection currently hosting it.
    placements: DashMap<AgentId, ConnectionId>,
    observers: RwLock<Vec<Arc<dyn GatewayObserver>>>,
    cursor: AtomicUsize,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            placements: DashMap::new(),
            observers: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Register a lifecycle observer.
    pub fn add_observer(&self, observer: Arc<dyn GatewayObserver>) {
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    /// Track `connection` as hosting `agent_types`.
    ///
    /// Only a weak handle is kept: once the transport drops its last
    /// reference the connection disappears from the registry.
    pub fn register<I, S>(&self, connection: Arc<dyn Connection>, agent_types: I) -> ConnectionId
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = connection.id().clone();
        let registration = Registration {
            handle: Arc::downgrade(&connection),
            agent_types: agent_types.into_iter().map(Into::into).collect(),
            subscriptions: Vec::new(),
            connected_at: Utc::now(),
        };
        let info = registration.info(&id);
        self.connections.insert(id.clone(), registration);

        tracing::info!(
            connection_id = %id,
            agent_types = ?info.agent_types,
            "Connection registered"
        );
        self.update_gauge();
        for observer in self.observers() {
            observer.on_connected(&info);
        }
        id
    }

    /// Declare that a registered connection also hosts `agent_type`.
    pub fn add_agent_type(&self, id: &ConnectionId, agent_type: impl Into<String>) -> Result<()> {
        let agent_type = agent_type.into();
        if agent_type.trim().is_empty() {
            return Err(Error::invalid_request("agent type must not be empty"));
        }
        let mut entry = self
            .connections
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("connection {} is not registered", id)))?;
        entry.agent_types.insert(agent_type);
        Ok(())
    }

    /// Restrict the events a connection receives to those matching `pattern`.
    ///
    /// A connection without subscriptions receives every broadcast.
    pub fn subscribe(&self, id: &ConnectionId, pattern: impl Into<String>) -> Result<()> {
        let pattern = pattern.into();
        if pattern.trim().is_empty() {
            return Err(Error::invalid_request("subscription pattern must not be empty"));
        }
        let mut entry = self
            .connections
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("connection {} is not registered", id)))?;
        if !entry.subscriptions.contains(&pattern) {
            tracing::debug!(connection_id = %id, pattern = %pattern, "Subscription added");
            entry.subscriptions.push(pattern);
        }
        Ok(())
    }

    /// Forget a connection and every agent placed on it.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        if self.connections.remove(id).is_none() {
            return false;
        }
        self.placements.retain(|_, placed| placed != id);

        tracing::info!(connection_id = %id, "Connection unregistered");
        self.update_gauge();
        for observer in self.observers() {
            observer.on_disconnected(id);
        }
        true
    }

    /// Live handle for `id`. Dead or dropped connections are pruned.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<dyn Connection>> {
        let handle = self.connections.get(id).map(|r| r.handle.clone())?;
        match handle.upgrade() {
            Some(conn) if conn.is_live() => Some(conn),
            _ => {
                self.unregister(id);
                None
            }
        }
    }

    pub fn info(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
        self.connections.get(id).map(|r| r.info(id))
    }

    /// Snapshot of every registration, live or not yet pruned.
    pub fn list(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self
            .connections
            .iter()
            .map(|r| r.value().info(r.key()))
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Every live connection.
    pub fn live_connections(&self) -> Vec<Arc<dyn Connection>> {
        self.collect_live(|_| true)
    }

    /// Live connections whose subscriptions select `event_type`.
    pub fn subscribers_for(&self, event_type: &str) -> Vec<Arc<dyn Connection>> {
        self.collect_live(|reg| reg.wants(event_type))
    }

    /// Connection that should handle calls to `agent_id`.
    ///
    /// An agent stays on the connection it was first placed on while that
    /// connection is live and still hosts its type. Otherwise a new host is
    /// picked round-robin among live connections hosting the type.
    pub fn resolve(&self, agent_id: &AgentId) -> Result<Arc<dyn Connection>> {
        let placed = self.placements.get(agent_id).map(|r| r.value().clone());
        if let Some(placed) = placed {
            if self.hosts(&placed, &agent_id.agent_type) {
                if let Some(conn) = self.get(&placed) {
                    return Ok(conn);
                }
            }
            self.placements.remove_if(agent_id, |_, current| *current == placed);
        }

        let mut candidates: Vec<(ConnectionId, Weak<dyn Connection>)> = self
            .connections
            .iter()
            .filter(|r| r.agent_types.contains(&agent_id.agent_type))
            .map(|r| (r.key().clone(), r.handle.clone()))
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0));

        let mut live = Vec::with_capacity(candidates.len());
        for (id, handle) in candidates {
            match handle.upgrade() {
                Some(conn) if conn.is_live() => live.push((id, conn)),
                _ => {
                    self.unregister(&id);
                }
            }
        }

        if live.is_empty() {
            return Err(Error::not_found(format!(
                "no live connection hosts agent type '{}' (target {})",
                agent_id.agent_type, agent_id
            )));
        }

        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % live.len();
        let (id, conn) = live.swap_remove(index);

        // A concurrent first call may have placed the agent already; its
        // choice wins.
        let placed = self
            .placements
            .entry(agent_id.clone())
            .or_insert_with(|| id.clone())
            .value()
            .clone();
        if placed != id {
            if let Some(winner) = self.get(&placed) {
                return Ok(winner);
            }
            self.placements.insert(agent_id.clone(), id.clone());
        }
        tracing::debug!(agent_id = %agent_id, connection_id = %id, "Agent placed on connection");
        Ok(conn)
    }

    /// Connection an agent is currently placed on, if any.
    pub fn placement(&self, agent_id: &AgentId) -> Option<ConnectionId> {
        self.placements.get(agent_id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn hosts(&self, id: &ConnectionId, agent_type: &str) -> bool {
        self.connections
            .get(id)
            .map(|r| r.agent_types.contains(agent_type))
            .unwrap_or(false)
    }

    fn collect_live(&self, filter: impl Fn(&Registration) -> bool) -> Vec<Arc<dyn Connection>> {
        let handles: Vec<(ConnectionId, Weak<dyn Connection>)> = self
            .connections
            .iter()
            .filter(|r| filter(r.value()))
            .map(|r| (r.key().clone(), r.handle.clone()))
            .collect();

        let mut live = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            match handle.upgrade() {
                Some(conn) if conn.is_live() => live.push(conn),
                _ => {
                    self.unregister(&id);
                }
            }
        }
        live
    }

    fn observers(&self) -> Vec<Arc<dyn GatewayObserver>> {
        self.observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn update_gauge(&self) {
        metrics::gauge!("gateway_connections").set(self.connections.len() as f64);
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
