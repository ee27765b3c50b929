//! The gateway facade tying registry, router, broadcaster, and state
//! store together behind [`AgentGateway`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agent_gateway_core::{
    config::GatewayConfig,
    traits::{AgentGateway, Connection, GatewayObserver, StateBackend},
    types::{
        AgentId, AgentState, BroadcastReport, CloudEvent, ConnectionId, ConnectionInfo,
        OutboundMessage, RpcRequest, RpcResponse,
    },
    Result,
};
use agent_gateway_store::{AgentStateStore, InMemoryStateBackend};

use crate::broadcaster::EventBroadcaster;
use crate::channel::ChannelConnection;
use crate::registry::ConnectionRegistry;
use crate::router::RequestRouter;

const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CHANNEL_BUFFER: usize = 256;
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Builder for [`Gateway`].
pub struct GatewayBuilder {
    backend: Option<Arc<dyn StateBackend>>,
    rpc_timeout: Duration,
    send_timeout: Duration,
    channel_buffer: usize,
    observers: Vec<Arc<dyn GatewayObserver>>,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            backend: None,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            channel_buffer: DEFAULT_CHANNEL_BUFFER,
            observers: Vec::new(),
        }
    }

    /// State backend. Defaults to an in-memory one.
    pub fn with_backend(mut self, backend: Arc<dyn StateBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_config(mut self, config: &GatewayConfig) -> Self {
        self.rpc_timeout = config.rpc_timeout();
        self.send_timeout = config.send_timeout();
        self.channel_buffer = config.connection_buffer;
        self
    }

    /// Upper bound on how long an RPC waits for its response.
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Upper bound on delivering one event to one connection.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn GatewayObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> Gateway {
        let registry = Arc::new(ConnectionRegistry::new());
        for observer in self.observers {
            registry.add_observer(observer);
        }
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(InMemoryStateBackend::new()));

        tracing::info!(
            backend = backend.name(),
            rpc_timeout_ms = self.rpc_timeout.as_millis() as u64,
            send_timeout_ms = self.send_timeout.as_millis() as u64,
            "Gateway initialized"
        );

        Gateway {
            router: RequestRouter::new(registry.clone(), self.rpc_timeout),
            broadcaster: EventBroadcaster::new(registry.clone(), self.send_timeout),
            state: AgentStateStore::new(backend),
            channel_buffer: self.channel_buffer,
            registry,
        }
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Agent gateway.
///
/// Cheap to share behind an `Arc`; every operation is safe to call
/// concurrently.
pub struct Gateway {
    registry: Arc<ConnectionRegistry>,
    router: RequestRouter,
    broadcaster: EventBroadcaster,
    state: AgentStateStore,
    channel_buffer: usize,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &RequestRouter {
        &self.router
    }

    pub fn state(&self) -> &AgentStateStore {
        &self.state
    }

    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.broadcaster
    }

    /// Register a connection hosting `agent_types`.
    ///
    /// The gateway keeps only a weak handle; the caller owns the
    /// connection and dropping it disconnects.
    pub fn connect<I, S>(&self, connection: Arc<dyn Connection>, agent_types: I) -> ConnectionId
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.registry.register(connection, agent_types)
    }

    /// Connect an in-process agent host over a [`ChannelConnection`].
    ///
    /// The caller keeps the returned handle alive for as long as the host
    /// should stay connected, and answers requests read from the receiver
    /// through [`Gateway::deliver_response`].
    pub fn open_channel<I, S>(
        &self,
        agent_types: I,
    ) -> (Arc<ChannelConnection>, mpsc::Receiver<OutboundMessage>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (conn, rx) = ChannelConnection::new(self.channel_buffer);
        self.registry.register(conn.clone(), agent_types);
        (conn, rx)
    }

    /// Forget a connection. Calls pending on it fail with a transport error.
    pub fn disconnect(&self, connection_id: &ConnectionId) -> bool {
        self.registry.unregister(connection_id)
    }

    pub fn subscribe(&self, connection_id: &ConnectionId, pattern: impl Into<String>) -> Result<()> {
        self.registry.subscribe(connection_id, pattern)
    }

    pub fn add_agent_type(
        &self,
        connection_id: &ConnectionId,
        agent_type: impl Into<String>,
    ) -> Result<()> {
        self.registry.add_agent_type(connection_id, agent_type)
    }

    pub fn add_observer(&self, observer: Arc<dyn GatewayObserver>) {
        self.registry.add_observer(observer);
    }

    /// Hand an agent's response back to the caller waiting on it.
    ///
    /// Returns false if nobody is waiting any more.
    pub fn deliver_response(&self, response: RpcResponse) -> bool {
        self.router.complete(response)
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.registry.list()
    }

    /// Remove an agent's persisted state.
    pub async fn delete_state(&self, agent_id: &AgentId, cancel: CancellationToken) -> Result<bool> {
        self.state.delete(agent_id, &cancel).await
    }
}

#[async_trait]
impl AgentGateway for Gateway {
    async fn invoke_request(
        &self,
        request: RpcRequest,
        cancel: CancellationToken,
    ) -> Result<RpcResponse> {
        self.router.invoke(request, &cancel).await
    }

    async fn broadcast_event(
        &self,
        event: CloudEvent,
        cancel: CancellationToken,
    ) -> Result<BroadcastReport> {
        self.broadcaster.broadcast(event, &cancel).await
    }

    async fn send_message(
        &self,
        connection: &ConnectionId,
        event: CloudEvent,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.broadcaster.send_to(connection, event, &cancel).await
    }

    async fn store(&self, state: AgentState, cancel: CancellationToken) -> Result<()> {
        self.state.store(state, &cancel).await
    }

    async fn read(&self, agent_id: &AgentId, cancel: CancellationToken) -> Result<AgentState> {
        self.state.read(agent_id, &cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_gateway_core::{mocks::RecordingObserver, traits::NoOpObserver};

    #[test]
    fn test_builder_defaults() {
        let gateway = Gateway::builder().build();
        assert_eq!(gateway.router().timeout(), DEFAULT_RPC_TIMEOUT);
        assert_eq!(gateway.state().backend_name(), "memory");
        assert!(gateway.connections().is_empty());
    }

    #[test]
    fn test_builder_takes_timeout_from_config() {
        let config = GatewayConfig {
            rpc_timeout_ms: 250,
            send_timeout_ms: 500,
            connection_buffer: 8,
        };
        let gateway = Gateway::builder().with_config(&config).build();
        assert_eq!(gateway.router().timeout(), Duration::from_millis(250));
        assert_eq!(gateway.broadcaster().send_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_observers_see_connect_and_disconnect() {
        let observer = Arc::new(RecordingObserver::new());
        let gateway = Gateway::builder()
            .with_observer(observer.clone())
            .with_observer(Arc::new(NoOpObserver))
            .build();

        let (conn, _rx) = ChannelConnection::new(4);
        let id = gateway.connect(conn.clone(), ["planner"]);
        assert!(gateway.disconnect(&id));

        assert_eq!(observer.connected(), vec![id.clone()]);
        assert_eq!(observer.disconnected(), vec![id]);
    }

    #[tokio::test]
    async fn test_open_channel_hosts_agent_types() {
        let gateway = Gateway::builder().build();
        let (conn, mut rx) = gateway.open_channel(["coder"]);

        let info = gateway.registry().info(conn.id()).unwrap();
        assert_eq!(info.agent_types, vec!["coder".to_string()]);

        gateway
            .send_message(
                conn.id(),
                CloudEvent::new("agents://ops", "ping", serde_json::json!(null)),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(matches!(rx.recv().await, Some(OutboundMessage::Event(_))));
    }

    #[test]
    fn test_deliver_response_without_caller_is_dropped() {
        let gateway = Gateway::builder().build();
        assert!(!gateway.deliver_response(RpcResponse::ok("unknown", serde_json::json!(null))));
    }
}
