//! Gateway contract.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::{
    AgentId, AgentState, BroadcastReport, CloudEvent, ConnectionId, RpcRequest, RpcResponse,
};

/// Entry point agent hosts and clients call.
///
/// Every operation takes a cancellation token; firing it abandons the call
/// with a timeout error.
#[async_trait]
pub trait AgentGateway: Send + Sync {
    /// Route an RPC to its target agent and wait for the single response.
    async fn invoke_request(
        &self,
        request: RpcRequest,
        cancel: CancellationToken,
    ) -> Result<RpcResponse>;

    /// Fan an event out to every subscribed connection.
    async fn broadcast_event(
        &self,
        event: CloudEvent,
        cancel: CancellationToken,
    ) -> Result<BroadcastReport>;

    /// Push one event to one named connection.
    async fn send_message(
        &self,
        connection: &ConnectionId,
        event: CloudEvent,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Persist agent state.
    async fn store(&self, state: AgentState, cancel: CancellationToken) -> Result<()>;

    /// Read the latest persisted state of an agent.
    async fn read(&self, agent_id: &AgentId, cancel: CancellationToken) -> Result<AgentState>;
}
