//! Core traits for the agent gateway.
//!
//! Traits are organized by the seam they describe:
//! - `transport`: live channels to agent hosts (Connection)
//! - `state_store`: durable per-agent state (StateBackend)
//! - `gateway`: the gateway contract hosts call (AgentGateway)
//! - `observer`: lifecycle callbacks registered on the gateway (GatewayObserver)

pub mod gateway;
pub mod observer;
pub mod state_store;
pub mod transport;

pub use gateway::*;
pub use observer::*;
pub use state_store::*;
pub use transport::*;
