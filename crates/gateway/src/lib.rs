#![deny(unused)]
//! Agent gateway.
//!
//! Routes RPCs from clients to the connections hosting their target
//! agents, fans events out to subscribers, and persists agent state. The
//! HTTP server in [`server`] exposes the same operations to remote clients.

pub mod broadcaster;
pub mod channel;
pub mod gateway;
pub mod registry;
pub mod router;
pub mod server;
pub mod telemetry;

pub use broadcaster::EventBroadcaster;
pub use channel::ChannelConnection;
pub use gateway::{Gateway, GatewayBuilder};
pub use registry::ConnectionRegistry;
pub use router::{PendingCalls, RequestRouter};
pub use server::{GatewayServer, HealthResponse};
pub use telemetry::{configure_tracing, setup_metrics_recorder};
