//! Core type definitions for the agent gateway.
//!
//! Broken down into submodules by concern.

pub mod agent;
pub mod connection;
pub mod event;
pub mod gateway_contract;
pub mod rpc;

pub use agent::*;
pub use connection::*;
pub use event::*;
pub use gateway_contract::*;
pub use rpc::*;
