#![deny(unused)]
//! Core types, traits, and error definitions for the agent gateway.
//!
//! This crate provides the data model and the seams (transport, state
//! backend, observer) shared by the store and gateway crates.

pub mod config;
pub mod error;
pub mod mocks;
pub mod traits;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use traits::*;
pub use types::*;
