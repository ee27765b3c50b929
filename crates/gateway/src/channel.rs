//! In-process connection backed by a bounded mpsc channel.
//!
//! Used to host agents inside the gateway process, and by tests to stand in
//! for a real transport. The receiving half plays the role of the remote
//! agent: it reads [`OutboundMessage`]s and answers requests through
//! [`crate::Gateway::deliver_response`].

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use agent_gateway_core::{
    traits::Connection,
    types::{ConnectionId, OutboundMessage},
    Error, Result,
};

pub struct ChannelConnection {
    id: ConnectionId,
    tx: mpsc::Sender<OutboundMessage>,
    closed: AtomicBool,
}

impl ChannelConnection {
    /// Create a connection and the receiver its agent reads from.
    ///
    /// `buffer` bounds how many undelivered messages may queue up; sends
    /// wait for room once it is full.
    pub fn new(buffer: usize) -> (Arc<Self>, mpsc::Receiver<OutboundMessage>) {
        Self::with_id(ConnectionId::new(), buffer)
    }

    pub fn with_id(
        id: ConnectionId,
        buffer: usize,
    ) -> (Arc<Self>, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let conn = Arc::new(Self {
            id,
            tx,
            closed: AtomicBool::new(false),
        });
        (conn, rx)
    }

    /// Mark the connection dead. Later sends fail with a transport error.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(connection_id = %self.id, "Channel connection closed");
        }
    }
}

#[async_trait]
impl Connection for ChannelConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn is_live(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    async fn send(&self, message: OutboundMessage) -> Result<()> {
        if !self.is_live() {
            return Err(Error::transport(format!("connection {} is closed", self.id)));
        }
        self.tx.send(message).await.map_err(|e| {
            Error::transport(format!(
                "connection {} dropped {} message",
                self.id,
                e.0.kind()
            ))
        })
    }
}
