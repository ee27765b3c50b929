//! Mock implementations of core traits for testing.
//!
//! Shared by the unit and integration tests of every crate in the workspace.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::{
    traits::{Connection, GatewayObserver},
    types::{CloudEvent, ConnectionId, ConnectionInfo, OutboundMessage, RpcRequest},
    Error, Result,
};

// =============================================================================
// Mock Connection
// =============================================================================

/// Connection that records everything sent to it.
pub struct MockConnection {
    id: ConnectionId,
    live: AtomicBool,
    fail_sends: AtomicBool,
    delay: Option<Duration>,
    sent: Mutex<Vec<OutboundMessage>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self {
            id: ConnectionId::new(),
            live: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            delay: None,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// A live connection whose sends always fail.
    pub fn failing() -> Self {
        let conn = Self::new();
        conn.fail_sends.store(true, Ordering::SeqCst);
        conn
    }

    /// Sleep before accepting each message.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Mark the remote end as gone.
    pub fn disconnect(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_events(&self) -> Vec<CloudEvent> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                OutboundMessage::Event(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    pub fn sent_requests(&self) -> Vec<RpcRequest> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                OutboundMessage::Request(r) => Some(r),
                _ => None,
            })
            .collect()
    }
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    async fn send(&self, message: OutboundMessage) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if !self.is_live() {
            return Err(Error::transport(format!("connection {} is closed", self.id)));
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::transport(format!("send to {} failed", self.id)));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

// =============================================================================
// Recording Observer
// =============================================================================

/// Observer that keeps a log of lifecycle notifications.
#[derive(Default)]
pub struct RecordingObserver {
    connected: Mutex<Vec<ConnectionId>>,
    disconnected: Mutex<Vec<ConnectionId>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected(&self) -> Vec<ConnectionId> {
        self.connected.lock().unwrap().clone()
    }

    pub fn disconnected(&self) -> Vec<ConnectionId> {
        self.disconnected.lock().unwrap().clone()
    }
}

impl GatewayObserver for RecordingObserver {
    fn on_connected(&self, info: &ConnectionInfo) {
        self.connected.lock().unwrap().push(info.id.clone());
    }

    fn on_disconnected(&self, connection_id: &ConnectionId) {
        self.disconnected.lock().unwrap().push(connection_id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_connection_records_messages() {
        let conn = MockConnection::new();
        let event = CloudEvent::new("test", "ping", json!(null));
        conn.send(OutboundMessage::Event(event.clone())).await.unwrap();

        assert_eq!(conn.sent_events(), vec![event]);
        assert!(conn.sent_requests().is_empty());
    }

    #[tokio::test]
    async fn test_mock_connection_rejects_after_disconnect() {
        let conn = MockConnection::new();
        conn.disconnect();
        let err = conn
            .send(OutboundMessage::Event(CloudEvent::new("t", "ping", json!(null))))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
