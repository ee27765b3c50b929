use crate::types::ConnectionInfo;
use crate::types::ConnectionId;

/// Callback surface registered on the gateway by the hosting runtime.
///
/// Callbacks run inline on the connect/disconnect path and must not block.
pub trait GatewayObserver: Send + Sync {
    fn on_connected(&self, _info: &ConnectionInfo) {}

    fn on_disconnected(&self, _connection_id: &ConnectionId) {}
}

/// Observer that ignores every notification.
pub struct NoOpObserver;

impl GatewayObserver for NoOpObserver {}
