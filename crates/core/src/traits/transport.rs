//! Connection transport seam.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ConnectionId, OutboundMessage};

/// One live bidirectional channel to an agent host or event subscriber.
///
/// The transport layer owns connections; the gateway only keeps weak
/// handles and drives them through this trait. Inbound traffic (RPC
/// responses) is handed back to the gateway by the transport.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Stable identifier of this connection.
    fn id(&self) -> &ConnectionId;

    /// Whether the remote end can still receive messages.
    fn is_live(&self) -> bool;

    /// Push a message to the remote end.
    ///
    /// Completes when the transport has accepted the message, which is not
    /// necessarily when the remote acknowledges it.
    async fn send(&self, message: OutboundMessage) -> Result<()>;
}
