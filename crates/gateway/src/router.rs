//! Request router: resolves an RPC target to a live connection, forwards
//! the call, and waits for the matching response.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use agent_gateway_core::{
    traits::GatewayObserver,
    types::{AgentId, ConnectionId, OutboundMessage, RpcRequest, RpcResponse},
    Error, Result,
};

use crate::registry::ConnectionRegistry;

struct PendingCall {
    connection_id: ConnectionId,
    target: AgentId,
    reply: oneshot::Sender<Result<RpcResponse>>,
}

/// Calls forwarded to a connection and still waiting for their response.
///
/// Registered as an observer so calls on a connection that goes away fail
/// immediately instead of waiting for the deadline.
#[derive(Default)]
pub struct PendingCalls {
    calls: DashMap<String, PendingCall>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    fn insert(&self, request_id: String, call: PendingCall) -> bool {
        match self.calls.entry(request_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(call);
                true
            }
        }
    }

    /// Hand a response to the caller waiting on it.
    ///
    /// Returns false when no caller is waiting (unknown id, or the call
    /// already timed out or was canceled); such responses are dropped.
    pub fn complete(&self, response: RpcResponse) -> bool {
        match self.calls.remove(&response.request_id) {
            Some((request_id, call)) => {
                tracing::debug!(
                    request_id = %request_id,
                    target = %call.target,
                    "RPC response delivered"
                );
                call.reply.send(Ok(response)).is_ok()
            }
            None => {
                tracing::debug!(
                    request_id = %response.request_id,
                    "Dropping response with no pending request"
                );
                false
            }
        }
    }

    /// Fail every call waiting on `connection_id`. Returns how many.
    pub fn fail_connection(&self, connection_id: &ConnectionId) -> usize {
        let request_ids: Vec<String> = self
            .calls
            .iter()
            .filter(|r| &r.connection_id == connection_id)
            .map(|r| r.key().clone())
            .collect();

        let mut failed = 0;
        for request_id in request_ids {
            if let Some((_, call)) = self.calls.remove(&request_id) {
                let _ = call.reply.send(Err(Error::transport(format!(
                    "connection {} closed while {} was pending",
                    connection_id, call.target
                ))));
                failed += 1;
            }
        }
        if failed > 0 {
            tracing::warn!(connection_id = %connection_id, failed, "Failed pending RPCs on disconnect");
        }
        failed
    }

    fn forget(&self, request_id: &str) {
        self.calls.remove(request_id);
    }
}

impl GatewayObserver for PendingCalls {
    fn on_disconnected(&self, connection_id: &ConnectionId) {
        self.fail_connection(connection_id);
    }
}

/// Removes a pending entry however the call ends, including when the
/// caller's future is dropped mid-flight.
struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    request_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.forget(self.request_id);
    }
}

/// Routes RPCs to the connection hosting their target agent.
///
/// Keeps no state across calls beyond the correlation entry of each call
/// in flight.
pub struct RequestRouter {
    registry: Arc<ConnectionRegistry>,
    pending: Arc<PendingCalls>,
    timeout: Duration,
}

impl RequestRouter {
    pub fn new(registry: Arc<ConnectionRegistry>, timeout: Duration) -> Self {
        let pending = Arc::new(PendingCalls::new());
        registry.add_observer(pending.clone());
        Self {
            registry,
            pending,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Calls currently waiting for a response.
    pub fn pending(&self) -> &PendingCalls {
        &self.pending
    }

    /// Transport-side delivery of a response. See [`PendingCalls::complete`].
    pub fn complete(&self, response: RpcResponse) -> bool {
        self.pending.complete(response)
    }

    /// Forward `request` and wait for exactly one response.
    ///
    /// Fails with `NotFound` if no live connection hosts the target,
    /// `Timeout` if `cancel` fires or the deadline passes first, and
    /// `Transport` if the send fails or the connection goes away. An
    /// agent-side failure is a successful call with an error response.
    pub async fn invoke(
        &self,
        mut request: RpcRequest,
        cancel: &CancellationToken,
    ) -> Result<RpcResponse> {
        request.validate()?;
        if request.request_id.is_empty() {
            request.request_id = Uuid::new_v4().to_string();
        }

        let started = Instant::now();
        let request_id = request.request_id.clone();
        let target = request.target.clone();
        let method = request.method.clone();

        let result = self.dispatch(request, cancel).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind().as_str(),
        };
        metrics::counter!("gateway_rpc_requests_total", "outcome" => outcome).increment(1);
        metrics::histogram!("gateway_rpc_duration_seconds").record(started.elapsed().as_secs_f64());

        match &result {
            Ok(response) => tracing::debug!(
                request_id = %request_id,
                target = %target,
                method = %method,
                status = ?response.status,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "RPC completed"
            ),
            Err(e) => tracing::warn!(
                request_id = %request_id,
                target = %target,
                method = %method,
                error = %e,
                "RPC failed"
            ),
        }
        result
    }

    async fn dispatch(&self, request: RpcRequest, cancel: &CancellationToken) -> Result<RpcResponse> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled("invoke_request"));
        }

        let connection = self.registry.resolve(&request.target)?;
        let connection_id = connection.id().clone();
        let request_id = request.request_id.clone();
        let target = request.target.clone();

        let (tx, rx) = oneshot::channel();
        let registered = self.pending.insert(
            request_id.clone(),
            PendingCall {
                connection_id: connection_id.clone(),
                target: target.clone(),
                reply: tx,
            },
        );
        if !registered {
            return Err(Error::invalid_request(format!(
                "request id {} is already in flight",
                request_id
            )));
        }
        let _guard = PendingGuard {
            pending: &self.pending,
            request_id: &request_id,
        };

        tracing::trace!(
            request_id = %request_id,
            target = %target,
            connection_id = %connection_id,
            "Forwarding RPC"
        );

        // One deadline covers both the send and the wait for the reply.
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled("invoke_request")),
            _ = &mut deadline => return Err(self.deadline_error(&target)),
            sent = connection.send(OutboundMessage::Request(request)) => sent.map_err(into_transport)?,
        }
        drop(connection);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::cancelled("invoke_request")),
            reply = rx => match reply {
                Ok(result) => result,
                Err(_) => Err(Error::transport(format!(
                    "response channel for {} closed",
                    request_id
                ))),
            },
            _ = &mut deadline => Err(self.deadline_error(&target)),
        }
    }

    fn deadline_error(&self, target: &AgentId) -> Error {
        Error::timeout(format!(
            "no response from {} within {:?}",
            target, self.timeout
        ))
    }
}

fn into_transport(err: Error) -> Error {
    match err {
        Error::Transport(_) => err,
        other => Error::transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_gateway_core::mocks::MockConnection;
    use serde_json::json;

    fn setup(timeout: Duration) -> (Arc<ConnectionRegistry>, RequestRouter) {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = RequestRouter::new(registry.clone(), timeout);
        (registry, router)
    }

    #[tokio::test]
    async fn test_unresolvable_target_is_not_found() {
        let (_registry, router) = setup(Duration::from_secs(1));
        let err = router
            .invoke(
                RpcRequest::new(AgentId::new("planner", "p1"), "plan", json!({})),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(router.pending().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_request_rejected_before_routing() {
        let (_registry, router) = setup(Duration::from_secs(1));
        let err = router
            .invoke(
                RpcRequest::new(AgentId::new("planner", "p1"), " ", json!({})),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_response_is_correlated_by_request_id() {
        let (registry, router) = setup(Duration::from_secs(5));
        let router = Arc::new(router);
        let conn = Arc::new(MockConnection::new());
        registry.register(conn.clone(), ["planner"]);

        let call = {
            let router = router.clone();
            tokio::spawn(async move {
                router
                    .invoke(
                        RpcRequest::new(AgentId::new("planner", "p1"), "plan", json!({"goal": "x"}))
                            .with_request_id("req-1"),
                        &CancellationToken::new(),
                    )
                    .await
            })
        };

        while conn.sent_requests().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(!router.complete(RpcResponse::ok("someone-else", json!(0))));
        assert!(router.complete(RpcResponse::ok("req-1", json!({"steps": 3}))));

        let response = call.await.unwrap().unwrap();
        assert!(response.is_ok());
        assert_eq!(response.payload["steps"], 3);
        assert!(router.pending().is_empty());
    }

    #[tokio::test]
    async fn test_request_id_assigned_when_missing() {
        let (registry, router) = setup(Duration::from_millis(20));
        let conn = Arc::new(MockConnection::new());
        registry.register(conn.clone(), ["planner"]);

        let _ = router
            .invoke(
                RpcRequest::new(AgentId::new("planner", "p1"), "plan", json!({})),
                &CancellationToken::new(),
            )
            .await;

        let sent = conn.sent_requests();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].request_id.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_without_response_times_out() {
        let (registry, router) = setup(Duration::from_secs(30));
        let conn = Arc::new(MockConnection::new());
        registry.register(conn.clone(), ["planner"]);

        let err = router
            .invoke(
                RpcRequest::new(AgentId::new("planner", "p1"), "plan", json!({}))
                    .with_request_id("slow"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout(_)));
        assert!(!router.complete(RpcResponse::ok("slow", json!(null))));
    }

    #[tokio::test]
    async fn test_send_failure_is_transport() {
        let (registry, router) = setup(Duration::from_secs(1));
        let conn = Arc::new(MockConnection::failing());
        registry.register(conn.clone(), ["planner"]);

        let err = router
            .invoke(
                RpcRequest::new(AgentId::new("planner", "p1"), "plan", json!({})),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert!(router.pending().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_fails_pending_call() {
        let (registry, router) = setup(Duration::from_secs(30));
        let router = Arc::new(router);
        let conn = Arc::new(MockConnection::new());
        let id = registry.register(conn.clone(), ["planner"]);

        let call = {
            let router = router.clone();
            tokio::spawn(async move {
                router
                    .invoke(
                        RpcRequest::new(AgentId::new("planner", "p1"), "plan", json!({})),
                        &CancellationToken::new(),
                    )
                    .await
            })
        };
        while router.pending().is_empty() || conn.sent_requests().is_empty() {
            tokio::task::yield_now().await;
        }

        registry.unregister(&id);

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_covers_a_blocked_send() {
        use crate::channel::ChannelConnection;
        use agent_gateway_core::{traits::Connection, types::CloudEvent};

        let (registry, router) = setup(Duration::from_millis(50));
        let (conn, _rx) = ChannelConnection::new(1);
        conn.send(OutboundMessage::Event(CloudEvent::new("test", "filler", json!(null))))
            .await
            .unwrap();
        registry.register(conn.clone(), ["planner"]);

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            router.invoke(
                RpcRequest::new(AgentId::new("planner", "p1"), "plan", json!({})),
                &CancellationToken::new(),
            ),
        )
        .await
        .expect("invoke must honor its own deadline");

        assert!(matches!(outcome, Err(Error::Timeout(_))));
        assert!(router.pending().is_empty());
    }
}
