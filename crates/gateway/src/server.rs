//! Axum-based HTTP server for the gateway.

use axum::{
    body::Bytes,
    extract::{Json, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use agent_gateway_core::{
    config::ServerConfig,
    traits::AgentGateway,
    types::{
        AgentId, AgentState, ApiEnvelope, ApiErrorBody, BroadcastReport, CloudEvent,
        ConnectionId, ConnectionInfo, ETag, RpcRequest, RpcResponse,
    },
    Error, Result,
};

use crate::gateway::Gateway;

/// Shared application state.
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

/// Gateway HTTP server.
pub struct GatewayServer {
    config: ServerConfig,
    state: Arc<AppState>,
    metrics_handle: Option<PrometheusHandle>,
}

impl GatewayServer {
    pub fn new(config: ServerConfig, gateway: Arc<Gateway>) -> Self {
        Self {
            config,
            state: Arc::new(AppState { gateway }),
            metrics_handle: None,
        }
    }

    /// Serve `/metrics` from this recorder.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Build the Axum router.
    pub fn build_router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/v1/connections", get(connections_handler))
            .route("/v1/connections/:id/events", post(send_message_handler))
            .route("/v1/rpc", post(rpc_handler))
            .route("/v1/events", post(broadcast_handler))
            .route(
                "/v1/agents/:agent_type/:key/state",
                get(read_state_handler)
                    .put(store_state_handler)
                    .delete(delete_state_handler),
            )
            .with_state(self.state.clone());

        if let Some(handle) = &self.metrics_handle {
            let handle = handle.clone();
            router = router.route("/metrics", get(move || async move { handle.render() }));
        }

        if self.config.enable_cors {
            router = router.layer(CorsLayer::new().allow_origin(Any).allow_methods(Any));
        }

        router.layer(TraceLayer::new_for_http())
    }

    /// Bind and serve until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::transport(format!("Failed to bind {}: {}", addr, e)))?;

        tracing::info!(addr = %addr, "Gateway server starting");

        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| Error::internal(format!("Server error: {}", e)))?;

        tracing::info!("Gateway server stopped");
        Ok(())
    }
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Health response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Registered connections.
    pub connections: usize,
}

/// Result of a direct send.
#[derive(Debug, Serialize, Deserialize)]
pub struct SendResult {
    pub connection_id: ConnectionId,
    pub event_id: String,
    pub delivered: bool,
}

/// Error returned by every handler: the typed body with a matching status.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody::from(&self.0);
        let status = StatusCode::from_u16(body.code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::warn!(code = ?body.code, error = %self.0, "Request failed");
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Token that fires if the client goes away before the handler finishes.
///
/// Axum drops the handler future when the connection closes; the guard is
/// dropped with it.
fn request_token() -> (CancellationToken, tokio_util::sync::DropGuard) {
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    (token, guard)
}

fn new_trace_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connections: state.gateway.registry().len(),
    })
}

async fn connections_handler(
    State(state): State<Arc<AppState>>,
) -> Json<ApiEnvelope<Vec<ConnectionInfo>>> {
    Json(ApiEnvelope::success(new_trace_id(), state.gateway.connections()))
}

async fn rpc_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RpcRequest>,
) -> ApiResult<Json<ApiEnvelope<RpcResponse>>> {
    let trace_id = new_trace_id();
    tracing::info!(
        trace_id = %trace_id,
        target = %request.target,
        method = %request.method,
        "Processing RPC request"
    );

    let (cancel, _guard) = request_token();
    let response = state.gateway.invoke_request(request, cancel).await?;
    Ok(Json(ApiEnvelope::success(trace_id, response)))
}

async fn broadcast_handler(
    State(state): State<Arc<AppState>>,
    Json(event): Json<CloudEvent>,
) -> ApiResult<Json<ApiEnvelope<BroadcastReport>>> {
    let trace_id = new_trace_id();
    tracing::info!(
        trace_id = %trace_id,
        event_id = %event.id,
        event_type = %event.event_type,
        "Broadcasting event"
    );

    let (cancel, _guard) = request_token();
    let report = state.gateway.broadcast_event(event, cancel).await?;
    Ok(Json(ApiEnvelope::success(trace_id, report)))
}

async fn send_message_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(event): Json<CloudEvent>,
) -> ApiResult<Json<ApiEnvelope<SendResult>>> {
    let trace_id = new_trace_id();
    let connection_id = ConnectionId::from_string(id);
    let event_id = event.id.clone();

    let (cancel, _guard) = request_token();
    state
        .gateway
        .send_message(&connection_id, event, cancel)
        .await?;

    Ok(Json(ApiEnvelope::success(
        trace_id,
        SendResult {
            connection_id,
            event_id,
            delivered: true,
        },
    )))
}

async fn read_state_handler(
    State(state): State<Arc<AppState>>,
    Path((agent_type, key)): Path<(String, String)>,
) -> ApiResult<Response> {
    let agent_id = AgentId::new(agent_type, key);
    let (cancel, _guard) = request_token();
    let agent_state = state.gateway.read(&agent_id, cancel).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Some(etag) = &agent_state.etag {
        let value = HeaderValue::from_str(&format!("\"{}\"", etag))
            .map_err(|e| Error::internal(format!("invalid etag header: {}", e)))?;
        headers.insert(header::ETAG, value);
    }
    Ok((StatusCode::OK, headers, agent_state.payload).into_response())
}

async fn store_state_handler(
    State(state): State<Arc<AppState>>,
    Path((agent_type, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let mut agent_state = AgentState::new(AgentId::new(agent_type, key), body);
    if let Some(etag) = if_match(&headers)? {
        agent_state = agent_state.with_etag(etag);
    }

    let (cancel, _guard) = request_token();
    state.gateway.store(agent_state, cancel).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_state_handler(
    State(state): State<Arc<AppState>>,
    Path((agent_type, key)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let agent_id = AgentId::new(agent_type, key);
    let (cancel, _guard) = request_token();
    if state.gateway.delete_state(&agent_id, cancel).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(Error::not_found(format!("no state stored for agent {}", agent_id)).into())
    }
}

/// Expected version from `If-Match`, with surrounding quotes removed.
fn if_match(headers: &HeaderMap) -> Result<Option<ETag>> {
    let Some(value) = headers.get(header::IF_MATCH) else {
        return Ok(None);
    };
    let raw = value
        .to_str()
        .map_err(|_| Error::invalid_request("If-Match header is not valid ASCII"))?
        .trim();
    let tag = raw.strip_prefix("W/").unwrap_or(raw).trim_matches('"');
    if tag.is_empty() {
        return Err(Error::invalid_request("If-Match header is empty"));
    }
    Ok(Some(ETag::from(tag)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_handler() {
        let state = Arc::new(AppState {
            gateway: Arc::new(Gateway::builder().build()),
        });
        let response = health_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_if_match_strips_quotes() {
        let mut headers = HeaderMap::new();
        headers.insert(header::IF_MATCH, HeaderValue::from_static("\"abc123\""));
        assert_eq!(if_match(&headers).unwrap(), Some(ETag::from("abc123")));

        headers.insert(header::IF_MATCH, HeaderValue::from_static("W/\"abc123\""));
        assert_eq!(if_match(&headers).unwrap(), Some(ETag::from("abc123")));

        assert_eq!(if_match(&HeaderMap::new()).unwrap(), None);
    }

    #[test]
    fn test_error_status_follows_code() {
        let response = ApiError::from(Error::cancelled("read")).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

        let response = ApiError::from(Error::transport("gone")).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
