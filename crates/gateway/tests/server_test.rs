use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use agent_gateway::{ChannelConnection, Gateway, GatewayServer};
use agent_gateway_core::config::AppConfig;
use agent_gateway_core::mocks::MockConnection;
use agent_gateway_core::types::{OutboundMessage, RpcResponse};

fn app(gateway: Arc<Gateway>) -> Router {
    GatewayServer::new(AppConfig::default().server, gateway).build_router()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let gateway = Arc::new(Gateway::builder().build());
    let conn = Arc::new(MockConnection::new());
    gateway.connect(conn.clone(), ["planner"]);

    let response = app(gateway)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 1);
}

#[tokio::test]
async fn test_list_connections() {
    let gateway = Arc::new(Gateway::builder().build());
    let conn = Arc::new(MockConnection::new());
    gateway.connect(conn.clone(), ["planner"]);

    let response = app(gateway)
        .oneshot(Request::builder().uri("/v1/connections").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["version"], "v1");
    assert_eq!(body["data"][0]["agent_types"][0], "planner");
}

#[tokio::test]
async fn test_state_put_get_and_conditional_write() {
    let app = app(Arc::new(Gateway::builder().build()));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/v1/agents/counter/c1/state")
                .body(Body::from("{\"count\":1}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/agents/counter/c1/state")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let etag = response
        .headers()
        .get(header::ETAG)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(body_bytes(response).await, b"{\"count\":1}".to_vec());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/v1/agents/counter/c1/state")
                .header(header::IF_MATCH, etag.as_str())
                .body(Body::from("{\"count\":2}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/v1/agents/counter/c1/state")
                .header(header::IF_MATCH, etag.as_str())
                .body(Body::from("{\"count\":3}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "CONFLICT");
}

#[tokio::test]
async fn test_missing_state_is_404() {
    let response = app(Arc::new(Gateway::builder().build()))
        .oneshot(
            Request::builder()
                .uri("/v1/agents/counter/ghost/state")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["code"], "NOT_FOUND");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn test_delete_state() {
    let app = app(Arc::new(Gateway::builder().build()));
    let put = Request::builder()
        .method("PUT")
        .uri("/v1/agents/counter/c1/state")
        .body(Body::from("1"))
        .unwrap();
    app.clone().oneshot(put).await.unwrap();

    let delete = || {
        Request::builder()
            .method("DELETE")
            .uri("/v1/agents/counter/c1/state")
            .body(Body::empty())
            .unwrap()
    };
    assert_eq!(
        app.clone().oneshot(delete()).await.unwrap().status(),
        StatusCode::NO_CONTENT
    );
    assert_eq!(
        app.clone().oneshot(delete()).await.unwrap().status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_rpc_endpoint_round_trip() {
    let gateway = Arc::new(Gateway::builder().build());
    let (conn, mut rx) = ChannelConnection::new(8);
    gateway.connect(conn.clone(), ["planner"]);

    let agent = {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            if let Some(OutboundMessage::Request(request)) = rx.recv().await {
                gateway.deliver_response(RpcResponse::ok(request.request_id, json!({"steps": 2})));
            }
        })
    };

    let response = app(gateway)
        .oneshot(json_request(
            "POST",
            "/v1/rpc",
            json!({
                "target": {"type": "planner", "key": "p1"},
                "method": "plan",
                "payload": {"goal": "ship"}
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["payload"]["steps"], 2);
    agent.await.unwrap();
}

#[tokio::test]
async fn test_rpc_without_host_is_404() {
    let response = app(Arc::new(Gateway::builder().build()))
        .oneshot(json_request(
            "POST",
            "/v1/rpc",
            json!({
                "target": {"type": "planner", "key": "p1"},
                "method": "plan"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_broadcast_endpoint_reports_delivery() {
    let gateway = Arc::new(Gateway::builder().build());
    let a = Arc::new(MockConnection::new());
    let b = Arc::new(MockConnection::failing());
    gateway.connect(a.clone(), Vec::<String>::new());
    gateway.connect(b.clone(), Vec::<String>::new());

    let response = app(gateway)
        .oneshot(json_request(
            "POST",
            "/v1/events",
            json!({"source": "agents://ci", "type": "build.finished", "data": {"ok": true}}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["attempted"], 2);
    assert_eq!(body["data"]["delivered"], 1);
    assert_eq!(a.sent_events().len(), 1);
}

#[tokio::test]
async fn test_send_to_unknown_connection_is_bad_gateway() {
    let response = app(Arc::new(Gateway::builder().build()))
        .oneshot(json_request(
            "POST",
            "/v1/connections/ghost/events",
            json!({"source": "agents://ops", "type": "ping"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(response).await["code"], "TRANSPORT");
}
