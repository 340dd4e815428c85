use axum::{
    body::{to_bytes, Body},
    http::{header::AUTHORIZATION, Request, StatusCode},
    Router,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use sessionflow_core::domain::repository::TokenClaims;
use sessionflow_core::{AccessEntry, ExecutionId, ExecutionStatus, FixedClock, OrchestratorConfig};
use sessionflow_server::{ContextServer, DeadLetterQueue, ServiceConfig};
use sessionflow_state_inmemory::{
    EngineConfig, InMemoryRuntime, RecordingSink, StaticAccessSource, StaticTokenVerifier,
};

const T0: i64 = 1_700_000_000_000;

async fn test_server() -> Arc<ContextServer> {
    sessionflow_monitoring::init_test_tracing();

    let verifier = Arc::new(StaticTokenVerifier::new());
    verifier
        .insert(
            "good-token",
            TokenClaims {
                subject: "user-1".to_string(),
                email: "ada@example.com".to_string(),
                groups: vec!["analysts".to_string()],
                given_name: Some("Ada".to_string()),
                family_name: None,
                organization: None,
            },
        )
        .await;

    let source = Arc::new(StaticAccessSource::new());
    source
        .grant_group(
            "analysts",
            AccessEntry {
                product_id: "engine".to_string(),
                has_access: true,
                access_level: "read".to_string(),
                granted_at: T0 - 1_000,
                last_verified: 0,
                access_pattern: String::new(),
            },
        )
        .await;

    let runtime = InMemoryRuntime::new(
        verifier,
        source,
        Arc::new(RecordingSink::new()),
        Arc::new(FixedClock::new(T0)),
        OrchestratorConfig::default(),
        EngineConfig::default(),
    );

    Arc::new(ContextServer::new(
        ServiceConfig::default(),
        runtime,
        Arc::new(DeadLetterQueue::new(10)),
    ))
}

fn router(server: &Arc<ContextServer>) -> Router {
    sessionflow_server::api::build_router(server.clone())
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_context_request_returns_updated_context() {
    let server = test_server().await;

    let (status, body) = send(
        router(&server),
        post_json("/v1/context", json!({"token": "good-token"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["contextUpdated"], json!(true));
    assert_eq!(body["productAccess"][0]["productId"], json!("engine"));
    assert_eq!(server.store().len().await, 1);
}

#[tokio::test]
async fn test_context_request_accepts_bearer_header() {
    let server = test_server().await;
    let request = Request::builder()
        .method("POST")
        .uri("/v1/context")
        .header(AUTHORIZATION, "Bearer good-token")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(router(&server), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["contextUpdated"], json!(true));
}

#[tokio::test]
async fn test_invalid_token_is_unauthorized() {
    let server = test_server().await;

    let (status, body) = send(
        router(&server),
        post_json("/v1/context", json!({"token": "stolen"})),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], json!("ERR_UNAUTHORIZED"));
    assert_eq!(server.store().len().await, 0);
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let server = test_server().await;

    let (status, _) = send(router(&server), post_json("/v1/context", json!({}))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_execution_start_and_report() {
    let server = test_server().await;

    let (status, body) = send(
        router(&server),
        post_json("/v1/executions", json!({"token": "good-token"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let execution_id = body["executionId"].as_str().unwrap().to_string();
    server
        .engine()
        .wait_for_completion(&ExecutionId(execution_id.clone()))
        .await
        .unwrap();

    let request = Request::builder()
        .uri(format!("/v1/executions/{}", execution_id))
        .body(Body::empty())
        .unwrap();
    let (status, report) = send(router(&server), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["executionId"], json!(execution_id));
    assert_eq!(
        report["status"],
        serde_json::to_value(ExecutionStatus::Succeeded).unwrap()
    );
    assert_eq!(report["output"]["contextUpdated"], json!(true));
}

#[tokio::test]
async fn test_unknown_execution_is_not_found() {
    let server = test_server().await;
    let request = Request::builder()
        .uri("/v1/executions/does-not-exist")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(router(&server), request).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], json!("ERR_NOT_FOUND"));
    assert_eq!(
        body["error"]["message"],
        json!("Execution does-not-exist not found")
    );
}

#[tokio::test]
async fn test_health_check() {
    let server = test_server().await;
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(router(&server), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("UP"));
    assert_eq!(body["version"], json!(env!("CARGO_PKG_VERSION")));
    assert_eq!(body["deadLetters"]["itemCount"], json!(0));
}
