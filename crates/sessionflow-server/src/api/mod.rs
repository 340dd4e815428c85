//! API module for the sessionflow server
//!
//! This module contains the API routes and handlers.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use sessionflow_core::{ErrorKind, ExecutionId, ExecutionReport};

pub mod errors;
pub mod health;

use crate::error::{ServerError, ServerResult};
use crate::server::ContextServer;

/// Build the router for API endpoints
pub fn build_router(server: Arc<ContextServer>) -> Router {
    Router::new()
        // Inline workflow run
        .route("/v1/context", post(handle_get_context))
        // Engine-backed executions
        .route("/v1/executions", post(handle_start_execution))
        .route("/v1/executions/:execution_id", get(handle_get_execution))
        // Health check
        .route("/health", get(health::health_check))
        .with_state(server)
}

/// Request body carrying the caller's bearer token
#[derive(Debug, Default, Deserialize)]
struct ContextRequest {
    #[serde(default)]
    token: Option<String>,
}

/// Workflow input for a request: the body's token, else the `Authorization`
/// bearer token. Without either the input has no token and the workflow
/// rejects it as unauthenticated.
fn workflow_input(headers: &HeaderMap, body: &Bytes) -> ServerResult<Value> {
    let request: ContextRequest = if body.is_empty() {
        ContextRequest::default()
    } else {
        serde_json::from_slice(body)?
    };

    let token = request.token.filter(|token| !token.is_empty()).or_else(|| {
        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_string)
    });

    Ok(match token {
        Some(token) => json!({ "token": token }),
        None => json!({}),
    })
}

/// Run the context workflow inline and return its terminal output
async fn handle_get_context(
    State(server): State<Arc<ContextServer>>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<Json<Value>> {
    let input = workflow_input(&headers, &body)?;
    let output = server.orchestrator().execute(input).await?;
    Ok(Json(output))
}

/// Start an execution on the engine
async fn handle_start_execution(
    State(server): State<Arc<ContextServer>>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<impl IntoResponse> {
    let input = workflow_input(&headers, &body)?;
    let execution_id = server.status().start(input).await?;
    info!(execution_id = %execution_id, "Execution started");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "executionId": execution_id })),
    ))
}

/// Report the progress of an execution
async fn handle_get_execution(
    State(server): State<Arc<ContextServer>>,
    Path(execution_id): Path<String>,
) -> ServerResult<Json<ExecutionReport>> {
    if execution_id.trim().is_empty() {
        return Err(ServerError::ValidationError(
            "Execution id must not be empty".to_string(),
        ));
    }
    let report = server
        .status()
        .report(&ExecutionId(execution_id.clone()))
        .await
        .map_err(|err| match err.kind() {
            ErrorKind::HistoryNotFound => {
                ServerError::NotFound(format!("Execution {}", execution_id))
            }
            _ => ServerError::from(err),
        })?;
    Ok(Json(report))
}
