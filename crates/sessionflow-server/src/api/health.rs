//! Health check endpoint

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::server::ContextServer;

/// Health check handler
///
/// Reports the service version and the state of the notification
/// dead-letter queue. A non-empty queue does not make the service unhealthy.
pub async fn health_check(State(server): State<Arc<ContextServer>>) -> impl IntoResponse {
    debug!("Health check requested");
    let dead_letters = server.dead_letters().stats().await;

    Json(json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION"),
        "deadLetters": dead_letters,
    }))
}
