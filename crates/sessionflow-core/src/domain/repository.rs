//! Collaborator traits for the session-context runtime
//!
//! This module defines the boundaries to the keyed context store, the access
//! source, the token issuer, the notification sink and the workflow engine.
//! External crates implement these traits to provide concrete backends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::context::{AccessEntry, ContextKey, ContextRecord, UserId};
use super::history::{ExecutionDescription, ExecutionHistory, ExecutionId, HistoryPage};
use crate::types::EpochMillis;
use crate::CoreError;

/// Keyed document store holding context records
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Fetch the live record for a key
    async fn get(&self, key: &ContextKey) -> Result<Option<ContextRecord>, CoreError>;

    /// Idempotent upsert of a whole record
    async fn put(&self, record: &ContextRecord) -> Result<(), CoreError>;
}

/// Claims returned by the token issuer for a valid token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    /// Subject (user id)
    pub subject: String,
    /// Email address
    #[serde(default)]
    pub email: String,
    /// Group memberships
    #[serde(default)]
    pub groups: Vec<String>,
    /// Given name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    /// Family name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    /// Organisation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
}

/// Token issuer
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify a bearer token, failing with `CoreError::Authentication`
    async fn verify(&self, token: &str) -> Result<TokenClaims, CoreError>;
}

/// Entitlement summary sent with a context update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessSummary {
    /// Product identifier
    pub product_id: String,
    /// Whether access is granted
    pub has_access: bool,
}

/// Payload of a context-update notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextUpdate {
    /// Update type, always `CONTEXT_UPDATED` today
    #[serde(rename = "type")]
    pub update_type: String,
    /// Entitlements after the update
    pub product_access: Vec<AccessSummary>,
}

impl ContextUpdate {
    /// Update type emitted after a context is persisted
    pub const CONTEXT_UPDATED: &'static str = "CONTEXT_UPDATED";

    /// Summarise a freshly persisted entitlement list
    pub fn context_updated(entries: &[AccessEntry]) -> Self {
        Self {
            update_type: Self::CONTEXT_UPDATED.to_string(),
            product_access: entries
                .iter()
                .map(|entry| AccessSummary {
                    product_id: entry.product_id.clone(),
                    has_access: entry.has_access,
                })
                .collect(),
        }
    }
}

/// Acknowledgement of `notifyContextUpdate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyAck {
    /// Whether the source accepted the update
    pub success: bool,
    /// Source-side acknowledgement time
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Authoritative source of per-user entitlements
#[async_trait]
pub trait AccessSource: Send + Sync {
    /// Query the entitlements of a user
    async fn query_product_access(
        &self,
        user_id: &UserId,
        groups: &[String],
    ) -> Result<Vec<AccessEntry>, CoreError>;

    /// Tell the source a user's context was updated
    async fn notify_context_update(
        &self,
        user_id: &UserId,
        update: &ContextUpdate,
    ) -> Result<NotifyAck, CoreError>;
}

/// Event emitted after a context is persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextNotification {
    /// Owner of the context
    pub user_id: UserId,
    /// Update payload
    pub update: ContextUpdate,
    /// When the context was persisted
    pub emitted_at: EpochMillis,
}

/// Downstream subscriber sink
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Emit one notification
    async fn emit(&self, notification: &ContextNotification) -> Result<(), CoreError>;
}

/// Workflow engine client
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Start an execution of the context workflow
    async fn start_execution(&self, input: serde_json::Value) -> Result<ExecutionId, CoreError>;

    /// Describe an execution
    async fn describe_execution(&self, id: &ExecutionId) -> Result<ExecutionDescription, CoreError>;

    /// Fetch one page of an execution's history
    async fn get_execution_history(
        &self,
        id: &ExecutionId,
        next_token: Option<String>,
    ) -> Result<HistoryPage, CoreError>;
}

/// Page through an execution's history until exhaustion.
///
/// Pages are concatenated in arrival order. A page without an event list
/// means the engine has no history for the execution.
pub async fn fetch_full_history(
    engine: &dyn WorkflowEngine,
    id: &ExecutionId,
) -> Result<ExecutionHistory, CoreError> {
    let mut history = ExecutionHistory::default();
    let mut next_token = None;
    let mut pages = 0usize;

    loop {
        let page = engine.get_execution_history(id, next_token.take()).await?;
        let events = page.events.ok_or_else(|| {
            CoreError::HistoryNotFound(format!("Execution history not found: {}", id))
        })?;
        pages += 1;
        history.extend_page(events);

        match page.next_token {
            Some(token) => next_token = Some(token),
            None => break,
        }
    }

    debug!(execution_id = %id, pages, events = history.len(), "Fetched execution history");
    Ok(history)
}
