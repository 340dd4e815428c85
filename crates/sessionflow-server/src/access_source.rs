//! GraphQL client for the access source
//!
//! Both operations POST a GraphQL document with variables. A response with a
//! non-empty `errors` array is a hard failure even when `data` is present.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};

use sessionflow_core::{
    domain::repository::{ContextUpdate, NotifyAck},
    AccessEntry, AccessSource, CoreError, LazyHandle, UserId,
};

const PRODUCT_ACCESS_QUERY: &str = r#"
    query GetUserProductAccess($userId: ID!, $groups: [String!]!) {
        userProductAccess(userId: $userId, groups: $groups) {
            productId
            hasAccess
            accessLevel
            grantedAt
            accessPattern
        }
    }
"#;

const NOTIFY_CONTEXT_UPDATE: &str = r#"
    mutation NotifyContextUpdate($userId: ID!, $update: ContextUpdateInput!) {
        notifyContextUpdate(userId: $userId, update: $update) {
            success
            timestamp
        }
    }
"#;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the shared HTTP client used by the remote collaborators
pub(crate) fn http_client() -> LazyHandle<Client> {
    LazyHandle::new(|| {
        Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new())
    })
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<Value>>,
}

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: Value,
}

/// Access source reached over GraphQL
#[derive(Debug)]
pub struct GraphQlAccessSource {
    /// GraphQL endpoint
    api_url: String,

    /// Optional API key sent as `x-api-key`
    api_key: Option<String>,

    /// HTTP client, built on first request
    client: LazyHandle<Client>,
}

impl GraphQlAccessSource {
    /// Create a client for the given endpoint
    pub fn new(api_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key,
            client: http_client(),
        }
    }

    /// Run one GraphQL operation and return the named field of `data`
    async fn execute(&self, query: &str, variables: Value, field: &str) -> Result<Value, CoreError> {
        let client = self.client.get();
        let mut request = client
            .post(&self.api_url)
            .json(&GraphQlRequest { query, variables });
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await.map_err(|e| {
            error!(error = %e, "Access source request failed");
            CoreError::AccessSource(format!("Request failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::AccessSource(format!(
                "Access source returned {}: {}",
                status, body
            )));
        }

        let body: GraphQlResponse = response.json().await.map_err(|e| {
            CoreError::AccessSource(format!("Invalid GraphQL response: {}", e))
        })?;

        if let Some(errors) = body.errors.filter(|errors| !errors.is_empty()) {
            return Err(CoreError::AccessSource(format!(
                "GraphQL operation {} failed: {}",
                field,
                Value::Array(errors)
            )));
        }

        body.data
            .and_then(|mut data| data.get_mut(field).map(Value::take))
            .filter(|value| !value.is_null())
            .ok_or_else(|| {
                CoreError::AccessSource(format!("GraphQL response has no {} field", field))
            })
    }
}

#[async_trait]
impl AccessSource for GraphQlAccessSource {
    async fn query_product_access(
        &self,
        user_id: &UserId,
        groups: &[String],
    ) -> Result<Vec<AccessEntry>, CoreError> {
        let value = self
            .execute(
                PRODUCT_ACCESS_QUERY,
                json!({ "userId": user_id, "groups": groups }),
                "userProductAccess",
            )
            .await?;

        let entries: Vec<AccessEntry> = serde_json::from_value(value).map_err(|e| {
            CoreError::AccessSource(format!("Malformed product access list: {}", e))
        })?;

        debug!(user_id = %user_id, entries = entries.len(), "Queried product access");
        Ok(entries)
    }

    async fn notify_context_update(
        &self,
        user_id: &UserId,
        update: &ContextUpdate,
    ) -> Result<NotifyAck, CoreError> {
        let value = self
            .execute(
                NOTIFY_CONTEXT_UPDATE,
                json!({ "userId": user_id, "update": update }),
                "notifyContextUpdate",
            )
            .await?;

        let ack: NotifyAck = serde_json::from_value(value).map_err(|e| {
            CoreError::AccessSource(format!("Malformed notify acknowledgement: {}", e))
        })?;

        info!(user_id = %user_id, success = ack.success, "Notified access source");
        Ok(ack)
    }
}
