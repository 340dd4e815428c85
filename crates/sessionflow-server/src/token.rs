//! Token issuer client
//!
//! Tokens are checked against the issuer's introspection endpoint. Any
//! failure, including an unreachable issuer, is an authentication error:
//! the workflow never retries token validation.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use sessionflow_core::{domain::repository::TokenClaims, CoreError, LazyHandle, TokenVerifier};

use crate::access_source::http_client;

/// Introspection response body
#[derive(Debug, Deserialize)]
struct Introspection {
    #[serde(default)]
    active: bool,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default, alias = "cognito:groups")]
    groups: Option<Vec<String>>,
    #[serde(default)]
    given_name: Option<String>,
    #[serde(default)]
    family_name: Option<String>,
    #[serde(default)]
    organization: Option<String>,
}

/// Token verifier backed by an introspection endpoint
#[derive(Debug)]
pub struct IntrospectionTokenVerifier {
    introspection_url: String,
    client: LazyHandle<Client>,
}

impl IntrospectionTokenVerifier {
    /// Create a verifier for the given endpoint
    pub fn new(introspection_url: impl Into<String>) -> Self {
        Self {
            introspection_url: introspection_url.into(),
            client: http_client(),
        }
    }
}

fn rejected(reason: impl Into<String>) -> CoreError {
    CoreError::Authentication(reason.into())
}

#[async_trait]
impl TokenVerifier for IntrospectionTokenVerifier {
    async fn verify(&self, token: &str) -> Result<TokenClaims, CoreError> {
        let response = self
            .client
            .get()
            .post(&self.introspection_url)
            .json(&json!({ "token": token }))
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Token issuer unreachable");
                rejected("Token issuer unavailable")
            })?;

        if !response.status().is_success() {
            return Err(rejected(format!("Token issuer returned {}", response.status())));
        }

        let body: Introspection = response
            .json()
            .await
            .map_err(|e| rejected(format!("Malformed introspection response: {}", e)))?;

        if !body.active {
            return Err(rejected("Invalid or expired token"));
        }
        let subject = body
            .sub
            .filter(|sub| !sub.is_empty())
            .ok_or_else(|| rejected("Token has no subject"))?;

        debug!(user_id = %subject, "Token introspected");
        Ok(TokenClaims {
            subject,
            email: body.email.unwrap_or_default(),
            groups: body.groups.unwrap_or_default(),
            given_name: body.given_name,
            family_name: body.family_name,
            organization: body.organization,
        })
    }
}
