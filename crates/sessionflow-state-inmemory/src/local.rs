//! Static collaborators for local runs and tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use sessionflow_core::{
    domain::repository::{
        ContextNotification, ContextUpdate, NotifyAck, TokenClaims,
    },
    AccessEntry, AccessSource, CoreError, NotificationSink, TokenVerifier, UserId,
};

/// Token verifier backed by a fixed token table
#[derive(Default)]
pub struct StaticTokenVerifier {
    tokens: RwLock<HashMap<String, TokenClaims>>,
}

impl StaticTokenVerifier {
    /// Create a verifier that accepts no token
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as proof of `claims`
    pub async fn insert(&self, token: impl Into<String>, claims: TokenClaims) {
        self.tokens.write().await.insert(token.into(), claims);
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<TokenClaims, CoreError> {
        let tokens = self.tokens.read().await;
        tokens
            .get(token)
            .cloned()
            .ok_or_else(|| CoreError::Authentication("Invalid or expired token".to_string()))
    }
}

/// Access source backed by per-user and per-group grant tables.
///
/// A user's entitlements are their direct grants followed by the grants of
/// each of their groups, first grant per product wins.
#[derive(Default)]
pub struct StaticAccessSource {
    user_grants: RwLock<HashMap<UserId, Vec<AccessEntry>>>,
    group_grants: RwLock<HashMap<String, Vec<AccessEntry>>>,
    failures_remaining: AtomicUsize,
    queries: AtomicUsize,
    notifications: RwLock<Vec<(UserId, ContextUpdate)>>,
}

impl StaticAccessSource {
    /// Create a source with no grants
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a product directly to a user
    pub async fn grant_user(&self, user_id: UserId, entry: AccessEntry) {
        self.user_grants
            .write()
            .await
            .entry(user_id)
            .or_default()
            .push(entry);
    }

    /// Grant a product to every member of a group
    pub async fn grant_group(&self, group: impl Into<String>, entry: AccessEntry) {
        self.group_grants
            .write()
            .await
            .entry(group.into())
            .or_default()
            .push(entry);
    }

    /// Fail the next `count` queries with an access-source error
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Number of queries served or failed so far
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Context updates received so far
    pub async fn notifications(&self) -> Vec<(UserId, ContextUpdate)> {
        self.notifications.read().await.clone()
    }

    fn take_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl AccessSource for StaticAccessSource {
    async fn query_product_access(
        &self,
        user_id: &UserId,
        groups: &[String],
    ) -> Result<Vec<AccessEntry>, CoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.take_failure() {
            return Err(CoreError::AccessSource(format!(
                "Access source unavailable for {}",
                user_id
            )));
        }

        let mut entries: Vec<AccessEntry> = self
            .user_grants
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default();

        let group_grants = self.group_grants.read().await;
        for group in groups {
            for entry in group_grants.get(group).into_iter().flatten() {
                if !entries.iter().any(|e| e.product_id == entry.product_id) {
                    entries.push(entry.clone());
                }
            }
        }

        debug!(user_id = %user_id, entries = entries.len(), "Resolved static grants");
        Ok(entries)
    }

    async fn notify_context_update(
        &self,
        user_id: &UserId,
        update: &ContextUpdate,
    ) -> Result<NotifyAck, CoreError> {
        self.notifications
            .write()
            .await
            .push((user_id.clone(), update.clone()));
        Ok(NotifyAck {
            success: true,
            timestamp: Some(Utc::now().to_rfc3339()),
        })
    }
}

/// Notification sink that keeps every event it receives
#[derive(Default, Clone)]
pub struct RecordingSink {
    emitted: Arc<RwLock<Vec<ContextNotification>>>,
}

impl RecordingSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far, in emission order
    pub async fn emitted(&self) -> Vec<ContextNotification> {
        self.emitted.read().await.clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn emit(&self, notification: &ContextNotification) -> Result<(), CoreError> {
        info!(user_id = %notification.user_id, "Context update emitted");
        self.emitted.write().await.push(notification.clone());
        Ok(())
    }
}
