//! Step handlers of the context workflow
//!
//! Each handler is independently invocable: one serialisable input, one
//! serialisable output, no state kept between calls. Errors are returned to
//! the caller untouched so the workflow engine can fail or retry the step.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::orchestrator::State;
use crate::domain::context::{
    AccessEntry, BasicInfo, ContextKey, ContextRecord, SessionInfo, UserId,
};
use crate::domain::policy::{CacheValidityPolicy, InvalidReason};
use crate::domain::repository::{
    AccessSource, ContextNotification, ContextStore, ContextUpdate, NotificationSink,
    TokenVerifier,
};
use crate::types::{ttl_from_millis, Clock, EpochMillis, EpochSeconds};
use crate::CoreError;

/// Lifetime of a freshly fetched context (8 hours)
pub const DEFAULT_CONTEXT_LIFETIME: Duration = Duration::from_secs(8 * 60 * 60);

/// A single unit of work in the context workflow
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Step input
    type Input: DeserializeOwned + Send + 'static;
    /// Step output
    type Output: Serialize + Send + 'static;

    /// State this handler implements
    fn state(&self) -> State;

    /// Run the step
    async fn handle(&self, input: Self::Input) -> Result<Self::Output, CoreError>;
}

/// Input of `ValidateToken`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateTokenInput {
    /// Raw bearer token
    #[serde(default)]
    pub token: String,
}

/// Verified caller identity, output of `ValidateToken`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Token subject
    pub user_id: UserId,
    /// Email address
    #[serde(default)]
    pub email: String,
    /// Group memberships
    #[serde(default)]
    pub groups: Vec<String>,
    /// Profile assembled from token claims
    #[serde(default)]
    pub basic_info: BasicInfo,
}

/// Cached context served on a valid hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedContext {
    /// Entitlements
    pub product_access: Vec<AccessEntry>,
    /// Profile
    pub basic_info: BasicInfo,
    /// Session timing with `lastActivity` moved to now
    pub session_info: SessionInfo,
}

/// Output of `CheckCache`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheCheckOutput {
    /// Whether the cached context may be served
    pub cache_valid: bool,
    /// Caller identity, carried to the refresh branch
    #[serde(flatten)]
    pub identity: Identity,
    /// Cached context on a valid hit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_data: Option<CachedContext>,
    /// Reason the cache was not served
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CacheCheckOutput {
    fn miss(identity: Identity, reason: InvalidReason) -> Self {
        Self {
            cache_valid: false,
            identity,
            cached_data: None,
            reason: Some(reason.message().to_string()),
        }
    }

    /// The non-fatal error describing why the cache was not served
    pub fn as_error(&self) -> Option<CoreError> {
        if self.cache_valid {
            return None;
        }
        let reason = self.reason.clone().unwrap_or_default();
        let user = self.identity.user_id.as_str();
        Some(if reason == InvalidReason::NoCacheEntry.message() {
            CoreError::CacheMiss(user.to_string())
        } else {
            CoreError::CacheInvalid(format!("{}: {}", user, reason))
        })
    }
}

/// Output of `FetchProductAccess`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedContext {
    /// Owner of the context
    pub user_id: UserId,
    /// Freshly verified entitlements
    pub product_access: Vec<AccessEntry>,
    /// Profile
    #[serde(default)]
    pub basic_info: BasicInfo,
    /// When the source was queried
    pub fetched_at: EpochMillis,
    /// Session expiry, `fetchedAt` plus the context lifetime
    pub expires_at: EpochMillis,
    /// Store TTL in epoch seconds
    pub ttl: EpochSeconds,
}

/// Input of `UpdateContext`: either branch of `IsCacheValid`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpdateContextInput {
    /// Refresh branch
    Fetched(FetchedContext),
    /// Valid-cache branch
    Cached(CacheCheckOutput),
}

/// Output of `UpdateContext`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateContextOutput {
    /// Owner of the context
    pub user_id: UserId,
    /// Always true on success
    pub context_updated: bool,
    /// Persisted entitlements
    pub product_access: Vec<AccessEntry>,
    /// Persisted session expiry
    pub expires_at: EpochMillis,
}

/// `ValidateToken`: bearer token to verified identity
pub struct ValidateTokenStep {
    verifier: Arc<dyn TokenVerifier>,
}

impl ValidateTokenStep {
    /// Create the step
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { verifier }
    }
}

#[async_trait]
impl StepHandler for ValidateTokenStep {
    type Input = ValidateTokenInput;
    type Output = Identity;

    fn state(&self) -> State {
        State::ValidateToken
    }

    async fn handle(&self, input: ValidateTokenInput) -> Result<Identity, CoreError> {
        let token = input.token.trim();
        if token.is_empty() {
            return Err(CoreError::Authentication("Missing token".to_string()));
        }

        let claims = self.verifier.verify(token).await.map_err(|err| {
            warn!(error = %err, "Token validation failed");
            err
        })?;
        if claims.subject.is_empty() {
            return Err(CoreError::Authentication("Token has no subject".to_string()));
        }

        info!(user_id = %claims.subject, groups = claims.groups.len(), "Token validated");
        Ok(Identity {
            user_id: UserId::new(claims.subject),
            basic_info: BasicInfo {
                email: claims.email.clone(),
                first_name: claims.given_name.unwrap_or_default(),
                last_name: claims.family_name.unwrap_or_default(),
                organization: claims.organization.unwrap_or_default(),
            },
            email: claims.email,
            groups: claims.groups,
        })
    }
}

/// `CheckCache`: read the stored context and apply the validity policy
pub struct CheckCacheStep {
    store: Arc<dyn ContextStore>,
    policy: CacheValidityPolicy,
    clock: Arc<dyn Clock>,
}

impl CheckCacheStep {
    /// Create the step
    pub fn new(store: Arc<dyn ContextStore>, policy: CacheValidityPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { store, policy, clock }
    }
}

#[async_trait]
impl StepHandler for CheckCacheStep {
    type Input = Identity;
    type Output = CacheCheckOutput;

    fn state(&self) -> State {
        State::CheckCache
    }

    async fn handle(&self, identity: Identity) -> Result<CacheCheckOutput, CoreError> {
        let now = self.clock.now_millis();
        let key = ContextKey::product_access(identity.user_id.clone());

        let record = match self.store.get(&key).await? {
            Some(record) => record,
            None => {
                debug!(user_id = %identity.user_id, "No cached context");
                return Ok(CacheCheckOutput::miss(identity, InvalidReason::NoCacheEntry));
            }
        };

        let decision = self.policy.evaluate(&record, now);
        if let Some(reason) = decision.reason {
            info!(user_id = %identity.user_id, reason = %reason, "Cached context rejected");
            return Ok(CacheCheckOutput::miss(identity, reason));
        }

        // Touch-up is a separate, non-transactional write; a lost update only
        // loosens the inactivity check.
        let touched = ContextRecord {
            session_info: record.session_info.touched(now),
            ..record
        };
        self.store.put(&touched).await?;

        info!(user_id = %identity.user_id, "Serving cached context");
        Ok(CacheCheckOutput {
            cache_valid: true,
            identity,
            cached_data: Some(CachedContext {
                product_access: touched.product_access,
                basic_info: touched.basic_info,
                session_info: touched.session_info,
            }),
            reason: None,
        })
    }
}

/// `FetchProductAccess`: recompute the context from the access source
pub struct FetchProductAccessStep {
    source: Arc<dyn AccessSource>,
    clock: Arc<dyn Clock>,
    context_lifetime: Duration,
}

impl FetchProductAccessStep {
    /// Create the step
    pub fn new(source: Arc<dyn AccessSource>, clock: Arc<dyn Clock>, context_lifetime: Duration) -> Self {
        Self {
            source,
            clock,
            context_lifetime,
        }
    }
}

#[async_trait]
impl StepHandler for FetchProductAccessStep {
    type Input = Identity;
    type Output = FetchedContext;

    fn state(&self) -> State {
        State::FetchProductAccess
    }

    async fn handle(&self, identity: Identity) -> Result<FetchedContext, CoreError> {
        let entries = self
            .source
            .query_product_access(&identity.user_id, &identity.groups)
            .await?;

        let now = self.clock.now_millis();
        let lifetime = i64::try_from(self.context_lifetime.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now.saturating_add(lifetime);
        let product_access: Vec<AccessEntry> =
            entries.into_iter().map(|entry| entry.verified_at(now)).collect();

        info!(
            user_id = %identity.user_id,
            entries = product_access.len(),
            expires_at,
            "Fetched product access"
        );
        Ok(FetchedContext {
            user_id: identity.user_id,
            product_access,
            basic_info: identity.basic_info,
            fetched_at: now,
            expires_at,
            ttl: ttl_from_millis(expires_at),
        })
    }
}

/// `UpdateContext`: persist the context and notify subscribers
pub struct UpdateContextStep {
    store: Arc<dyn ContextStore>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
}

impl UpdateContextStep {
    /// Create the step
    pub fn new(store: Arc<dyn ContextStore>, sink: Arc<dyn NotificationSink>, clock: Arc<dyn Clock>) -> Self {
        Self { store, sink, clock }
    }

    fn build_record(&self, input: UpdateContextInput, now: EpochMillis) -> Result<ContextRecord, CoreError> {
        match input {
            UpdateContextInput::Fetched(fetched) => ContextRecord::new(
                fetched.user_id,
                fetched.product_access,
                fetched.basic_info,
                SessionInfo {
                    started_at: fetched.fetched_at,
                    expires_at: Some(fetched.expires_at),
                    last_activity: fetched.fetched_at,
                },
                now,
            ),
            UpdateContextInput::Cached(check) => {
                let cached = match (check.cache_valid, check.cached_data) {
                    (true, Some(cached)) => cached,
                    _ => {
                        return Err(CoreError::Validation(format!(
                            "No valid cached context for {}",
                            check.identity.user_id
                        )))
                    }
                };
                ContextRecord::new(
                    check.identity.user_id,
                    cached.product_access,
                    cached.basic_info,
                    cached.session_info,
                    now,
                )
            }
        }
    }
}

#[async_trait]
impl StepHandler for UpdateContextStep {
    type Input = UpdateContextInput;
    type Output = UpdateContextOutput;

    fn state(&self) -> State {
        State::UpdateContext
    }

    async fn handle(&self, input: UpdateContextInput) -> Result<UpdateContextOutput, CoreError> {
        let now = self.clock.now_millis();
        let record = self.build_record(input, now)?;
        let expires_at = record.expires_at().unwrap_or(record.session_info.started_at);

        self.store.put(&record).await?;

        let notification = ContextNotification {
            user_id: record.user_id.clone(),
            update: ContextUpdate::context_updated(&record.product_access),
            emitted_at: now,
        };
        self.sink.emit(&notification).await?;

        info!(user_id = %record.user_id, expires_at, "Context updated");
        Ok(UpdateContextOutput {
            user_id: record.user_id,
            context_updated: true,
            product_access: record.product_access,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::{NotifyAck, TokenClaims};
    use crate::types::FixedClock;
    use mockall::mock;
    use mockall::predicate::always;
    use serde_json::json;

    mock! {
        pub Verifier {}
        #[async_trait]
        impl TokenVerifier for Verifier {
            async fn verify(&self, token: &str) -> Result<TokenClaims, CoreError>;
        }
    }

    mock! {
        pub Store {}
        #[async_trait]
        impl ContextStore for Store {
            async fn get(&self, key: &ContextKey) -> Result<Option<ContextRecord>, CoreError>;
            async fn put(&self, record: &ContextRecord) -> Result<(), CoreError>;
        }
    }

    mock! {
        pub Source {}
        #[async_trait]
        impl AccessSource for Source {
            async fn query_product_access(&self, user_id: &UserId, groups: &[String]) -> Result<Vec<AccessEntry>, CoreError>;
            async fn notify_context_update(&self, user_id: &UserId, update: &ContextUpdate) -> Result<NotifyAck, CoreError>;
        }
    }

    mock! {
        pub Sink {}
        #[async_trait]
        impl NotificationSink for Sink {
            async fn emit(&self, notification: &ContextNotification) -> Result<(), CoreError>;
        }
    }

    const NOW: EpochMillis = 1_700_000_000_000;

    fn identity() -> Identity {
        Identity {
            user_id: UserId::new("user-1"),
            email: "user@example.com".to_string(),
            groups: vec!["analysts".to_string()],
            basic_info: BasicInfo {
                email: "user@example.com".to_string(),
                ..Default::default()
            },
        }
    }

    fn fresh_record() -> ContextRecord {
        ContextRecord::new(
            UserId::new("user-1"),
            vec![AccessEntry {
                product_id: "p1".to_string(),
                has_access: true,
                access_level: "read".to_string(),
                granted_at: NOW - 1_000,
                last_verified: NOW - 60_000,
                access_pattern: "group".to_string(),
            }],
            BasicInfo::default(),
            SessionInfo {
                started_at: NOW - 600_000,
                expires_at: Some(NOW + 3_600_000),
                last_activity: NOW - 120_000,
            },
            NOW - 600_000,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_validate_token_maps_claims() {
        let mut verifier = MockVerifier::new();
        verifier.expect_verify().returning(|_| {
            Ok(TokenClaims {
                subject: "user-1".to_string(),
                email: "user@example.com".to_string(),
                groups: vec!["g1".to_string()],
                given_name: Some("Ada".to_string()),
                family_name: None,
                organization: Some("Acme".to_string()),
            })
        });

        let step = ValidateTokenStep::new(Arc::new(verifier));
        let identity = step
            .handle(ValidateTokenInput {
                token: "abc".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(identity.user_id, UserId::new("user-1"));
        assert_eq!(identity.groups, vec!["g1".to_string()]);
        assert_eq!(identity.basic_info.first_name, "Ada");
        assert_eq!(identity.basic_info.organization, "Acme");
        assert_eq!(identity.basic_info.email, "user@example.com");
    }

    #[tokio::test]
    async fn test_validate_token_rejects_empty_token() {
        let mut verifier = MockVerifier::new();
        verifier.expect_verify().never();
        let step = ValidateTokenStep::new(Arc::new(verifier));

        let err = step
            .handle(ValidateTokenInput {
                token: "  ".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_validate_token_propagates_issuer_rejection() {
        let mut verifier = MockVerifier::new();
        verifier
            .expect_verify()
            .returning(|_| Err(CoreError::Authentication("expired".to_string())));
        let step = ValidateTokenStep::new(Arc::new(verifier));

        let err = step
            .handle(ValidateTokenInput {
                token: "stale".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::Authentication("expired".to_string()));
    }

    #[tokio::test]
    async fn test_check_cache_absent_record() {
        let mut store = MockStore::new();
        store.expect_get().returning(|_| Ok(None));
        store.expect_put().never();

        let step = CheckCacheStep::new(
            Arc::new(store),
            CacheValidityPolicy::default(),
            Arc::new(FixedClock::new(NOW)),
        );
        let output = step.handle(identity()).await.unwrap();

        assert!(!output.cache_valid);
        assert_eq!(output.reason.as_deref(), Some("No cache entry found"));
        assert!(output.cached_data.is_none());
        assert!(matches!(output.as_error(), Some(CoreError::CacheMiss(_))));
    }

    #[tokio::test]
    async fn test_check_cache_valid_hit_touches_activity() {
        let mut store = MockStore::new();
        store.expect_get().returning(|_| Ok(Some(fresh_record())));
        store
            .expect_put()
            .withf(|record| record.session_info.last_activity == NOW)
            .times(1)
            .returning(|_| Ok(()));

        let step = CheckCacheStep::new(
            Arc::new(store),
            CacheValidityPolicy::default(),
            Arc::new(FixedClock::new(NOW)),
        );
        let output = step.handle(identity()).await.unwrap();

        assert!(output.cache_valid);
        assert!(output.reason.is_none());
        assert!(output.as_error().is_none());
        let cached = output.cached_data.unwrap();
        assert_eq!(cached.session_info.last_activity, NOW);
        assert_eq!(cached.session_info.started_at, NOW - 600_000);
    }

    #[tokio::test]
    async fn test_check_cache_invalid_record_reports_reason() {
        let mut store = MockStore::new();
        store.expect_get().returning(|_| {
            let mut record = fresh_record();
            record.product_access[0].last_verified = NOW - 16 * 60_000;
            Ok(Some(record))
        });
        store.expect_put().never();

        let step = CheckCacheStep::new(
            Arc::new(store),
            CacheValidityPolicy::default(),
            Arc::new(FixedClock::new(NOW)),
        );
        let output = step.handle(identity()).await.unwrap();

        assert!(!output.cache_valid);
        assert_eq!(
            output.reason.as_deref(),
            Some("Product access verification expired")
        );
        assert!(matches!(output.as_error(), Some(CoreError::CacheInvalid(_))));
    }

    #[tokio::test]
    async fn test_check_cache_store_failure_propagates() {
        let mut store = MockStore::new();
        store
            .expect_get()
            .returning(|_| Err(CoreError::Persistence("unreachable".to_string())));

        let step = CheckCacheStep::new(
            Arc::new(store),
            CacheValidityPolicy::default(),
            Arc::new(FixedClock::new(NOW)),
        );
        let err = step.handle(identity()).await.unwrap_err();
        assert!(matches!(err, CoreError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_fetch_product_access_computes_expiry() {
        let mut source = MockSource::new();
        source
            .expect_query_product_access()
            .withf(|user, groups| user.as_str() == "user-1" && groups == ["analysts".to_string()])
            .returning(|_, _| {
                Ok(vec![AccessEntry {
                    product_id: "p1".to_string(),
                    has_access: true,
                    access_level: "read".to_string(),
                    granted_at: 5,
                    last_verified: 0,
                    access_pattern: String::new(),
                }])
            });

        let step = FetchProductAccessStep::new(
            Arc::new(source),
            Arc::new(FixedClock::new(NOW + 999)),
            DEFAULT_CONTEXT_LIFETIME,
        );
        let fetched = step.handle(identity()).await.unwrap();

        let expected_expiry = NOW + 999 + 8 * 60 * 60 * 1000;
        assert_eq!(fetched.expires_at, expected_expiry);
        assert_eq!(fetched.ttl, expected_expiry / 1000);
        assert_eq!(fetched.product_access[0].last_verified, NOW + 999);
        assert_eq!(fetched.product_access[0].access_pattern, "direct");
    }

    #[tokio::test]
    async fn test_fetch_product_access_error_is_terminal() {
        let mut source = MockSource::new();
        source
            .expect_query_product_access()
            .returning(|_, _| Err(CoreError::AccessSource("GraphQL query failed".to_string())));

        let step = FetchProductAccessStep::new(
            Arc::new(source),
            Arc::new(FixedClock::new(NOW)),
            DEFAULT_CONTEXT_LIFETIME,
        );
        let err = step.handle(identity()).await.unwrap_err();
        assert!(matches!(err, CoreError::AccessSource(_)));
    }

    #[tokio::test]
    async fn test_update_context_persists_and_notifies() {
        let mut store = MockStore::new();
        store
            .expect_put()
            .withf(|record| record.ttl == record.session_info.expires_at.unwrap() / 1000)
            .times(1)
            .returning(|_| Ok(()));
        let mut sink = MockSink::new();
        sink.expect_emit()
            .withf(|n| n.update.update_type == "CONTEXT_UPDATED" && n.update.product_access.len() == 1)
            .times(1)
            .returning(|_| Ok(()));

        let step = UpdateContextStep::new(Arc::new(store), Arc::new(sink), Arc::new(FixedClock::new(NOW)));
        let input = UpdateContextInput::Fetched(FetchedContext {
            user_id: UserId::new("user-1"),
            product_access: fresh_record().product_access,
            basic_info: BasicInfo::default(),
            fetched_at: NOW,
            expires_at: NOW + 28_800_000,
            ttl: (NOW + 28_800_000) / 1000,
        });
        let output = step.handle(input).await.unwrap();

        assert!(output.context_updated);
        assert_eq!(output.expires_at, NOW + 28_800_000);
        assert_eq!(output.product_access.len(), 1);
    }

    #[tokio::test]
    async fn test_update_context_store_failure_skips_notification() {
        let mut store = MockStore::new();
        store
            .expect_put()
            .returning(|_| Err(CoreError::Persistence("write failed".to_string())));
        let mut sink = MockSink::new();
        sink.expect_emit().with(always()).never();

        let step = UpdateContextStep::new(Arc::new(store), Arc::new(sink), Arc::new(FixedClock::new(NOW)));
        let input = UpdateContextInput::Fetched(FetchedContext {
            user_id: UserId::new("user-1"),
            product_access: vec![],
            basic_info: BasicInfo::default(),
            fetched_at: NOW,
            expires_at: NOW + 1_000,
            ttl: (NOW + 1_000) / 1000,
        });
        let err = step.handle(input).await.unwrap_err();
        assert!(matches!(err, CoreError::Persistence(_)));
    }

    #[test]
    fn test_update_input_accepts_both_branches() {
        let fetched: UpdateContextInput = serde_json::from_value(json!({
            "userId": "u1",
            "productAccess": [],
            "fetchedAt": 1,
            "expiresAt": 2,
            "ttl": 0
        }))
        .unwrap();
        assert!(matches!(fetched, UpdateContextInput::Fetched(_)));

        let cached: UpdateContextInput = serde_json::from_value(json!({
            "cacheValid": true,
            "userId": "u1",
            "email": "u1@example.com",
            "groups": [],
            "cachedData": {
                "productAccess": [],
                "basicInfo": {},
                "sessionInfo": {"startedAt": 1, "expiresAt": 5000, "lastActivity": 2}
            }
        }))
        .unwrap();
        assert!(matches!(cached, UpdateContextInput::Cached(_)));
    }

    #[tokio::test]
    async fn test_update_context_rejects_invalid_cached_branch() {
        let mut store = MockStore::new();
        store.expect_put().never();
        let mut sink = MockSink::new();
        sink.expect_emit().never();

        let step = UpdateContextStep::new(Arc::new(store), Arc::new(sink), Arc::new(FixedClock::new(NOW)));
        let input = UpdateContextInput::Cached(CacheCheckOutput::miss(identity(), InvalidReason::SessionExpired));
        let err = step.handle(input).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
