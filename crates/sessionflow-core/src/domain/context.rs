//! Context record data model
//!
//! A context record is the persisted, per-user snapshot of product
//! entitlements and session timing. There is at most one live record per
//! [`ContextKey`]; writes replace the whole record.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{ttl_from_millis, EpochMillis, EpochSeconds};
use crate::CoreError;

/// Access pattern recorded when the source does not report one
pub const DEFAULT_ACCESS_PATTERN: &str = "direct";

/// Value object: opaque user identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Create a user id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identity
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of context stored under a user (the store's sort key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ContextType {
    /// Product entitlement context
    #[default]
    #[serde(rename = "product-access")]
    ProductAccess,
}

impl ContextType {
    /// Wire name of the context type
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextType::ProductAccess => "product-access",
        }
    }
}

/// Composite key of a context record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextKey {
    /// Owner of the record
    pub user_id: UserId,
    /// Kind of context
    pub context_type: ContextType,
}

impl ContextKey {
    /// Key of the product-access context for a user
    pub fn product_access(user_id: UserId) -> Self {
        Self {
            user_id,
            context_type: ContextType::ProductAccess,
        }
    }
}

/// One product entitlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessEntry {
    /// Product identifier
    pub product_id: String,
    /// Whether the user may use the product
    pub has_access: bool,
    /// Access level granted
    #[serde(default)]
    pub access_level: String,
    /// When access was granted (epoch ms)
    #[serde(default)]
    pub granted_at: EpochMillis,
    /// When the entitlement was last confirmed against the source (epoch ms)
    #[serde(default)]
    pub last_verified: EpochMillis,
    /// How the access was obtained
    #[serde(default)]
    pub access_pattern: String,
}

impl AccessEntry {
    /// Mark the entry as verified at `now`, filling a missing access pattern
    pub fn verified_at(mut self, now: EpochMillis) -> Self {
        self.last_verified = now;
        if self.access_pattern.is_empty() {
            self.access_pattern = DEFAULT_ACCESS_PATTERN.to_string();
        }
        self
    }
}

/// Basic profile information of the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BasicInfo {
    /// Email address
    #[serde(default)]
    pub email: String,
    /// Given name
    #[serde(default)]
    pub first_name: String,
    /// Family name
    #[serde(default)]
    pub last_name: String,
    /// Organisation
    #[serde(default)]
    pub organization: String,
}

/// Session timing, all epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// When the session context was computed
    pub started_at: EpochMillis,
    /// When the session context stops being usable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<EpochMillis>,
    /// Last time the context was served
    pub last_activity: EpochMillis,
}

impl SessionInfo {
    /// Session starting now and living for `lifetime_ms`
    pub fn starting_at(now: EpochMillis, lifetime_ms: i64) -> Self {
        Self {
            started_at: now,
            expires_at: Some(now + lifetime_ms),
            last_activity: now,
        }
    }

    /// Copy with `last_activity` moved to `now`
    pub fn touched(self, now: EpochMillis) -> Self {
        Self {
            last_activity: now,
            ..self
        }
    }
}

/// Persisted per-user context snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRecord {
    /// Owner of the record
    pub user_id: UserId,
    /// Kind of context
    #[serde(default)]
    pub context_type: ContextType,
    /// Entitlements, in source order
    #[serde(default)]
    pub product_access: Vec<AccessEntry>,
    /// Profile
    #[serde(default)]
    pub basic_info: BasicInfo,
    /// Session timing
    pub session_info: SessionInfo,
    /// Store expiry in epoch seconds, always `floor(expiresAt / 1000)`
    pub ttl: EpochSeconds,
    /// Last write time (epoch ms)
    #[serde(default)]
    pub updated_at: EpochMillis,
}

impl ContextRecord {
    /// Build a product-access record, deriving the TTL from the session expiry.
    ///
    /// Fails when the session has no expiry or expires before it starts.
    pub fn new(
        user_id: UserId,
        product_access: Vec<AccessEntry>,
        basic_info: BasicInfo,
        session_info: SessionInfo,
        updated_at: EpochMillis,
    ) -> Result<Self, CoreError> {
        let expires_at = session_info.expires_at.ok_or_else(|| {
            CoreError::Validation(format!("Context for {} has no expiry", user_id))
        })?;
        if expires_at < session_info.started_at {
            return Err(CoreError::Validation(format!(
                "Context for {} expires ({}) before it starts ({})",
                user_id, expires_at, session_info.started_at
            )));
        }

        Ok(Self {
            user_id,
            context_type: ContextType::ProductAccess,
            product_access,
            basic_info,
            session_info,
            ttl: ttl_from_millis(expires_at),
            updated_at,
        })
    }

    /// Store key of this record
    pub fn key(&self) -> ContextKey {
        ContextKey {
            user_id: self.user_id.clone(),
            context_type: self.context_type,
        }
    }

    /// Session expiry, if present
    pub fn expires_at(&self) -> Option<EpochMillis> {
        self.session_info.expires_at
    }

    /// Whether the store's TTL has elapsed at `now`
    pub fn is_ttl_elapsed(&self, now: EpochMillis) -> bool {
        self.ttl <= ttl_from_millis(now)
    }
}
