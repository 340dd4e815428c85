//! Cache validity policy
//!
//! Decides whether a persisted context record may be served without
//! recomputation. Five checks run in a fixed order and the first failing
//! check determines the reported reason.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::context::ContextRecord;
use crate::types::EpochMillis;

/// Maximum age of a whole context (8 hours)
pub const MAX_CONTEXT_AGE: Duration = Duration::from_secs(8 * 60 * 60);
/// Maximum time since the session was last served (30 minutes)
pub const MAX_INACTIVITY: Duration = Duration::from_secs(30 * 60);
/// Maximum age of a single entitlement verification (15 minutes)
pub const MAX_VERIFICATION_AGE: Duration = Duration::from_secs(15 * 60);
/// Remaining lifetime below which a proactive refresh is forced (5 minutes)
pub const REFRESH_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Why a cached context cannot be served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidReason {
    /// No record exists for the key
    NoCacheEntry,
    /// Expiry missing or not in the future
    SessionExpired,
    /// Context computed too long ago
    ContextTooOld,
    /// Session idle too long
    SessionInactive,
    /// At least one entitlement was verified too long ago
    VerificationExpired,
    /// Inside the refresh lookahead window
    ApproachingExpiry,
}

impl InvalidReason {
    /// Caller-facing message for the reason
    pub fn message(&self) -> &'static str {
        match self {
            InvalidReason::NoCacheEntry => "No cache entry found",
            InvalidReason::SessionExpired => "Session expired",
            InvalidReason::ContextTooOld => "Context too old",
            InvalidReason::SessionInactive => "Session inactive too long",
            InvalidReason::VerificationExpired => "Product access verification expired",
            InvalidReason::ApproachingExpiry => "Approaching expiry, refresh needed",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Outcome of evaluating a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheDecision {
    /// Whether the record may be served
    pub valid: bool,
    /// The first failing check, absent when valid
    pub reason: Option<InvalidReason>,
}

impl CacheDecision {
    /// A passing decision
    pub fn valid() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    /// A failing decision
    pub fn invalid(reason: InvalidReason) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
        }
    }
}

/// Threshold set for the five validity checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheValidityPolicy {
    /// Check 2 bound
    pub max_context_age: Duration,
    /// Check 3 bound
    pub max_inactivity: Duration,
    /// Check 4 bound
    pub max_verification_age: Duration,
    /// Check 5 bound
    pub refresh_threshold: Duration,
}

impl Default for CacheValidityPolicy {
    fn default() -> Self {
        Self {
            max_context_age: MAX_CONTEXT_AGE,
            max_inactivity: MAX_INACTIVITY,
            max_verification_age: MAX_VERIFICATION_AGE,
            refresh_threshold: REFRESH_THRESHOLD,
        }
    }
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

impl CacheValidityPolicy {
    /// Evaluate `record` at `now`, short-circuiting on the first failing check
    pub fn evaluate(&self, record: &ContextRecord, now: EpochMillis) -> CacheDecision {
        let session = &record.session_info;

        // 1. session expiry
        let expires_at = match session.expires_at {
            Some(expires_at) if expires_at > now => expires_at,
            _ => return CacheDecision::invalid(InvalidReason::SessionExpired),
        };

        // 2. context age
        if now.saturating_sub(session.started_at) > millis(self.max_context_age) {
            return CacheDecision::invalid(InvalidReason::ContextTooOld);
        }

        // 3. inactivity
        if now.saturating_sub(session.last_activity) > millis(self.max_inactivity) {
            return CacheDecision::invalid(InvalidReason::SessionInactive);
        }

        // 4. per-entry staleness
        let max_verification_age = millis(self.max_verification_age);
        if record
            .product_access
            .iter()
            .any(|entry| now.saturating_sub(entry.last_verified) > max_verification_age)
        {
            return CacheDecision::invalid(InvalidReason::VerificationExpired);
        }

        // 5. refresh lookahead
        if expires_at.saturating_sub(now) < millis(self.refresh_threshold) {
            return CacheDecision::invalid(InvalidReason::ApproachingExpiry);
        }

        CacheDecision::valid()
    }
}
