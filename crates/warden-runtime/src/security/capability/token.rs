//! Capability tokens
//!
//! A token grants one capability type on a resource pattern for a set of
//! operations, optionally limited in uses and lifetime. Tokens are shared as
//! `Arc<CapabilityToken>`; the usage counter is atomic and is only ever
//! incremented through [`CapabilityToken::try_consume`], which refuses before
//! incrementing once the limit is reached.

use crate::security::capability::pattern::ResourcePattern;
use crate::security::capability::CapabilityError;
use crate::security::types::CapabilityType;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// Operation name that matches every operation
pub const ANY_OPERATION: &str = "*";

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

fn next_token_id() -> String {
    format!(
        "cap-{:x}-{}",
        Utc::now().timestamp_millis(),
        NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)
    )
}

#[derive(Debug)]
pub struct CapabilityToken {
    id: String,
    capability: CapabilityType,
    pattern: ResourcePattern,
    operations: BTreeSet<String>,
    usage_count: AtomicU64,
    max_usage_count: Option<u64>,
    issued_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

/// Serializable view of a token at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSnapshot {
    pub id: String,
    pub capability: CapabilityType,
    pub pattern: String,
    pub operations: BTreeSet<String>,
    pub usage_count: u64,
    #[serde(default)]
    pub max_usage_count: Option<u64>,
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CapabilityToken {
    pub fn new<I, S>(
        capability: CapabilityType,
        pattern: &str,
        operations: I,
    ) -> Result<Self, CapabilityError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            id: next_token_id(),
            capability,
            pattern: ResourcePattern::new(pattern, capability.segment_separator())?,
            operations: operations.into_iter().map(Into::into).collect(),
            usage_count: AtomicU64::new(0),
            max_usage_count: None,
            issued_at: Utc::now(),
            expires_at: None,
        })
    }

    pub fn with_max_usage(mut self, max: u64) -> Self {
        self.max_usage_count = Some(max);
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn expires_in(self, ttl: Duration) -> Self {
        let at = self.issued_at + ttl;
        self.with_expiry(at)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn from_snapshot(snapshot: TokenSnapshot) -> Result<Self, CapabilityError> {
        Ok(Self {
            pattern: ResourcePattern::new(
                &snapshot.pattern,
                snapshot.capability.segment_separator(),
            )?,
            id: snapshot.id,
            capability: snapshot.capability,
            operations: snapshot.operations,
            usage_count: AtomicU64::new(snapshot.usage_count),
            max_usage_count: snapshot.max_usage_count,
            issued_at: snapshot.issued_at,
            expires_at: snapshot.expires_at,
        })
    }

    pub fn snapshot(&self) -> TokenSnapshot {
        TokenSnapshot {
            id: self.id.clone(),
            capability: self.capability,
            pattern: self.pattern.as_str().to_string(),
            operations: self.operations.clone(),
            usage_count: self.usage_count(),
            max_usage_count: self.max_usage_count,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn capability(&self) -> CapabilityType {
        self.capability
    }

    pub fn pattern(&self) -> &ResourcePattern {
        &self.pattern
    }

    pub fn operations(&self) -> &BTreeSet<String> {
        &self.operations
    }

    pub fn usage_count(&self) -> u64 {
        self.usage_count.load(Ordering::Acquire)
    }

    pub fn max_usage_count(&self) -> Option<u64> {
        self.max_usage_count
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_usage_count
            .is_some_and(|max| self.usage_count() >= max)
    }

    /// Uses left, `None` when unlimited
    pub fn remaining_uses(&self) -> Option<u64> {
        self.max_usage_count
            .map(|max| max.saturating_sub(self.usage_count()))
    }

    pub fn allows_operation(&self, operation: &str) -> bool {
        self.operations.contains(operation) || self.operations.contains(ANY_OPERATION)
    }

    /// Type, operation and resource match and the token has not expired
    ///
    /// Usage limits are not consulted here; exhaustion is the validator's call.
    pub fn matches(&self, capability: CapabilityType, resource: &str, operation: &str) -> bool {
        self.capability == capability
            && self.allows_operation(operation)
            && self.pattern.matches(resource)
            && !self.is_expired()
    }

    /// Record one use, returning the new count
    ///
    /// Fails without incrementing when the limit is already reached, even
    /// under concurrent callers.
    pub fn try_consume(&self) -> Result<u64, CapabilityError> {
        if self.is_expired() {
            return Err(CapabilityError::Expired {
                token_id: self.id.clone(),
            });
        }
        let mut current = self.usage_count.load(Ordering::Acquire);
        loop {
            if let Some(max) = self.max_usage_count {
                if current >= max {
                    return Err(CapabilityError::UsageLimitExceeded {
                        token_id: self.id.clone(),
                        limit: max,
                    });
                }
            }
            match self.usage_count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current + 1),
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn token() -> CapabilityToken {
        CapabilityToken::new(CapabilityType::FileRead, "/data/**", ["read"]).unwrap()
    }

    #[test]
    fn test_matches() {
        let t = token();
        assert!(t.matches(CapabilityType::FileRead, "/data/a/b.txt", "read"));
        assert!(!t.matches(CapabilityType::FileWrite, "/data/a/b.txt", "read"));
        assert!(!t.matches(CapabilityType::FileRead, "/etc/passwd", "read"));
        assert!(!t.matches(CapabilityType::FileRead, "/data/a", "write"));
    }

    #[test]
    fn test_wildcard_operation() {
        let t = CapabilityToken::new(CapabilityType::EnvRead, "*", [ANY_OPERATION]).unwrap();
        assert!(t.matches(CapabilityType::EnvRead, "HOME", "env"));
    }

    #[test]
    fn test_usage_limit() {
        let t = token().with_max_usage(2);
        assert_eq!(t.try_consume(), Ok(1));
        assert_eq!(t.try_consume(), Ok(2));
        assert!(matches!(
            t.try_consume(),
            Err(CapabilityError::UsageLimitExceeded { limit: 2, .. })
        ));
        assert_eq!(t.usage_count(), 2);
        assert_eq!(t.remaining_uses(), Some(0));
        assert!(t.is_exhausted());
    }

    #[test]
    fn test_concurrent_consumption_never_exceeds_limit() {
        let t = Arc::new(token().with_max_usage(50));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = Arc::clone(&t);
                thread::spawn(move || (0..20).filter(|_| t.try_consume().is_ok()).count())
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 50);
        assert_eq!(t.usage_count(), 50);
    }

    #[test]
    fn test_expired_token_never_matches() {
        let t = token().with_expiry(Utc::now() - Duration::seconds(1));
        assert!(t.is_expired());
        assert!(!t.matches(CapabilityType::FileRead, "/data/x", "read"));
        assert!(matches!(t.try_consume(), Err(CapabilityError::Expired { .. })));
    }

    #[test]
    fn test_snapshot_round_trip_keeps_usage() {
        let t = token().with_max_usage(3);
        t.try_consume().unwrap();
        let json = serde_json::to_string(&t.snapshot()).unwrap();
        let restored =
            CapabilityToken::from_snapshot(serde_json::from_str(&json).unwrap()).unwrap();
        assert_eq!(restored.id(), t.id());
        assert_eq!(restored.usage_count(), 1);
        assert_eq!(restored.remaining_uses(), Some(2));
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(token().id(), token().id());
    }
}
