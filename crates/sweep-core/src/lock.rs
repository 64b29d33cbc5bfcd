//! Lock and continuation-marker coordination
//!
//! Two ephemeral keys per instance:
//! - the exclusive lock, acquired non-blocking with a TTL so a crashed
//!   holder self-heals via expiry
//! - the continuation marker, set when a run was truncated by the batch cap
//!   and carrying the remaining total-limit budget for the resumed run

use std::sync::Arc;
use std::time::Duration;

use crate::capabilities::EphemeralStore;
use crate::types::InstanceKeys;

/// Remaining total-limit budget carried by the continuation marker
///
/// `-1` means unbounded (the configured limit was `-1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemainingBudget(pub i64);

impl RemainingBudget {
    /// Whether the budget is unbounded
    #[inline]
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.0 < 0
    }

    /// Parse from the marker's stored form
    #[inline]
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        value.trim().parse::<i64>().ok().map(Self)
    }
}

impl std::fmt::Display for RemainingBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coordinates the per-instance lock and continuation marker
pub struct LockCoordinator {
    kv: Arc<dyn EphemeralStore>,
    keys: InstanceKeys,
    lock_ttl: Duration,
}

impl LockCoordinator {
    /// Create a coordinator over the instance's key namespace
    #[inline]
    #[must_use]
    pub fn new(kv: Arc<dyn EphemeralStore>, keys: InstanceKeys, lock_ttl: Duration) -> Self {
        Self { kv, keys, lock_ttl }
    }

    /// Attempt to take the exclusive lock (non-blocking, no retry)
    ///
    /// Returns `false` when another run already holds it.
    pub async fn try_acquire(&self) -> bool {
        self.kv
            .set_if_absent(self.keys.lock_key(), "1", self.lock_ttl)
            .await
    }

    /// Release the lock (idempotent)
    pub async fn release(&self) {
        self.kv.delete(self.keys.lock_key()).await;
    }

    /// Whether the lock is currently held
    pub async fn is_held(&self) -> bool {
        self.kv.get(self.keys.lock_key()).await.is_some()
    }

    /// Set the continuation marker with the remaining budget
    ///
    /// Any stale marker is replaced; the expiry must undercut the next
    /// naturally-scheduled firing so the resumed run never overlaps it.
    pub async fn mark_continuation(&self, remaining: RemainingBudget, ttl: Duration) {
        self.kv.delete(self.keys.continuation_key()).await;
        self.kv
            .set_if_absent(self.keys.continuation_key(), &remaining.to_string(), ttl)
            .await;
    }

    /// Read the pending continuation budget, if any
    pub async fn continuation(&self) -> Option<RemainingBudget> {
        self.kv
            .get(self.keys.continuation_key())
            .await
            .as_deref()
            .and_then(RemainingBudget::parse)
    }

    /// Remove the continuation marker (idempotent)
    pub async fn clear_continuation(&self) {
        self.kv.delete(self.keys.continuation_key()).await;
    }

    /// Lock TTL in force
    #[inline]
    #[must_use]
    pub fn lock_ttl(&self) -> Duration {
        self.lock_ttl
    }
}

impl std::fmt::Debug for LockCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockCoordinator")
            .field("keys", &self.keys)
            .field("lock_ttl", &self.lock_ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_parse_round_trip() {
        assert_eq!(RemainingBudget::parse("25"), Some(RemainingBudget(25)));
        assert_eq!(RemainingBudget::parse("-1"), Some(RemainingBudget(-1)));
        assert_eq!(RemainingBudget::parse("many"), None);
        assert!(RemainingBudget(-1).is_unbounded());
        assert!(!RemainingBudget(10).is_unbounded());
        assert_eq!(RemainingBudget(70).to_string(), "70");
    }
}
