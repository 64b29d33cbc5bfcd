//! Capability interfaces consumed by the engine
//!
//! The engine owns no storage, timers, or transport of its own. Everything
//! external is a trait object handed in at construction:
//! - Order store (query by status and age, transition status)
//! - Timer subsystem (recurring registrations)
//! - Ephemeral key-value store (lock and continuation markers)
//! - Event bus (post-transition notifications)
//! - Transition gate (per-order veto hook)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::diagnostics::{DiagnosticsSink, TracingSink};
use crate::error::{ScheduleError, StoreError};
use crate::types::{SinceField, TransitionEvent};

/// Default exclusive-lock TTL, the host-max-execution fallback
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(180);

/// Query sent to the order store
#[derive(Debug, Clone, PartialEq)]
pub struct OrderQuery {
    /// Statuses eligible for transition
    pub statuses: Vec<String>,
    /// Maximum number of orders to return
    pub limit: usize,
    /// Timestamp field compared against the cutoff
    pub since: SinceField,
    /// Inclusive cutoff (unix seconds); orders at or before it match
    pub cutoff: i64,
}

/// A single order as seen by the engine
#[async_trait]
pub trait Order: Send + Sync {
    /// Order identifier
    fn id(&self) -> String;

    /// Current status
    fn status(&self) -> String;

    /// Transition to a new status with an audit note
    async fn update_status(&self, new_status: &str, note: &str) -> Result<(), StoreError>;
}

/// The external record store
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Whether the backing record system is active
    ///
    /// An inactive store is configuration-fatal at instance construction.
    fn is_active(&self) -> bool {
        true
    }

    /// Fetch orders matching the query, in store order, capped at `limit`
    async fn query(&self, query: OrderQuery) -> Result<Vec<Arc<dyn Order>>, StoreError>;
}

/// The external recurring-timer subsystem
#[async_trait]
pub trait TimerSubsystem: Send + Sync {
    /// Next scheduled firing for the event, if registered
    async fn next_fire_time(&self, event: &str) -> Option<i64>;

    /// Register a recurring timer
    async fn schedule(&self, event: &str, start: i64, frequency: &str)
        -> Result<(), ScheduleError>;

    /// Remove any registration for the event
    async fn clear(&self, event: &str);

    /// Interval names this subsystem recognizes
    fn known_intervals(&self) -> Vec<String>;
}

/// The external ephemeral key-value store
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Set a key only if absent, with an expiry; returns whether it was set
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> bool;

    /// Read a key if present and unexpired
    async fn get(&self, key: &str) -> Option<String>;

    /// Delete a key (idempotent)
    async fn delete(&self, key: &str);
}

/// The external notification bus
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a post-transition event for external subscribers
    async fn publish(&self, event: &str, payload: TransitionEvent);
}

/// Veto hook consulted before each transition
#[async_trait]
pub trait TransitionGate: Send + Sync {
    /// Return `true` to skip this order
    async fn should_skip(
        &self,
        order: &dyn Order,
        previous_status: &str,
        new_status: &str,
        days: u32,
    ) -> bool;
}

/// Wall-clock seam (unix seconds)
pub trait Clock: Send + Sync {
    /// Current unix timestamp
    fn now(&self) -> i64;
}

/// System wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Aggregate of the external collaborators one instance consumes
#[derive(Clone)]
pub struct Capabilities {
    /// Order store
    pub store: Arc<dyn OrderStore>,
    /// Timer subsystem
    pub timers: Arc<dyn TimerSubsystem>,
    /// Ephemeral key-value store
    pub kv: Arc<dyn EphemeralStore>,
    /// Notification bus
    pub bus: Arc<dyn EventBus>,
    /// Optional per-order veto hook
    pub gate: Option<Arc<dyn TransitionGate>>,
    /// Wall clock
    pub clock: Arc<dyn Clock>,
    /// Diagnostics sink
    pub sink: Arc<dyn DiagnosticsSink>,
    /// Exclusive-lock TTL
    pub lock_ttl: Duration,
}

impl Capabilities {
    /// Assemble the required capabilities with default clock, sink and TTL
    #[inline]
    #[must_use]
    pub fn new(
        store: Arc<dyn OrderStore>,
        timers: Arc<dyn TimerSubsystem>,
        kv: Arc<dyn EphemeralStore>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            store,
            timers,
            kv,
            bus,
            gate: None,
            clock: Arc::new(SystemClock),
            sink: Arc::new(TracingSink::default()),
            lock_ttl: DEFAULT_LOCK_TTL,
        }
    }

    /// With a transition veto hook
    #[inline]
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<dyn TransitionGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// With a custom clock
    #[inline]
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// With a custom diagnostics sink
    #[inline]
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// With a custom lock TTL
    #[inline]
    #[must_use]
    pub fn with_lock_ttl(mut self, lock_ttl: Duration) -> Self {
        self.lock_ttl = lock_ttl;
        self
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("gate", &self.gate.is_some())
            .field("lock_ttl", &self.lock_ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let now = clock.now();
        assert!(now > 1_600_000_000);
    }

    #[test]
    fn default_lock_ttl_is_host_max_fallback() {
        assert_eq!(DEFAULT_LOCK_TTL, Duration::from_secs(180));
    }
}
