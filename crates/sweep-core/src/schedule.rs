//! Recurring-timer registration for one instance
//!
//! Thin wrapper over the external timer subsystem, keyed by the instance's
//! derived event identifier.

use std::sync::Arc;

use crate::capabilities::TimerSubsystem;
use crate::error::ScheduleError;

/// Owns the recurring-timer registration for one event hook
pub struct ScheduleManager {
    timers: Arc<dyn TimerSubsystem>,
    event_hook: String,
}

impl ScheduleManager {
    /// Create a manager for the given event hook
    #[inline]
    #[must_use]
    pub fn new(timers: Arc<dyn TimerSubsystem>, event_hook: impl Into<String>) -> Self {
        Self {
            timers,
            event_hook: event_hook.into(),
        }
    }

    /// Event identifier this manager registers
    #[inline]
    #[must_use]
    pub fn event_hook(&self) -> &str {
        &self.event_hook
    }

    /// Register the recurring timer if no registration exists (idempotent)
    ///
    /// # Errors
    /// [`ScheduleError`] when the timer subsystem rejects the registration.
    pub async fn ensure_scheduled(&self, start: i64, frequency: &str) -> Result<(), ScheduleError> {
        if self.timers.next_fire_time(&self.event_hook).await.is_some() {
            tracing::debug!(event = %self.event_hook, "timer already registered");
            return Ok(());
        }
        tracing::debug!(event = %self.event_hook, start, frequency, "registering timer");
        self.timers.schedule(&self.event_hook, start, frequency).await
    }

    /// Clear any existing registration and register afresh
    ///
    /// # Errors
    /// [`ScheduleError`] when the timer subsystem rejects the registration.
    pub async fn reschedule(&self, start: i64, frequency: &str) -> Result<(), ScheduleError> {
        self.timers.clear(&self.event_hook).await;
        tracing::debug!(event = %self.event_hook, start, frequency, "re-registering timer");
        self.timers.schedule(&self.event_hook, start, frequency).await
    }

    /// Remove the registration unconditionally
    pub async fn clear(&self) {
        tracing::debug!(event = %self.event_hook, "clearing timer registration");
        self.timers.clear(&self.event_hook).await;
    }

    /// Next scheduled firing, if registered
    pub async fn next_fire_time(&self) -> Option<i64> {
        self.timers.next_fire_time(&self.event_hook).await
    }
}

impl std::fmt::Debug for ScheduleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleManager")
            .field("event_hook", &self.event_hook)
            .finish_non_exhaustive()
    }
}
