//! The public sweeper instance
//!
//! Composes validator, schedule manager, lock coordinator and batch runner,
//! exposes validated property access, and owns the lifecycle operations
//! (trigger, execute, clear). A configuration-fatal construction failure
//! either raises or, when exception-blocking is enabled, yields an
//! invalidated instance whose every public operation is a guarded no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::capabilities::Capabilities;
use crate::diagnostics::Diagnostics;
use crate::error::SweepError;
use crate::lock::LockCoordinator;
use crate::runner::{BatchRunner, RunOutcome, RunReport};
use crate::schedule::ScheduleManager;
use crate::settings::SettingsValidator;
use crate::types::{InstanceKeys, Setting, SettingValue, SinceField, SweepConfig};

/// Depth of the deferred-trigger queue; triggers beyond it coalesce
const TRIGGER_QUEUE_DEPTH: usize = 8;

/// Lifecycle state tag checked at the top of every public operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Active,
    Invalidated,
}

/// One configured sweeper
///
/// Construction validates the full configuration; afterwards the external
/// timer fires [`Sweeper::update_orders`], which only enqueues a deferred
/// trigger — the heavy work happens in [`Sweeper::really_update_orders`],
/// reached through [`Sweeper::run_pending`] or the spawned worker.
pub struct Sweeper {
    keys: InstanceKeys,
    config: RwLock<SweepConfig>,
    validator: SettingsValidator,
    diagnostics: Diagnostics,
    lock: Arc<LockCoordinator>,
    schedule: Arc<ScheduleManager>,
    runner: BatchRunner,
    state: State,
    trigger_tx: mpsc::Sender<()>,
    trigger_rx: AsyncMutex<mpsc::Receiver<()>>,
    shutdown: AtomicBool,
}

impl Sweeper {
    /// Construct an instance from defaults overlaid with overrides
    ///
    /// Overrides are routed through the per-field validator in submission
    /// order, so cross-validating fields see the latest prior value of the
    /// other. On success the recurring timer is registered and, if a
    /// continuation marker is pending from before a restart, one deferred
    /// trigger is enqueued (drain-on-boot).
    ///
    /// # Errors
    /// Accumulated validation failures, an inactive order store, or a timer
    /// registration failure — unless `block_exceptions` was validly set, in
    /// which case the instance is returned invalidated instead.
    pub async fn new(
        slug: impl Into<String>,
        overrides: Vec<(Setting, SettingValue)>,
        caps: Capabilities,
    ) -> Result<Self, SweepError> {
        let slug = slug.into();
        let keys = InstanceKeys::derive(&slug);
        let diagnostics = Diagnostics::new(caps.sink.clone(), slug.clone());
        let validator = SettingsValidator::new(caps.timers.known_intervals(), caps.clock.clone());

        let mut config = SweepConfig::new(slug.clone());
        let applied = validator.apply_all(&mut config, overrides, &diagnostics);
        diagnostics.set_hidden(config.hide_notices);

        let mut fatal: Option<SweepError> = None;
        if !caps.store.is_active() {
            fatal = Some(SweepError::StoreUnavailable);
        } else if !applied.is_clean() {
            fatal = Some(SweepError::InvalidConfiguration(applied.failures));
        }

        let lock = Arc::new(LockCoordinator::new(
            caps.kv.clone(),
            keys.clone(),
            caps.lock_ttl,
        ));
        let schedule = Arc::new(ScheduleManager::new(caps.timers.clone(), keys.event_hook()));

        let mut boot_trigger = false;
        if fatal.is_none() {
            match schedule.ensure_scheduled(config.start, &config.frequency).await {
                Ok(()) => {
                    // Drain-on-boot: a continuation pending across a restart
                    // resumes once instead of waiting for the next tick.
                    boot_trigger = lock.continuation().await.is_some();
                }
                Err(err) => fatal = Some(err.into()),
            }
        }

        let state = match fatal {
            None => State::Active,
            Some(err) => {
                if config.block_exceptions {
                    diagnostics.report(&format!("instance disabled: {err}"));
                    State::Invalidated
                } else {
                    return Err(err);
                }
            }
        };

        let runner = BatchRunner::new(
            caps,
            keys.clone(),
            lock.clone(),
            schedule.clone(),
            diagnostics.clone(),
        );
        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_QUEUE_DEPTH);

        let sweeper = Self {
            keys,
            config: RwLock::new(config),
            validator,
            diagnostics,
            lock,
            schedule,
            runner,
            state,
            trigger_tx,
            trigger_rx: AsyncMutex::new(trigger_rx),
            shutdown: AtomicBool::new(false),
        };

        if boot_trigger {
            tracing::debug!(slug = %sweeper.slug(), "continuation pending, enqueueing boot trigger");
            sweeper.update_orders();
        }

        Ok(sweeper)
    }

    /// Instance identifier (available even when invalidated, for logging)
    #[inline]
    #[must_use]
    pub fn slug(&self) -> String {
        self.config.read().slug.clone()
    }

    /// Whether the instance was disabled by a construction failure
    #[inline]
    #[must_use]
    pub fn is_invalidated(&self) -> bool {
        self.state == State::Invalidated
    }

    /// Derived event identifier, or `None` when invalidated
    #[inline]
    #[must_use]
    pub fn event_hook(&self) -> Option<&str> {
        self.guard()?;
        Some(self.keys.event_hook())
    }

    /// Derived key namespace, or `None` when invalidated
    #[inline]
    #[must_use]
    pub fn keys(&self) -> Option<&InstanceKeys> {
        self.guard()?;
        Some(&self.keys)
    }

    /// Snapshot of the current configuration, or `None` when invalidated
    #[inline]
    #[must_use]
    pub fn config(&self) -> Option<SweepConfig> {
        self.guard()?;
        Some(self.config.read().clone())
    }

    /// Age threshold in days
    #[inline]
    #[must_use]
    pub fn days(&self) -> Option<u32> {
        self.guard()?;
        Some(self.config.read().days)
    }

    /// Timestamp field the threshold compares against
    #[inline]
    #[must_use]
    pub fn since(&self) -> Option<SinceField> {
        self.guard()?;
        Some(self.config.read().since)
    }

    /// Statuses eligible for transition
    #[inline]
    #[must_use]
    pub fn target_statuses(&self) -> Option<Vec<String>> {
        self.guard()?;
        Some(self.config.read().target_statuses.clone())
    }

    /// Status applied by the transition
    #[inline]
    #[must_use]
    pub fn new_status(&self) -> Option<String> {
        self.guard()?;
        Some(self.config.read().new_status.clone())
    }

    /// Total records considered per logical run
    #[inline]
    #[must_use]
    pub fn limit(&self) -> Option<i64> {
        self.guard()?;
        Some(self.config.read().limit)
    }

    /// Recurring interval name
    #[inline]
    #[must_use]
    pub fn frequency(&self) -> Option<String> {
        self.guard()?;
        Some(self.config.read().frequency.clone())
    }

    /// First/next scheduled firing
    #[inline]
    #[must_use]
    pub fn start(&self) -> Option<i64> {
        self.guard()?;
        Some(self.config.read().start)
    }

    /// Whether user-visible notices are suppressed
    #[inline]
    #[must_use]
    pub fn hide_notices(&self) -> Option<bool> {
        self.guard()?;
        Some(self.config.read().hide_notices)
    }

    /// Whether configuration errors are swallowed
    #[inline]
    #[must_use]
    pub fn block_exceptions(&self) -> Option<bool> {
        self.guard()?;
        Some(self.config.read().block_exceptions)
    }

    /// Validated mutation of one configuration field
    ///
    /// A successful `frequency` or `start` update rebuilds the timer
    /// registration. Validation failures propagate to the caller unless
    /// `block_exceptions` is set, in which case they are swallowed after the
    /// diagnostic. A no-op when invalidated.
    ///
    /// # Errors
    /// The field's [`crate::ValidationError`] wrapped in [`SweepError`], or a
    /// schedule registration failure.
    pub async fn update(&self, setting: Setting, value: SettingValue) -> Result<(), SweepError> {
        if self.guard().is_none() {
            return Ok(());
        }

        // Validate under the write guard; the async reschedule happens after
        // the guard is dropped.
        let outcome = {
            let mut config = self.config.write();
            match self
                .validator
                .apply(&mut config, setting, value, &self.diagnostics)
            {
                Ok(applied) => {
                    if setting == Setting::HideNotices {
                        self.diagnostics.set_hidden(config.hide_notices);
                    }
                    Ok((applied.needs_reschedule, config.start, config.frequency.clone()))
                }
                Err(err) => Err((err, config.block_exceptions)),
            }
        };

        match outcome {
            Ok((true, start, frequency)) => {
                match self.schedule.reschedule(start, &frequency).await {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        if self.config.read().block_exceptions {
                            self.diagnostics.report(&err.to_string());
                            Ok(())
                        } else {
                            Err(err.into())
                        }
                    }
                }
            }
            Ok((false, _, _)) => Ok(()),
            // Diagnostic already emitted by the validator.
            Err((_, true)) => Ok(()),
            Err((err, false)) => Err(SweepError::Validation(err)),
        }
    }

    /// The cheap trigger: enqueue a deferred run
    ///
    /// Never does the heavy work inline; a full queue means a trigger is
    /// already pending, which is equivalent. Returns whether the trigger was
    /// accepted (always, unless invalidated).
    pub fn update_orders(&self) -> bool {
        if self.guard().is_none() {
            return false;
        }
        let _ = self.trigger_tx.try_send(());
        true
    }

    /// Drain pending triggers and execute at most one batch run
    ///
    /// Returns the run report, or `None` when nothing was pending, the lock
    /// was contended, the run failed, or the instance is invalidated.
    pub async fn run_pending(&self) -> Option<RunReport> {
        self.guard()?;
        let drained = {
            let mut rx = self.trigger_rx.lock().await;
            let mut drained = 0usize;
            while rx.try_recv().is_ok() {
                drained += 1;
            }
            drained
        };
        if drained == 0 {
            return None;
        }
        self.really_update_orders().await
    }

    /// Execute one batch run now
    ///
    /// Failures never escape this call: lock contention and runtime failures
    /// both yield `None` (the latter after a diagnostic).
    pub async fn really_update_orders(&self) -> Option<RunReport> {
        self.guard()?;
        let config = self.config.read().clone();
        match self.runner.run(&config).await {
            RunOutcome::Completed(report) => Some(report),
            RunOutcome::Skipped | RunOutcome::Failed => None,
        }
    }

    /// Remove the timer registration and all pending markers
    ///
    /// Cannot interrupt an in-flight run; it only removes future triggers.
    /// A no-op returning `None` when invalidated, including on repeat calls.
    pub async fn clear_events(&self) -> Option<()> {
        self.guard()?;
        self.schedule.clear().await;
        self.lock.release().await;
        self.lock.clear_continuation().await;
        Some(())
    }

    /// Spawn a worker task servicing the deferred-trigger queue
    ///
    /// The worker coalesces bursts of triggers into single runs and stops
    /// after [`Sweeper::shutdown`].
    #[must_use]
    pub fn spawn_worker(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let sweeper = Arc::clone(self);
        tokio::spawn(async move {
            tracing::debug!(slug = %sweeper.slug(), "sweep worker started");
            loop {
                let received = {
                    let mut rx = sweeper.trigger_rx.lock().await;
                    rx.recv().await
                };
                if received.is_none() || sweeper.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                // Coalesce any burst that arrived behind this trigger.
                {
                    let mut rx = sweeper.trigger_rx.lock().await;
                    while rx.try_recv().is_ok() {}
                }
                let _ = sweeper.really_update_orders().await;
            }
            tracing::debug!(slug = %sweeper.slug(), "sweep worker stopped");
        })
    }

    /// Request graceful worker shutdown
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // Wake the worker if it is parked on the queue.
        let _ = self.trigger_tx.try_send(());
    }

    /// Invalidated guard shared by every public operation
    #[inline]
    fn guard(&self) -> Option<()> {
        match self.state {
            State::Active => Some(()),
            State::Invalidated => None,
        }
    }
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("keys", &self.keys)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
