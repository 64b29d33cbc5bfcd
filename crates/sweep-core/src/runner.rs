//! Batch execution state machine
//!
//! One invocation: acquire the lock, consume any continuation budget, query
//! eligible orders, transition each (subject to the veto gate), detect
//! truncation, arrange continuation, release the lock. Failures are caught
//! at the run boundary; the lock is released on every exit path.

use std::sync::Arc;
use std::time::Duration;

use crate::capabilities::{Capabilities, OrderQuery};
use crate::error::SweepError;
use crate::lock::{LockCoordinator, RemainingBudget};
use crate::schedule::ScheduleManager;
use crate::types::{InstanceKeys, RunId, SweepConfig, TransitionEvent};

/// Internal per-invocation ceiling, independent of the user-supplied limit
///
/// Protects a single invocation from unbounded runtime; the configured
/// `limit` is the total cap across continuation batches.
pub const BATCH_CAP: usize = 50;

/// Safety margin (seconds) the continuation expiry keeps clear of the next
/// naturally-scheduled firing
pub const CONTINUATION_MARGIN_SECS: i64 = 60;

/// Summary of one batch invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Run identifier
    pub run_id: RunId,
    /// Orders returned by the query
    pub matched: usize,
    /// Orders successfully transitioned
    pub transitioned: usize,
    /// Orders skipped (vetoed or store-rejected)
    pub skipped: usize,
    /// Whether a continuation marker was set
    pub continuation_scheduled: bool,
}

/// Outcome of attempting a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The batch body executed
    Completed(RunReport),
    /// The lock was already held; nothing happened
    Skipped,
    /// A runtime failure aborted the run (diagnostic already emitted)
    Failed,
}

/// Executes batch invocations for one instance
pub struct BatchRunner {
    caps: Capabilities,
    keys: InstanceKeys,
    lock: Arc<LockCoordinator>,
    schedule: Arc<ScheduleManager>,
    diagnostics: crate::diagnostics::Diagnostics,
}

impl BatchRunner {
    /// Create a runner over the instance's collaborators
    #[inline]
    #[must_use]
    pub fn new(
        caps: Capabilities,
        keys: InstanceKeys,
        lock: Arc<LockCoordinator>,
        schedule: Arc<ScheduleManager>,
        diagnostics: crate::diagnostics::Diagnostics,
    ) -> Self {
        Self {
            caps,
            keys,
            lock,
            schedule,
            diagnostics,
        }
    }

    /// Execute one batch invocation against the given configuration
    ///
    /// Lock contention is not an error: the invocation is skipped silently.
    /// Runtime failures are caught here, reported, and never re-raised past
    /// this boundary; in all cases the lock is released.
    pub async fn run(&self, config: &SweepConfig) -> RunOutcome {
        let run_id = RunId::new();

        if !self.lock.try_acquire().await {
            tracing::debug!(%run_id, slug = %config.slug, "lock held, skipping trigger");
            return RunOutcome::Skipped;
        }

        let result = self.run_locked(run_id, config).await;
        self.lock.release().await;

        match result {
            Ok(report) => {
                tracing::info!(
                    %run_id,
                    slug = %config.slug,
                    matched = report.matched,
                    transitioned = report.transitioned,
                    skipped = report.skipped,
                    continuation = report.continuation_scheduled,
                    "batch run completed"
                );
                RunOutcome::Completed(report)
            }
            Err(err) => {
                self.diagnostics.report(&format!("batch run {run_id} aborted: {err}"));
                RunOutcome::Failed
            }
        }
    }

    /// The batch body, executed while holding the lock
    ///
    /// A pending continuation marker is consumed only on success: an aborted
    /// resumed run leaves it in place, so the next trigger retries with the
    /// remaining budget instead of a fresh full limit.
    async fn run_locked(
        &self,
        run_id: RunId,
        config: &SweepConfig,
    ) -> Result<RunReport, SweepError> {
        let continuation = self.lock.continuation().await;
        if continuation.is_some() {
            tracing::debug!(%run_id, "resuming truncated run");
        }
        let budget = continuation.map_or(config.limit, |b| b.0);
        let cap = effective_cap(budget);
        if cap == 0 {
            self.lock.clear_continuation().await;
            return Ok(RunReport {
                run_id,
                matched: 0,
                transitioned: 0,
                skipped: 0,
                continuation_scheduled: false,
            });
        }

        let now = self.caps.clock.now();
        let cutoff = cutoff_timestamp(now, config.days);
        let orders = self
            .caps
            .store
            .query(OrderQuery {
                statuses: config.target_statuses.clone(),
                limit: cap,
                since: config.since,
                cutoff,
            })
            .await?;

        let matched = orders.len();
        let mut transitioned = 0usize;
        let mut skipped = 0usize;

        for order in &orders {
            let previous_status = order.status();

            if let Some(gate) = &self.caps.gate {
                if gate
                    .should_skip(order.as_ref(), &previous_status, &config.new_status, config.days)
                    .await
                {
                    skipped += 1;
                    tracing::debug!(%run_id, order = %order.id(), "transition vetoed");
                    continue;
                }
            }

            let note = format!(
                "Status changed from '{previous_status}' to '{}' after {} days.",
                config.new_status, config.days
            );
            match order.update_status(&config.new_status, &note).await {
                Ok(()) => {
                    transitioned += 1;
                    self.caps
                        .bus
                        .publish(
                            self.keys.transition_event(),
                            TransitionEvent {
                                order_id: order.id(),
                                previous_status,
                                new_status: config.new_status.clone(),
                                days: config.days,
                            },
                        )
                        .await;
                }
                Err(err) if err.is_transition_rejection() => {
                    // The order changed under us; at-least-once semantics
                    // make this a skip, not a failure.
                    skipped += 1;
                    tracing::debug!(%run_id, order = %order.id(), %err, "transition rejected");
                }
                Err(err) => return Err(err.into()),
            }
        }

        // Truncation is judged by query size, not transition count: a vetoed
        // order still consumed budget. The marker carries the remaining
        // budget; a resumed run with nothing left short-circuits on it.
        let truncated = matched == cap;
        #[allow(clippy::cast_possible_wrap)]
        let remaining = if budget < 0 {
            RemainingBudget(-1)
        } else {
            RemainingBudget(budget - matched as i64)
        };
        // The consumed marker goes away here, after the batch body cannot
        // fail anymore; arranging a new one replaces it.
        if continuation.is_some() {
            self.lock.clear_continuation().await;
        }
        let continuation_scheduled = if truncated {
            self.arrange_continuation(run_id, remaining).await
        } else {
            false
        };

        Ok(RunReport {
            run_id,
            matched,
            transitioned,
            skipped,
            continuation_scheduled,
        })
    }

    /// Set the continuation marker with an expiry that undercuts the next
    /// naturally-scheduled firing
    ///
    /// Returns whether a marker was set. When the next firing is closer than
    /// the margin, no marker is needed: the natural tick picks up the rest.
    async fn arrange_continuation(&self, run_id: RunId, remaining: RemainingBudget) -> bool {
        let ttl = match self.schedule.next_fire_time().await {
            Some(next_fire) => {
                let remaining_secs = next_fire - self.caps.clock.now();
                if remaining_secs <= CONTINUATION_MARGIN_SECS {
                    tracing::debug!(%run_id, "next tick imminent, no continuation marker");
                    return false;
                }
                #[allow(clippy::cast_sign_loss)]
                Duration::from_secs((remaining_secs - CONTINUATION_MARGIN_SECS) as u64)
            }
            // No registration to overlap with; give the boot-drain check a
            // full lock-TTL window.
            None => self.lock.lock_ttl(),
        };
        self.lock.mark_continuation(remaining, ttl).await;
        tracing::debug!(%run_id, %remaining, ttl_secs = ttl.as_secs(), "continuation scheduled");
        true
    }
}

impl std::fmt::Debug for BatchRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRunner")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

/// Cutoff timestamp for an age threshold
///
/// Exact second-level subtraction: `now - days * 86_400`. The comparison is
/// inclusive — an order whose `since` timestamp is `<= cutoff` (aged exactly
/// `days` or more) is eligible.
#[inline]
#[must_use]
pub fn cutoff_timestamp(now: i64, days: u32) -> i64 {
    now - i64::from(days) * 86_400
}

/// Per-invocation cap: `min(budget, BATCH_CAP)`, with -1 meaning unbounded
#[inline]
#[must_use]
fn effective_cap(budget: i64) -> usize {
    if budget < 0 {
        BATCH_CAP
    } else {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            budget.min(BATCH_CAP as i64) as usize
        }
    }
}
