//! Sweep Core - recurring, batched, lock-guarded status transitions
//!
//! The engine that:
//! - Finds orders whose status is in a target set and whose relevant
//!   timestamp is older than a configurable age threshold
//! - Transitions them to a new status in capped batches
//! - Guarantees at most one concurrent run per instance via a TTL lock
//! - Resumes truncated runs through a continuation marker
//!
//! Storage, timers, the ephemeral key-value store and the notification bus
//! are capability traits supplied by the host.
//!
//! # Example
//!
//! ```rust,ignore
//! use sweep_core::{Capabilities, Setting, SettingValue, Sweeper};
//!
//! # async fn example(caps: Capabilities) -> Result<(), Box<dyn std::error::Error>> {
//! let sweeper = Sweeper::new(
//!     "abandoned",
//!     vec![
//!         (Setting::Days, SettingValue::Int(90)),
//!         (Setting::TargetStatuses, SettingValue::from(vec!["pending"])),
//!         (Setting::NewStatus, SettingValue::from("cancelled")),
//!     ],
//!     caps,
//! )
//! .await?;
//!
//! sweeper.update_orders(); // cheap trigger, e.g. from the timer callback
//! let report = sweeper.run_pending().await; // deferred execution
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod capabilities;
pub mod diagnostics;
pub mod error;
pub mod instance;
pub mod lock;
pub mod runner;
pub mod schedule;
pub mod settings;
pub mod types;

// Re-exports for convenience
pub use capabilities::{
    Capabilities, Clock, EphemeralStore, EventBus, Order, OrderQuery, OrderStore, SystemClock,
    TimerSubsystem, TransitionGate, DEFAULT_LOCK_TTL,
};
pub use diagnostics::{Diagnostics, DiagnosticsSink, Environment, TracingSink};
pub use error::{ScheduleError, StoreError, SweepError, ValidationError};
pub use instance::Sweeper;
pub use lock::{LockCoordinator, RemainingBudget};
pub use runner::{cutoff_timestamp, BatchRunner, RunOutcome, RunReport, BATCH_CAP};
pub use schedule::ScheduleManager;
pub use settings::{Applied, AppliedSet, SettingsValidator, DEFAULT_STATUS_PREFIX};
pub use types::{
    InstanceKeys, RunId, Setting, SettingValue, SinceField, SweepConfig, TransitionEvent,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the sweep engine
    pub use crate::{
        Capabilities, Order, OrderQuery, OrderStore, RunReport, Setting, SettingValue, SinceField,
        SweepConfig, SweepError, Sweeper, TransitionEvent,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
