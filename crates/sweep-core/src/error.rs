//! Error types for the sweep engine
//!
//! Three tiers:
//! - Field-level validation failures (non-fatal per field)
//! - Configuration-fatal construction failures
//! - Runtime failures during batch execution (transient, caught per run)

use crate::types::Setting;

/// Field-level validation failure
///
/// Reported per field; the field retains its prior valid value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Value has the wrong type for the setting
    #[error("{setting}: expected {expected}, got {got}")]
    WrongType {
        /// Setting that rejected the value
        setting: Setting,
        /// Expected type name
        expected: &'static str,
        /// Submitted type name
        got: &'static str,
    },

    /// Numeric value outside the permitted range
    #[error("{setting}: {value} is out of range ({reason})")]
    OutOfRange {
        /// Setting that rejected the value
        setting: Setting,
        /// Submitted value
        value: i64,
        /// Range description
        reason: &'static str,
    },

    /// Unrecognized timestamp field name
    #[error("since: unrecognized timestamp field '{0}'")]
    UnknownSinceField(String),

    /// Interval name not recognized by the timer subsystem
    #[error("frequency: '{0}' is not a known interval")]
    UnknownInterval(String),

    /// Start expression could not be resolved to a timestamp
    #[error("start: cannot resolve time expression '{0}'")]
    UnresolvableStart(String),

    /// A status appears on both sides of the transition
    #[error("{setting}: '{status}' cannot be both a target status and the new status")]
    StatusConflict {
        /// Setting that rejected the value
        setting: Setting,
        /// Conflicting status identifier
        status: String,
    },

    /// Target status set must not be empty
    #[error("target_statuses: must not be empty")]
    EmptyTargets,
}

impl ValidationError {
    /// Setting the failure belongs to
    #[inline]
    #[must_use]
    pub fn setting(&self) -> Setting {
        match self {
            Self::WrongType { setting, .. }
            | Self::OutOfRange { setting, .. }
            | Self::StatusConflict { setting, .. } => *setting,
            Self::UnknownSinceField(_) => Setting::Since,
            Self::UnknownInterval(_) => Setting::Frequency,
            Self::UnresolvableStart(_) => Setting::Start,
            Self::EmptyTargets => Setting::TargetStatuses,
        }
    }
}

/// Errors surfaced by the order-store capability
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Query against the record store failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Store rejected the status transition for this order
    #[error("order {id} rejected transition to '{status}'")]
    TransitionRejected {
        /// Order identifier
        id: String,
        /// Intended new status
        status: String,
    },

    /// Order disappeared between query and update
    #[error("order {0} not found")]
    NotFound(String),

    /// Store backend unavailable
    #[error("store backend unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether this is a per-order rejection the engine tolerates
    ///
    /// An order changing status or disappearing between query and update is
    /// not an error condition for the engine (at-least-once semantics); the
    /// order is skipped and the run continues.
    #[inline]
    #[must_use]
    pub fn is_transition_rejection(&self) -> bool {
        matches!(self, Self::TransitionRejected { .. } | Self::NotFound(_))
    }
}

/// Timer-subsystem registration failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("schedule registration failed: {0}")]
pub struct ScheduleError(pub String);

/// Top-level engine error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SweepError {
    /// Accumulated validation failures during construction
    #[error("invalid configuration: {} field(s) rejected", .0.len())]
    InvalidConfiguration(Vec<ValidationError>),

    /// Single-field validation failure during direct mutation
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Order store is not active/available
    #[error("order store is not available")]
    StoreUnavailable,

    /// Timer registration failed
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// Store failure during batch execution
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl SweepError {
    /// Whether this failure invalidates the instance at construction time
    #[inline]
    #[must_use]
    pub fn is_configuration_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration(_) | Self::StoreUnavailable | Self::Schedule(_)
        )
    }

    /// Whether the next trigger may simply retry
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}
