//! Core types for the sweep engine
//!
//! Defines the fundamental types for the engine:
//! - Sweeper configuration and its defaults
//! - Setting names and untyped setting values
//! - Instance-owned derived key namespace
//! - Run identifiers and the transition event payload

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique batch-run identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which order timestamp the age threshold compares against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinceField {
    /// Last modification time
    Modified,
    /// Creation time
    Created,
    /// Completion time
    Completed,
    /// Payment time
    Paid,
}

impl SinceField {
    /// Parse from its lowercase string form
    #[inline]
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "modified" => Some(Self::Modified),
            "created" => Some(Self::Created),
            "completed" => Some(Self::Completed),
            "paid" => Some(Self::Paid),
            _ => None,
        }
    }

    /// Lowercase string form
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Modified => "modified",
            Self::Created => "created",
            Self::Completed => "completed",
            Self::Paid => "paid",
        }
    }
}

impl std::fmt::Display for SinceField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable configuration fields addressable through [`crate::Sweeper::update`]
///
/// This is the explicit dispatch table: every field maps to exactly one
/// validation rule in the settings validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Setting {
    /// Age threshold in days
    Days,
    /// Timestamp field the threshold compares against
    Since,
    /// Statuses eligible for transition
    TargetStatuses,
    /// Status applied by the transition
    NewStatus,
    /// Total records considered per logical run (-1 = unbounded)
    Limit,
    /// Recurring interval name
    Frequency,
    /// First/next scheduled firing (unix seconds or time expression)
    Start,
    /// Suppress user-visible notices
    HideNotices,
    /// Swallow configuration errors instead of raising them
    BlockExceptions,
}

impl Setting {
    /// Snake-case field name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Days => "days",
            Self::Since => "since",
            Self::TargetStatuses => "target_statuses",
            Self::NewStatus => "new_status",
            Self::Limit => "limit",
            Self::Frequency => "frequency",
            Self::Start => "start",
            Self::HideNotices => "hide_notices",
            Self::BlockExceptions => "block_exceptions",
        }
    }
}

impl std::fmt::Display for Setting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Untyped proposed value for a setting
///
/// Callers submit these; the validator coerces them into the typed
/// representation stored on [`SweepConfig`], or rejects them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    /// Integer value
    Int(i64),
    /// String value
    Str(String),
    /// Boolean value
    Bool(bool),
    /// List of strings
    List(Vec<String>),
}

impl SettingValue {
    /// Short type name for diagnostics
    #[inline]
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Str(_) => "string",
            Self::Bool(_) => "bool",
            Self::List(_) => "list",
        }
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<String>> for SettingValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

impl From<Vec<&str>> for SettingValue {
    fn from(value: Vec<&str>) -> Self {
        Self::List(value.into_iter().map(str::to_string).collect())
    }
}

/// Validated configuration for one sweeper instance
///
/// Mutable only through the settings validator; `slug` is immutable after
/// construction. The invariants `new_status ∉ target_statuses`,
/// `days >= 1` and `limit == -1 || limit >= 1` hold at all times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Instance identifier; derives all external keys
    pub slug: String,
    /// Age threshold in days (>= 1)
    pub days: u32,
    /// Timestamp field the threshold compares against
    pub since: SinceField,
    /// Statuses eligible for transition (non-empty, normalized)
    pub target_statuses: Vec<String>,
    /// Status applied by the transition (normalized)
    pub new_status: String,
    /// Total records per logical run; -1 = unbounded (still batch-capped)
    pub limit: i64,
    /// Recurring interval name, recognized by the timer subsystem
    pub frequency: String,
    /// First/next scheduled firing as unix seconds (0 = immediately)
    pub start: i64,
    /// Suppress user-visible notices
    pub hide_notices: bool,
    /// Swallow configuration errors instead of raising them
    pub block_exceptions: bool,
}

impl SweepConfig {
    /// Create the default configuration for a slug
    #[inline]
    #[must_use]
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            days: 30,
            since: SinceField::Modified,
            target_statuses: vec!["pending".to_string()],
            new_status: "cancelled".to_string(),
            limit: -1,
            frequency: "daily".to_string(),
            start: 0,
            hide_notices: false,
            block_exceptions: false,
        }
    }

    /// With age threshold
    #[inline]
    #[must_use]
    pub fn with_days(mut self, days: u32) -> Self {
        self.days = days;
        self
    }

    /// With comparison field
    #[inline]
    #[must_use]
    pub fn with_since(mut self, since: SinceField) -> Self {
        self.since = since;
        self
    }

    /// With target statuses and new status
    ///
    /// Combined so the disjointness invariant stays visible at the call site.
    #[inline]
    #[must_use]
    pub fn with_transition(
        mut self,
        target_statuses: Vec<String>,
        new_status: impl Into<String>,
    ) -> Self {
        self.target_statuses = target_statuses;
        self.new_status = new_status.into();
        self
    }

    /// With total-run limit
    #[inline]
    #[must_use]
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// With interval name
    #[inline]
    #[must_use]
    pub fn with_frequency(mut self, frequency: impl Into<String>) -> Self {
        self.frequency = frequency.into();
        self
    }

    /// With first firing timestamp
    #[inline]
    #[must_use]
    pub fn with_start(mut self, start: i64) -> Self {
        self.start = start;
        self
    }
}

/// Instance-owned derived key namespace
///
/// Computed once at construction from the slug and never global: the event
/// hook names the recurring timer registration, the lock and continuation
/// keys address the ephemeral key-value store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceKeys {
    event_hook: String,
    transition_event: String,
    lock_key: String,
    continuation_key: String,
}

impl InstanceKeys {
    /// Derive the full key namespace from a slug
    #[inline]
    #[must_use]
    pub fn derive(slug: &str) -> Self {
        Self {
            event_hook: format!("{slug}_sweep"),
            transition_event: format!("{slug}_sweep_transitioned"),
            lock_key: format!("{slug}_sweep_lock"),
            continuation_key: format!("{slug}_sweep_continuation"),
        }
    }

    /// Recurring timer event identifier
    #[inline]
    #[must_use]
    pub fn event_hook(&self) -> &str {
        &self.event_hook
    }

    /// Post-transition notification event name
    #[inline]
    #[must_use]
    pub fn transition_event(&self) -> &str {
        &self.transition_event
    }

    /// Exclusive-lock key
    #[inline]
    #[must_use]
    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }

    /// Continuation-marker key
    #[inline]
    #[must_use]
    pub fn continuation_key(&self) -> &str {
        &self.continuation_key
    }
}

/// Payload published after each successful transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// Order identifier
    pub order_id: String,
    /// Status before the transition
    pub previous_status: String,
    /// Status after the transition
    pub new_status: String,
    /// Age threshold that made the order eligible
    pub days: u32,
}
