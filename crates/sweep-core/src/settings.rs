//! Per-field settings validation and normalization
//!
//! Every mutable configuration field maps to one rule. A rule coerces the
//! untyped input into the stored representation or rejects it; only passing
//! fields are written back, and the stored value is always the
//! validated/coerced one, never the raw input.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::capabilities::Clock;
use crate::diagnostics::Diagnostics;
use crate::error::ValidationError;
use crate::types::{Setting, SettingValue, SinceField, SweepConfig};

/// Storage-layer status prefix stripped before comparison and storage
pub const DEFAULT_STATUS_PREFIX: &str = "wc-";

/// Outcome of one accepted setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    /// Whether the accepted field parameterizes the external timer
    pub needs_reschedule: bool,
}

/// Outcome of a multi-field application
#[derive(Debug, Clone, Default)]
pub struct AppliedSet {
    /// Fields that failed validation, in submission order
    pub failures: Vec<ValidationError>,
    /// Whether any accepted field parameterizes the external timer
    pub needs_reschedule: bool,
}

impl AppliedSet {
    /// Whether every submitted field passed
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Typed value produced by a passing rule
#[derive(Debug, Clone)]
enum Validated {
    Days(u32),
    Since(SinceField),
    TargetStatuses(Vec<String>),
    NewStatus(String),
    Limit(i64),
    Frequency(String),
    Start(i64),
    HideNotices(bool),
    BlockExceptions(bool),
}

/// Field-by-field validator for [`SweepConfig`]
///
/// Cross-validating fields (`target_statuses` / `new_status`) are checked
/// against the latest prior value of the other, so submission order matters
/// when both change in one call.
pub struct SettingsValidator {
    known_intervals: Vec<String>,
    status_prefix: String,
    clock: Arc<dyn Clock>,
}

impl SettingsValidator {
    /// Create a validator against the timer subsystem's interval names
    #[inline]
    #[must_use]
    pub fn new(known_intervals: Vec<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            known_intervals,
            status_prefix: DEFAULT_STATUS_PREFIX.to_string(),
            clock,
        }
    }

    /// With a different storage-layer status prefix
    #[inline]
    #[must_use]
    pub fn with_status_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.status_prefix = prefix.into();
        self
    }

    /// Validate one proposed value and write it back on success
    ///
    /// On failure a diagnostic is emitted and the field retains its prior
    /// valid value.
    ///
    /// # Errors
    /// The field-specific [`ValidationError`].
    pub fn apply(
        &self,
        config: &mut SweepConfig,
        setting: Setting,
        value: SettingValue,
        diagnostics: &Diagnostics,
    ) -> Result<Applied, ValidationError> {
        match self.check(config, setting, value) {
            Ok(validated) => {
                store(config, validated);
                Ok(Applied {
                    needs_reschedule: matches!(setting, Setting::Frequency | Setting::Start),
                })
            }
            Err(err) => {
                diagnostics.report(&err.to_string());
                Err(err)
            }
        }
    }

    /// Validate many fields at once, in submission order
    ///
    /// Fields that pass are written back even when later fields fail; the
    /// returned set names the failing subset.
    pub fn apply_all(
        &self,
        config: &mut SweepConfig,
        updates: Vec<(Setting, SettingValue)>,
        diagnostics: &Diagnostics,
    ) -> AppliedSet {
        let mut outcome = AppliedSet::default();
        for (setting, value) in updates {
            match self.apply(config, setting, value, diagnostics) {
                Ok(applied) => outcome.needs_reschedule |= applied.needs_reschedule,
                Err(err) => outcome.failures.push(err),
            }
        }
        outcome
    }

    /// Pure per-field rule dispatch
    fn check(
        &self,
        config: &SweepConfig,
        setting: Setting,
        value: SettingValue,
    ) -> Result<Validated, ValidationError> {
        match setting {
            Setting::Days => {
                let days = coerce_int(setting, &value)?;
                if days < 1 {
                    return Err(ValidationError::OutOfRange {
                        setting,
                        value: days,
                        reason: "must be >= 1",
                    });
                }
                Ok(Validated::Days(u32::try_from(days).map_err(|_| {
                    ValidationError::OutOfRange {
                        setting,
                        value: days,
                        reason: "too large",
                    }
                })?))
            }
            Setting::Since => {
                let raw = coerce_str(setting, &value)?;
                SinceField::parse(raw)
                    .map(Validated::Since)
                    .ok_or_else(|| ValidationError::UnknownSinceField(raw.to_string()))
            }
            Setting::TargetStatuses => {
                let raw = match value {
                    SettingValue::List(list) => list,
                    SettingValue::Str(s) => vec![s],
                    other => {
                        return Err(ValidationError::WrongType {
                            setting,
                            expected: "list of strings",
                            got: other.type_name(),
                        })
                    }
                };
                if raw.is_empty() {
                    return Err(ValidationError::EmptyTargets);
                }
                let normalized: Vec<String> =
                    raw.iter().map(|s| self.normalize_status(s)).collect();
                if let Some(conflict) = normalized.iter().find(|s| **s == config.new_status) {
                    return Err(ValidationError::StatusConflict {
                        setting,
                        status: conflict.clone(),
                    });
                }
                Ok(Validated::TargetStatuses(normalized))
            }
            Setting::NewStatus => {
                let raw = coerce_str(setting, &value)?;
                let normalized = self.normalize_status(raw);
                if config.target_statuses.contains(&normalized) {
                    return Err(ValidationError::StatusConflict {
                        setting,
                        status: normalized,
                    });
                }
                Ok(Validated::NewStatus(normalized))
            }
            Setting::Limit => {
                let limit = coerce_int(setting, &value)?;
                if limit == 0 || limit < -1 {
                    return Err(ValidationError::OutOfRange {
                        setting,
                        value: limit,
                        reason: "must be -1 or >= 1",
                    });
                }
                Ok(Validated::Limit(limit))
            }
            Setting::Frequency => {
                let raw = coerce_str(setting, &value)?;
                if !self.known_intervals.iter().any(|i| i == raw) {
                    return Err(ValidationError::UnknownInterval(raw.to_string()));
                }
                Ok(Validated::Frequency(raw.to_string()))
            }
            Setting::Start => {
                let start = match &value {
                    SettingValue::Int(ts) => *ts,
                    SettingValue::Str(expr) => self.resolve_start(expr)?,
                    other => {
                        return Err(ValidationError::WrongType {
                            setting,
                            expected: "int or time expression",
                            got: other.type_name(),
                        })
                    }
                };
                if start < 0 {
                    return Err(ValidationError::OutOfRange {
                        setting,
                        value: start,
                        reason: "must be >= 0",
                    });
                }
                Ok(Validated::Start(start))
            }
            Setting::HideNotices => coerce_bool(setting, &value).map(Validated::HideNotices),
            Setting::BlockExceptions => {
                coerce_bool(setting, &value).map(Validated::BlockExceptions)
            }
        }
    }

    /// Strip the storage-layer prefix and surrounding whitespace
    fn normalize_status(&self, status: &str) -> String {
        let trimmed = status.trim();
        trimmed
            .strip_prefix(&self.status_prefix)
            .unwrap_or(trimmed)
            .to_string()
    }

    /// Resolve a start expression to unix seconds
    ///
    /// Accepts a decimal timestamp, an RFC 3339 datetime, a `YYYY-MM-DD`
    /// date (midnight UTC), or `+N{s,m,h,d}` relative to now.
    fn resolve_start(&self, expr: &str) -> Result<i64, ValidationError> {
        let expr = expr.trim();
        if let Ok(ts) = expr.parse::<i64>() {
            return Ok(ts);
        }
        if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(expr) {
            return Ok(dt.timestamp());
        }
        if let Ok(date) = NaiveDate::parse_from_str(expr, "%Y-%m-%d") {
            let midnight = date
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| ValidationError::UnresolvableStart(expr.to_string()))?;
            return Ok(midnight.and_utc().timestamp());
        }
        if let Some(relative) = expr.strip_prefix('+') {
            let offset = parse_offset(relative)
                .ok_or_else(|| ValidationError::UnresolvableStart(expr.to_string()))?;
            return Ok(self.clock.now() + offset);
        }
        Err(ValidationError::UnresolvableStart(expr.to_string()))
    }
}

impl std::fmt::Debug for SettingsValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsValidator")
            .field("known_intervals", &self.known_intervals)
            .field("status_prefix", &self.status_prefix)
            .finish_non_exhaustive()
    }
}

/// Write a validated value into the config
fn store(config: &mut SweepConfig, validated: Validated) {
    match validated {
        Validated::Days(v) => config.days = v,
        Validated::Since(v) => config.since = v,
        Validated::TargetStatuses(v) => config.target_statuses = v,
        Validated::NewStatus(v) => config.new_status = v,
        Validated::Limit(v) => config.limit = v,
        Validated::Frequency(v) => config.frequency = v,
        Validated::Start(v) => config.start = v,
        Validated::HideNotices(v) => config.hide_notices = v,
        Validated::BlockExceptions(v) => config.block_exceptions = v,
    }
}

/// Coerce to integer: int as-is, numeric strings parsed
fn coerce_int(setting: Setting, value: &SettingValue) -> Result<i64, ValidationError> {
    match value {
        SettingValue::Int(i) => Ok(*i),
        SettingValue::Str(s) => {
            s.trim()
                .parse::<i64>()
                .map_err(|_| ValidationError::WrongType {
                    setting,
                    expected: "int",
                    got: "string",
                })
        }
        other => Err(ValidationError::WrongType {
            setting,
            expected: "int",
            got: other.type_name(),
        }),
    }
}

/// Require a string value
fn coerce_str(setting: Setting, value: &SettingValue) -> Result<&str, ValidationError> {
    match value {
        SettingValue::Str(s) => Ok(s.as_str()),
        other => Err(ValidationError::WrongType {
            setting,
            expected: "string",
            got: other.type_name(),
        }),
    }
}

/// Require a strict boolean value
fn coerce_bool(setting: Setting, value: &SettingValue) -> Result<bool, ValidationError> {
    match value {
        SettingValue::Bool(b) => Ok(*b),
        other => Err(ValidationError::WrongType {
            setting,
            expected: "bool",
            got: other.type_name(),
        }),
    }
}

/// Parse `N{s,m,h,d}` into seconds
fn parse_offset(relative: &str) -> Option<i64> {
    let (digits, unit) = relative.split_at(relative.len().checked_sub(1)?);
    let amount = digits.parse::<i64>().ok()?;
    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        _ => return None,
    };
    Some(amount * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{DiagnosticsSink, Environment};
    use std::sync::atomic::{AtomicI64, Ordering};

    struct FixedClock(AtomicI64);

    impl Clock for FixedClock {
        fn now(&self) -> i64 {
            self.0.load(Ordering::Relaxed)
        }
    }

    struct NullSink;

    impl DiagnosticsSink for NullSink {
        fn log(&self, _message: &str) {}
        fn notice(&self, _message: &str) {}
        fn environment(&self) -> Environment {
            Environment::Production
        }
    }

    fn validator() -> SettingsValidator {
        SettingsValidator::new(
            vec!["hourly".to_string(), "daily".to_string()],
            Arc::new(FixedClock(AtomicI64::new(1_700_000_000))),
        )
    }

    fn diagnostics() -> Diagnostics {
        Diagnostics::new(Arc::new(NullSink), "test")
    }

    #[test]
    fn days_coerces_and_rejects_below_one() {
        let v = validator();
        let d = diagnostics();
        let mut config = SweepConfig::new("test");

        v.apply(&mut config, Setting::Days, SettingValue::from("90"), &d)
            .unwrap();
        assert_eq!(config.days, 90);

        let err = v
            .apply(&mut config, Setting::Days, SettingValue::Int(0), &d)
            .unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { .. }));
        assert_eq!(config.days, 90, "failed field retains prior value");
    }

    #[test]
    fn since_accepts_only_known_fields() {
        let v = validator();
        let d = diagnostics();
        let mut config = SweepConfig::new("test");

        v.apply(&mut config, Setting::Since, SettingValue::from("paid"), &d)
            .unwrap();
        assert_eq!(config.since, SinceField::Paid);

        let err = v
            .apply(&mut config, Setting::Since, SettingValue::from("touched"), &d)
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnknownSinceField(_)));
    }

    #[test]
    fn statuses_are_prefix_normalized() {
        let v = validator();
        let d = diagnostics();
        let mut config = SweepConfig::new("test");

        v.apply(
            &mut config,
            Setting::TargetStatuses,
            SettingValue::from(vec!["wc-pending", "on-hold"]),
            &d,
        )
        .unwrap();
        assert_eq!(config.target_statuses, vec!["pending", "on-hold"]);

        v.apply(
            &mut config,
            Setting::NewStatus,
            SettingValue::from("wc-cancelled"),
            &d,
        )
        .unwrap();
        assert_eq!(config.new_status, "cancelled");
    }

    #[test]
    fn scalar_target_coerces_to_singleton() {
        let v = validator();
        let d = diagnostics();
        let mut config = SweepConfig::new("test");

        v.apply(
            &mut config,
            Setting::TargetStatuses,
            SettingValue::from("wc-failed"),
            &d,
        )
        .unwrap();
        assert_eq!(config.target_statuses, vec!["failed"]);
    }

    #[test]
    fn status_conflict_rejected_both_directions() {
        let v = validator();
        let d = diagnostics();
        let mut config = SweepConfig::new("test");
        // defaults: targets = ["pending"], new_status = "cancelled"

        let err = v
            .apply(
                &mut config,
                Setting::TargetStatuses,
                SettingValue::from(vec!["cancelled"]),
                &d,
            )
            .unwrap_err();
        assert!(matches!(err, ValidationError::StatusConflict { .. }));
        assert_eq!(config.target_statuses, vec!["pending"]);

        let err = v
            .apply(
                &mut config,
                Setting::NewStatus,
                SettingValue::from("wc-pending"),
                &d,
            )
            .unwrap_err();
        assert!(matches!(err, ValidationError::StatusConflict { .. }));
        assert_eq!(config.new_status, "cancelled");
    }

    #[test]
    fn cross_validation_sees_latest_prior_value() {
        let v = validator();
        let d = diagnostics();
        let mut config = SweepConfig::new("test");

        // Move targets away from "pending" first, then "pending" becomes a
        // legal new_status.
        let outcome = v.apply_all(
            &mut config,
            vec![
                (Setting::TargetStatuses, SettingValue::from(vec!["on-hold"])),
                (Setting::NewStatus, SettingValue::from("pending")),
            ],
            &d,
        );
        assert!(outcome.is_clean());
        assert_eq!(config.new_status, "pending");
    }

    #[test]
    fn limit_rejects_zero_and_below_minus_one() {
        let v = validator();
        let d = diagnostics();
        let mut config = SweepConfig::new("test");

        v.apply(&mut config, Setting::Limit, SettingValue::Int(-1), &d)
            .unwrap();
        v.apply(&mut config, Setting::Limit, SettingValue::Int(25), &d)
            .unwrap();
        assert_eq!(config.limit, 25);

        for bad in [0, -2] {
            let err = v
                .apply(&mut config, Setting::Limit, SettingValue::Int(bad), &d)
                .unwrap_err();
            assert!(matches!(err, ValidationError::OutOfRange { .. }));
        }
        assert_eq!(config.limit, 25);
    }

    #[test]
    fn frequency_must_be_known_interval() {
        let v = validator();
        let d = diagnostics();
        let mut config = SweepConfig::new("test");

        let applied = v
            .apply(&mut config, Setting::Frequency, SettingValue::from("hourly"), &d)
            .unwrap();
        assert!(applied.needs_reschedule);

        let err = v
            .apply(&mut config, Setting::Frequency, SettingValue::from("fortnightly"), &d)
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnknownInterval(_)));
    }

    #[test]
    fn start_resolves_expressions() {
        let v = validator();
        let d = diagnostics();
        let mut config = SweepConfig::new("test");

        v.apply(&mut config, Setting::Start, SettingValue::Int(1_700_000_100), &d)
            .unwrap();
        assert_eq!(config.start, 1_700_000_100);

        v.apply(&mut config, Setting::Start, SettingValue::from("+2h"), &d)
            .unwrap();
        assert_eq!(config.start, 1_700_000_000 + 7_200);

        v.apply(
            &mut config,
            Setting::Start,
            SettingValue::from("2023-11-14T22:13:20+00:00"),
            &d,
        )
        .unwrap();
        assert_eq!(config.start, 1_700_000_000);

        let err = v
            .apply(&mut config, Setting::Start, SettingValue::from("someday"), &d)
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnresolvableStart(_)));

        let err = v
            .apply(&mut config, Setting::Start, SettingValue::Int(-5), &d)
            .unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { .. }));
    }

    #[test]
    fn booleans_are_strict() {
        let v = validator();
        let d = diagnostics();
        let mut config = SweepConfig::new("test");

        v.apply(&mut config, Setting::HideNotices, SettingValue::Bool(true), &d)
            .unwrap();
        assert!(config.hide_notices);

        let err = v
            .apply(&mut config, Setting::BlockExceptions, SettingValue::from("yes"), &d)
            .unwrap_err();
        assert!(matches!(err, ValidationError::WrongType { .. }));
    }

    #[test]
    fn apply_all_reports_failing_subset() {
        let v = validator();
        let d = diagnostics();
        let mut config = SweepConfig::new("test");

        let outcome = v.apply_all(
            &mut config,
            vec![
                (Setting::Days, SettingValue::Int(90)),
                (Setting::Limit, SettingValue::Int(0)),
                (Setting::Frequency, SettingValue::from("daily")),
            ],
            &d,
        );
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].setting(), Setting::Limit);
        assert!(outcome.needs_reschedule, "frequency passed");
        assert_eq!(config.days, 90, "passing fields are written back");
    }
}
