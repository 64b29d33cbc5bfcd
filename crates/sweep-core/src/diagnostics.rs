//! Diagnostics sink and environment gating
//!
//! Every failure produces a namespaced log line; a user-visible notice is
//! additionally raised only outside production and only while notices are
//! not hidden.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Deployment environment tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production: log writes only, no user-facing surface
    Production,
    /// Development/staging: notices surface interactively
    Development,
}

/// Destination for engine diagnostics
pub trait DiagnosticsSink: Send + Sync {
    /// Write a message to the log channel
    fn log(&self, message: &str);

    /// Raise a user-visible warning
    fn notice(&self, message: &str);

    /// Environment tier this sink runs in
    fn environment(&self) -> Environment;
}

/// Default sink routing everything through `tracing`
#[derive(Debug, Clone, Copy)]
pub struct TracingSink {
    environment: Environment,
}

impl TracingSink {
    /// Create a sink for the given environment
    #[inline]
    #[must_use]
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }
}

impl Default for TracingSink {
    fn default() -> Self {
        Self::new(Environment::Production)
    }
}

impl DiagnosticsSink for TracingSink {
    fn log(&self, message: &str) {
        tracing::warn!(target: "sweep", "{message}");
    }

    fn notice(&self, message: &str) {
        tracing::warn!(target: "sweep::notice", "{message}");
    }

    fn environment(&self) -> Environment {
        self.environment
    }
}

/// Instance-scoped diagnostics applying the hide/production gates
///
/// The log write always happens; the notice is suppressed when notices are
/// hidden or the sink reports a production environment.
#[derive(Clone)]
pub struct Diagnostics {
    sink: Arc<dyn DiagnosticsSink>,
    slug: String,
    hidden: Arc<AtomicBool>,
}

impl Diagnostics {
    /// Create diagnostics for one instance
    #[inline]
    #[must_use]
    pub fn new(sink: Arc<dyn DiagnosticsSink>, slug: impl Into<String>) -> Self {
        Self {
            sink,
            slug: slug.into(),
            hidden: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Toggle notice suppression (tracks the `hide_notices` setting)
    #[inline]
    pub fn set_hidden(&self, hidden: bool) {
        self.hidden.store(hidden, Ordering::Relaxed);
    }

    /// Whether notices are currently suppressed
    #[inline]
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.hidden.load(Ordering::Relaxed)
    }

    /// Report a failure
    pub fn report(&self, message: &str) {
        let namespaced = format!("[{}] {message}", self.slug);
        self.sink.log(&namespaced);
        if !self.is_hidden() && self.sink.environment() == Environment::Development {
            self.sink.notice(&namespaced);
        }
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("slug", &self.slug)
            .field("hidden", &self.is_hidden())
            .finish_non_exhaustive()
    }
}
