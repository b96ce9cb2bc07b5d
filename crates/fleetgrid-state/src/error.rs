//! Error types for fleet control and convergence.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for fleet operations.
pub type FleetResult<T> = Result<T, FleetError>;

/// Error code the control plane uses for a resource that is busy.
pub const CODE_RESOURCE_IN_USE: &str = "ResourceInUse";

/// Error code for a scaling activity that blocks the request.
pub const CODE_SCALING_ACTIVITY_IN_PROGRESS: &str = "ScalingActivityInProgress";

/// Error code for request throttling.
pub const CODE_THROTTLING: &str = "Throttling";

/// Error code for request validation failures.
pub const CODE_VALIDATION: &str = "ValidationError";

/// Errors surfaced by the control plane and the convergence engine.
#[derive(Debug, Error)]
pub enum FleetError {
    /// Safe to retry: conflicting activity, throttling, propagation delay.
    #[error("transient control plane error ({code}): {message}")]
    Transient { code: String, message: String },

    /// Validation or authorization failure. Never retried.
    #[error("control plane error ({code}): {message}")]
    Fatal { code: String, message: String },

    #[error("{resource} not found")]
    NotFound { resource: String },

    /// A refresh is already active for the fleet.
    #[error("refresh already in progress for fleet {fleet}")]
    RefreshInProgress { fleet: String },

    /// Wait budget exhausted without the condition being satisfied.
    #[error(
        "timed out after {elapsed:?} waiting for {what}: {last_state}{}",
        activity_suffix(.activity)
    )]
    Timeout {
        what: String,
        elapsed: Duration,
        last_state: String,
        /// Most recent remote activity, when it could be fetched.
        activity: Option<String>,
    },

    /// Some batches were applied before a later one failed. Not rolled back.
    #[error("{operation}: {applied} of {total} batches applied before failure: {source}")]
    PartialBatch {
        operation: String,
        applied: usize,
        total: usize,
        #[source]
        source: Box<FleetError>,
    },

    /// The caller abandoned the wait.
    #[error("cancelled while waiting for {what}")]
    Cancelled { what: String },

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<FleetError>,
    },
}

fn activity_suffix(activity: &Option<String>) -> String {
    match activity {
        Some(a) => format!(" (last scaling activity: {a})"),
        None => String::new(),
    }
}

impl FleetError {
    pub fn transient(code: &str, message: impl Into<String>) -> Self {
        FleetError::Transient {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn fatal(code: &str, message: impl Into<String>) -> Self {
        FleetError::Fatal {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        FleetError::NotFound {
            resource: resource.into(),
        }
    }

    /// Wrap with a call-site description, keeping the classification.
    pub fn context(self, context: impl Into<String>) -> Self {
        FleetError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error beneath any `Context` wrappers.
    pub fn root(&self) -> &FleetError {
        match self {
            FleetError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.root(), FleetError::Transient { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), FleetError::NotFound { .. })
    }

    pub fn is_refresh_conflict(&self) -> bool {
        matches!(self.root(), FleetError::RefreshInProgress { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), FleetError::Timeout { .. })
    }

    /// Control plane error code of the root error, if it has one.
    pub fn code(&self) -> Option<&str> {
        match self.root() {
            FleetError::Transient { code, .. } | FleetError::Fatal { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Whether the root error carries `code` and a message containing `needle`.
    pub fn message_contains(&self, code: &str, needle: &str) -> bool {
        match self.root() {
            FleetError::Transient { code: c, message } | FleetError::Fatal { code: c, message } => {
                c == code && message.contains(needle)
            }
            _ => false,
        }
    }
}

/// Extension for attaching context to `FleetResult`s.
pub trait ResultExt<T> {
    fn context_with(self, f: impl FnOnce() -> String) -> FleetResult<T>;
}

impl<T> ResultExt<T> for FleetResult<T> {
    fn context_with(self, f: impl FnOnce() -> String) -> FleetResult<T> {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_looks_through_context() {
        let err = FleetError::transient(CODE_RESOURCE_IN_USE, "busy")
            .context("deleting fleet (web)")
            .context("outer");
        assert!(err.is_transient());
        assert!(!err.is_not_found());
        assert!(err.message_contains(CODE_RESOURCE_IN_USE, "busy"));
        assert_eq!(err.code(), Some(CODE_RESOURCE_IN_USE));
        assert_eq!(err.to_string(), "outer: deleting fleet (web): transient control plane error (ResourceInUse): busy");
    }

    #[test]
    fn timeout_reports_gap_and_activity() {
        let err = FleetError::Timeout {
            what: "fleet (web) capacity".to_string(),
            elapsed: Duration::from_secs(600),
            last_state: "Need exactly 4 healthy instances in ASG, have 2".to_string(),
            activity: Some("Launching a new instance (Failed: no capacity)".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("Need exactly 4 healthy instances in ASG, have 2"));
        assert!(msg.contains("last scaling activity: Launching a new instance"));
        assert!(err.is_timeout());
    }

    #[test]
    fn timeout_without_activity() {
        let err = FleetError::Timeout {
            what: "x".to_string(),
            elapsed: Duration::from_secs(1),
            last_state: "pending".to_string(),
            activity: None,
        };
        assert_eq!(err.to_string(), "timed out after 1s waiting for x: pending");
    }

    #[test]
    fn refresh_conflict_detected() {
        let err = FleetError::RefreshInProgress {
            fleet: "web".to_string(),
        };
        assert!(err.is_refresh_conflict());
        assert!(!err.is_transient());
    }
}
