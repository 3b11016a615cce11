//! Result and error types for Tabguard.

use crate::context::ContextState;
use crate::session::ContextHandle;
use std::time::Duration;
use thiserror::Error;

/// Boxed error carried from caller-supplied callbacks (predicates, triggers, verifiers)
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for wait engine operations
pub type WaitResult<T> = Result<T, WaitError>;

/// Result type for context manager operations
pub type ContextResult<T> = Result<T, ContextError>;

/// Result type for browsing session calls
pub type SessionResult<T> = Result<T, SessionError>;

// =============================================================================
// SESSION ERRORS
// =============================================================================

/// Errors reported by a [`BrowsingSession`](crate::BrowsingSession) implementation
#[derive(Debug, Error)]
pub enum SessionError {
    /// The handle does not name an open browsing context
    #[error("No such browsing context: {0}")]
    NoSuchContext(ContextHandle),

    /// The session does not implement an optional capability
    #[error("Browsing session does not support {capability}")]
    Unsupported {
        /// Capability name
        capability: &'static str,
    },

    /// Any other failure of the browser-driving layer
    #[error("Browsing session command failed: {message}")]
    CommandFailed {
        /// Error message
        message: String,
    },
}

impl SessionError {
    /// Create a command failure
    #[must_use]
    pub fn command(message: impl Into<String>) -> Self {
        Self::CommandFailed {
            message: message.into(),
        }
    }

    /// Whether this error means the handle is already gone
    #[must_use]
    pub const fn is_no_such_context(&self) -> bool {
        matches!(self, Self::NoSuchContext(_))
    }
}

// =============================================================================
// WAIT ERRORS
// =============================================================================

/// Errors that abort a wait before an outcome is reached
#[derive(Debug, Error)]
pub enum WaitError {
    /// Options violate `poll_interval > 0`
    #[error("Invalid wait options: {message}")]
    InvalidOptions {
        /// Error message
        message: String,
    },

    /// The predicate itself failed; never retried
    #[error("Observation failed while waiting for {waited_for}: {source}")]
    PredicateObservationFailed {
        /// Description of the condition
        waited_for: String,
        /// Underlying failure
        #[source]
        source: BoxError,
    },
}

// =============================================================================
// CONTEXT ERRORS
// =============================================================================

/// Which cleanup step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStage {
    /// Closing the context opened by the trigger
    CloseContext,
    /// Switching focus back to the home context
    RestoreFocus,
}

impl std::fmt::Display for CleanupStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CloseContext => write!(f, "close context"),
            Self::RestoreFocus => write!(f, "restore focus"),
        }
    }
}

/// How badly an error leaves the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// The operation proceeded; callers decide whether it matters
    Warning,
    /// The operation failed but the session is back home
    Error,
    /// The session may not be in the state other layers expect
    Critical,
}

/// Errors returned by [`ContextManager`](crate::ContextManager)
#[derive(Debug, Error)]
pub enum ContextError {
    /// The trigger did not open a context before the timeout
    #[error("No new browsing context opened within {}ms", timeout.as_millis())]
    NewContextNotOpened {
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// More than one context appeared; `selected` was used
    #[error("Ambiguous new context: selected {selected}, {} other(s) left open", unselected.len())]
    AmbiguousNewContext {
        /// Handle the manager switched into
        selected: ContextHandle,
        /// New handles that were not selected and were not closed
        unselected: Vec<ContextHandle>,
    },

    /// Another operation is already in flight on this manager
    #[error("Concurrent context operation rejected (manager is {state})")]
    ConcurrentContextOperation {
        /// State of the in-flight operation
        state: ContextState,
    },

    /// The trigger callback failed
    #[error("Trigger failed: {0}")]
    TriggerFailed(#[source] BoxError),

    /// The verify callback failed; cleanup already ran
    #[error("Verification failed: {0}")]
    VerifyFailed(#[source] BoxError),

    /// Observing the context set failed while waiting
    #[error("Observation failed: {0}")]
    PredicateObservationFailed(#[source] BoxError),

    /// Wait options were rejected
    #[error("Invalid wait options: {message}")]
    InvalidOptions {
        /// Error message
        message: String,
    },

    /// A session call outside cleanup failed
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Cleanup could not close the context or restore focus
    #[error("Cleanup failed ({stage}) for {handle}: {source}")]
    CleanupFailed {
        /// Step that failed
        stage: CleanupStage,
        /// Handle the step was acting on
        handle: ContextHandle,
        /// Underlying session failure
        #[source]
        source: SessionError,
        /// Verify failure superseded by this error, if any
        verify_error: Option<BoxError>,
    },

    /// The operation was cancelled; cleanup already ran
    #[error("Context operation cancelled")]
    Cancelled,
}

impl ContextError {
    /// Whether this is a cleanup failure
    #[must_use]
    pub const fn is_cleanup_failure(&self) -> bool {
        matches!(self, Self::CleanupFailed { .. })
    }

    /// Severity ranking of this error
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::AmbiguousNewContext { .. } => Severity::Warning,
            Self::CleanupFailed { .. } => Severity::Critical,
            _ => Severity::Error,
        }
    }
}

impl From<WaitError> for ContextError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::InvalidOptions { message } => Self::InvalidOptions { message },
            WaitError::PredicateObservationFailed { source, .. } => {
                Self::PredicateObservationFailed(source)
            }
        }
    }
}

// =============================================================================
// CONFIG ERRORS
// =============================================================================

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment override could not be parsed
    #[error("Invalid value {value:?} for {key}: {message}")]
    InvalidValue {
        /// Variable name
        key: String,
        /// Raw value
        value: String,
        /// Error message
        message: String,
    },

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
