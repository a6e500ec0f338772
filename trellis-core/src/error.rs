//! Errors
//!
//! Every failure in the engine is a [`ReactiveError`]. When a failure can't
//! be returned to a caller (an observer failing during a propagation that a
//! `Value::set` started, a cleanup task failing during teardown), it is
//! turned into an [`ErrorReport`] and handed to the runtime's reporting
//! channel instead.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;
use thiserror::Error;

/// Discriminator for [`ReactiveError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    CyclicDependency,
    DuplicateOutputKey,
    InvalidScopeTask,
    DoubleDispose,
    StaleReadOutsideEvaluation,
    UseAfterDestroy,
    CallbackPanicked,
    CleanupFailed,
    Failed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Errors raised by the reactive engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReactiveError {
    /// A node's evaluation reached the node itself again.
    #[error("cyclic dependency detected while evaluating {node} ({chain})")]
    CyclicDependency { node: String, chain: String },

    /// Two input entries of a keyed transform produced the same output key.
    #[error("keyed transform produced the output key {key} more than once")]
    DuplicateOutputKey { key: String },

    /// A task can't be added to a scope.
    #[error("invalid scope task: {reason}")]
    InvalidScopeTask { reason: &'static str },

    /// A node was destroyed after it had already been destroyed.
    #[error("{node} was destroyed more than once")]
    DoubleDispose { node: String },

    /// A `Use` context was read after its evaluation finished.
    #[error("dependency read through a use context whose evaluation already finished")]
    StaleReadOutsideEvaluation,

    /// A destroyed node was read through a `Use` context.
    #[error("{node} was used after it was destroyed")]
    UseAfterDestroy { node: String },

    /// A user callback panicked.
    #[error("callback panicked: {message}")]
    CallbackPanicked { message: String },

    /// A cleanup task reported failure.
    #[error("cleanup task failed: {message}")]
    CleanupFailed { message: String },

    /// A user computation failed.
    #[error("{message}")]
    Failed { message: String },
}

impl ReactiveError {
    /// Build an error from a user computation's failure.
    pub fn failed(message: impl fmt::Display) -> Self {
        ReactiveError::Failed {
            message: message.to_string(),
        }
    }

    /// Get the error's kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReactiveError::CyclicDependency { .. } => ErrorKind::CyclicDependency,
            ReactiveError::DuplicateOutputKey { .. } => ErrorKind::DuplicateOutputKey,
            ReactiveError::InvalidScopeTask { .. } => ErrorKind::InvalidScopeTask,
            ReactiveError::DoubleDispose { .. } => ErrorKind::DoubleDispose,
            ReactiveError::StaleReadOutsideEvaluation => ErrorKind::StaleReadOutsideEvaluation,
            ReactiveError::UseAfterDestroy { .. } => ErrorKind::UseAfterDestroy,
            ReactiveError::CallbackPanicked { .. } => ErrorKind::CallbackPanicked,
            ReactiveError::CleanupFailed { .. } => ErrorKind::CleanupFailed,
            ReactiveError::Failed { .. } => ErrorKind::Failed,
        }
    }

    /// Human readable explanation of what went wrong and how to fix it.
    pub fn explanation(&self) -> &'static str {
        match self {
            ReactiveError::CyclicDependency { .. } => {
                "A computation ended up reading its own value. Break the loop by \
                 peeking one of the values instead of using it."
            }
            ReactiveError::DuplicateOutputKey { .. } => {
                "The processor of a keyed transform returned the same key for two \
                 different input entries. Output keys must be unique."
            }
            ReactiveError::InvalidScopeTask { .. } => {
                "Scopes form a tree: a scope can only be owned by one parent and \
                 never by itself or its descendants."
            }
            ReactiveError::DoubleDispose { .. } => {
                "The object was already cleaned up through another path. This is \
                 harmless and only reported for diagnostics."
            }
            ReactiveError::StaleReadOutsideEvaluation => {
                "A use context was kept past the computation it was given to. Read \
                 state through the context only while the callback runs."
            }
            ReactiveError::UseAfterDestroy { .. } => {
                "The state object's scope was destroyed, so it no longer takes part \
                 in the graph. Keep the scope alive for as long as it is used."
            }
            ReactiveError::CallbackPanicked { .. } => {
                "A user callback panicked. The remaining callbacks still ran."
            }
            ReactiveError::CleanupFailed { .. } => {
                "A cleanup task failed. The remaining tasks of the scope were still \
                 cleaned up."
            }
            ReactiveError::Failed { .. } => "A user computation returned an error.",
        }
    }

    /// Turn the error into a structured report.
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            raw: self.to_string(),
            message: self.explanation().to_string(),
            trace: String::new(),
            context: None,
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        ReactiveError::CallbackPanicked { message }
    }
}

/// Structured error value handed to the host's reporting channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,

    /// The error's technical description.
    pub raw: String,

    /// Explanation aimed at the person reading the log.
    pub message: String,

    /// Evaluation stack at the time of the report, innermost last.
    pub trace: String,

    /// Additional context, such as the operation that was running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl ErrorReport {
    /// Attach the operation that was running.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub(crate) fn with_trace(mut self, trace: String) -> Self {
        self.trace = trace;
        self
    }

    /// Serialize the report for a host logging channel.
    pub fn to_json(&self) -> String {
        // Every field is a plain string or enum tag, so this cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| self.raw.clone())
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.raw)?;
        if let Some(context) = &self.context {
            write!(f, " (while {context})")?;
        }
        Ok(())
    }
}

/// Run `attempt`, routing any error or panic to `fallback`.
///
/// # Example
///
/// ```rust
/// use trellis_core::{safe, ReactiveError};
///
/// let value = safe(|| Err(ReactiveError::failed("no data")), |_| 0);
/// assert_eq!(value, 0);
/// ```
pub fn safe<S, A, F>(attempt: A, fallback: F) -> S
where
    A: FnOnce() -> Result<S, ReactiveError>,
    F: FnOnce(ReactiveError) -> S,
{
    match panic::catch_unwind(AssertUnwindSafe(attempt)) {
        Ok(Ok(value)) => value,
        Ok(Err(error)) => fallback(error),
        Err(payload) => fallback(ReactiveError::from_panic(payload)),
    }
}

/// Run a user callback, turning a panic into an error.
pub(crate) fn catch_callback<R>(callback: impl FnOnce() -> R) -> Result<R, ReactiveError> {
    panic::catch_unwind(AssertUnwindSafe(callback)).map_err(ReactiveError::from_panic)
}
