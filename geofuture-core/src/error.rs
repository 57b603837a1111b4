use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::geocoding::GeocodeError;

/// The reason a task failed.
///
/// Cheap to clone: every observer of a failed task shares the same underlying
/// error, so the cause chain is never rewritten on its way through `map`,
/// `flat_map`, `combine` and friends.
#[derive(Clone)]
pub struct Failure(Arc<anyhow::Error>);

impl Failure {
    /// Wrap any error as a task failure
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(err.into()))
    }

    /// Build a failure from a caught panic payload
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::new(Panicked(message))
    }

    /// The innermost error of the cause chain
    pub fn root_cause(&self) -> &(dyn std::error::Error + 'static) {
        self.0.root_cause()
    }

    /// Look for an error of type `E` anywhere in the cause chain
    pub fn find<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.0.chain().find_map(|cause| cause.downcast_ref::<E>())
    }

    /// Classify the failure by what caused it
    pub fn kind(&self) -> FailureKind {
        if self.find::<GeocodeError>().is_some() {
            FailureKind::Transport
        } else if self.find::<IllegalArgument>().is_some() {
            FailureKind::Semantic
        } else if self.find::<Panicked>().is_some() {
            FailureKind::Panicked
        } else {
            FailureKind::Other
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// Broad category of a [`Failure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network or response error from the geocoder
    Transport,
    /// Domain validation error raised on purpose
    Semantic,
    /// A task body or continuation panicked
    Panicked,
    Other,
}

/// Returned by [`Task::wait`](crate::Task::wait) when the task failed.
///
/// The wrapped [`Failure`] is the error source, so the original error and
/// its message stay reachable through `source()` and [`root_cause`](Self::root_cause).
#[derive(Debug, Error)]
#[error("task completed with failure: {cause}")]
pub struct CompletionError {
    #[source]
    cause: Failure,
}

impl CompletionError {
    pub(crate) fn new(cause: Failure) -> Self {
        Self { cause }
    }

    pub fn cause(&self) -> &Failure {
        &self.cause
    }

    pub fn root_cause(&self) -> &(dyn std::error::Error + 'static) {
        self.cause.root_cause()
    }
}

/// Validation error used to inject semantic failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct IllegalArgument(pub String);

/// A panic captured inside a task
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task panicked: {0}")]
pub struct Panicked(pub String);
