//! Engine error taxonomy
//!
//! `FiberError` covers protocol violations inside the engine; `Failure` is
//! the serializable record a wait holds while a failure travels up the
//! stack, one frame per poll iteration.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::fiber::wait::Need;

/// A failure held by a wait and delivered to its continuation.
///
/// Failures cross the persistence boundary, so they carry a stable code
/// plus a human-readable message rather than a live error value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub code: String,
    pub message: String,
}

impl Failure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Errors surfaced by fiber operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FiberError {
    /// An operation ran while the wait was in an incompatible lifecycle
    /// state. Always a programming error in the caller, never retried.
    #[error("invalid need: expected {expected:?}, actual {actual:?}")]
    InvalidNeed { expected: Need, actual: Need },

    /// A posted item does not satisfy the wait's declared expectation and
    /// no type-tag coercion applies. Delivered to the continuation as a
    /// stored failure rather than thrown past the engine.
    #[error("posted {posted} does not satisfy a wait expecting {expected}")]
    InvalidType { expected: String, posted: String },

    /// A continuation returned a wait that is neither the current frame's
    /// armed wait nor the empty sentinel. Fatal: a continuation is broken.
    #[error("continuation returned a wait that is neither the current wait nor the empty sentinel")]
    InvalidNext,

    /// A continuation that captures non-persistable state reached the
    /// encoder. Fatal at save time.
    #[error("cannot persist continuation {name}: it captures non-persistable state")]
    ClosureCapture { name: String },

    /// A failure raised by continuation code.
    #[error("{0}")]
    Failed(Failure),
}

impl FiberError {
    pub(crate) fn invalid_need(expected: Need, actual: Need) -> Self {
        FiberError::InvalidNeed { expected, actual }
    }

    /// The stable code of this error, matching what `Failure::from` records.
    pub fn code(&self) -> &str {
        match self {
            FiberError::InvalidNeed { .. } => "invalid-need",
            FiberError::InvalidType { .. } => "invalid-type",
            FiberError::InvalidNext => "invalid-next",
            FiberError::ClosureCapture { .. } => "closure-capture",
            FiberError::Failed(failure) => &failure.code,
        }
    }
}

impl From<Failure> for FiberError {
    fn from(failure: Failure) -> Self {
        FiberError::Failed(failure)
    }
}

impl From<&FiberError> for Failure {
    fn from(error: &FiberError) -> Self {
        match error {
            FiberError::Failed(failure) => failure.clone(),
            other => Failure::new(other.code().to_string(), other.to_string()),
        }
    }
}
