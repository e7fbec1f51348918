//! Engine error taxonomy
//!
//! Every rules operation returns `EngineResult<T>`. Errors are local to a
//! single tool call; none of them poison the session.

use serde::Serialize;
use thiserror::Error;

/// Errors raised by the rules engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Out-of-range dice, negative amounts, malformed ids
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Entity id not present in the ledger
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// Countdown name not present in the tracker
    #[error("unknown countdown: {0}")]
    UnknownCountdown(String),

    /// Roll-dependent call before its roll, wrong rest move count, etc.
    #[error("illegal sequence: {0}")]
    IllegalSequence(String),

    /// Repeat of a one-shot event; safe to ignore on retry
    #[error("already resolved: {0}")]
    AlreadyResolved(String),
}

/// Wire-level error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    UnknownEntity,
    IllegalSequence,
    AlreadyResolved,
}

impl EngineError {
    /// Classify for the wire
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidInput(_) => ErrorKind::InvalidInput,
            EngineError::UnknownEntity(_) | EngineError::UnknownCountdown(_) => {
                ErrorKind::UnknownEntity
            }
            EngineError::IllegalSequence(_) => ErrorKind::IllegalSequence,
            EngineError::AlreadyResolved(_) => ErrorKind::AlreadyResolved,
        }
    }

    /// Whether the error is a safe no-op rather than a failure
    pub fn is_noop(&self) -> bool {
        matches!(self, EngineError::AlreadyResolved(_))
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        EngineError::InvalidInput(msg.into())
    }

    pub(crate) fn sequence(msg: impl Into<String>) -> Self {
        EngineError::IllegalSequence(msg.into())
    }
}

/// Result alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
