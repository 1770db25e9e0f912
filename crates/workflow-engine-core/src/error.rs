// Copyright (c) 2025 Workflow Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the workflow engine.

use std::time::Duration;

/// Convenience result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// All errors the engine itself can produce.
///
/// `MaxIterationsReached` is deliberately absent: reaching a `while` loop's
/// `max_iterations` is a clean stop recorded on the step result, not a
/// failure (see [`crate::step::EarlyExit`]).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed workflow document: duplicate ids, unknown step kind, a
    /// missing required input. Fatal — the workflow fails before any step
    /// runs.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Template parse/eval failure.
    #[error("expression error: {message}")]
    Expression { message: String },

    /// Script body failed to parse or evaluate.
    #[error("script error: {message}")]
    Script { message: String },

    /// Script body exceeded its configured timeout.
    #[error("script timed out after {0:?}")]
    ScriptTimeout(Duration),

    /// Error surfaced by an `ActionExecutor`.
    #[error("action error: {message}")]
    Action { message: String },

    /// A step kind received a value of the wrong shape (e.g. `for_each`
    /// over a non-sequence).
    #[error("type error: {message}")]
    Type { message: String },

    /// A frame exceeded its effective deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Cancellation was requested. Not retried; propagates to the nearest
    /// `try`/`finally` and then to the driver.
    #[error("cancelled: {reason}")]
    Cancelled { reason: String },
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn expression(message: impl Into<String>) -> Self {
        Self::Expression {
            message: message.into(),
        }
    }

    pub fn script(message: impl Into<String>) -> Self {
        Self::Script {
            message: message.into(),
        }
    }

    pub fn action(message: impl Into<String>) -> Self {
        Self::Action {
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type {
            message: message.into(),
        }
    }

    /// True for errors that must never be retried (cancellation only).
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Expression {
            message: format!("json error: {err}"),
        }
    }
}

impl From<Box<rhai::EvalAltResult>> for EngineError {
    fn from(err: Box<rhai::EvalAltResult>) -> Self {
        Self::Script {
            message: err.to_string(),
        }
    }
}

impl From<rhai::ParseError> for EngineError {
    fn from(err: rhai::ParseError) -> Self {
        Self::Script {
            message: err.to_string(),
        }
    }
}
