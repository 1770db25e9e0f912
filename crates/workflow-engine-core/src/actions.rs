// Copyright (c) 2025 Workflow Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! External interfaces (C8): the action registry/executor contracts.
//!
//! The engine sees an opaque action catalog. This is generalized from the
//! teacher's `LLMProvider`/`ProviderError` pair: where the teacher had one
//! concrete provider kind (LLM completion), the engine here only knows a
//! `service.method` name and an already-resolved input record — what the
//! call means is entirely up to the registered executor.

use crate::cancel::CancelSignal;
use crate::value::Value;
use async_trait::async_trait;
use std::collections::HashMap;

/// Per-call context handed to an [`ActionExecutor`]: the cancel signal the
/// executor should honor, and the step-id/attempt it's running for (useful
/// for structured logging at the call site).
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub cancel: CancelSignal,
    pub step_id: String,
    pub attempt: u32,
}

/// Resolves a service name (the prefix before the first `.` in `action`) to
/// whatever configuration the executor needs. The engine itself never
/// inspects the resolved config; it only uses `resolve` to fail fast on an
/// unknown service before invoking the executor.
pub trait ActionRegistry: Send + Sync {
    fn resolve(&self, service: &str) -> Option<Value>;

    /// Optional: lists known methods for a service. Used by editor-style
    /// tooling, never by the engine itself.
    fn actions(&self, _service: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Invokes one `action` step. Implementations must honor `ctx.cancel`:
/// racing the actual call against the signal is the executor's
/// responsibility, since only it knows how to abort an in-flight call.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(
        &self,
        action: &str,
        resolved_inputs: &HashMap<String, Value>,
        ctx: &ActionContext,
    ) -> Result<Value, ActionError>;
}

/// Errors an [`ActionExecutor`] may surface. Every variant's message is
/// stringified into the step's `StepResult.error` (§6.2).
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("action failed: {0}")]
    Failed(String),

    #[error("action timed out")]
    Timeout,

    #[error("action cancelled: {0}")]
    Cancelled(String),
}

/// Splits `"service.method"` into its two halves (§4.4 action semantics).
#[must_use]
pub fn split_action(action: &str) -> Option<(&str, &str)> {
    action.split_once('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_service_and_method() {
        assert_eq!(split_action("slack.chat.postMessage"), Some(("slack", "chat.postMessage")));
        assert_eq!(split_action("noop"), None);
    }
}
