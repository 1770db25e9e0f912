// Copyright (c) 2025 Workflow Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-memory collaborators for exercising the engine without a real action
//! backend or workflow store.
//!
//! Grounded in the call-tracking mock pattern used for state access in the
//! pack's workflow-orchestration examples: a mock records every call it
//! receives and lets a test assert on them, rather than asserting on
//! observable side effects alone.

use crate::actions::{ActionContext, ActionError, ActionExecutor, ActionRegistry};
use crate::error::{EngineError, Result};
use crate::value::Value;
use crate::workflow::{Workflow, WorkflowLoader};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct MockActionState {
    stubs: HashMap<String, Value>,
    failures: HashMap<String, String>,
    calls: Vec<String>,
}

/// A stub [`ActionExecutor`]/[`ActionRegistry`]: every service resolves, and
/// each action either returns a stubbed value, fails with a stubbed message,
/// or defaults to `null`. Records every call it receives.
#[derive(Clone, Default)]
pub struct MockActionExecutor {
    state: Arc<parking_lot::Mutex<MockActionState>>,
}

impl MockActionExecutor {
    pub fn stub(&self, action: impl Into<String>, value: Value) {
        self.state.lock().stubs.insert(action.into(), value);
    }

    pub fn fail(&self, action: impl Into<String>, message: impl Into<String>) {
        self.state.lock().failures.insert(action.into(), message.into());
    }

    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }
}

#[async_trait]
impl ActionExecutor for MockActionExecutor {
    async fn execute(&self, action: &str, _resolved_inputs: &HashMap<String, Value>, _ctx: &ActionContext) -> std::result::Result<Value, ActionError> {
        let mut state = self.state.lock();
        state.calls.push(action.to_string());
        if let Some(message) = state.failures.get(action).cloned() {
            return Err(ActionError::Failed(message));
        }
        Ok(state.stubs.get(action).cloned().unwrap_or_else(Value::null))
    }
}

impl ActionRegistry for MockActionExecutor {
    fn resolve(&self, _service: &str) -> Option<Value> {
        Some(Value::null())
    }
}

/// A stub [`WorkflowLoader`] backed by an in-memory map, for `subworkflow`
/// tests that shouldn't need to touch a filesystem.
#[derive(Clone, Default)]
pub struct MockLoader {
    workflows: Arc<parking_lot::Mutex<HashMap<String, Workflow>>>,
}

impl MockLoader {
    pub fn register(&self, path: impl Into<String>, workflow: Workflow) {
        self.workflows.lock().insert(path.into(), workflow);
    }
}

impl WorkflowLoader for MockLoader {
    fn load(&self, path: &str) -> Result<Workflow> {
        self.workflows
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| EngineError::validation(format!("no workflow registered for '{path}'")))
    }
}
