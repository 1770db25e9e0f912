// Copyright (c) 2025 Workflow Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! The top-level workflow driver (C7, §4.7): validates a [`Workflow`], binds
//! its root scope, drives the step tree through [`crate::executor`], and
//! packages the result.

use crate::actions::{ActionExecutor, ActionRegistry};
use crate::cancel::CancelSignal;
use crate::executor::{execute_block, ExecutionContext};
use crate::scope::Scope;
use crate::script::ScriptEngine;
use crate::step::StepResult;
use crate::value::Value;
use crate::workflow::{Workflow, WorkflowLoader};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Completed,
    Failed,
    Cancelled,
}

/// The terminal record for one top-level (or sub-workflow) execution (§3.6).
pub struct WorkflowResult {
    pub status: WorkflowStatus,
    pub output: HashMap<String, Value>,
    pub step_results: Vec<StepResult>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Owns the external collaborators a workflow execution needs and drives
/// one (or, recursively through `subworkflow`, several nested) execution.
#[derive(Clone)]
pub struct WorkflowDriver {
    registry: Arc<dyn ActionRegistry>,
    executor: Arc<dyn ActionExecutor>,
    scripts: Arc<ScriptEngine>,
    loader: Arc<dyn WorkflowLoader>,
    default_max_concurrent: Option<usize>,
}

impl WorkflowDriver {
    #[must_use]
    pub fn new(
        registry: Arc<dyn ActionRegistry>,
        executor: Arc<dyn ActionExecutor>,
        scripts: Arc<ScriptEngine>,
        loader: Arc<dyn WorkflowLoader>,
    ) -> Self {
        Self {
            registry,
            executor,
            scripts,
            loader,
            default_max_concurrent: None,
        }
    }

    /// Sets the concurrency bound used by any `parallel` step that doesn't
    /// declare its own `max_concurrent` (e.g. the CLI's `--max-concurrent`).
    #[must_use]
    pub fn with_default_max_concurrent(mut self, n: Option<usize>) -> Self {
        self.default_max_concurrent = n;
        self
    }

    /// Runs `workflow` to completion (§4.7):
    /// 1. resolve declared input defaults,
    /// 2. validate (unique ids, required inputs),
    /// 3. bind a fresh root scope (`inputs`, empty `steps`),
    /// 4. recursively execute the step tree,
    /// 5. package the terminal [`WorkflowResult`].
    pub async fn execute(&self, workflow: &Workflow, inputs: HashMap<String, Value>, cancel: Option<CancelSignal>) -> WorkflowResult {
        let started_at = Utc::now();
        let cancel = cancel.unwrap_or_default();
        let resolved_inputs = workflow.resolve_inputs(inputs);

        if let Err(err) = workflow.validate(&resolved_inputs) {
            error!(workflow_id = %workflow.workflow.id, error = %err, "workflow validation failed");
            return WorkflowResult {
                status: WorkflowStatus::Failed,
                output: HashMap::new(),
                step_results: Vec::new(),
                started_at,
                ended_at: Utc::now(),
            };
        }

        let ctx = ExecutionContext::new(
            cancel.clone(),
            self.registry.clone(),
            self.executor.clone(),
            self.scripts.clone(),
            self.loader.clone(),
        )
        .with_default_max_concurrent(self.default_max_concurrent);

        let mut scope = Scope::root();
        let inputs_map: serde_json::Map<String, serde_json::Value> =
            resolved_inputs.iter().map(|(k, v)| (k.clone(), v.as_json().clone())).collect();
        scope.bind_reserved("inputs", Value::object(inputs_map));
        scope.bind_reserved("steps", Value::object(serde_json::Map::new()));

        info!(workflow_id = %workflow.workflow.id, steps = workflow.steps.len(), "workflow started");
        let result = execute_block(&workflow.steps, scope, &ctx).await;
        let ended_at = Utc::now();
        let step_results = ctx.ledger.lock().clone();

        let (status, output) = match result {
            Ok((scope, _)) => {
                info!(workflow_id = %workflow.workflow.id, "workflow completed");
                (WorkflowStatus::Completed, root_output(&scope))
            }
            Err(err) if err.is_cancelled() => {
                info!(workflow_id = %workflow.workflow.id, "workflow cancelled");
                (WorkflowStatus::Cancelled, HashMap::new())
            }
            Err(err) => {
                error!(workflow_id = %workflow.workflow.id, error = %err, "workflow failed");
                (WorkflowStatus::Failed, HashMap::new())
            }
        };

        WorkflowResult {
            status,
            output,
            step_results,
            started_at,
            ended_at,
        }
    }
}

/// The workflow's output is every non-reserved binding left in the root
/// frame once the step tree finishes.
fn root_output(scope: &Scope) -> HashMap<String, Value> {
    scope
        .snapshot()
        .into_iter()
        .filter(|(k, _)| !crate::scope::is_reserved(k))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockActionExecutor, MockLoader};
    use serde_json::json;

    fn driver(executor: MockActionExecutor) -> WorkflowDriver {
        WorkflowDriver::new(
            Arc::new(executor.clone()),
            Arc::new(executor),
            Arc::new(ScriptEngine::new()),
            Arc::new(MockLoader::default()),
        )
    }

    #[tokio::test]
    async fn completed_workflow_exposes_root_bindings_as_output() {
        let mock = MockActionExecutor::default();
        mock.stub("greet.hello", Value::string("hi"));
        let driver = driver(mock);
        let workflow = Workflow::from_json(json!({
            "workflow": {"id": "w1", "name": "greet"},
            "steps": [
                {"id": "s1", "type": "action", "action": "greet.hello", "output_variable": "greeting"}
            ]
        }))
        .unwrap();

        let result = driver.execute(&workflow, HashMap::new(), None).await;
        assert_eq!(result.status, WorkflowStatus::Completed);
        assert_eq!(result.output.get("greeting").unwrap().as_str(), Some("hi"));
        assert_eq!(result.step_results.len(), 1);
    }

    #[tokio::test]
    async fn missing_required_input_fails_before_any_step_runs() {
        let mock = MockActionExecutor::default();
        let driver = driver(mock);
        let workflow = Workflow::from_json(json!({
            "workflow": {"id": "w1", "name": "t"},
            "inputs": {"name": {"type": "string", "required": true}},
            "steps": [{"id": "s1", "type": "script", "inputs": {"code": "1"}}]
        }))
        .unwrap();

        let result = driver.execute(&workflow, HashMap::new(), None).await;
        assert_eq!(result.status, WorkflowStatus::Failed);
        assert!(result.step_results.is_empty());
    }

    #[tokio::test]
    async fn failing_step_fails_the_workflow() {
        let mock = MockActionExecutor::default();
        mock.fail("svc.method", "boom");
        let driver = driver(mock);
        let workflow = Workflow::from_json(json!({
            "workflow": {"id": "w1", "name": "t"},
            "steps": [{"id": "s1", "type": "action", "action": "svc.method"}]
        }))
        .unwrap();

        let result = driver.execute(&workflow, HashMap::new(), None).await;
        assert_eq!(result.status, WorkflowStatus::Failed);
        assert_eq!(result.step_results.len(), 1);
    }
}
