// Copyright (c) 2025 Workflow Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! Black-box coverage of the step interpreter through the public
//! `WorkflowDriver` surface: conditionals, retry/fallback, try/catch, and
//! sub-workflow composition.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use workflow_engine_core::testing::{MockActionExecutor, MockLoader};
use workflow_engine_core::value::Value;
use workflow_engine_core::workflow::Workflow;
use workflow_engine_core::{WorkflowDriver, WorkflowStatus};

fn driver(executor: MockActionExecutor, loader: MockLoader) -> WorkflowDriver {
    WorkflowDriver::new(
        Arc::new(executor.clone()),
        Arc::new(executor),
        Arc::new(workflow_engine_core::script::ScriptEngine::new()),
        Arc::new(loader),
    )
}

#[tokio::test]
async fn if_step_runs_the_taken_branch_only() {
    let mock = MockActionExecutor::default();
    let d = driver(mock, MockLoader::default());
    let workflow = Workflow::from_json(json!({
        "workflow": {"id": "w", "name": "cond"},
        "steps": [{
            "id": "branch",
            "type": "if",
            "condition": "{{ inputs.flag }}",
            "then": [{"id": "t", "type": "script", "inputs": {"code": "\"then\""}, "output_variable": "path"}],
            "else": [{"id": "e", "type": "script", "inputs": {"code": "\"else\""}, "output_variable": "path"}]
        }]
    }))
    .unwrap();

    let mut inputs = HashMap::new();
    inputs.insert("flag".to_string(), Value::bool(false));
    let result = d.execute(&workflow, inputs, None).await;

    assert_eq!(result.status, WorkflowStatus::Completed);
    assert_eq!(result.output.get("path").unwrap().as_str(), Some("else"));
    assert_eq!(result.step_results.len(), 1);
}

#[tokio::test]
async fn retry_with_fallback_step_recovers_the_workflow() {
    let mock = MockActionExecutor::default();
    mock.fail("billing.charge", "card declined");
    mock.stub("billing.charge_backup", Value::string("charged via backup"));
    let d = driver(mock, MockLoader::default());

    let workflow = Workflow::from_json(json!({
        "workflow": {"id": "w", "name": "billing"},
        "steps": [
            {
                "id": "charge",
                "type": "action",
                "action": "billing.charge",
                "error_handling": {"action": "retry", "max_retries": 1, "retry_delay_ms": 1, "fallback_step": "charge_backup"},
                "output_variable": "receipt"
            },
            {
                "id": "charge_backup",
                "type": "action",
                "action": "billing.charge_backup",
                "condition": "{{ false }}",
                "output_variable": "receipt"
            }
        ]
    }))
    .unwrap();

    let result = d.execute(&workflow, HashMap::new(), None).await;
    assert_eq!(result.status, WorkflowStatus::Completed);
    assert_eq!(result.output.get("receipt").unwrap().as_str(), Some("charged via backup"));
}

#[tokio::test]
async fn try_catch_finally_runs_all_three_blocks() {
    let mock = MockActionExecutor::default();
    mock.fail("svc.flaky", "boom");
    let d = driver(mock, MockLoader::default());

    let workflow = Workflow::from_json(json!({
        "workflow": {"id": "w", "name": "resilient"},
        "steps": [{
            "id": "guarded",
            "type": "try",
            "try": [{"id": "risky", "type": "action", "action": "svc.flaky"}],
            "catch": [{"id": "recover", "type": "script", "inputs": {"code": "error.message"}, "output_variable": "caught"}],
            "finally": [{"id": "cleanup", "type": "script", "inputs": {"code": "true"}, "output_variable": "cleaned_up"}]
        }]
    }))
    .unwrap();

    let result = d.execute(&workflow, HashMap::new(), None).await;
    assert_eq!(result.status, WorkflowStatus::Completed);
    assert!(result.output.get("caught").unwrap().as_str().unwrap().contains("boom"));
    assert_eq!(result.output.get("cleaned_up").unwrap().as_json(), &json!(true));
}

#[tokio::test]
async fn subworkflow_step_adopts_the_nested_workflows_output() {
    let nested = Workflow::from_json(json!({
        "workflow": {"id": "nested", "name": "nested"},
        "steps": [{"id": "n1", "type": "script", "inputs": {"code": "inputs.x + 1"}, "output_variable": "result"}]
    }))
    .unwrap();

    let loader = MockLoader::default();
    loader.register("nested.json", nested);

    let mock = MockActionExecutor::default();
    let d = driver(mock, loader);

    let workflow = Workflow::from_json(json!({
        "workflow": {"id": "w", "name": "parent"},
        "steps": [{
            "id": "call",
            "type": "subworkflow",
            "workflow": "nested.json",
            "inputs": {"x": 41},
            "output_variable": "nested_output"
        }]
    }))
    .unwrap();

    let result = d.execute(&workflow, HashMap::new(), None).await;
    assert_eq!(result.status, WorkflowStatus::Completed);
    let nested_output = result.output.get("nested_output").unwrap();
    assert_eq!(nested_output.as_json().get("result").unwrap(), &json!(42.0));
}
