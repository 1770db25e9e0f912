// Copyright (c) 2025 Workflow Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! Black-box coverage of the iteration kinds through `WorkflowDriver`:
//! `for_each`, `while`, `map`, `filter`, and `reduce`.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use workflow_engine_core::step::EarlyExit;
use workflow_engine_core::testing::{MockActionExecutor, MockLoader};
use workflow_engine_core::workflow::Workflow;
use workflow_engine_core::{WorkflowDriver, WorkflowStatus};

fn driver() -> WorkflowDriver {
    let mock = MockActionExecutor::default();
    WorkflowDriver::new(
        Arc::new(mock.clone()),
        Arc::new(mock),
        Arc::new(workflow_engine_core::script::ScriptEngine::new()),
        Arc::new(MockLoader::default()),
    )
}

#[tokio::test]
async fn for_each_binds_item_and_index_per_iteration() {
    let d = driver();
    let workflow = Workflow::from_json(json!({
        "workflow": {"id": "w", "name": "loop"},
        "inputs": {"items": {"type": "array", "default": [10, 20, 30]}},
        "steps": [
            {"id": "acc_init", "type": "script", "inputs": {"code": "0"}, "output_variable": "total"},
            {
                "id": "loop",
                "type": "for_each",
                "items": "{{ inputs.items }}",
                "item_variable": "n",
                "index_variable": "i",
                "steps": [
                    {"id": "add", "type": "script", "inputs": {"code": "total + n + i"}, "output_variable": "total"}
                ]
            }
        ]
    }))
    .unwrap();

    let result = d.execute(&workflow, HashMap::new(), None).await;
    assert_eq!(result.status, WorkflowStatus::Completed);
    // totals accumulate across iterations since `total` is bound in the root
    // scope before the loop and each iteration frame only shadows `n`/`i`.
    assert_eq!(result.output.get("total").unwrap().as_f64(), Some(63.0));
}

#[tokio::test]
async fn while_loop_stops_at_max_iterations_and_records_early_exit() {
    let d = driver();
    let workflow = Workflow::from_json(json!({
        "workflow": {"id": "w", "name": "loop"},
        "steps": [
            {"id": "init", "type": "script", "inputs": {"code": "0"}, "output_variable": "count"},
            {
                "id": "loop",
                "type": "while",
                "condition": "{{ true }}",
                "max_iterations": 3,
                "steps": [
                    {"id": "bump", "type": "script", "inputs": {"code": "count + 1"}, "output_variable": "count"}
                ]
            }
        ]
    }))
    .unwrap();

    let result = d.execute(&workflow, HashMap::new(), None).await;
    assert_eq!(result.status, WorkflowStatus::Completed);
    assert_eq!(result.output.get("count").unwrap().as_f64(), Some(3.0));
    let loop_result = result.step_results.iter().find(|r| r.step_id == "loop").unwrap();
    assert_eq!(loop_result.early_exit, Some(EarlyExit::MaxIterations));
}

#[tokio::test]
async fn map_filter_reduce_compose_over_a_shared_list() {
    let d = driver();
    let workflow = Workflow::from_json(json!({
        "workflow": {"id": "w", "name": "pipeline"},
        "inputs": {"items": {"type": "array", "default": [1, 2, 3, 4, 5]}},
        "steps": [
            {
                "id": "doubled",
                "type": "map",
                "items": "{{ inputs.items }}",
                "item_variable": "n",
                "expression": "n * 2",
                "output_variable": "doubled"
            },
            {
                "id": "evens",
                "type": "filter",
                "items": "{{ doubled }}",
                "item_variable": "n",
                "condition": "n % 4 == 0",
                "output_variable": "evens"
            },
            {
                "id": "summed",
                "type": "reduce",
                "items": "{{ evens }}",
                "item_variable": "n",
                "accumulator_variable": "acc",
                "expression": "acc + n",
                "initial_value": 0,
                "output_variable": "summed"
            }
        ]
    }))
    .unwrap();

    let result = d.execute(&workflow, HashMap::new(), None).await;
    assert_eq!(result.status, WorkflowStatus::Completed);
    assert_eq!(
        result.output.get("doubled").unwrap().as_json(),
        &json!([2.0, 4.0, 6.0, 8.0, 10.0])
    );
    assert_eq!(result.output.get("evens").unwrap().as_json(), &json!([4.0, 8.0]));
    assert_eq!(result.output.get("summed").unwrap().as_f64(), Some(12.0));
}
