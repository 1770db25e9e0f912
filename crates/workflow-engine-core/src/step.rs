// Copyright (c) 2025 Workflow Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! The step algebra (§3.3): a tagged variant with one payload per kind,
//! matching the teacher's `StepType`/`StepStatus` shape but generalized to
//! the full control-flow vocabulary this engine interprets.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single node in the step tree. The common header fields apply to every
/// kind; `kind` carries the kind-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// `{{ ... }}` expression; false (by truthiness) skips the step.
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub error_handling: Option<Policy>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub output_variable: Option<String>,
    /// Each value is an expression-or-literal, resolved before the step body
    /// runs; nested arrays/objects are resolved recursively.
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    #[serde(flatten)]
    pub kind: StepKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    Action {
        /// `"service.method"`.
        action: String,
    },
    /// `code` and an optional `timeout` (ms) live in the common `inputs` map
    /// (§3.3: `inputs.code`, `inputs.timeout?`), resolved like any other
    /// step's inputs rather than as dedicated fields here.
    Script,
    If {
        condition: String,
        then: Vec<Step>,
        #[serde(default)]
        r#else: Vec<Step>,
    },
    Switch {
        expression: String,
        cases: Vec<SwitchCase>,
        #[serde(default)]
        default: Vec<Step>,
    },
    ForEach {
        items: String,
        #[serde(default = "default_item_variable")]
        item_variable: String,
        #[serde(default = "default_index_variable")]
        index_variable: String,
        steps: Vec<Step>,
    },
    While {
        condition: String,
        #[serde(default = "default_max_iterations")]
        max_iterations: u32,
        steps: Vec<Step>,
    },
    Parallel {
        branches: Vec<Branch>,
        #[serde(default)]
        max_concurrent: Option<usize>,
        #[serde(default)]
        on_error: OnError,
    },
    Try {
        r#try: Vec<Step>,
        /// Absent (not merely empty) means there is no recovery path: a
        /// failing `try` block fails the whole step. An explicit `catch: []`
        /// runs zero recovery steps and succeeds — a deliberate "swallow the
        /// error" declaration.
        #[serde(default)]
        catch: Option<Vec<Step>>,
        #[serde(default)]
        finally: Vec<Step>,
    },
    Map {
        items: String,
        #[serde(default = "default_item_variable")]
        item_variable: String,
        expression: String,
    },
    Filter {
        items: String,
        #[serde(default = "default_item_variable")]
        item_variable: String,
        condition: String,
    },
    Reduce {
        items: String,
        #[serde(default = "default_item_variable")]
        item_variable: String,
        expression: String,
        #[serde(default = "default_accumulator_variable")]
        accumulator_variable: String,
        #[serde(default)]
        initial_value: Value,
    },
    /// The sub-workflow's call arguments are the common `inputs` map.
    Subworkflow {
        workflow: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchCase {
    pub when: String,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    #[default]
    Stop,
    Continue,
}

fn default_item_variable() -> String {
    "item".to_string()
}

fn default_index_variable() -> String {
    "index".to_string()
}

fn default_accumulator_variable() -> String {
    "accumulator".to_string()
}

fn default_max_iterations() -> u32 {
    100
}

/// The error-handling descriptor attached to a step (§3.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Policy {
    Stop {
        #[serde(default)]
        max_retries: u32,
    },
    Continue,
    Retry {
        #[serde(default)]
        max_retries: u32,
        #[serde(default = "default_retry_delay_ms")]
        retry_delay_ms: u64,
        #[serde(default)]
        backoff: Backoff,
        #[serde(default)]
        fallback_step: Option<String>,
    },
}

impl Default for Policy {
    fn default() -> Self {
        Policy::Stop { max_retries: 0 }
    }
}

impl Policy {
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        match self {
            Policy::Stop { max_retries } | Policy::Retry { max_retries, .. } => *max_retries,
            Policy::Continue => 0,
        }
    }

    #[must_use]
    pub fn is_continue(&self) -> bool {
        matches!(self, Policy::Continue)
    }
}

fn default_retry_delay_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    Fixed,
    #[default]
    Exponential,
}

/// Execution status for a step (§3.5), mirroring the teacher's `StepStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// The terminal record for one executed step (§3.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,
    pub attempts: u32,
    /// Set on a `while` step that stopped at `max_iterations` rather than
    /// failing or exhausting its condition naturally.
    #[serde(default)]
    pub early_exit: Option<EarlyExit>,
}

/// A clean, non-failure termination reason (§9 glossary "Early exit").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarlyExit {
    MaxIterations,
}
