// Copyright (c) 2025 Workflow Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! The workflow document model (§6.1) and its load-time validation.

use crate::error::{EngineError, Result};
use crate::step::{Step, StepKind};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Loads and parses the workflow a `subworkflow` step refers to (§4.4,
/// §6.5). Source parsing (Markdown front-matter + embedded YAML) is an
/// out-of-scope collaborator; this trait is the seam the engine calls
/// through instead of knowing anything about file formats.
pub trait WorkflowLoader: Send + Sync {
    fn load(&self, path: &str) -> Result<Workflow>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// One declared input slot (§6.1): `{type, default?, required?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    pub r#type: String,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
}

/// A fully-parsed workflow document. Front-matter/Markdown parsing is a
/// collaborator (§6.1); this is the already-parsed object the engine
/// consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow: WorkflowMeta,
    #[serde(default)]
    pub inputs: HashMap<String, InputSpec>,
    pub steps: Vec<Step>,
}

impl Workflow {
    /// Parses a workflow document from its JSON-shaped representation.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| EngineError::validation(e.to_string()))
    }

    /// Validates structural invariants that must hold before any step runs
    /// (§6.1, §3.2 invariant, §3.3): unique sibling ids, and every declared
    /// required input present (after defaults are applied).
    pub fn validate(&self, resolved_inputs: &HashMap<String, Value>) -> Result<()> {
        validate_unique_ids(&self.steps, &mut HashSet::new())?;

        for (name, spec) in &self.inputs {
            if spec.required && spec.default.is_none() && !resolved_inputs.contains_key(name) {
                return Err(EngineError::validation(format!(
                    "missing required input '{name}'"
                )));
            }
        }
        Ok(())
    }

    /// Applies declared defaults to `inputs`, leaving explicitly-provided
    /// values untouched.
    #[must_use]
    pub fn resolve_inputs(&self, inputs: HashMap<String, Value>) -> HashMap<String, Value> {
        let mut resolved = inputs;
        for (name, spec) in &self.inputs {
            if !resolved.contains_key(name) {
                if let Some(default) = &spec.default {
                    resolved.insert(name.clone(), default.clone());
                }
            }
        }
        resolved
    }
}

fn validate_unique_ids(steps: &[Step], seen: &mut HashSet<String>) -> Result<()> {
    let mut siblings = HashSet::new();
    for step in steps {
        if !siblings.insert(step.id.clone()) {
            return Err(EngineError::validation(format!(
                "duplicate step id '{}' among siblings",
                step.id
            )));
        }
        seen.insert(step.id.clone());
        validate_nested(&step.kind, seen)?;
    }
    Ok(())
}

fn validate_nested(kind: &StepKind, seen: &mut HashSet<String>) -> Result<()> {
    match kind {
        StepKind::If { then, r#else, .. } => {
            validate_unique_ids(then, seen)?;
            validate_unique_ids(r#else, seen)
        }
        StepKind::Switch { cases, default, .. } => {
            for case in cases {
                validate_unique_ids(&case.steps, seen)?;
            }
            validate_unique_ids(default, seen)
        }
        StepKind::ForEach { steps, .. } | StepKind::While { steps, .. } => {
            validate_unique_ids(steps, seen)
        }
        StepKind::Parallel { branches, .. } => {
            for branch in branches {
                validate_unique_ids(&branch.steps, seen)?;
            }
            Ok(())
        }
        StepKind::Try {
            r#try,
            catch,
            finally,
        } => {
            validate_unique_ids(r#try, seen)?;
            if let Some(catch) = catch {
                validate_unique_ids(catch, seen)?;
            }
            validate_unique_ids(finally, seen)
        }
        StepKind::Action { .. }
        | StepKind::Script
        | StepKind::Map { .. }
        | StepKind::Filter { .. }
        | StepKind::Reduce { .. }
        | StepKind::Subworkflow { .. } => Ok(()),
    }
}
