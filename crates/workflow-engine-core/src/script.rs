// Copyright (c) 2025 Workflow Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! The sandboxed script substrate (C3) backing `script` steps.
//!
//! Only the sandbox's contract is fixed (read access to `inputs`/`steps`/
//! `variables`, a bounded expression-depth, and a hard wall-clock timeout).
//! This engine uses [`rhai`], configured with a conservative expression-depth
//! cap and no module resolver, so a script body can read the workflow's data
//! but cannot reach the filesystem, network, or host process. Evaluation
//! itself runs on a `spawn_blocking` thread so a tight, non-yielding script
//! loop can't stall the timeout race (a script that ignores the timeout
//! keeps running on that thread until it finishes; only the caller stops
//! waiting on it).

use crate::error::{EngineError, Result};
use crate::value::Value;
use rhai::{Dynamic, Engine, Map as RhaiMap, Scope as RhaiScope};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::time::Duration;

/// Expression/statement nesting cap handed to [`Engine::set_max_expr_depths`].
/// Generous enough for any realistic script body, tight enough to reject a
/// pathological or malicious one before it can exhaust the stack.
const MAX_EXPR_DEPTH: usize = 64;

/// The sandboxed script engine. Stateless and cheap to construct per
/// evaluation; the teacher's equivalent keeps one instance alive on the
/// executor, so this engine is built once and reused across script steps.
pub struct ScriptEngine {
    rhai: Engine,
}

impl ScriptEngine {
    #[must_use]
    pub fn new() -> Self {
        let mut rhai = Engine::new();
        rhai.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_EXPR_DEPTH);
        rhai.set_max_operations(10_000_000);
        // No module resolver is registered, so `import` statements fail —
        // a script body sees only the bindings it's handed.
        Self { rhai }
    }

    /// Runs `code` with `bindings` (typically `inputs`, `steps`, and any
    /// `variables` the workflow declared) visible as immutable constants, and
    /// races it against `timeout`.
    pub async fn eval(
        &self,
        code: &str,
        bindings: &HashMap<String, Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let mut scope = RhaiScope::new();
        for (name, value) in bindings {
            scope.push_constant_dynamic(name.clone(), json_to_dynamic(value.as_json()));
        }

        let ast = self
            .rhai
            .compile(code)
            .map_err(|e| EngineError::script(e.to_string()))?;

        // `rhai`'s evaluator is synchronous and doesn't yield, so it can't be
        // preempted by polling alone; run it on a blocking-pool thread and
        // race *that* against the timeout instead of the inline call.
        let engine = self.rhai.clone();
        let eval_future = async move {
            tokio::task::spawn_blocking(move || {
                engine
                    .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
                    .map_err(EngineError::from)
            })
            .await
            .unwrap_or_else(|join_err| Err(EngineError::script(format!("script task panicked: {join_err}"))))
        };

        match tokio::time::timeout(timeout, eval_future).await {
            Ok(Ok(dynamic)) => dynamic_to_value(&dynamic),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EngineError::ScriptTimeout(timeout)),
        }
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn json_to_dynamic(value: &Json) -> Dynamic {
    match value {
        Json::Null => Dynamic::UNIT,
        Json::Bool(b) => Dynamic::from(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::UNIT
            }
        }
        Json::String(s) => Dynamic::from(s.clone()),
        Json::Array(arr) => {
            let items: Vec<Dynamic> = arr.iter().map(json_to_dynamic).collect();
            Dynamic::from(items)
        }
        Json::Object(obj) => {
            let map: RhaiMap = obj
                .iter()
                .map(|(k, v)| (k.as_str().into(), json_to_dynamic(v)))
                .collect();
            Dynamic::from(map)
        }
    }
}

fn dynamic_to_value(dynamic: &Dynamic) -> Result<Value> {
    dynamic_to_json(dynamic).map(Value::from)
}

fn dynamic_to_json(dynamic: &Dynamic) -> Result<Json> {
    if dynamic.is_unit() {
        return Ok(Json::Null);
    }
    if let Some(b) = dynamic.clone().try_cast::<bool>() {
        return Ok(Json::Bool(b));
    }
    if let Some(i) = dynamic.clone().try_cast::<i64>() {
        return Ok(Json::Number(i.into()));
    }
    if let Some(f) = dynamic.clone().try_cast::<f64>() {
        return Ok(serde_json::Number::from_f64(f).map_or(Json::Null, Json::Number));
    }
    if let Some(s) = dynamic.clone().try_cast::<String>() {
        return Ok(Json::String(s));
    }
    if dynamic.is_array() {
        let arr = dynamic
            .clone()
            .into_array()
            .map_err(|t| EngineError::script(format!("cannot convert array of type {t}")))?;
        let values = arr.iter().map(dynamic_to_json).collect::<Result<Vec<_>>>()?;
        return Ok(Json::Array(values));
    }
    if dynamic.is_map() {
        let map = dynamic
            .clone()
            .try_cast::<RhaiMap>()
            .ok_or_else(|| EngineError::script("expected a map"))?;
        let mut obj = serde_json::Map::new();
        for (k, v) in map {
            obj.insert(k.to_string(), dynamic_to_json(&v)?);
        }
        return Ok(Json::Object(obj));
    }
    Err(EngineError::script(format!(
        "script returned an unsupported type: {}",
        dynamic.type_name()
    )))
}
