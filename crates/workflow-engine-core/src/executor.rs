// Copyright (c) 2025 Workflow Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! The recursive step interpreter (C4, §4.4): `execute_block`/`execute_step`
//! walk the step tree, threading a [`Scope`] by value through each call so
//! the retry loop (§4.5) and nested async recursion never fight the borrow
//! checker over a shared `&mut Scope`.

use crate::actions::{split_action, ActionContext, ActionError, ActionExecutor, ActionRegistry};
use crate::cancel::CancelSignal;
use crate::concurrency::{self, BranchOutcome};
use crate::error::{EngineError, Result};
use crate::expr;
use crate::retry;
use crate::scope::Scope;
use crate::script::ScriptEngine;
use crate::step::{EarlyExit, OnError, Policy, Step, StepKind, StepResult, StepStatus};
use crate::value::Value;
use crate::workflow::WorkflowLoader;
use chrono::Utc;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Everything one step needs from its surroundings that isn't carried in its
/// own fields: the external collaborators (§C8), the shared step ledger, and
/// the cancel/deadline pair every frame observes.
#[derive(Clone)]
pub struct ExecutionContext {
    pub cancel: CancelSignal,
    pub deadline: Option<tokio::time::Instant>,
    pub registry: Arc<dyn ActionRegistry>,
    pub executor: Arc<dyn ActionExecutor>,
    pub scripts: Arc<ScriptEngine>,
    pub loader: Arc<dyn WorkflowLoader>,
    pub ledger: Arc<parking_lot::Mutex<Vec<StepResult>>>,
    /// Fallback bound for any `parallel` step that doesn't declare its own
    /// `max_concurrent` (driver-level default, e.g. a CLI flag).
    pub default_max_concurrent: Option<usize>,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(
        cancel: CancelSignal,
        registry: Arc<dyn ActionRegistry>,
        executor: Arc<dyn ActionExecutor>,
        scripts: Arc<ScriptEngine>,
        loader: Arc<dyn WorkflowLoader>,
    ) -> Self {
        Self {
            cancel,
            deadline: None,
            registry,
            executor,
            scripts,
            loader,
            ledger: Arc::new(parking_lot::Mutex::new(Vec::new())),
            default_max_concurrent: None,
        }
    }

    #[must_use]
    pub fn with_default_max_concurrent(mut self, n: Option<usize>) -> Self {
        self.default_max_concurrent = n;
        self
    }

    /// Derives a child context whose deadline is the earlier of the current
    /// one and `now + timeout_seconds` (§4.4 "effective deadline"). `None`
    /// leaves the inherited deadline untouched.
    #[must_use]
    fn with_timeout(&self, timeout_seconds: Option<u64>) -> Self {
        let mut ctx = self.clone();
        if let Some(secs) = timeout_seconds {
            let candidate = tokio::time::Instant::now() + Duration::from_secs(secs);
            ctx.deadline = Some(match ctx.deadline {
                Some(existing) => existing.min(candidate),
                None => candidate,
            });
        }
        ctx
    }

    /// Time left before the effective deadline, or `None` if there is none.
    #[must_use]
    fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(tokio::time::Instant::now()))
    }

    fn steps_snapshot(&self) -> Value {
        let ledger = self.ledger.lock();
        steps_value(&ledger)
    }
}

fn steps_value(ledger: &[StepResult]) -> Value {
    let mut map = serde_json::Map::new();
    for result in ledger {
        let mut entry = serde_json::Map::new();
        entry.insert("status".to_string(), serde_json::json!(result.status));
        entry.insert("output".to_string(), result.output.as_json().clone());
        entry.insert("error".to_string(), serde_json::json!(result.error));
        entry.insert("duration_ms".to_string(), serde_json::json!(result.duration_ms));
        entry.insert("attempts".to_string(), serde_json::json!(result.attempts));
        map.insert(result.step_id.clone(), serde_json::Value::Object(entry));
    }
    Value::object(map)
}

/// Appends `result` to the shared ledger and refreshes the reserved `steps`
/// binding so later expressions see it (§3.2, §6.2).
fn record(scope: &mut Scope, ctx: &ExecutionContext, result: StepResult) {
    ctx.ledger.lock().push(result);
    scope.bind_root("steps", ctx.steps_snapshot());
}

fn duration_ms(started_at: chrono::DateTime<Utc>, ended_at: chrono::DateTime<Utc>) -> u64 {
    (ended_at - started_at).num_milliseconds().max(0) as u64
}

/// Resolves one input value: a string containing `{{` is rendered as a
/// template, any other string passes through literally, and arrays/objects
/// resolve recursively (§3.3 "each value is an expression-or-literal").
fn resolve_value(value: &Value, ctx: &HashMap<String, Value>) -> Result<Value> {
    match value.as_json() {
        serde_json::Value::String(s) if expr::has_expression(s) => expr::render(s, ctx),
        serde_json::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_value(&Value::from(item.clone()), ctx)?.into_json());
            }
            Ok(Value::from(serde_json::Value::Array(out)))
        }
        serde_json::Value::Object(obj) => {
            let mut out = serde_json::Map::new();
            for (k, v) in obj {
                out.insert(k.clone(), resolve_value(&Value::from(v.clone()), ctx)?.into_json());
            }
            Ok(Value::from(serde_json::Value::Object(out)))
        }
        _ => Ok(value.clone()),
    }
}

fn resolve_inputs(inputs: &HashMap<String, Value>, ctx: &HashMap<String, Value>) -> Result<HashMap<String, Value>> {
    let mut resolved = HashMap::with_capacity(inputs.len());
    for (k, v) in inputs {
        resolved.insert(k.clone(), resolve_value(v, ctx)?);
    }
    Ok(resolved)
}

fn loop_record(index: usize, len: usize) -> Value {
    Value::from(serde_json::json!({
        "index": index,
        "first": index == 0,
        "last": index + 1 == len,
        "length": len,
    }))
}

fn error_record(err: &EngineError, step_id: &str, attempts: u32) -> Value {
    Value::from(serde_json::json!({
        "message": err.to_string(),
        "step_id": step_id,
        "attempts": attempts,
    }))
}

/// Executes a sequence of sibling steps in order, threading `scope` through
/// each. The block's output is its last step's output (`null` if `steps` is
/// empty or every step was skipped).
pub fn execute_block<'a>(
    steps: &'a [Step],
    scope: Scope,
    ctx: &'a ExecutionContext,
) -> BoxFuture<'a, Result<(Scope, Value)>> {
    Box::pin(async move {
        let mut scope = scope;
        let mut last_output = Value::null();
        for step in steps {
            if ctx.cancel.is_cancelled() {
                return Err(EngineError::Cancelled {
                    reason: ctx.cancel.reason().unwrap_or_default(),
                });
            }
            let (next_scope, output) = execute_step(step, steps, scope, ctx).await?;
            scope = next_scope;
            last_output = output;
        }
        Ok((scope, last_output))
    })
}

/// Executes one step: pre-flight (condition, input resolution, deadline),
/// the retry loop around the kind-specific body, and post-flight (binding
/// `output_variable`, recording the `StepResult`, substituting `fallback_step`
/// on retry exhaustion).
///
/// `siblings` is the block `step` was declared in — the lookup scope for a
/// `retry` policy's `fallback_step` id (§4.5).
#[instrument(skip_all, fields(step_id = %step.id))]
pub fn execute_step<'a>(
    step: &'a Step,
    siblings: &'a [Step],
    scope: Scope,
    ctx: &'a ExecutionContext,
) -> BoxFuture<'a, Result<(Scope, Value)>> {
    Box::pin(async move {
        let started_at = Utc::now();
        let mut scope = scope;

        if let Some(cond_src) = &step.condition {
            let snap = scope.snapshot();
            if !expr::eval_expr(cond_src, &snap)?.is_truthy() {
                debug!(step_id = %step.id, "condition false, skipping");
                record(
                    &mut scope,
                    ctx,
                    StepResult {
                        step_id: step.id.clone(),
                        status: StepStatus::Skipped,
                        output: Value::null(),
                        error: None,
                        started_at,
                        ended_at: Utc::now(),
                        duration_ms: 0,
                        attempts: 0,
                        early_exit: None,
                    },
                );
                return Ok((scope, Value::null()));
            }
        }

        let snap = scope.snapshot();
        let resolved_inputs = resolve_inputs(&step.inputs, &snap)?;
        let step_ctx = ctx.with_timeout(step.timeout_seconds);
        let policy = step.error_handling.clone().unwrap_or_default();

        let outcome = retry::run_with_policy(&policy, &step_ctx.cancel, |attempt| {
            let scope_attempt = scope.clone();
            let resolved_inputs = &resolved_inputs;
            async move { run_kind_body(step, scope_attempt, resolved_inputs, &step_ctx, attempt).await }
        })
        .await;

        let ended_at = Utc::now();
        match outcome.result {
            Ok((mut new_scope, value, early_exit)) => {
                if let Some(name) = &step.output_variable {
                    new_scope.bind(name.clone(), value.clone());
                }
                record(
                    &mut new_scope,
                    ctx,
                    StepResult {
                        step_id: step.id.clone(),
                        status: StepStatus::Completed,
                        output: value.clone(),
                        error: None,
                        started_at,
                        ended_at,
                        duration_ms: duration_ms(started_at, ended_at),
                        attempts: outcome.attempts,
                        early_exit,
                    },
                );
                Ok((new_scope, value))
            }
            Err(err) => {
                if err.is_cancelled() {
                    return Err(err);
                }
                warn!(step_id = %step.id, error = %err, "step failed");
                record(
                    &mut scope,
                    ctx,
                    StepResult {
                        step_id: step.id.clone(),
                        status: StepStatus::Failed,
                        output: Value::null(),
                        error: Some(err.to_string()),
                        started_at,
                        ended_at,
                        duration_ms: duration_ms(started_at, ended_at),
                        attempts: outcome.attempts,
                        early_exit: None,
                    },
                );
                if let Policy::Retry {
                    fallback_step: Some(fallback_id),
                    ..
                } = &policy
                {
                    match siblings.iter().find(|s| &s.id == fallback_id) {
                        Some(fallback) => {
                            debug!(
                                step_id = %step.id,
                                fallback_step = %fallback_id,
                                "retries exhausted, substituting fallback step"
                            );
                            return execute_step(fallback, siblings, scope, ctx).await;
                        }
                        None => warn!(
                            step_id = %step.id,
                            fallback_step = %fallback_id,
                            "fallback_step id not found among sibling steps, propagating failure"
                        ),
                    }
                }
                if policy.is_continue() {
                    if let Some(name) = &step.output_variable {
                        scope.bind(name.clone(), Value::null());
                    }
                    Ok((scope, Value::null()))
                } else {
                    Err(err)
                }
            }
        }
    })
}

/// Runs the kind-specific body for one attempt. Returns the updated scope,
/// the step's output value, and an optional early-exit marker (only ever set
/// by `while`).
fn run_kind_body<'a>(
    step: &'a Step,
    scope: Scope,
    resolved_inputs: &'a HashMap<String, Value>,
    ctx: &'a ExecutionContext,
    attempt: u32,
) -> BoxFuture<'a, Result<(Scope, Value, Option<EarlyExit>)>> {
    Box::pin(async move {
        match &step.kind {
            StepKind::Action { action } => {
                run_action(action, resolved_inputs, scope, step, ctx, attempt).await.map(|(s, v)| (s, v, None))
            }
            StepKind::Script => run_script(resolved_inputs, scope, ctx).await.map(|(s, v)| (s, v, None)),
            StepKind::If { condition, then, r#else } => {
                let snap = scope.snapshot();
                let branch = if expr::eval_expr(condition, &snap)?.is_truthy() { then } else { r#else };
                let (s, v) = execute_block(branch, scope, ctx).await?;
                Ok((s, v, None))
            }
            StepKind::Switch { expression, cases, default } => {
                let snap = scope.snapshot();
                let key = expr::eval_expr(expression, &snap)?.to_display_string();
                let matched = cases.iter().find(|case| case.when == key).map(|case| &case.steps);
                let branch = matched.unwrap_or(default);
                let (s, v) = execute_block(branch, scope, ctx).await?;
                Ok((s, v, None))
            }
            StepKind::ForEach {
                items,
                item_variable,
                index_variable,
                steps,
            } => run_for_each(items, item_variable, index_variable, steps, scope, step, ctx)
                .await
                .map(|(s, v)| (s, v, None)),
            StepKind::While {
                condition,
                max_iterations,
                steps,
            } => run_while(condition, *max_iterations, steps, scope, ctx).await,
            StepKind::Parallel {
                branches,
                max_concurrent,
                on_error,
            } => run_parallel_step(branches, *max_concurrent, *on_error, scope, ctx)
                .await
                .map(|(s, v)| (s, v, None)),
            StepKind::Try { r#try, catch, finally } => {
                run_try(r#try, catch.as_deref(), finally, scope, step, ctx, attempt).await.map(|(s, v)| (s, v, None))
            }
            StepKind::Map { items, item_variable, expression } => {
                run_map(items, item_variable, expression, &scope).map(|v| (scope, v, None))
            }
            StepKind::Filter { items, item_variable, condition } => {
                run_filter(items, item_variable, condition, &scope).map(|v| (scope, v, None))
            }
            StepKind::Reduce {
                items,
                item_variable,
                expression,
                accumulator_variable,
                initial_value,
            } => run_reduce(items, item_variable, expression, accumulator_variable, initial_value, &scope)
                .map(|v| (scope, v, None)),
            StepKind::Subworkflow { workflow } => {
                run_subworkflow(workflow, resolved_inputs, scope, ctx).await.map(|(s, v)| (s, v, None))
            }
        }
    })
}

async fn run_action(
    action: &str,
    resolved_inputs: &HashMap<String, Value>,
    scope: Scope,
    step: &Step,
    ctx: &ExecutionContext,
    attempt: u32,
) -> Result<(Scope, Value)> {
    let (service, _method) =
        split_action(action).ok_or_else(|| EngineError::validation(format!("malformed action '{action}'")))?;
    if ctx.registry.resolve(service).is_none() {
        return Err(EngineError::action(format!("unknown service '{service}'")));
    }
    let action_ctx = ActionContext {
        cancel: ctx.cancel.clone(),
        step_id: step.id.clone(),
        attempt,
    };
    let call = ctx.executor.execute(action, resolved_inputs, &action_ctx);
    let value = match ctx.remaining() {
        Some(remaining) => match tokio::time::timeout(remaining, call).await {
            Ok(result) => result,
            Err(_) => return Err(EngineError::Timeout(remaining)),
        },
        None => call.await,
    }
    .map_err(|e| match e {
        ActionError::Cancelled(reason) => EngineError::Cancelled { reason },
        ActionError::Timeout => EngineError::Timeout(Duration::default()),
        other => EngineError::action(other.to_string()),
    })?;
    Ok((scope, value))
}

async fn run_script(resolved_inputs: &HashMap<String, Value>, scope: Scope, ctx: &ExecutionContext) -> Result<(Scope, Value)> {
    let code = resolved_inputs
        .get("code")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::validation("script step missing 'inputs.code'"))?;
    let timeout = resolved_inputs
        .get("timeout")
        .and_then(Value::as_f64)
        .map(|ms| Duration::from_millis(ms as u64))
        .or_else(|| ctx.remaining())
        .unwrap_or(Duration::from_secs(30));

    let mut bindings = scope.snapshot();
    let variables = Value::object(bindings.iter().map(|(k, v)| (k.clone(), v.as_json().clone())).collect());
    bindings.insert("variables".to_string(), variables);

    let value = ctx.scripts.eval(code, &bindings, timeout).await?;
    Ok((scope, value))
}

#[allow(clippy::too_many_arguments)]
async fn run_for_each(
    items_expr: &str,
    item_variable: &str,
    index_variable: &str,
    steps: &[Step],
    scope: Scope,
    step: &Step,
    ctx: &ExecutionContext,
) -> Result<(Scope, Value)> {
    let snap = scope.snapshot();
    let items_value = expr::eval_expr(items_expr, &snap)?;
    let items = items_value
        .as_array()
        .ok_or_else(|| EngineError::type_error("for_each.items did not evaluate to a sequence"))?
        .clone();

    let policy = step.error_handling.clone().unwrap_or_default();
    let mut outputs = Vec::with_capacity(items.len());

    for (index, item) in items.iter().enumerate() {
        let mut iter_scope = scope.clone();
        iter_scope.push();
        iter_scope.bind_reserved(item_variable, Value::from(item.clone()));
        iter_scope.bind_reserved(index_variable, Value::number(index as f64));
        iter_scope.bind_reserved("loop", loop_record(index, items.len()));

        match execute_block(steps, iter_scope, ctx).await {
            Ok((_, output)) => outputs.push(output.into_json()),
            Err(err) if policy.is_continue() => {
                warn!(step_id = %step.id, index, error = %err, "for_each iteration failed, continuing");
                outputs.push(serde_json::Value::Null);
            }
            Err(err) => return Err(err),
        }
    }

    Ok((scope, Value::from(serde_json::Value::Array(outputs))))
}

async fn run_while(
    condition: &str,
    max_iterations: u32,
    steps: &[Step],
    scope: Scope,
    ctx: &ExecutionContext,
) -> Result<(Scope, Value, Option<EarlyExit>)> {
    let mut scope = scope;
    let mut last_output = Value::null();
    let mut iterations = 0u32;
    let mut early_exit = None;

    loop {
        let snap = scope.snapshot();
        if !expr::eval_expr(condition, &snap)?.is_truthy() {
            break;
        }
        if iterations >= max_iterations {
            early_exit = Some(EarlyExit::MaxIterations);
            break;
        }
        let mut iter_scope = scope.clone();
        iter_scope.push();
        iter_scope.bind_reserved("loop", loop_record(iterations as usize, 0));
        let (_, output) = execute_block(steps, iter_scope, ctx).await?;
        last_output = output;
        iterations += 1;
    }

    Ok((scope, last_output, early_exit))
}

async fn run_parallel_step(
    branches: &[crate::step::Branch],
    max_concurrent: Option<usize>,
    on_error: OnError,
    scope: Scope,
    ctx: &ExecutionContext,
) -> Result<(Scope, Value)> {
    let max_concurrent = max_concurrent.or(ctx.default_max_concurrent);
    let outcome = concurrency::run_parallel(branches, max_concurrent, on_error, &ctx.cancel, |_idx, branch, branch_cancel| {
        let branch_scope = scope.fork();
        let mut branch_ctx = ctx.clone();
        branch_ctx.cancel = branch_cancel;
        let branch_id = branch.id.clone();
        async move {
            match execute_block(&branch.steps, branch_scope, &branch_ctx).await {
                Ok((final_scope, _)) => BranchOutcome {
                    branch_id,
                    success: true,
                    scope_writes: final_scope.top_frame().clone(),
                    step_results: Vec::new(),
                    error: None,
                },
                Err(err) => BranchOutcome {
                    branch_id,
                    success: false,
                    scope_writes: HashMap::new(),
                    step_results: Vec::new(),
                    error: Some(err.to_string()),
                },
            }
        }
    })
    .await;

    let mut scope = scope;
    for (key, value) in &outcome.merged_writes {
        scope.bind(key.clone(), value.clone());
    }
    // Branch-internal action/script steps recorded into their own forked
    // scope's root frame, not this one; refresh from the shared ledger so
    // expressions after this step see every branch's results.
    scope.bind_root("steps", ctx.steps_snapshot());

    if outcome.success {
        let branch_outputs: serde_json::Map<String, serde_json::Value> = outcome
            .branch_outcomes
            .iter()
            .map(|b| (b.branch_id.clone(), serde_json::json!(b.success)))
            .collect();
        Ok((scope, Value::object(branch_outputs)))
    } else {
        let failures: Vec<String> = outcome
            .branch_outcomes
            .iter()
            .filter(|b| !b.success)
            .filter_map(|b| b.error.clone())
            .collect();
        Err(EngineError::action(format!("parallel branch(es) failed: {}", failures.join("; "))))
    }
}

/// `try`/`catch`/`finally` each own their own scope frame, discarded on exit
/// like any other nested block (§3.2 "scopes are owned by the frame that
/// created them; destroyed on frame exit") — none of their bindings leak
/// into the step that contains the `try`.
async fn run_try(
    r#try: &[Step],
    catch: Option<&[Step]>,
    finally: &[Step],
    scope: Scope,
    step: &Step,
    ctx: &ExecutionContext,
    attempt: u32,
) -> Result<(Scope, Value)> {
    let mut try_scope = scope.clone();
    try_scope.push();
    let try_result = execute_block(r#try, try_scope, ctx).await;

    let mut pending_error: Option<EngineError> = None;
    let mut value = Value::null();
    match try_result {
        Ok((_, v)) => value = v,
        Err(err) => match catch {
            Some(catch_steps) => {
                let mut catch_scope = scope.clone();
                catch_scope.push();
                catch_scope.bind_reserved("error", error_record(&err, &step.id, attempt + 1));
                match execute_block(catch_steps, catch_scope, ctx).await {
                    Ok((_, v)) => value = v,
                    Err(catch_err) => pending_error = Some(catch_err),
                }
            }
            None => pending_error = Some(err),
        },
    }

    let mut finally_scope = scope.clone();
    finally_scope.push();
    if let Err(finally_err) = execute_block(finally, finally_scope, ctx).await {
        // A failing `finally` overrides whatever preceded it.
        pending_error = Some(finally_err);
        value = Value::null();
    }

    // try/catch/finally each ran against a clone of `scope`, so any `record()`
    // inside them updated that clone's root frame, not this one; refresh from
    // the shared ledger so a step after the `try` still sees `steps.<id>` for
    // whatever ran inside it.
    let mut scope = scope;
    scope.bind_root("steps", ctx.steps_snapshot());

    match pending_error {
        Some(err) => Err(err),
        None => Ok((scope, value)),
    }
}

fn run_map(items_expr: &str, item_variable: &str, expression: &str, scope: &Scope) -> Result<Value> {
    let snap = scope.snapshot();
    let items = expr::eval_expr(items_expr, &snap)?
        .as_array()
        .ok_or_else(|| EngineError::type_error("map.items did not evaluate to a sequence"))?
        .clone();

    let mut out = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let mut iter_ctx = snap.clone();
        iter_ctx.insert(item_variable.to_string(), Value::from(item.clone()));
        iter_ctx.insert("loop".to_string(), loop_record(index, items.len()));
        out.push(expr::eval_expr(expression, &iter_ctx)?.into_json());
    }
    Ok(Value::from(serde_json::Value::Array(out)))
}

fn run_filter(items_expr: &str, item_variable: &str, condition: &str, scope: &Scope) -> Result<Value> {
    let snap = scope.snapshot();
    let items = expr::eval_expr(items_expr, &snap)?
        .as_array()
        .ok_or_else(|| EngineError::type_error("filter.items did not evaluate to a sequence"))?
        .clone();

    let mut out = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let mut iter_ctx = snap.clone();
        iter_ctx.insert(item_variable.to_string(), Value::from(item.clone()));
        iter_ctx.insert("loop".to_string(), loop_record(index, items.len()));
        if expr::eval_expr(condition, &iter_ctx)?.is_truthy() {
            out.push(item.clone());
        }
    }
    Ok(Value::from(serde_json::Value::Array(out)))
}

fn run_reduce(
    items_expr: &str,
    item_variable: &str,
    expression: &str,
    accumulator_variable: &str,
    initial_value: &Value,
    scope: &Scope,
) -> Result<Value> {
    let snap = scope.snapshot();
    let items = expr::eval_expr(items_expr, &snap)?
        .as_array()
        .ok_or_else(|| EngineError::type_error("reduce.items did not evaluate to a sequence"))?
        .clone();

    let mut accumulator = initial_value.clone();
    for (index, item) in items.iter().enumerate() {
        let mut iter_ctx = snap.clone();
        iter_ctx.insert(item_variable.to_string(), Value::from(item.clone()));
        iter_ctx.insert(accumulator_variable.to_string(), accumulator.clone());
        iter_ctx.insert("loop".to_string(), loop_record(index, items.len()));
        accumulator = expr::eval_expr(expression, &iter_ctx)?;
    }
    Ok(accumulator)
}

async fn run_subworkflow(
    path: &str,
    resolved_inputs: &HashMap<String, Value>,
    scope: Scope,
    ctx: &ExecutionContext,
) -> Result<(Scope, Value)> {
    let workflow = ctx.loader.load(path)?;
    let driver = crate::driver::WorkflowDriver::new(
        ctx.registry.clone(),
        ctx.executor.clone(),
        ctx.scripts.clone(),
        ctx.loader.clone(),
    )
    .with_default_max_concurrent(ctx.default_max_concurrent);
    let result = driver
        .execute(&workflow, resolved_inputs.clone(), Some(ctx.cancel.clone()))
        .await;

    match result.status {
        crate::driver::WorkflowStatus::Completed => {
            let output = result.output.into_iter().map(|(k, v)| (k, v.into_json())).collect();
            Ok((scope, Value::object(output)))
        }
        crate::driver::WorkflowStatus::Cancelled => Err(EngineError::Cancelled {
            reason: ctx.cancel.reason().unwrap_or_default(),
        }),
        crate::driver::WorkflowStatus::Failed => Err(EngineError::action(format!("subworkflow '{path}' failed"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockActionExecutor, MockLoader};
    use crate::value::Value;
    use crate::workflow::Workflow;
    use serde_json::json;

    fn test_ctx(executor: MockActionExecutor) -> ExecutionContext {
        ExecutionContext::new(
            CancelSignal::new(),
            Arc::new(executor.clone()),
            Arc::new(executor),
            Arc::new(ScriptEngine::new()),
            Arc::new(MockLoader::default()),
        )
    }

    #[tokio::test]
    async fn action_step_records_output_and_ledger() {
        let mock = MockActionExecutor::default();
        mock.stub("notify.send", Value::string("ok"));
        let ctx = test_ctx(mock);
        let workflow = Workflow::from_json(json!({
            "workflow": {"id": "w", "name": "t"},
            "steps": [
                {"id": "s1", "type": "action", "action": "notify.send", "output_variable": "out"}
            ]
        }))
        .unwrap();

        let mut scope = Scope::root();
        scope.bind_reserved("inputs", Value::object(serde_json::Map::new()));
        scope.bind_reserved("steps", Value::object(serde_json::Map::new()));
        let (scope, _) = execute_block(&workflow.steps, scope, &ctx).await.unwrap();
        assert_eq!(scope.lookup("out").unwrap().as_str(), Some("ok"));
        assert_eq!(ctx.ledger.lock().len(), 1);
        assert_eq!(ctx.ledger.lock()[0].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn action_step_preserves_scope_for_later_siblings() {
        let mock = MockActionExecutor::default();
        mock.stub("notify.send", Value::string("ok"));
        let ctx = test_ctx(mock);
        let workflow = Workflow::from_json(json!({
            "workflow": {"id": "w", "name": "t"},
            "steps": [
                {"id": "s0", "type": "script", "inputs": {"code": "42"}, "output_variable": "kept"},
                {"id": "s1", "type": "action", "action": "notify.send"},
                {"id": "s2", "type": "script", "inputs": {"code": "kept"}, "output_variable": "echoed"}
            ]
        }))
        .unwrap();

        let mut scope = Scope::root();
        scope.bind_reserved("inputs", Value::object(serde_json::Map::new()));
        scope.bind_reserved("steps", Value::object(serde_json::Map::new()));
        let (scope, _) = execute_block(&workflow.steps, scope, &ctx).await.unwrap();
        assert_eq!(scope.lookup("echoed").unwrap().as_f64(), Some(42.0));
    }

    #[tokio::test]
    async fn condition_false_skips_step() {
        let mock = MockActionExecutor::default();
        let ctx = test_ctx(mock);
        let step: Step = serde_json::from_value(json!({
            "id": "s1",
            "type": "action",
            "action": "svc.method",
            "condition": "{{ false }}",
            "output_variable": "out"
        }))
        .unwrap();
        let mut scope = Scope::root();
        scope.bind_reserved("inputs", Value::object(serde_json::Map::new()));
        scope.bind_reserved("steps", Value::object(serde_json::Map::new()));
        let (scope, _) = execute_step(&step, &[], scope, &ctx).await.unwrap();
        assert!(scope.lookup("out").is_none());
        assert_eq!(ctx.ledger.lock()[0].status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn continue_policy_binds_null_and_does_not_propagate() {
        let mock = MockActionExecutor::default();
        mock.fail("svc.method", "boom");
        let ctx = test_ctx(mock);
        let step: Step = serde_json::from_value(json!({
            "id": "s1",
            "type": "action",
            "action": "svc.method",
            "error_handling": {"action": "continue"},
            "output_variable": "out"
        }))
        .unwrap();
        let mut scope = Scope::root();
        scope.bind_reserved("inputs", Value::object(serde_json::Map::new()));
        scope.bind_reserved("steps", Value::object(serde_json::Map::new()));
        let (scope, output) = execute_step(&step, &[], scope, &ctx).await.unwrap();
        assert!(output.is_null());
        assert!(scope.lookup("out").unwrap().is_null());
    }

    #[tokio::test]
    async fn for_each_maps_items_to_outputs() {
        let mock = MockActionExecutor::default();
        let ctx = test_ctx(mock);
        let step: Step = serde_json::from_value(json!({
            "id": "loop",
            "type": "for_each",
            "items": "{{ [1, 2, 3] }}",
            "steps": [
                {"id": "double", "type": "script", "inputs": {"code": "item * 2"}, "output_variable": "doubled"}
            ]
        }))
        .unwrap();
        let mut scope = Scope::root();
        scope.bind_reserved("inputs", Value::object(serde_json::Map::new()));
        scope.bind_reserved("steps", Value::object(serde_json::Map::new()));
        let (_, output) = execute_step(&step, &[], scope, &ctx).await.unwrap();
        assert_eq!(output.as_json(), &json!([2.0, 4.0, 6.0]));
    }

    #[tokio::test]
    async fn if_step_selects_branch() {
        let mock = MockActionExecutor::default();
        let ctx = test_ctx(mock);
        let step: Step = serde_json::from_value(json!({
            "id": "branch",
            "type": "if",
            "condition": "{{ 1 > 0 }}",
            "then": [{"id": "t", "type": "script", "inputs": {"code": "\"yes\""}}],
            "else": [{"id": "e", "type": "script", "inputs": {"code": "\"no\""}}]
        }))
        .unwrap();
        let mut scope = Scope::root();
        scope.bind_reserved("inputs", Value::object(serde_json::Map::new()));
        scope.bind_reserved("steps", Value::object(serde_json::Map::new()));
        let (_, output) = execute_step(&step, &[], scope, &ctx).await.unwrap();
        assert_eq!(output.as_str(), Some("yes"));
    }

    #[tokio::test]
    async fn try_without_catch_propagates_failure() {
        let mock = MockActionExecutor::default();
        mock.fail("svc.method", "boom");
        let ctx = test_ctx(mock);
        let step: Step = serde_json::from_value(json!({
            "id": "t",
            "type": "try",
            "try": [{"id": "inner", "type": "action", "action": "svc.method"}]
        }))
        .unwrap();
        let mut scope = Scope::root();
        scope.bind_reserved("inputs", Value::object(serde_json::Map::new()));
        scope.bind_reserved("steps", Value::object(serde_json::Map::new()));
        let result = execute_step(&step, &[], scope, &ctx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn try_block_bindings_do_not_leak_to_enclosing_scope() {
        let mock = MockActionExecutor::default();
        let ctx = test_ctx(mock);
        let step: Step = serde_json::from_value(json!({
            "id": "t",
            "type": "try",
            "try": [{"id": "inner", "type": "script", "inputs": {"code": "1"}, "output_variable": "inner_only"}]
        }))
        .unwrap();
        let mut scope = Scope::root();
        scope.bind_reserved("inputs", Value::object(serde_json::Map::new()));
        scope.bind_reserved("steps", Value::object(serde_json::Map::new()));
        let depth_before = scope.depth();
        let (scope, _) = execute_step(&step, &[], scope, &ctx).await.unwrap();
        assert!(scope.lookup("inner_only").is_none());
        assert_eq!(scope.depth(), depth_before);
        assert!(scope.lookup("steps").unwrap().as_json().get("inner").is_some());
    }

    #[tokio::test]
    async fn retry_exhaustion_substitutes_fallback_step() {
        let mock = MockActionExecutor::default();
        mock.fail("svc.method", "boom");
        mock.stub("svc.recover", Value::string("recovered"));
        let ctx = test_ctx(mock);

        let primary: Step = serde_json::from_value(json!({
            "id": "primary",
            "type": "action",
            "action": "svc.method",
            "error_handling": {"action": "retry", "max_retries": 0, "fallback_step": "backup"},
            "output_variable": "out"
        }))
        .unwrap();
        let backup: Step = serde_json::from_value(json!({
            "id": "backup",
            "type": "action",
            "action": "svc.recover",
            "output_variable": "out"
        }))
        .unwrap();
        let siblings = vec![primary.clone(), backup];

        let mut scope = Scope::root();
        scope.bind_reserved("inputs", Value::object(serde_json::Map::new()));
        scope.bind_reserved("steps", Value::object(serde_json::Map::new()));
        let (scope, output) = execute_step(&primary, &siblings, scope, &ctx).await.unwrap();

        assert_eq!(output.as_str(), Some("recovered"));
        assert_eq!(scope.lookup("out").unwrap().as_str(), Some("recovered"));
        let ledger = ctx.ledger.lock();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger[0].step_id, "primary");
        assert_eq!(ledger[0].status, StepStatus::Failed);
        assert_eq!(ledger[1].step_id, "backup");
        assert_eq!(ledger[1].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn try_with_catch_recovers() {
        let mock = MockActionExecutor::default();
        mock.fail("svc.method", "boom");
        let ctx = test_ctx(mock);
        let step: Step = serde_json::from_value(json!({
            "id": "t",
            "type": "try",
            "try": [{"id": "inner", "type": "action", "action": "svc.method"}],
            "catch": [{"id": "recover", "type": "script", "inputs": {"code": "error.message"}}]
        }))
        .unwrap();
        let mut scope = Scope::root();
        scope.bind_reserved("inputs", Value::object(serde_json::Map::new()));
        scope.bind_reserved("steps", Value::object(serde_json::Map::new()));
        let (_, output) = execute_step(&step, &[], scope, &ctx).await.unwrap();
        assert!(output.as_str().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn while_loop_respects_max_iterations() {
        let mock = MockActionExecutor::default();
        let ctx = test_ctx(mock);
        let step: Step = serde_json::from_value(json!({
            "id": "w",
            "type": "while",
            "condition": "{{ true }}",
            "max_iterations": 3,
            "steps": [{"id": "noop", "type": "script", "inputs": {"code": "1"}}]
        }))
        .unwrap();
        let mut scope = Scope::root();
        scope.bind_reserved("inputs", Value::object(serde_json::Map::new()));
        scope.bind_reserved("steps", Value::object(serde_json::Map::new()));
        let (_, _) = execute_step(&step, &[], scope, &ctx).await.unwrap();
        let ledger = ctx.ledger.lock();
        assert_eq!(ledger.last().unwrap().early_exit, Some(EarlyExit::MaxIterations));
    }

    #[tokio::test]
    async fn map_filter_reduce_evaluate_over_items() {
        let mock = MockActionExecutor::default();
        let ctx = test_ctx(mock);
        let mut scope = Scope::root();
        scope.bind_reserved("inputs", Value::object(serde_json::Map::new()));
        scope.bind_reserved("steps", Value::object(serde_json::Map::new()));

        let map_step: Step = serde_json::from_value(json!({
            "id": "m", "type": "map", "items": "{{ [1, 2, 3] }}", "expression": "{{ item * 10 }}"
        }))
        .unwrap();
        let (scope, out) = execute_step(&map_step, &[], scope, &ctx).await.unwrap();
        assert_eq!(out.as_json(), &json!([10.0, 20.0, 30.0]));

        let filter_step: Step = serde_json::from_value(json!({
            "id": "f", "type": "filter", "items": "{{ [1, 2, 3, 4] }}", "condition": "{{ item > 2 }}"
        }))
        .unwrap();
        let (scope, out) = execute_step(&filter_step, &[], scope, &ctx).await.unwrap();
        assert_eq!(out.as_json(), &json!([3.0, 4.0]));

        let reduce_step: Step = serde_json::from_value(json!({
            "id": "r", "type": "reduce", "items": "{{ [1, 2, 3] }}",
            "expression": "{{ accumulator + item }}", "initial_value": 0
        }))
        .unwrap();
        let (_, out) = execute_step(&reduce_step, &[], scope, &ctx).await.unwrap();
        assert_eq!(out.as_f64(), Some(6.0));
    }
}
