// Copyright (c) 2025 Workflow Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tree-walking evaluator over the [`Expr`] AST.

use super::ast::{BinaryOp, Expr, PathSegment, UnaryOp};
use super::filters;
use crate::error::{EngineError, Result};
use crate::value::Value;
use std::collections::HashMap;

/// Evaluates `expr` against a flat binding context (a [`crate::scope::Scope`]
/// snapshot, typically).
pub fn eval(expr: &Expr, ctx: &HashMap<String, Value>) -> Result<Value> {
    match expr {
        Expr::Null => Ok(Value::null()),
        Expr::Bool(b) => Ok(Value::bool(*b)),
        Expr::Number(n) => Ok(Value::number(*n)),
        Expr::Str(s) => Ok(Value::string(s.clone())),
        Expr::Path { root, segments } => eval_path(root, segments, ctx),
        Expr::Call { name, args } => eval_call(name, args, ctx),
        Expr::Filter { input, name, args } => eval_filter(input, name, args, ctx),
        Expr::Unary { op, expr } => eval_unary(*op, expr, ctx),
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, ctx),
        Expr::Ternary {
            cond,
            then_branch,
            else_branch,
        } => {
            if eval(cond, ctx)?.is_truthy() {
                eval(then_branch, ctx)
            } else {
                eval(else_branch, ctx)
            }
        }
    }
}

fn eval_path(root: &str, segments: &[PathSegment], ctx: &HashMap<String, Value>) -> Result<Value> {
    let mut current = ctx.get(root).cloned().unwrap_or(Value::null());
    for segment in segments {
        current = match segment {
            PathSegment::Key(key) => current.get_path(key),
            PathSegment::Index(idx_expr) => {
                let idx = eval(idx_expr, ctx)?
                    .as_f64()
                    .ok_or_else(|| EngineError::expression("array index must be a number"))?;
                current.get_path(&format!("[{}]", idx as i64))
            }
        };
    }
    Ok(current)
}

fn eval_call(name: &str, args: &[Expr], ctx: &HashMap<String, Value>) -> Result<Value> {
    match name {
        "now" => {
            if !args.is_empty() {
                return Err(EngineError::expression("now() takes no arguments"));
            }
            Ok(Value::number(chrono::Utc::now().timestamp_millis() as f64))
        }
        other => Err(EngineError::expression(format!("unknown function '{other}'"))),
    }
}

fn eval_filter(
    input: &Expr,
    name: &str,
    args: &[Expr],
    ctx: &HashMap<String, Value>,
) -> Result<Value> {
    let input_value = eval(input, ctx)?;

    // `and`/`or` short-circuit: the right-hand argument is only evaluated if
    // the input's truthiness doesn't already decide the result.
    if filters::is_short_circuit(name) {
        let short_circuits_on = name == "or";
        if input_value.is_truthy() == short_circuits_on {
            return Ok(input_value);
        }
        let arg = args
            .first()
            .ok_or_else(|| EngineError::expression(format!("filter '{name}' expects an argument")))?;
        return eval(arg, ctx);
    }

    let arg_values = args
        .iter()
        .map(|a| eval(a, ctx))
        .collect::<Result<Vec<_>>>()?;
    filters::apply(name, input_value, &arg_values)
}

fn eval_unary(op: UnaryOp, expr: &Expr, ctx: &HashMap<String, Value>) -> Result<Value> {
    let v = eval(expr, ctx)?;
    match op {
        UnaryOp::Not => Ok(Value::bool(!v.is_truthy())),
        UnaryOp::Neg => {
            let n = v
                .as_f64()
                .ok_or_else(|| EngineError::expression("unary '-' requires a number"))?;
            Ok(Value::number(-n))
        }
    }
}

fn eval_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, ctx: &HashMap<String, Value>) -> Result<Value> {
    // `and`/`or` as bare binary keywords also short-circuit.
    if op == BinaryOp::And {
        let l = eval(lhs, ctx)?;
        if !l.is_truthy() {
            return Ok(l);
        }
        return eval(rhs, ctx);
    }
    if op == BinaryOp::Or {
        let l = eval(lhs, ctx)?;
        if l.is_truthy() {
            return Ok(l);
        }
        return eval(rhs, ctx);
    }

    let l = eval(lhs, ctx)?;
    let r = eval(rhs, ctx)?;

    match op {
        BinaryOp::Add => {
            if let (Some(a), Some(b)) = (l.as_str(), r.as_str()) {
                return Ok(Value::string(format!("{a}{b}")));
            }
            if l.as_json().is_string() || r.as_json().is_string() {
                return Ok(Value::string(format!(
                    "{}{}",
                    l.to_display_string(),
                    r.to_display_string()
                )));
            }
            Ok(Value::number(num(&l, "+")? + num(&r, "+")?))
        }
        BinaryOp::Sub => Ok(Value::number(num(&l, "-")? - num(&r, "-")?)),
        BinaryOp::Mul => Ok(Value::number(num(&l, "*")? * num(&r, "*")?)),
        BinaryOp::Div => {
            let divisor = num(&r, "/")?;
            if divisor == 0.0 {
                return Err(EngineError::expression("division by zero"));
            }
            Ok(Value::number(num(&l, "/")? / divisor))
        }
        BinaryOp::Mod => {
            let divisor = num(&r, "%")?;
            if divisor == 0.0 {
                return Err(EngineError::expression("modulo by zero"));
            }
            Ok(Value::number(num(&l, "%")? % divisor))
        }
        BinaryOp::Eq => Ok(Value::bool(l == r)),
        BinaryOp::Ne => Ok(Value::bool(l != r)),
        BinaryOp::Lt => compare(&l, &r, |o| o == std::cmp::Ordering::Less),
        BinaryOp::Le => compare(&l, &r, |o| o != std::cmp::Ordering::Greater),
        BinaryOp::Gt => compare(&l, &r, |o| o == std::cmp::Ordering::Greater),
        BinaryOp::Ge => compare(&l, &r, |o| o != std::cmp::Ordering::Less),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn num(v: &Value, op: &str) -> Result<f64> {
    v.as_f64()
        .ok_or_else(|| EngineError::expression(format!("operator '{op}' requires numbers")))
}

fn compare(l: &Value, r: &Value, accept: impl Fn(std::cmp::Ordering) -> bool) -> Result<Value> {
    let ordering = match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (l.as_str(), r.as_str()) {
            (Some(a), Some(b)) => Some(a.cmp(b)),
            _ => None,
        },
    }
    .ok_or_else(|| EngineError::expression("comparison requires two numbers or two strings"))?;
    Ok(Value::bool(accept(ordering)))
}
