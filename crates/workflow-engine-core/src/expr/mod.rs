// Copyright (c) 2025 Workflow Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! The `{{ ... }}` expression evaluator (C2): lexer, AST, parser, tree-walking
//! evaluator, and filter dispatch table, tied together behind [`render`].

mod ast;
mod eval;
mod filters;
mod lexer;
mod parser;

use crate::error::Result;
use crate::value::Value;
use std::collections::HashMap;

/// Parses and evaluates one bare `{{ expr }}` fragment (no surrounding text).
pub fn eval_expr(expr_src: &str, ctx: &HashMap<String, Value>) -> Result<Value> {
    let tokens = lexer::lex(expr_src)?;
    let ast = parser::parse(&tokens)?;
    eval::eval(&ast, ctx)
}

/// Renders `template` against `ctx`.
///
/// A template consisting of exactly one `{{ expr }}` fragment and nothing
/// else yields the raw evaluated [`Value`]. Anything else — literal text,
/// multiple fragments, text interleaved with fragments — yields a
/// [`Value::String`] built by stringifying each fragment's result
/// ([`Value::to_display_string`]) and concatenating it with the literal
/// spans around it.
pub fn render(template: &str, ctx: &HashMap<String, Value>) -> Result<Value> {
    let fragments = split_fragments(template);
    if let [Fragment::Expr(expr_src)] = fragments.as_slice() {
        return eval_expr(expr_src, ctx);
    }

    let mut out = String::new();
    for fragment in &fragments {
        match fragment {
            Fragment::Literal(text) => out.push_str(text),
            Fragment::Expr(expr_src) => out.push_str(&eval_expr(expr_src, ctx)?.to_display_string()),
        }
    }
    Ok(Value::string(out))
}

/// True if `template` contains at least one `{{ ... }}` fragment; plain
/// strings with no fragments can skip the render path entirely.
#[must_use]
pub fn has_expression(template: &str) -> bool {
    template.contains("{{")
}

enum Fragment<'a> {
    Literal(&'a str),
    Expr(&'a str),
}

/// Splits `template` into literal and `{{ expr }}` spans, in order.
fn split_fragments(template: &str) -> Vec<Fragment<'_>> {
    let mut fragments = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        if start > 0 {
            fragments.push(Fragment::Literal(&rest[..start]));
        }
        let after_open = &rest[start + 2..];
        match after_open.find("}}") {
            Some(end) => {
                fragments.push(Fragment::Expr(after_open[..end].trim()));
                rest = &after_open[end + 2..];
            }
            None => {
                // Unterminated `{{`: treat the rest of the template as
                // literal text rather than erroring at render time.
                fragments.push(Fragment::Literal(&rest[start..]));
                rest = "";
                break;
            }
        }
    }
    if !rest.is_empty() {
        fragments.push(Fragment::Literal(rest));
    }
    fragments
}
