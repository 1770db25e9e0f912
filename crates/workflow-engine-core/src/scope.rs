// Copyright (c) 2025 Workflow Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! The scope stack (C1): a linked list of frames from the root scope down to
//! whatever block is currently executing, with lookups walking innermost to
//! outermost.

use crate::value::Value;
use std::collections::HashMap;

/// Names the engine injects automatically; user code may never bind these
/// directly (§4.1 invariant — rejected at validation time and a no-op,
/// logged, at runtime).
pub const RESERVED_NAMES: [&str; 4] = ["inputs", "steps", "loop", "error"];

#[must_use]
pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

/// A stack of named binding environments.
///
/// Each nested block (for-each iteration, while iteration, try/catch/finally
/// block, sub-workflow call, parallel branch) pushes a child frame; popping
/// it discards everything bound inside. Lookups are case-sensitive and walk
/// from the innermost frame outward.
#[derive(Debug, Clone)]
pub struct Scope {
    frames: Vec<HashMap<String, Value>>,
}

impl Scope {
    /// A fresh root scope with nothing bound.
    #[must_use]
    pub fn root() -> Self {
        Self {
            frames: vec![HashMap::new()],
        }
    }

    /// Push a new, empty child frame.
    pub fn push(&mut self) {
        self.frames.push(HashMap::new());
    }

    /// Pop the innermost frame, returning the bindings it held.
    ///
    /// Never pops the root frame; a misbehaving caller popping past the root
    /// gets an empty map back instead of panicking, since a scope frame leak
    /// is recoverable and shouldn't take the whole workflow down with it.
    pub fn pop(&mut self) -> HashMap<String, Value> {
        if self.frames.len() <= 1 {
            return HashMap::new();
        }
        self.frames.pop().unwrap_or_default()
    }

    /// Bind `name` in the innermost frame. Rejects reserved names as a no-op
    /// (callers that need to inject reserved bindings use
    /// [`Scope::bind_reserved`]).
    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if is_reserved(&name) {
            tracing::warn!(name = %name, "attempted to bind a reserved name in user scope; ignored");
            return;
        }
        self.bind_reserved(name, value);
    }

    /// Bind `name` in the innermost frame without the reserved-name check.
    /// Used internally to inject `inputs`, `steps`, `loop`, and `error`.
    pub fn bind_reserved(&mut self, name: impl Into<String>, value: Value) {
        self.frames
            .last_mut()
            .expect("scope always has a root frame")
            .insert(name.into(), value);
    }

    /// Bind in the root frame regardless of current nesting depth — used for
    /// the `steps` ledger, which must remain visible after any block pops.
    pub fn bind_root(&mut self, name: impl Into<String>, value: Value) {
        self.frames[0].insert(name.into(), value);
    }

    /// Walk from innermost to outermost frame.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    /// Shallow merge from root to top, used as the expression-evaluation
    /// context and as the frozen view handed to the script sandbox.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Value> {
        let mut merged = HashMap::new();
        for frame in &self.frames {
            for (k, v) in frame {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }

    /// Current nesting depth, root frame counted as depth 1.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Produce an isolated copy-on-write fork for a parallel branch: a deep
    /// clone of every ancestor frame plus one fresh top frame. The branch
    /// writes only into that top frame, so after it finishes
    /// [`Scope::take_top_frame`] yields exactly what it locally bound —
    /// nothing the branch observed from a sibling, since branches never
    /// share a scope.
    #[must_use]
    pub fn fork(&self) -> Self {
        let mut forked = self.clone();
        forked.push();
        forked
    }

    /// Bindings created in the innermost frame, without removing the frame
    /// itself. Used to read back a branch fork's local writes for merging
    /// into the enclosing scope.
    #[must_use]
    pub fn top_frame(&self) -> &HashMap<String, Value> {
        self.frames.last().expect("scope always has a root frame")
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_innermost_to_outermost() {
        let mut scope = Scope::root();
        scope.bind("x", Value::number(1.0));
        scope.push();
        scope.bind("x", Value::number(2.0));
        assert_eq!(scope.lookup("x").unwrap().as_f64(), Some(2.0));
        scope.pop();
        assert_eq!(scope.lookup("x").unwrap().as_f64(), Some(1.0));
    }

    #[test]
    fn reserved_names_rejected_in_user_scope() {
        let mut scope = Scope::root();
        scope.bind("inputs", Value::string("nope"));
        assert!(scope.lookup("inputs").is_none());
    }

    #[test]
    fn fork_isolates_branch_writes() {
        let mut root = Scope::root();
        root.bind("shared", Value::number(1.0));

        let mut branch_a = root.fork();
        branch_a.bind("a_only", Value::string("a"));

        let branch_b = root.fork();
        assert!(branch_b.lookup("a_only").is_none());
        assert_eq!(branch_b.lookup("shared").unwrap().as_f64(), Some(1.0));

        assert!(branch_a.top_frame().contains_key("a_only"));
        assert!(!branch_a.top_frame().contains_key("shared"));
    }

    #[test]
    fn snapshot_merges_root_to_top() {
        let mut scope = Scope::root();
        scope.bind("x", Value::number(1.0));
        scope.push();
        scope.bind("y", Value::number(2.0));
        let snap = scope.snapshot();
        assert_eq!(snap.get("x").unwrap().as_f64(), Some(1.0));
        assert_eq!(snap.get("y").unwrap().as_f64(), Some(2.0));
    }
}
