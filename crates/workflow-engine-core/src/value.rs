// Copyright (c) 2025 Workflow Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! The polymorphic, JSON-shaped value model (C1).
//!
//! `Value` is a thin newtype over [`serde_json::Value`]: the engine's wire
//! shape already round-trips `null | bool | number | string | array | object`
//! faithfully, so there is no separate representation to maintain — only the
//! path-access and truthiness rules the spec layers on top.

use serde_json::Value as Json;
use std::fmt;

/// A JSON-shaped value flowing through scopes, expressions, and action
/// results.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Value(pub Json);

impl Value {
    pub const NULL: Value = Value(Json::Null);

    #[must_use]
    pub fn null() -> Self {
        Self(Json::Null)
    }

    #[must_use]
    pub fn bool(b: bool) -> Self {
        Self(Json::Bool(b))
    }

    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Self(Json::String(s.into()))
    }

    #[must_use]
    pub fn number(n: f64) -> Self {
        Self(serde_json::Number::from_f64(n).map_or(Json::Null, Json::Number))
    }

    #[must_use]
    pub fn array(items: Vec<Value>) -> Self {
        Self(Json::Array(items.into_iter().map(|v| v.0).collect()))
    }

    #[must_use]
    pub fn object(map: serde_json::Map<String, Json>) -> Self {
        Self(Json::Object(map))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    #[must_use]
    pub fn as_json(&self) -> &Json {
        &self.0
    }

    #[must_use]
    pub fn into_json(self) -> Json {
        self.0
    }

    /// Truthiness per §4.4: `null/0/""/empty-sequence/empty-mapping/false`
    /// are falsy, everything else is truthy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match &self.0 {
            Json::Null => false,
            Json::Bool(b) => *b,
            Json::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
            Json::String(s) => !s.is_empty(),
            Json::Array(a) => !a.is_empty(),
            Json::Object(o) => !o.is_empty(),
        }
    }

    /// `is_empty` filter semantics: true for `null`, `""`, `[]`, `{}`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Json::Null => true,
            Json::String(s) => s.is_empty(),
            Json::Array(a) => a.is_empty(),
            Json::Object(o) => o.is_empty(),
            Json::Bool(_) | Json::Number(_) => false,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        self.0.as_f64()
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&Vec<Json>> {
        self.0.as_array()
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&serde_json::Map<String, Json>> {
        self.0.as_object()
    }

    /// Renders for string-concatenation contexts (mixed `"...{{ x }}..."`
    /// templates): strings are unquoted, everything else is JSON-stringified.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match &self.0 {
            Json::String(s) => s.clone(),
            Json::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Path access: `a.b[2].c`. Returns `null` on a missing intermediate
    /// rather than erroring — callers that want a different fallback use the
    /// `default` filter.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Value {
        let mut current: &Json = &self.0;
        for segment in PathSegments::new(path) {
            match segment {
                PathSegment::Key(key) => match current.get(key) {
                    Some(v) => current = v,
                    None => return Value::null(),
                },
                PathSegment::Index(idx) => match current.get(idx) {
                    Some(v) => current = v,
                    None => return Value::null(),
                },
            }
        }
        Value(current.clone())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl From<Json> for Value {
    fn from(v: Json) -> Self {
        Self(v)
    }
}

impl From<Value> for Json {
    fn from(v: Value) -> Self {
        v.0
    }
}

enum PathSegment<'a> {
    Key(&'a str),
    Index(usize),
}

/// Splits `a.b[2].c` into `[Key("a"), Key("b"), Index(2), Key("c")]`.
struct PathSegments<'a> {
    rest: &'a str,
}

impl<'a> PathSegments<'a> {
    fn new(path: &'a str) -> Self {
        Self { rest: path }
    }
}

impl<'a> Iterator for PathSegments<'a> {
    type Item = PathSegment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.rest.starts_with('.') {
            self.rest = &self.rest[1..];
        }
        if self.rest.is_empty() {
            return None;
        }
        if let Some(stripped) = self.rest.strip_prefix('[') {
            let end = stripped.find(']')?;
            let idx_str = &stripped[..end];
            self.rest = &stripped[end + 1..];
            return idx_str.parse::<usize>().ok().map(PathSegment::Index);
        }
        let end = self.rest.find(['.', '[']).unwrap_or(self.rest.len());
        let key = &self.rest[..end];
        self.rest = &self.rest[end..];
        Some(PathSegment::Key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_access_dotted_and_indexed() {
        let v: Value = serde_json::json!({"a": {"b": [1, 2, {"c": "hi"}]}}).into();
        assert_eq!(v.get_path("a.b[2].c").as_str(), Some("hi"));
        assert_eq!(v.get_path("a.b[0]").as_f64(), Some(1.0));
    }

    #[test]
    fn missing_intermediate_is_null() {
        let v: Value = serde_json::json!({"a": 1}).into();
        assert!(v.get_path("a.b.c").is_null());
        assert!(v.get_path("z").is_null());
    }

    #[test]
    fn truthiness_matches_spec() {
        assert!(!Value::null().is_truthy());
        assert!(!Value::number(0.0).is_truthy());
        assert!(!Value::string("").is_truthy());
        assert!(!Value::array(vec![]).is_truthy());
        assert!(!Value::bool(false).is_truthy());
        assert!(Value::string("x").is_truthy());
        assert!(Value::number(1.0).is_truthy());
    }

    #[test]
    fn is_empty_matches_spec() {
        assert!(Value::null().is_empty());
        assert!(Value::string("").is_empty());
        assert!(Value::array(vec![]).is_empty());
        assert!(!Value::bool(false).is_empty());
    }
}
