// Copyright (c) 2025 Workflow Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! The filter dispatch table (C2 §4.2 "Filter set").

use crate::error::{EngineError, Result};
use crate::value::Value;
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use serde_json::{Map, Value as Json};

fn type_err(filter: &str, expected: &str) -> EngineError {
    EngineError::expression(format!("filter '{filter}' expects {expected}"))
}

fn as_str<'a>(filter: &str, v: &'a Value) -> Result<&'a str> {
    v.as_str().ok_or_else(|| type_err(filter, "a string"))
}

fn as_num(filter: &str, v: &Value) -> Result<f64> {
    v.as_f64().ok_or_else(|| type_err(filter, "a number"))
}

fn as_array<'a>(filter: &str, v: &'a Value) -> Result<&'a Vec<Json>> {
    v.as_array().ok_or_else(|| type_err(filter, "an array"))
}

fn as_object<'a>(filter: &str, v: &'a Value) -> Result<&'a Map<String, Json>> {
    v.as_object().ok_or_else(|| type_err(filter, "an object"))
}

/// Splits a `/pattern/flags` regex literal into its parts.
fn parse_regex_literal(literal: &str) -> Result<(&str, &str)> {
    let rest = literal
        .strip_prefix('/')
        .ok_or_else(|| EngineError::expression("regex literal must start with '/'"))?;
    let end = rest
        .rfind('/')
        .ok_or_else(|| EngineError::expression("regex literal must end with '/flags'"))?;
    Ok((&rest[..end], &rest[end + 1..]))
}

fn build_regex(literal: &str) -> Result<regex::Regex> {
    let (pattern, flags) = parse_regex_literal(literal)?;
    let mut builder = regex::RegexBuilder::new(pattern);
    builder.case_insensitive(flags.contains('i'));
    builder
        .build()
        .map_err(|e| EngineError::expression(format!("invalid regex: {e}")))
}

fn epoch_ms_to_datetime(filter: &str, ms: f64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms as i64)
        .single()
        .ok_or_else(|| type_err(filter, "a valid epoch-ms timestamp"))
}

fn format_date_token(dt: &DateTime<Utc>, fmt: &str) -> String {
    let mut out = String::new();
    let bytes = fmt.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let rest = &fmt[i..];
        if rest.starts_with("YYYY") {
            out.push_str(&format!("{:04}", dt.year()));
            i += 4;
        } else if rest.starts_with("MM") {
            out.push_str(&format!("{:02}", dt.month()));
            i += 2;
        } else if rest.starts_with("DD") {
            out.push_str(&format!("{:02}", dt.day()));
            i += 2;
        } else if rest.starts_with("HH") {
            out.push_str(&format!("{:02}", dt.hour()));
            i += 2;
        } else if rest.starts_with("mm") {
            out.push_str(&format!("{:02}", dt.minute()));
            i += 2;
        } else if rest.starts_with("ss") {
            out.push_str(&format!("{:02}", dt.second()));
            i += 2;
        } else {
            out.push(fmt[i..].chars().next().unwrap());
            i += fmt[i..].chars().next().unwrap().len_utf8();
        }
    }
    out
}

/// Applies `name(args)` to `input`. `and`/`or` are handled specially by the
/// evaluator (they short-circuit argument evaluation) and never reach here.
pub fn apply(name: &str, input: Value, args: &[Value]) -> Result<Value> {
    match name {
        // --- String ---
        "split" => {
            let sep = as_str(name, args.first().ok_or_else(|| type_err(name, "a separator"))?)?;
            let parts: Vec<Json> = as_str(name, &input)?
                .split(sep)
                .map(|s| Json::String(s.to_string()))
                .collect();
            Ok(Value::array(parts.into_iter().map(Value::from).collect()))
        }
        "join" => {
            let sep = as_str(name, args.first().ok_or_else(|| type_err(name, "a separator"))?)?;
            let joined = as_array(name, &input)?
                .iter()
                .map(|v| Value::from(v.clone()).to_display_string())
                .collect::<Vec<_>>()
                .join(sep);
            Ok(Value::string(joined))
        }
        "slugify" => {
            let s = as_str(name, &input)?;
            let slug: String = s
                .chars()
                .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
                .collect();
            let collapsed = slug
                .split('-')
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
                .join("-");
            Ok(Value::string(collapsed))
        }
        "prefix" => {
            let p = as_str(name, args.first().ok_or_else(|| type_err(name, "a prefix"))?)?;
            Ok(Value::string(format!("{p}{}", as_str(name, &input)?)))
        }
        "suffix" => {
            let s = as_str(name, args.first().ok_or_else(|| type_err(name, "a suffix"))?)?;
            Ok(Value::string(format!("{}{s}", as_str(name, &input)?)))
        }
        "truncate" => {
            let n = as_num(name, args.first().ok_or_else(|| type_err(name, "a length"))?)? as usize;
            let s = as_str(name, &input)?;
            if s.chars().count() <= n {
                Ok(Value::string(s))
            } else {
                let truncated: String = s.chars().take(n).collect();
                Ok(Value::string(format!("{truncated}\u{2026}")))
            }
        }
        "substring" => {
            let start = as_num(name, args.first().ok_or_else(|| type_err(name, "a start index"))?)? as usize;
            let end = as_num(name, args.get(1).ok_or_else(|| type_err(name, "an end index"))?)? as usize;
            let s = as_str(name, &input)?;
            let chars: Vec<char> = s.chars().collect();
            let end = end.min(chars.len());
            let start = start.min(end);
            Ok(Value::string(chars[start..end].iter().collect::<String>()))
        }
        "contains" => {
            let needle = as_str(name, args.first().ok_or_else(|| type_err(name, "a substring"))?)?;
            Ok(Value::bool(as_str(name, &input)?.contains(needle)))
        }
        "upper" => Ok(Value::string(as_str(name, &input)?.to_uppercase())),
        "lower" => Ok(Value::string(as_str(name, &input)?.to_lowercase())),
        "trim" => Ok(Value::string(as_str(name, &input)?.trim().to_string())),

        // --- Regex ---
        "match" => {
            let literal = as_str(name, args.first().ok_or_else(|| type_err(name, "a regex literal"))?)?;
            let group = args.get(1).map(|v| as_num(name, v)).transpose()?.unwrap_or(0.0) as usize;
            let re = build_regex(literal)?;
            let haystack = as_str(name, &input)?;
            match re.captures(haystack) {
                Some(caps) => Ok(caps
                    .get(group)
                    .map(|m| Value::string(m.as_str()))
                    .unwrap_or(Value::null())),
                None => Ok(Value::null()),
            }
        }
        "notMatch" => {
            let literal = as_str(name, args.first().ok_or_else(|| type_err(name, "a regex literal"))?)?;
            let re = build_regex(literal)?;
            Ok(Value::bool(!re.is_match(as_str(name, &input)?)))
        }
        "regexReplace" => {
            let literal = as_str(name, args.first().ok_or_else(|| type_err(name, "a regex literal"))?)?;
            let replacement = as_str(name, args.get(1).ok_or_else(|| type_err(name, "a replacement"))?)?;
            let (pattern, flags) = parse_regex_literal(literal)?;
            let mut builder = regex::RegexBuilder::new(pattern);
            builder.case_insensitive(flags.contains('i'));
            let re = builder
                .build()
                .map_err(|e| EngineError::expression(format!("invalid regex: {e}")))?;
            let haystack = as_str(name, &input)?;
            let replaced = if flags.contains('g') {
                re.replace_all(haystack, replacement).into_owned()
            } else {
                re.replace(haystack, replacement).into_owned()
            };
            Ok(Value::string(replaced))
        }

        // --- Object ---
        "path" => {
            let dotted = as_str(name, args.first().ok_or_else(|| type_err(name, "a dotted path"))?)?;
            Ok(input.get_path(dotted))
        }
        "keys" => Ok(Value::array(
            as_object(name, &input)?
                .keys()
                .map(|k| Value::string(k.clone()))
                .collect(),
        )),
        "values" => Ok(Value::array(
            as_object(name, &input)?
                .values()
                .map(|v| Value::from(v.clone()))
                .collect(),
        )),
        "entries" => Ok(Value::array(
            as_object(name, &input)?
                .iter()
                .map(|(k, v)| Value::array(vec![Value::string(k.clone()), Value::from(v.clone())]))
                .collect(),
        )),
        "pick" => {
            let obj = as_object(name, &input)?;
            let mut out = Map::new();
            for a in args {
                let key = as_str(name, a)?;
                if let Some(v) = obj.get(key) {
                    out.insert(key.to_string(), v.clone());
                }
            }
            Ok(Value::object(out))
        }
        "omit" => {
            let obj = as_object(name, &input)?;
            let exclude: Vec<&str> = args.iter().map(|a| as_str(name, a)).collect::<Result<_>>()?;
            let mut out = Map::new();
            for (k, v) in obj {
                if !exclude.contains(&k.as_str()) {
                    out.insert(k.clone(), v.clone());
                }
            }
            Ok(Value::object(out))
        }
        "merge" => {
            let mut out = as_object(name, &input)?.clone();
            let other = as_object(name, args.first().ok_or_else(|| type_err(name, "an object"))?)?;
            for (k, v) in other {
                out.insert(k.clone(), v.clone());
            }
            Ok(Value::object(out))
        }

        // --- Sequence ---
        "nth" => {
            let idx = as_num(name, args.first().ok_or_else(|| type_err(name, "an index"))?)? as usize;
            Ok(as_array(name, &input)?
                .get(idx)
                .map(|v| Value::from(v.clone()))
                .unwrap_or(Value::null()))
        }
        "count" => match input.as_json() {
            Json::Array(a) => Ok(Value::number(a.len() as f64)),
            Json::Object(o) => Ok(Value::number(o.len() as f64)),
            Json::String(s) => Ok(Value::number(s.chars().count() as f64)),
            _ => Err(type_err(name, "an array, object, or string")),
        },
        "sum" => {
            let total: f64 = as_array(name, &input)?
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0))
                .sum();
            Ok(Value::number(total))
        }
        "unique" => {
            let mut seen = Vec::new();
            let mut out = Vec::new();
            for v in as_array(name, &input)? {
                if !seen.contains(v) {
                    seen.push(v.clone());
                    out.push(Value::from(v.clone()));
                }
            }
            Ok(Value::array(out))
        }
        "flatten" => {
            let mut out = Vec::new();
            for v in as_array(name, &input)? {
                match v {
                    Json::Array(inner) => out.extend(inner.iter().cloned().map(Value::from)),
                    other => out.push(Value::from(other.clone())),
                }
            }
            Ok(Value::array(out))
        }
        "first" => match input.as_json() {
            Json::Array(a) => Ok(a.first().map(|v| Value::from(v.clone())).unwrap_or(Value::null())),
            Json::String(s) => Ok(s
                .chars()
                .next()
                .map(|c| Value::string(c.to_string()))
                .unwrap_or(Value::null())),
            _ => Err(type_err(name, "an array or string")),
        },
        "last" => match input.as_json() {
            Json::Array(a) => Ok(a.last().map(|v| Value::from(v.clone())).unwrap_or(Value::null())),
            Json::String(s) => Ok(s
                .chars()
                .last()
                .map(|c| Value::string(c.to_string()))
                .unwrap_or(Value::null())),
            _ => Err(type_err(name, "an array or string")),
        },

        // --- Date (epoch-ms) ---
        "format_date" => {
            let fmt = as_str(name, args.first().ok_or_else(|| type_err(name, "a format string"))?)?;
            let dt = epoch_ms_to_datetime(name, as_num(name, &input)?)?;
            Ok(Value::string(format_date_token(&dt, fmt)))
        }
        "add_days" => {
            let n = as_num(name, args.first().ok_or_else(|| type_err(name, "a day count"))?)?;
            let ms = as_num(name, &input)? + n * 86_400_000.0;
            Ok(Value::number(ms))
        }
        "subtract_days" => {
            let n = as_num(name, args.first().ok_or_else(|| type_err(name, "a day count"))?)?;
            let ms = as_num(name, &input)? - n * 86_400_000.0;
            Ok(Value::number(ms))
        }
        "diff_days" => {
            let other = as_num(name, args.first().ok_or_else(|| type_err(name, "another timestamp"))?)?;
            let diff = (as_num(name, &input)? - other) / 86_400_000.0;
            Ok(Value::number(diff))
        }

        // --- JSON ---
        "parse_json" => {
            let parsed: Json = serde_json::from_str(as_str(name, &input)?)?;
            Ok(Value::from(parsed))
        }
        "to_json" => Ok(Value::string(serde_json::to_string(input.as_json())?)),

        // --- Type predicates ---
        "is_array" => Ok(Value::bool(input.as_json().is_array())),
        "is_object" => Ok(Value::bool(input.as_json().is_object())),
        "is_string" => Ok(Value::bool(input.as_json().is_string())),
        "is_number" => Ok(Value::bool(input.as_json().is_number())),
        "is_empty" => Ok(Value::bool(input.is_empty())),
        "is_null" => Ok(Value::bool(input.is_null())),

        // --- Logic ---
        "ternary" => {
            let a = args.first().ok_or_else(|| type_err(name, "two branches"))?;
            let b = args.get(1).ok_or_else(|| type_err(name, "two branches"))?;
            Ok(if input.is_truthy() { a.clone() } else { b.clone() })
        }
        "not" => Ok(Value::bool(!input.is_truthy())),
        "default" => {
            let fallback = args.first().ok_or_else(|| type_err(name, "a default value"))?;
            Ok(if input.is_null() { fallback.clone() } else { input })
        }

        // --- Math ---
        "round" => {
            let digits = args.first().map(|v| as_num(name, v)).transpose()?.unwrap_or(0.0) as i32;
            let factor = 10f64.powi(digits);
            Ok(Value::number((as_num(name, &input)? * factor).round() / factor))
        }
        "floor" => Ok(Value::number(as_num(name, &input)?.floor())),
        "ceil" => Ok(Value::number(as_num(name, &input)?.ceil())),
        "min" => as_array(name, &input)?
            .iter()
            .filter_map(Json::as_f64)
            .fold(None, |acc, n| Some(acc.map_or(n, |a: f64| a.min(n))))
            .map(Value::number)
            .ok_or_else(|| type_err(name, "a non-empty array of numbers")),
        "max" => as_array(name, &input)?
            .iter()
            .filter_map(Json::as_f64)
            .fold(None, |acc, n| Some(acc.map_or(n, |a: f64| a.max(n))))
            .map(Value::number)
            .ok_or_else(|| type_err(name, "a non-empty array of numbers")),

        _ => Err(EngineError::expression(format!("unknown filter '{name}'"))),
    }
}

/// `and`/`or` short-circuit their right-hand argument, so the evaluator
/// calls this before evaluating `args` rather than going through [`apply`].
#[must_use]
pub fn is_short_circuit(name: &str) -> bool {
    matches!(name, "and" | "or")
}
