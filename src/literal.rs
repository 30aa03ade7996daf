//! Literal coercion for text coming from argv, environment variables or
//! textual assignments.

use crate::error::{Error, Result};
use crate::value::Value;

/// Parses `text` as a safe literal: booleans, null, numbers, quoted strings,
/// and flow-style lists or mappings.
///
/// Returns `None` when the text is not a literal; callers keep it verbatim.
pub fn parse_literal(text: &str) -> Option<Value> {
    let s = text.trim();
    match s {
        "True" | "true" => return Some(Value::Bool(true)),
        "False" | "false" => return Some(Value::Bool(false)),
        "None" | "null" => return Some(Value::Null),
        _ => {}
    }

    if looks_like_integer(s) {
        if let Ok(i) = s.parse::<i64>() {
            return Some(Value::Int(i));
        }
    }

    if looks_like_float(s) {
        if let Ok(f) = s.parse::<f64>() {
            return Some(Value::Float(f));
        }
    }

    if let Some(inner) = unquote(s) {
        return Some(Value::Str(inner.to_string()));
    }

    let is_list = s.starts_with('[') && s.ends_with(']');
    let is_map = s.starts_with('{') && s.ends_with('}');
    if is_list || is_map {
        let parsed: serde_yaml::Value = serde_yaml::from_str(s).ok()?;
        return flow_value(parsed);
    }

    None
}

/// Parses a literal, keeping the text as a string when it is not one.
pub fn coerce(text: &str) -> Value {
    parse_literal(text).unwrap_or_else(|| Value::Str(text.to_string()))
}

/// Parses a command-line boolean.
pub fn parse_bool(text: &str) -> Result<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "t" | "y" | "1" => Ok(true),
        "no" | "false" | "f" | "n" | "0" => Ok(false),
        _ => Err(Error::InvalidValue(format!("boolean value expected, got {text:?}"))),
    }
}

fn looks_like_integer(s: &str) -> bool {
    let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

fn looks_like_float(s: &str) -> bool {
    let body = s.strip_prefix(['-', '+']).unwrap_or(s);
    let mut seen_digit = false;
    let mut marker = false;
    for c in body.chars() {
        match c {
            '0'..='9' => seen_digit = true,
            '.' | 'e' | 'E' | '-' | '+' | '_' => marker = true,
            _ => return false,
        }
    }
    seen_digit && marker
}

fn unquote(s: &str) -> Option<&str> {
    if s.len() < 2 {
        return None;
    }
    ['"', '\'']
        .into_iter()
        .find_map(|q| s.strip_prefix(q).and_then(|rest| rest.strip_suffix(q)))
}

fn flow_value(value: serde_yaml::Value) -> Option<Value> {
    Some(match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64()?),
        },
        serde_yaml::Value::String(s) => Value::Str(s),
        serde_yaml::Value::Sequence(items) => Value::List(
            items
                .into_iter()
                .map(flow_value)
                .collect::<Option<Vec<_>>>()?
                .into(),
        ),
        serde_yaml::Value::Mapping(map) => {
            let mut pairs = Vec::with_capacity(map.len());
            for (key, value) in map {
                let key = match key {
                    serde_yaml::Value::String(s) => s,
                    serde_yaml::Value::Number(n) => n.to_string(),
                    serde_yaml::Value::Bool(b) => b.to_string(),
                    _ => return None,
                };
                pairs.push((key, flow_value(value)?));
            }
            Value::Flat(pairs.into_iter().collect())
        }
        serde_yaml::Value::Tagged(_) => return None,
    })
}
