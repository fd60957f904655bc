//! Value helpers shared by the assertion categories: dotted-path
//! lookup, length, equality, truthiness and bounded regex
//! compilation.

use regex::{Regex, RegexBuilder};
use serde_json::Value;

/// Keys that are never traversed, looked up or validated.
pub const RESERVED_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// Default upper bound on user-supplied pattern length.
pub const DEFAULT_MAX_PATTERN_LENGTH: usize = 512;

const REGEX_SIZE_LIMIT: usize = 1 << 20;

pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Resolve a dotted path (`a.b.0.c`) against a JSON value.
///
/// Any missing intermediate, out-of-range index or reserved key
/// short-circuits to `None`. An empty path returns the value
/// itself.
pub fn get_by_json_path<'a>(json: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = json;

    for part in path.split('.').filter(|p| !p.is_empty()) {
        if is_reserved_key(part) {
            return None;
        }
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Length of a string (in characters), an array, or an object's
/// numeric `length` property. Everything else is 0.
pub fn get_length(value: &Value) -> usize {
    match value {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map
            .get("length")
            .and_then(Value::as_u64)
            .map_or(0, |n| n as usize),
        _ => 0,
    }
}

/// Structural equality. Numbers compare by numeric value, so `1`
/// equals `1.0`; object key order is irrelevant.
pub fn json_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| json_equals(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| json_equals(x, y)))
        }
        _ => a == b,
    }
}

/// Truthiness as a script author expects it: `null`, `false`, `0`,
/// `NaN` and `""` are falsy; containers are always truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// `true` for objects only; arrays and `null` are excluded.
pub fn is_plain_object(value: &Value) -> bool {
    matches!(value, Value::Object(_))
}

/// `true` for `""`, `[]` and `{}`.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Human-readable rendering used in assertion messages.
pub fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{s}'"),
        other => other.to_string(),
    }
}

/// Compile a user-supplied pattern with length and size bounds.
///
/// Accepts either a bare pattern (`^us_`) or a slash-delimited one
/// with flags (`/^US_/i`; `i`, `m` and `s` are honoured). The regex
/// engine itself runs in linear time, so the bounds only cap
/// compilation cost.
pub fn safe_regex(pattern: &str, max_length: usize) -> Result<Regex, String> {
    if pattern.len() > max_length {
        return Err(format!(
            "pattern is {} characters long, limit is {max_length}",
            pattern.len()
        ));
    }

    let (body, flags) = split_delimited(pattern);
    let mut builder = RegexBuilder::new(body);
    builder
        .size_limit(REGEX_SIZE_LIMIT)
        .dfa_size_limit(REGEX_SIZE_LIMIT);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            // g/u/y carry no meaning for a single match test.
            'g' | 'u' | 'y' => &mut builder,
            other => return Err(format!("unsupported regex flag '{other}'")),
        };
    }

    builder
        .build()
        .map_err(|e| format!("invalid pattern '{pattern}': {e}"))
}

fn split_delimited(pattern: &str) -> (&str, &str) {
    if let Some(rest) = pattern.strip_prefix('/') {
        if let Some(end) = rest.rfind('/') {
            let flags = &rest[end + 1..];
            if flags.chars().all(|c| c.is_ascii_alphabetic()) {
                return (&rest[..end], flags);
            }
        }
    }
    (pattern, "")
}
