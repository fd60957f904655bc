//! Content assertions: equality, presence, truthiness, substring,
//! length, pattern and type checks.

use super::{record, Check};
use crate::context::SharedContext;
use crate::validator::{
    get_length, is_truthy, json_equals, safe_regex, type_name, DEFAULT_MAX_PATTERN_LENGTH,
};
use serde_json::Value;

pub(crate) fn to_be(actual: &Value, expected: &Value) -> Check {
    Check::new(
        "to be",
        json_equals(actual, expected),
        Some(actual.clone()),
        Some(expected.clone()),
    )
}

pub(crate) fn to_equal(actual: &Value, expected: &Value) -> Check {
    Check::new(
        "to equal",
        json_equals(actual, expected),
        Some(actual.clone()),
        Some(expected.clone()),
    )
}

pub(crate) fn to_be_null(actual: &Value) -> Check {
    Check::new("to be null", actual.is_null(), Some(actual.clone()), Some(Value::Null))
}

/// Missing values arrive as `null`, so `null` is not defined.
pub(crate) fn to_be_defined(actual: &Value) -> Check {
    Check::new("to be defined", !actual.is_null(), Some(actual.clone()), None)
}

pub(crate) fn to_be_undefined(actual: &Value) -> Check {
    Check::new("to be undefined", actual.is_null(), Some(actual.clone()), None)
}

pub(crate) fn to_be_truthy(actual: &Value) -> Check {
    Check::new("to be truthy", is_truthy(actual), Some(actual.clone()), None)
}

pub(crate) fn to_be_falsy(actual: &Value) -> Check {
    Check::new("to be falsy", !is_truthy(actual), Some(actual.clone()), None)
}

/// Substring check. A non-string actual is an automatic failure.
pub(crate) fn to_contain(actual: &Value, needle: &str) -> Check {
    let expected = Some(Value::String(needle.to_string()));
    match actual {
        Value::String(s) => Check::new("to contain", s.contains(needle), Some(actual.clone()), expected),
        other => Check::new("to contain", false, Some(other.clone()), expected).with_detail(format!(
            "Expected a string to search for '{needle}' but got {}",
            type_name(other)
        )),
    }
}

/// Membership check used by `.deep.toContain`: array element or
/// object subset, compared structurally.
pub(crate) fn to_deep_contain(actual: &Value, expected: &Value) -> Check {
    let passed = match (actual, expected) {
        (Value::String(s), Value::String(needle)) => s.contains(needle.as_str()),
        (Value::Array(items), _) => items.iter().any(|item| json_equals(item, expected)),
        (Value::Object(map), Value::Object(subset)) => subset
            .iter()
            .all(|(k, v)| map.get(k).is_some_and(|actual| json_equals(actual, v))),
        _ => false,
    };
    Check::new("to deep contain", passed, Some(actual.clone()), Some(expected.clone()))
}

pub(crate) fn to_have_length(actual: &Value, expected: usize) -> Check {
    let length = get_length(actual);
    Check::new(
        "to have length",
        length == expected,
        Some(Value::from(length)),
        Some(Value::from(expected)),
    )
}

pub(crate) fn to_match(actual: &Value, pattern: &str, max_pattern_length: usize) -> Check {
    let expected = Some(Value::String(pattern.to_string()));
    let Value::String(text) = actual else {
        return Check::new("to match", false, Some(actual.clone()), expected).with_detail(format!(
            "Expected a string to match {pattern} but got {}",
            type_name(actual)
        ));
    };
    match safe_regex(pattern, max_pattern_length) {
        Ok(re) => Check::new("to match", re.is_match(text), Some(actual.clone()), expected),
        Err(reason) => Check::new("to match", false, Some(actual.clone()), expected)
            .with_detail(format!("Rejected pattern: {reason}")),
    }
}

/// Type check by JSON type name (`string`, `number`, `boolean`,
/// `object`, `array`, `null`), case-insensitive. `integer` accepts
/// whole numbers only.
pub(crate) fn to_be_a(actual: &Value, expected_type: &str) -> Check {
    Check::new(
        "to be a",
        is_type(actual, expected_type),
        Some(Value::String(type_name(actual).to_string())),
        Some(Value::String(expected_type.to_string())),
    )
}

/// Same as [`to_be_a`] with constructor-style names (`Array`,
/// `Object`, `String`).
pub(crate) fn to_be_instance_of(actual: &Value, class: &str) -> Check {
    Check {
        name: "to be instance of".to_string(),
        ..to_be_a(actual, class)
    }
}

fn is_type(actual: &Value, expected_type: &str) -> bool {
    match expected_type.to_ascii_lowercase().as_str() {
        "integer" => actual.as_i64().is_some() || actual.as_u64().is_some(),
        other => type_name(actual) == other,
    }
}

pub(crate) fn to_be_greater_than(actual: &Value, bound: f64) -> Check {
    Check::new(
        "to be greater than",
        actual.as_f64().is_some_and(|n| n > bound),
        Some(actual.clone()),
        Some(Value::from(bound)),
    )
}

pub(crate) fn to_be_less_than(actual: &Value, bound: f64) -> Check {
    Check::new(
        "to be less than",
        actual.as_f64().is_some_and(|n| n < bound),
        Some(actual.clone()),
        Some(Value::from(bound)),
    )
}

pub(crate) fn to_be_one_of(actual: &Value, candidates: &[Value]) -> Check {
    Check::new(
        "to be one of",
        candidates.iter().any(|c| json_equals(actual, c)),
        Some(actual.clone()),
        Some(Value::Array(candidates.to_vec())),
    )
}

pub(crate) fn pass() -> Check {
    Check::new("pass", true, None, None)
}

pub(crate) fn fail() -> Check {
    Check::new("fail", false, None, None)
}

/// Content assertions over one captured value.
#[derive(Debug, Clone)]
pub struct ContentAssertions {
    context: SharedContext,
    actual: Value,
    max_pattern_length: usize,
}

impl ContentAssertions {
    pub fn new(context: &SharedContext, actual: Value) -> Self {
        Self {
            context: context.clone(),
            actual,
            max_pattern_length: DEFAULT_MAX_PATTERN_LENGTH,
        }
    }

    pub fn with_max_pattern_length(mut self, max: usize) -> Self {
        self.max_pattern_length = max;
        self
    }

    fn record(&self, check: Check, message: Option<&str>) -> &Self {
        record(&self.context, check, message);
        self
    }

    pub fn to_be(&self, expected: &Value, message: Option<&str>) -> &Self {
        self.record(to_be(&self.actual, expected), message)
    }

    pub fn to_equal(&self, expected: &Value, message: Option<&str>) -> &Self {
        self.record(to_equal(&self.actual, expected), message)
    }

    pub fn to_be_null(&self, message: Option<&str>) -> &Self {
        self.record(to_be_null(&self.actual), message)
    }

    pub fn to_be_defined(&self, message: Option<&str>) -> &Self {
        self.record(to_be_defined(&self.actual), message)
    }

    pub fn to_be_undefined(&self, message: Option<&str>) -> &Self {
        self.record(to_be_undefined(&self.actual), message)
    }

    pub fn to_be_truthy(&self, message: Option<&str>) -> &Self {
        self.record(to_be_truthy(&self.actual), message)
    }

    pub fn to_be_falsy(&self, message: Option<&str>) -> &Self {
        self.record(to_be_falsy(&self.actual), message)
    }

    pub fn to_contain(&self, needle: &str, message: Option<&str>) -> &Self {
        self.record(to_contain(&self.actual, needle), message)
    }

    pub fn to_have_length(&self, expected: usize, message: Option<&str>) -> &Self {
        self.record(to_have_length(&self.actual, expected), message)
    }

    pub fn to_match(&self, pattern: &str, message: Option<&str>) -> &Self {
        self.record(to_match(&self.actual, pattern, self.max_pattern_length), message)
    }

    pub fn to_be_a(&self, expected_type: &str, message: Option<&str>) -> &Self {
        self.record(to_be_a(&self.actual, expected_type), message)
    }

    pub fn to_be_instance_of(&self, class: &str, message: Option<&str>) -> &Self {
        self.record(to_be_instance_of(&self.actual, class), message)
    }

    pub fn to_be_greater_than(&self, bound: f64, message: Option<&str>) -> &Self {
        self.record(to_be_greater_than(&self.actual, bound), message)
    }

    pub fn to_be_less_than(&self, bound: f64, message: Option<&str>) -> &Self {
        self.record(to_be_less_than(&self.actual, bound), message)
    }

    pub fn to_be_one_of(&self, candidates: &[Value], message: Option<&str>) -> &Self {
        self.record(to_be_one_of(&self.actual, candidates), message)
    }

    /// Unconditional pass, for script branches that verify by hand.
    pub fn pass(&self, message: Option<&str>) -> &Self {
        self.record(pass(), message)
    }

    /// Unconditional failure.
    pub fn fail(&self, message: Option<&str>) -> &Self {
        self.record(fail(), message)
    }
}
