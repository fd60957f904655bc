//! Chainable expectation facade.
//!
//! `Expectation` is a value: every call returns a new builder and
//! never mutates the one it was called on. `.not()` flips negation
//! for the next assertion only; the builder returned by an
//! assertion is always un-negated.

use super::{apply_negation, content, json, record, Check};
use crate::context::SharedContext;
use crate::validator::DEFAULT_MAX_PATTERN_LENGTH;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct Expectation {
    context: SharedContext,
    actual: Value,
    negated: bool,
    deep: bool,
    max_pattern_length: usize,
}

impl Expectation {
    pub fn new(context: &SharedContext, actual: Value) -> Self {
        Self {
            context: context.clone(),
            actual,
            negated: false,
            deep: false,
            max_pattern_length: DEFAULT_MAX_PATTERN_LENGTH,
        }
    }

    pub fn with_max_pattern_length(mut self, max: usize) -> Self {
        self.max_pattern_length = max;
        self
    }

    pub fn actual(&self) -> &Value {
        &self.actual
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    pub fn is_deep(&self) -> bool {
        self.deep
    }

    /// Negate the next assertion. Calling it twice cancels out.
    pub fn not(&self) -> Self {
        Self {
            negated: !self.negated,
            ..self.clone()
        }
    }

    /// Switch `to_contain` to structural membership for arrays and
    /// objects. Equality is always deep.
    pub fn deep(&self) -> Self {
        Self {
            deep: true,
            ..self.clone()
        }
    }

    fn finish(&self, check: Check, message: Option<&str>) -> Self {
        record(&self.context, apply_negation(check, self.negated), message);
        Self {
            negated: false,
            deep: false,
            ..self.clone()
        }
    }

    pub fn to_be(&self, expected: &Value, message: Option<&str>) -> Self {
        self.finish(content::to_be(&self.actual, expected), message)
    }

    pub fn to_equal(&self, expected: &Value, message: Option<&str>) -> Self {
        self.finish(content::to_equal(&self.actual, expected), message)
    }

    pub fn to_be_null(&self, message: Option<&str>) -> Self {
        self.finish(content::to_be_null(&self.actual), message)
    }

    pub fn to_be_defined(&self, message: Option<&str>) -> Self {
        self.finish(content::to_be_defined(&self.actual), message)
    }

    pub fn to_be_undefined(&self, message: Option<&str>) -> Self {
        self.finish(content::to_be_undefined(&self.actual), message)
    }

    pub fn to_be_truthy(&self, message: Option<&str>) -> Self {
        self.finish(content::to_be_truthy(&self.actual), message)
    }

    pub fn to_be_falsy(&self, message: Option<&str>) -> Self {
        self.finish(content::to_be_falsy(&self.actual), message)
    }

    /// Substring check; with `.deep`, structural membership.
    pub fn to_contain(&self, expected: &Value, message: Option<&str>) -> Self {
        let check = match (self.deep, expected) {
            (true, _) => content::to_deep_contain(&self.actual, expected),
            (false, Value::String(needle)) => content::to_contain(&self.actual, needle),
            (false, other) => content::to_contain(&self.actual, &other.to_string()),
        };
        self.finish(check, message)
    }

    pub fn to_have_length(&self, expected: usize, message: Option<&str>) -> Self {
        self.finish(content::to_have_length(&self.actual, expected), message)
    }

    pub fn to_match(&self, pattern: &str, message: Option<&str>) -> Self {
        self.finish(
            content::to_match(&self.actual, pattern, self.max_pattern_length),
            message,
        )
    }

    pub fn to_be_a(&self, expected_type: &str, message: Option<&str>) -> Self {
        self.finish(content::to_be_a(&self.actual, expected_type), message)
    }

    pub fn to_be_instance_of(&self, class: &str, message: Option<&str>) -> Self {
        self.finish(content::to_be_instance_of(&self.actual, class), message)
    }

    pub fn to_be_greater_than(&self, bound: f64, message: Option<&str>) -> Self {
        self.finish(content::to_be_greater_than(&self.actual, bound), message)
    }

    pub fn to_be_less_than(&self, bound: f64, message: Option<&str>) -> Self {
        self.finish(content::to_be_less_than(&self.actual, bound), message)
    }

    pub fn to_be_one_of(&self, candidates: &[Value], message: Option<&str>) -> Self {
        self.finish(content::to_be_one_of(&self.actual, candidates), message)
    }

    pub fn to_have_property(&self, path: &str, message: Option<&str>) -> Self {
        self.finish(json::to_have_property(&self.actual, path), message)
    }

    pub fn to_have_property_value(&self, path: &str, expected: &Value, message: Option<&str>) -> Self {
        self.finish(json::to_have_property_value(&self.actual, path, expected), message)
    }

    pub fn to_be_object(&self, message: Option<&str>) -> Self {
        self.finish(json::to_be_object(&self.actual), message)
    }

    pub fn to_match_schema(&self, schema: &Value, message: Option<&str>) -> Self {
        self.finish(json::to_match_schema(&self.actual, schema), message)
    }

    /// Custom predicate over the actual value.
    pub fn to_satisfy(&self, predicate: impl FnOnce(&Value) -> bool, message: Option<&str>) -> Self {
        let passed = predicate(&self.actual);
        self.finish(
            Check::new("to satisfy", passed, Some(self.actual.clone()), None),
            message,
        )
    }

    pub fn pass(&self, message: Option<&str>) -> Self {
        self.finish(content::pass(), message)
    }

    pub fn fail(&self, message: Option<&str>) -> Self {
        self.finish(content::fail(), message)
    }
}
