//! Assertion library.
//!
//! Each category evaluates an expectation against the actual value
//! captured at construction and appends exactly one [`TestResult`]
//! to the owning context. Nothing is ever removed or rewritten.
//!
//! - [`ContentAssertions`]: equality, null/truthiness, contains,
//!   length, pattern, type checks.
//! - [`JsonAssertions`]: dotted-path properties, plain-object
//!   checks, `{data: ...}` envelope conveniences, schemas.
//! - [`HeaderAssertions`]: header presence and content type.
//! - [`StatusAssertions`]: exact status, ranges, named shortcuts.
//! - [`Expectation`]: the chainable facade over all of the above,
//!   with `.not` and `.deep` modifiers.

pub mod builder;
pub mod content;
pub mod header;
pub mod json;
pub mod schema;
pub mod status;

pub use builder::Expectation;
pub use content::ContentAssertions;
pub use header::HeaderAssertions;
pub use json::JsonAssertions;
pub use schema::{matches_schema, validate_schema};
pub use status::StatusAssertions;

use crate::context::SharedContext;
use crate::model::{TestResult, TestStatus};
use crate::validator::describe;
use serde_json::Value;

/// Raw result of evaluating one predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct AssertionOutcome {
    pub expected: Option<Value>,
    pub actual: Option<Value>,
    pub passed: bool,
}

/// An evaluated but not yet recorded assertion.
#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub name: String,
    pub outcome: AssertionOutcome,
    /// Explanation that replaces the generated message on failure
    /// (e.g. "expected a string but got number").
    pub detail: Option<String>,
}

impl Check {
    pub fn new(
        name: impl Into<String>,
        passed: bool,
        actual: Option<Value>,
        expected: Option<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            outcome: AssertionOutcome {
                expected,
                actual,
                passed,
            },
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn passed(&self) -> bool {
        self.outcome.passed
    }
}

/// Invert a check when `negated` is set. The recorded name gains a
/// `not ` prefix and any failure detail no longer applies.
pub fn apply_negation(check: Check, negated: bool) -> Check {
    if !negated {
        return check;
    }
    Check {
        name: format!("not {}", check.name),
        outcome: AssertionOutcome {
            passed: !check.outcome.passed,
            ..check.outcome
        },
        detail: None,
    }
}

/// Append one assertion result to `context`.
///
/// `message` overrides the generated message in both the pass and
/// fail case.
pub fn add_assertion(
    context: &SharedContext,
    name: &str,
    outcome: AssertionOutcome,
    message: Option<&str>,
) -> bool {
    add_assertion_with_detail(context, name, outcome, message, None)
}

fn add_assertion_with_detail(
    context: &SharedContext,
    name: &str,
    outcome: AssertionOutcome,
    message: Option<&str>,
    detail: Option<&str>,
) -> bool {
    let passed = outcome.passed;
    let message = match (message, detail) {
        (Some(custom), _) => custom.to_string(),
        (None, Some(detail)) if !passed => detail.to_string(),
        (None, _) => default_message(name, &outcome),
    };
    let status = if passed {
        TestStatus::Pass
    } else {
        TestStatus::Fail
    };

    context.push_assertion(
        TestResult::new(name, status)
            .with_message(message)
            .with_values(outcome.actual, outcome.expected),
    );
    passed
}

/// Record an evaluated check.
pub fn record(context: &SharedContext, check: Check, message: Option<&str>) -> bool {
    add_assertion_with_detail(
        context,
        &check.name,
        check.outcome,
        message,
        check.detail.as_deref(),
    )
}

fn default_message(name: &str, outcome: &AssertionOutcome) -> String {
    let actual = outcome
        .actual
        .as_ref()
        .map_or_else(|| "undefined".to_string(), describe);
    let verdict = if outcome.passed { "passed" } else { "failed" };
    match &outcome.expected {
        Some(expected) => format!(
            "Assertion {verdict}: expected {actual} {name} {}",
            describe(expected)
        ),
        None => format!("Assertion {verdict}: expected {actual} {name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_add_assertion_appends_only() {
        let ctx = SharedContext::default();
        let outcome = AssertionOutcome {
            expected: Some(json!(200)),
            actual: Some(json!(404)),
            passed: false,
        };
        assert!(!add_assertion(&ctx, "to be", outcome.clone(), None));
        assert!(!add_assertion(&ctx, "to be", outcome, Some("custom")));

        let snapshot = ctx.snapshot();
        assert_eq!(snapshot.assertions.len(), 2);
        assert_eq!(snapshot.assertions[0].status, TestStatus::Fail);
        assert_eq!(
            snapshot.assertions[0].message.as_deref(),
            Some("Assertion failed: expected 404 to be 200")
        );
        assert_eq!(snapshot.assertions[0].actual, Some(json!(404)));
        assert_eq!(snapshot.assertions[1].message.as_deref(), Some("custom"));
    }

    #[test]
    fn test_negation_flips_and_renames() {
        let check = Check::new("to be", true, Some(json!(1)), Some(json!(1)))
            .with_detail("unused");
        let negated = apply_negation(check.clone(), true);
        assert_eq!(negated.name, "not to be");
        assert!(!negated.passed());
        assert!(negated.detail.is_none());

        assert_eq!(apply_negation(check.clone(), false), check);
    }

    #[test]
    fn test_detail_used_only_on_failure() {
        let ctx = SharedContext::default();
        record(
            &ctx,
            Check::new("to contain", false, Some(json!(5)), Some(json!("a")))
                .with_detail("expected a string but got number"),
            None,
        );
        record(
            &ctx,
            Check::new("to contain", true, Some(json!("abc")), Some(json!("a")))
                .with_detail("ignored"),
            None,
        );
        let snapshot = ctx.snapshot();
        assert_eq!(
            snapshot.assertions[0].message.as_deref(),
            Some("expected a string but got number")
        );
        assert!(snapshot.assertions[1]
            .message
            .as_deref()
            .is_some_and(|m| m.starts_with("Assertion passed")));
    }
}
