//! JSON/object assertions: dotted-path properties, plain-object
//! checks, schemas, and conveniences over a `{data: ...}` envelope.

use super::schema::validate_schema;
use super::{record, Check};
use crate::context::SharedContext;
use crate::validator::{get_by_json_path, is_empty_value, is_plain_object, json_equals, type_name};
use serde_json::Value;

pub(crate) fn to_have_property(actual: &Value, path: &str) -> Check {
    let found = get_by_json_path(actual, path);
    Check::new(
        "to have property",
        found.is_some(),
        found.cloned(),
        Some(Value::String(path.to_string())),
    )
}

pub(crate) fn to_have_property_value(actual: &Value, path: &str, expected: &Value) -> Check {
    let found = get_by_json_path(actual, path);
    let check = Check::new(
        "to have property value",
        found.is_some_and(|v| json_equals(v, expected)),
        found.cloned(),
        Some(expected.clone()),
    );
    match found {
        Some(_) => check,
        None => check.with_detail(format!("Property '{path}' does not exist")),
    }
}

pub(crate) fn to_be_object(actual: &Value) -> Check {
    Check::new(
        "to be object",
        is_plain_object(actual),
        Some(Value::String(type_name(actual).to_string())),
        Some(Value::String("object".to_string())),
    )
}

pub(crate) fn to_match_schema(actual: &Value, schema: &Value) -> Check {
    let errors = validate_schema(actual, schema);
    let check = Check::new(
        "to match schema",
        errors.is_empty(),
        Some(actual.clone()),
        Some(schema.clone()),
    );
    if errors.is_empty() {
        check
    } else {
        check.with_detail(format!("Schema validation failed: {}", errors.join("; ")))
    }
}

fn data_path(path: &str) -> String {
    if path.is_empty() {
        "data".to_string()
    } else {
        format!("data.{path}")
    }
}

/// JSON assertions over one captured value.
///
/// The `expect_*` conveniences assume the response envelope shape
/// `{data: ...}` and resolve their paths under `data`.
#[derive(Debug, Clone)]
pub struct JsonAssertions {
    context: SharedContext,
    actual: Value,
}

impl JsonAssertions {
    pub fn new(context: &SharedContext, actual: Value) -> Self {
        Self {
            context: context.clone(),
            actual,
        }
    }

    fn record(&self, check: Check, message: Option<&str>) -> &Self {
        record(&self.context, check, message);
        self
    }

    pub fn to_have_property(&self, path: &str, message: Option<&str>) -> &Self {
        self.record(to_have_property(&self.actual, path), message)
    }

    pub fn to_have_property_value(&self, path: &str, expected: &Value, message: Option<&str>) -> &Self {
        self.record(to_have_property_value(&self.actual, path, expected), message)
    }

    pub fn to_be_object(&self, message: Option<&str>) -> &Self {
        self.record(to_be_object(&self.actual), message)
    }

    pub fn to_match_schema(&self, schema: &Value, message: Option<&str>) -> &Self {
        self.record(to_match_schema(&self.actual, schema), message)
    }

    /// `data` is a parsed JSON object or array.
    pub fn expect_json(&self, message: Option<&str>) -> &Self {
        let data = get_by_json_path(&self.actual, "data");
        let passed = data.is_some_and(|d| d.is_object() || d.is_array());
        let check = Check::new(
            "is json",
            passed,
            data.map(|d| Value::String(type_name(d).to_string())),
            Some(Value::String("object | array".to_string())),
        );
        self.record(check, message)
    }

    /// The value under `data.<path>` is an array.
    pub fn expect_array(&self, path: &str, message: Option<&str>) -> &Self {
        let target = get_by_json_path(&self.actual, &data_path(path));
        let check = Check::new(
            "is array",
            target.is_some_and(Value::is_array),
            target.cloned(),
            Some(Value::String("array".to_string())),
        );
        self.record(check, message)
    }

    /// The value under `data.<path>` is `""`, `[]` or `{}`.
    pub fn expect_empty(&self, path: &str, message: Option<&str>) -> &Self {
        let target = get_by_json_path(&self.actual, &data_path(path));
        let check = Check::new("is empty", target.is_some_and(is_empty_value), target.cloned(), None);
        self.record(check, message)
    }

    pub fn expect_key_exists(&self, key: &str, message: Option<&str>) -> &Self {
        let check = Check {
            name: "has key".to_string(),
            ..to_have_property(&self.actual, &data_path(key))
        };
        self.record(check, message)
    }

    pub fn expect_key_with_value(&self, key: &str, expected: &Value, message: Option<&str>) -> &Self {
        let check = Check {
            name: "has key with value".to_string(),
            ..to_have_property_value(&self.actual, &data_path(key), expected)
        };
        self.record(check, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TestStatus;
    use serde_json::json;

    fn envelope() -> Value {
        json!({
            "status": 200,
            "data": {
                "kind": "list",
                "items": [{"id": "item-1"}, {"id": "item-2"}],
                "tags": [],
                "meta": {"total": 2}
            }
        })
    }

    fn statuses(ctx: &SharedContext) -> Vec<TestStatus> {
        ctx.snapshot().assertions.iter().map(|a| a.status).collect()
    }

    #[test]
    fn test_property_paths() {
        let ctx = SharedContext::default();
        JsonAssertions::new(&ctx, envelope())
            .to_have_property("data.meta.total", None)
            .to_have_property("data.missing.total", None)
            .to_have_property_value("data.items.1.id", &json!("item-2"), None)
            .to_have_property_value("data.nope", &json!(1), None);

        assert_eq!(
            statuses(&ctx),
            vec![
                TestStatus::Pass,
                TestStatus::Fail,
                TestStatus::Pass,
                TestStatus::Fail
            ]
        );
        let snapshot = ctx.snapshot();
        assert_eq!(
            snapshot.assertions[3].message.as_deref(),
            Some("Property 'data.nope' does not exist")
        );
    }

    #[test]
    fn test_plain_object() {
        let ctx = SharedContext::default();
        JsonAssertions::new(&ctx, json!({})).to_be_object(None);
        JsonAssertions::new(&ctx, json!([])).to_be_object(None);
        JsonAssertions::new(&ctx, Value::Null).to_be_object(None);
        assert_eq!(
            statuses(&ctx),
            vec![TestStatus::Pass, TestStatus::Fail, TestStatus::Fail]
        );
    }

    #[test]
    fn test_envelope_conveniences() {
        let ctx = SharedContext::default();
        JsonAssertions::new(&ctx, envelope())
            .expect_json(None)
            .expect_array("items", None)
            .expect_array("kind", None)
            .expect_empty("tags", None)
            .expect_empty("items", None)
            .expect_key_exists("meta", None)
            .expect_key_with_value("kind", &json!("list"), None);

        assert_eq!(
            statuses(&ctx),
            vec![
                TestStatus::Pass,
                TestStatus::Pass,
                TestStatus::Fail,
                TestStatus::Pass,
                TestStatus::Fail,
                TestStatus::Pass,
                TestStatus::Pass
            ]
        );
        let names: Vec<_> = ctx
            .snapshot()
            .assertions
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names[5], "has key");
        assert_eq!(names[6], "has key with value");
    }

    #[test]
    fn test_expect_json_without_envelope() {
        let ctx = SharedContext::default();
        JsonAssertions::new(&ctx, json!({"status": 204})).expect_json(None);
        assert_eq!(statuses(&ctx), vec![TestStatus::Fail]);
    }

    #[test]
    fn test_schema_failure_message() {
        let ctx = SharedContext::default();
        JsonAssertions::new(&ctx, json!({}))
            .to_match_schema(&json!({"type": "object", "required": ["x"]}), None)
            .to_match_schema(&json!({}), None);

        let snapshot = ctx.snapshot();
        assert_eq!(snapshot.assertions[0].status, TestStatus::Fail);
        assert!(snapshot.assertions[0]
            .message
            .as_deref()
            .is_some_and(|m| m.contains("missing required property 'x'")));
        assert_eq!(snapshot.assertions[1].status, TestStatus::Pass);
    }
}
