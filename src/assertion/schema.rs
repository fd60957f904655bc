//! Minimal recursive structural schema validator.
//!
//! Supports `type` (`string`, `number`, `integer`, `boolean`,
//! `object`, `array`, `null`), `required` and nested `properties`.
//! Anything it does not understand passes.

use crate::validator::{is_reserved_key, type_name};
use serde_json::Value;

/// Collect every violation of `schema` by `value`. Empty means the
/// value matches.
pub fn validate_schema(value: &Value, schema: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    validate_at(value, schema, "$", &mut errors);
    errors
}

pub fn matches_schema(value: &Value, schema: &Value) -> bool {
    validate_schema(value, schema).is_empty()
}

fn validate_at(value: &Value, schema: &Value, path: &str, errors: &mut Vec<String>) {
    let Some(schema) = schema.as_object() else {
        return;
    };

    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if let Some(false) = type_matches(value, expected) {
            errors.push(format!(
                "{path}: expected type {expected} but got {}",
                type_name(value)
            ));
            return;
        }
    }

    let Some(object) = value.as_object() else {
        return;
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if is_reserved_key(key) {
                continue;
            }
            if !object.contains_key(key) {
                errors.push(format!("{path}: missing required property '{key}'"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, sub_schema) in properties {
            if is_reserved_key(key) {
                continue;
            }
            if let Some(child) = object.get(key) {
                validate_at(child, sub_schema, &format!("{path}.{key}"), errors);
            }
        }
    }
}

/// `None` when the type name is not one we validate.
fn type_matches(value: &Value, expected: &str) -> Option<bool> {
    let matched = match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => return None,
    };
    Some(matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_permissive_defaults() {
        assert!(matches_schema(&json!({}), &json!({"type": "object"})));
        assert!(!matches_schema(
            &json!({}),
            &json!({"type": "object", "required": ["x"]})
        ));
        assert!(matches_schema(&json!(42), &json!({})));
        assert!(matches_schema(&json!("x"), &json!("not a schema")));
        assert!(matches_schema(&json!("x"), &json!({"type": "uuid"})));
    }

    #[test]
    fn test_nested_properties() {
        let schema = json!({
            "type": "object",
            "required": ["user"],
            "properties": {
                "user": {
                    "type": "object",
                    "required": ["id", "name"],
                    "properties": {
                        "id": {"type": "integer"},
                        "tags": {"type": "array"}
                    }
                }
            }
        });

        assert!(matches_schema(
            &json!({"user": {"id": 1, "name": "a", "tags": []}}),
            &schema
        ));

        let errors = validate_schema(&json!({"user": {"id": "1", "tags": {}}}), &schema);
        assert_eq!(errors.len(), 3, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("'name'")));
        assert!(errors.iter().any(|e| e.starts_with("$.user.id")));
        assert!(errors.iter().any(|e| e.starts_with("$.user.tags")));
    }

    #[test]
    fn test_reserved_keys_are_ignored() {
        let schema = json!({
            "type": "object",
            "required": ["__proto__", "constructor"],
            "properties": {
                "prototype": {"type": "string"}
            }
        });
        assert!(matches_schema(&json!({"prototype": 5}), &schema));
    }
}
