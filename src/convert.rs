//! Conversion between `serde_json::Value` and script values.

use rhai::{Array, Dynamic, Map};
use serde_json::{Number, Value};

pub fn json_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from_bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Dynamic::from_int(i),
            None => Dynamic::from_float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(items) => Dynamic::from_array(items.iter().map(json_to_dynamic).collect()),
        Value::Object(obj) => Dynamic::from_map(map_from_json(obj)),
    }
}

pub fn map_from_json(obj: &serde_json::Map<String, Value>) -> Map {
    obj.iter()
        .map(|(k, v)| (k.as_str().into(), json_to_dynamic(v)))
        .collect()
}

/// Script values without a JSON counterpart (functions, custom
/// types) are rendered through their `Display` form.
pub fn dynamic_to_json(value: &Dynamic) -> Value {
    let value = value.clone().flatten();

    if value.is_unit() {
        return Value::Null;
    }
    if let Ok(b) = value.as_bool() {
        return Value::Bool(b);
    }
    if let Ok(i) = value.as_int() {
        return Value::from(i);
    }
    if let Ok(f) = value.as_float() {
        return Number::from_f64(f).map_or(Value::Null, Value::Number);
    }
    if let Ok(c) = value.as_char() {
        return Value::String(c.to_string());
    }
    if value.is_string() {
        return value
            .into_string()
            .map_or(Value::Null, Value::String);
    }
    if value.is_array() {
        return match value.into_array() {
            Ok(items) => array_to_json(&items),
            Err(_) => Value::Null,
        };
    }
    if value.is_map() {
        return match value.try_cast::<Map>() {
            Some(map) => Value::Object(map_to_json(&map)),
            None => Value::Null,
        };
    }
    Value::String(value.to_string())
}

fn array_to_json(items: &Array) -> Value {
    Value::Array(items.iter().map(dynamic_to_json).collect())
}

pub fn map_to_json(map: &Map) -> serde_json::Map<String, Value> {
    map.iter()
        .map(|(k, v)| (k.to_string(), dynamic_to_json(v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars() {
        assert!(json_to_dynamic(&Value::Null).is_unit());
        assert_eq!(json_to_dynamic(&json!(200)).as_int(), Ok(200));
        assert_eq!(json_to_dynamic(&json!(1.5)).as_float(), Ok(1.5));
        assert_eq!(dynamic_to_json(&Dynamic::from("x".to_string())), json!("x"));
        assert_eq!(dynamic_to_json(&Dynamic::UNIT), Value::Null);
        assert_eq!(dynamic_to_json(&Dynamic::from_float(f64::NAN)), Value::Null);
    }

    #[test]
    fn test_nested_values_survive() {
        let value = json!({"user": {"id": 7, "tags": ["a", "b"], "active": true, "note": null}});
        assert_eq!(dynamic_to_json(&json_to_dynamic(&value)), value);
    }
}
