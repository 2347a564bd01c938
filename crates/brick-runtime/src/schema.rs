//! Input schema validation for rendered brick arguments.
//!
//! [`BasicSchemaValidator`] checks the JSON Schema keywords bricks declare in
//! practice: `type`, `required`, `properties`, `items` and `enum`. Other
//! keywords are ignored.

use serde_json::{Map, Value};

/// Validates a rendered value against a brick's input schema.
pub trait SchemaValidator: Send + Sync {
    /// Returns every violation found, or `Ok(())`.
    fn validate(&self, value: &Value, schema: &Value) -> Result<(), Vec<String>>;
}

/// Accepts any value.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllValidator;

impl SchemaValidator for AcceptAllValidator {
    fn validate(&self, _value: &Value, _schema: &Value) -> Result<(), Vec<String>> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BasicSchemaValidator;

impl SchemaValidator for BasicSchemaValidator {
    fn validate(&self, value: &Value, schema: &Value) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        check(value, schema, "$", &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn check(value: &Value, schema: &Value, at: &str, errors: &mut Vec<String>) {
    let Value::Object(schema) = schema else {
        // `true` / `{}` / anything else accepts.
        if schema == &Value::Bool(false) {
            errors.push(format!("{at}: no value is allowed"));
        }
        return;
    };

    if let Some(expected) = schema.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(name) => vec![name.as_str()],
            Value::Array(names) => names.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|name| matches_type(value, name)) {
            errors.push(format!(
                "{at}: expected {}, got {}",
                allowed.join(" or "),
                type_name(value)
            ));
            return;
        }
    }

    if let Some(Value::Array(options)) = schema.get("enum") {
        if !options.contains(value) {
            errors.push(format!("{at}: {value} is not one of {}", Value::Array(options.clone())));
        }
    }

    if let Some(number) = value.as_f64() {
        check_bounds(number, schema, at, errors);
    }

    if let Value::Object(object) = value {
        check_object(object, schema, at, errors);
    }

    if let (Value::Array(items), Some(item_schema)) = (value, schema.get("items")) {
        for (index, item) in items.iter().enumerate() {
            check(item, item_schema, &format!("{at}[{index}]"), errors);
        }
    }
}

fn check_object(object: &Map<String, Value>, schema: &Map<String, Value>, at: &str, errors: &mut Vec<String>) {
    if let Some(Value::Array(required)) = schema.get("required") {
        for name in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(name) {
                errors.push(format!("{at}: missing required property '{name}'"));
            }
        }
    }
    if let Some(Value::Object(properties)) = schema.get("properties") {
        for (name, property_schema) in properties {
            if let Some(property) = object.get(name) {
                check(property, property_schema, &format!("{at}.{name}"), errors);
            }
        }
    }
}

fn check_bounds(number: f64, schema: &Map<String, Value>, at: &str, errors: &mut Vec<String>) {
    if let Some(minimum) = schema.get("minimum").and_then(Value::as_f64) {
        if number < minimum {
            errors.push(format!("{at}: {number} is less than the minimum of {minimum}"));
        }
    }
    if let Some(maximum) = schema.get("maximum").and_then(Value::as_f64) {
        if number > maximum {
            errors.push(format!("{at}: {number} is greater than the maximum of {maximum}"));
        }
    }
}

fn matches_type(value: &Value, name: &str) -> bool {
    match name {
        "null" => value.is_null(),
        "boolean" => value.is_boolean(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validate(value: Value, schema: Value) -> Result<(), Vec<String>> {
        BasicSchemaValidator.validate(&value, &schema)
    }

    #[test]
    fn accepts_matching_object() {
        let schema = json!({
            "type": "object",
            "properties": {"message": {"type": "string"}, "count": {"type": "integer"}},
            "required": ["message"]
        });
        assert!(validate(json!({"message": "hi", "count": 2}), schema).is_ok());
    }

    #[test]
    fn reports_missing_required_and_wrong_types() {
        let schema = json!({
            "type": "object",
            "properties": {"count": {"type": "integer"}},
            "required": ["message"]
        });
        let errors = validate(json!({"count": "two"}), schema).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("missing required property 'message'"));
        assert!(errors[1].contains("$.count: expected integer, got string"));
    }

    #[test]
    fn type_lists_and_enums() {
        let schema = json!({"type": ["string", "null"], "enum": ["a", "b", null]});
        assert!(validate(json!("a"), schema.clone()).is_ok());
        assert!(validate(Value::Null, schema.clone()).is_ok());
        assert!(validate(json!("c"), schema.clone()).is_err());
        assert!(validate(json!(1), schema).is_err());
    }

    #[test]
    fn validates_array_items() {
        let schema = json!({"type": "array", "items": {"type": "number"}});
        let errors = validate(json!([1, "x", 3]), schema).unwrap_err();
        assert_eq!(errors, vec!["$[1]: expected number, got string".to_string()]);
    }

    #[test]
    fn numeric_bounds() {
        let schema = json!({"type": "integer", "minimum": 0, "maximum": 10});
        assert!(validate(json!(0), schema.clone()).is_ok());
        assert!(validate(json!(10), schema.clone()).is_ok());
        assert_eq!(
            validate(json!(-1), schema.clone()).unwrap_err(),
            vec!["$: -1 is less than the minimum of 0".to_string()]
        );
        assert!(validate(json!(11), schema).is_err());
    }

    #[test]
    fn boolean_schemas() {
        assert!(validate(json!(1), json!(true)).is_ok());
        assert!(validate(json!(1), json!(false)).is_err());
        assert!(validate(json!(1), json!({})).is_ok());
    }

    #[test]
    fn accept_all_accepts_anything() {
        assert!(AcceptAllValidator
            .validate(&json!("x"), &json!({"type": "number"}))
            .is_ok());
    }
}
