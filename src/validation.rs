//! Input validation against JSON schemas
//!
//! Only structure is enforced here: required fields, strings, arrays and
//! objects. Numeric fields are never rejected; they are parsed leniently by
//! the request layer and fall back to defaults.

use crate::error::MediaError;
use serde_json::Value;

pub type Result<T> = std::result::Result<T, MediaError>;

/// Validate input against a JSON schema
pub fn validate_input(input: &Value, schema: &Value) -> Result<()> {
    if !input.is_object() {
        return Err(MediaError::ValidationError(
            "Input must be a JSON object".to_string(),
        ));
    }

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field_name in required {
            let field = field_name.as_str().ok_or_else(|| {
                MediaError::ValidationError(
                    "Invalid schema: required field not a string".to_string(),
                )
            })?;

            match input.get(field) {
                None | Some(Value::Null) => {
                    return Err(MediaError::ValidationError(format!(
                        "Missing required field: {}",
                        field
                    )))
                }
                Some(_) => {}
            }
        }
    }

    if let (Some(properties), Some(input_obj)) = (
        schema.get("properties").and_then(|p| p.as_object()),
        input.as_object(),
    ) {
        for (key, value) in input_obj {
            if let Some(prop_schema) = properties.get(key) {
                validate_type(key, value, prop_schema)?;
            }
        }
    }

    Ok(())
}

fn validate_type(key: &str, value: &Value, schema: &Value) -> Result<()> {
    let Some(expected) = schema.get("type").and_then(|t| t.as_str()) else {
        return Ok(());
    };

    let valid = match expected {
        "string" => value.is_string(),
        // Lenient: numbers, numeric strings and garbage all fall back later.
        "integer" | "number" => true,
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    };
    if !valid {
        return Err(MediaError::ValidationError(format!(
            "Type mismatch for {}: expected {}, got {}",
            key, expected, value
        )));
    }

    if let (Some(items), Some(array)) = (schema.get("items"), value.as_array()) {
        for item in array {
            if items.get("type").is_some() && items.get("properties").is_none() {
                validate_type(key, item, items)?;
            } else {
                validate_input(item, items)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn overlay_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "base_path": { "type": "string" },
                "overlay_path": { "type": "string" },
                "x": { "type": "integer" },
                "startTime": { "type": "number" }
            },
            "required": ["base_path", "overlay_path"]
        })
    }

    #[test]
    fn test_validate_required_fields() {
        let valid = json!({
            "base_path": "/uploads/base.mp4",
            "overlay_path": "/uploads/over.mp4"
        });
        assert!(validate_input(&valid, &overlay_schema()).is_ok());

        let missing = json!({ "base_path": "/uploads/base.mp4" });
        assert!(validate_input(&missing, &overlay_schema()).is_err());

        let null = json!({ "base_path": "/uploads/base.mp4", "overlay_path": null });
        assert!(validate_input(&null, &overlay_schema()).is_err());
    }

    #[test]
    fn test_numbers_are_lenient() {
        let input = json!({
            "base_path": "/uploads/base.mp4",
            "overlay_path": "/uploads/over.mp4",
            "x": "ten",
            "startTime": "1.5"
        });
        assert!(validate_input(&input, &overlay_schema()).is_ok());
    }

    #[test]
    fn test_paths_must_be_strings() {
        let input = json!({ "base_path": 42, "overlay_path": "/uploads/over.mp4" });
        assert!(validate_input(&input, &overlay_schema()).is_err());
    }

    #[test]
    fn test_array_items() {
        let schema = json!({
            "type": "object",
            "properties": {
                "image_paths": { "type": "array", "items": { "type": "string" } },
                "layers": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": { "path": { "type": "string" } },
                        "required": ["path"]
                    }
                }
            }
        });
        assert!(validate_input(&json!({ "image_paths": ["/a.png", "/b.png"] }), &schema).is_ok());
        assert!(validate_input(&json!({ "image_paths": ["/a.png", 3] }), &schema).is_err());
        assert!(validate_input(&json!({ "layers": [{ "x": 1 }] }), &schema).is_err());
        assert!(validate_input(&json!({ "layers": [{ "path": "/o.png" }] }), &schema).is_ok());
    }

    #[test]
    fn test_non_object_input() {
        assert!(validate_input(&json!([1, 2]), &overlay_schema()).is_err());
    }
}
