//! Schema validation helpers.
//!
//! Validates a `serde_json::Value` record against a [`Schema`], collecting
//! every problem instead of stopping at the first one.
//!
//! # Example
//!
//! ```
//! use hemmer_provider_clickhouse::schema::{Schema, Attribute};
//! use hemmer_provider_clickhouse::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("username", Attribute::required_string())
//!     .with_attribute("password", Attribute::required_string().sensitive());
//!
//! let diagnostics = validate(&schema, &json!({"username": "alice", "password": "s3cret"}));
//! assert!(diagnostics.is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"username": 42}));
//! assert_eq!(diagnostics.len(), 2);
//! ```

use crate::schema::{Attribute, AttributeType, Diagnostic, Schema};
use serde_json::{Map, Value};

/// Validate a JSON record against a schema.
///
/// Returns a list of diagnostics for any validation errors found.
/// An empty list means the value is valid.
///
/// # Validation Rules
///
/// - The record must be an object; a null record is checked as an empty one
/// - Required attributes must be present and non-null
/// - Optional attributes may be absent or null
/// - Computed-only attributes are skipped (provider sets these)
/// - Attribute types must match the schema
/// - Attributes not declared in the schema are rejected
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let empty = Map::new();
    let obj = match value {
        Value::Object(map) => map,
        Value::Null => &empty,
        _ => {
            diagnostics.push(
                Diagnostic::error("Expected object")
                    .with_detail(format!("Got {}", value_type_name(value))),
            );
            return diagnostics;
        },
    };

    for (name, attr) in &schema.block.attributes {
        validate_attribute(attr, obj.get(name), name, &mut diagnostics);
    }

    for name in obj.keys() {
        if !schema.block.attributes.contains_key(name) {
            diagnostics.push(
                Diagnostic::error(format!("Unsupported attribute '{}'", name))
                    .with_detail("This attribute is not declared in the schema")
                    .with_attribute(name.as_str()),
            );
        }
    }

    diagnostics
}

/// Check that every identity attribute holds a non-empty string.
///
/// Identity attributes are those marked `force_new`. ClickHouse rejects
/// empty identifiers, so this is caught before any statement is issued.
pub fn validate_identifiers(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    schema
        .block
        .attributes
        .iter()
        .filter(|(_, attr)| attr.force_new)
        .filter_map(|(name, _)| match value.get(name) {
            Some(Value::String(s)) if s.trim().is_empty() => Some(
                Diagnostic::error(format!("Empty value for '{}'", name))
                    .with_detail("ClickHouse object names must not be empty")
                    .with_attribute(name.as_str()),
            ),
            _ => None,
        })
        .collect()
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.flags.computed && !attr.flags.optional && !attr.flags.required {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => validate_attribute_type(&attr.attr_type, v, path, diagnostics),
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        },
        AttributeType::List(element_type) => {
            if let Some(arr) = value.as_array() {
                for (i, elem) in arr.iter().enumerate() {
                    let elem_path = format!("{}.{}", path, i);
                    validate_attribute_type(element_type, elem, &elem_path, diagnostics);
                }
            } else {
                diagnostics.push(type_error(path, "list", value));
            }
        },
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!("Expected {}, got {}", expected, value_type_name(got)))
        .with_attribute(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, AttributeFlags, Schema};
    use serde_json::json;

    fn user_schema() -> Schema {
        Schema::v0()
            .with_attribute("username", Attribute::required_string().with_force_new())
            .with_attribute("password", Attribute::required_string().sensitive())
    }

    #[test]
    fn test_validate_required_string() {
        let schema = Schema::v0().with_attribute("database", Attribute::required_string());

        let diagnostics = validate(&schema, &json!({"database": "analytics"}));
        assert!(diagnostics.is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("database".to_string()));

        let diagnostics = validate(&schema, &json!({"database": null}));
        assert_eq!(diagnostics.len(), 1);

        let diagnostics = validate(&schema, &json!({"database": 123}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));
    }

    #[test]
    fn test_validate_optional_attribute() {
        let schema = Schema::v0().with_attribute("host", Attribute::optional_string());

        assert!(validate(&schema, &json!({"host": "localhost"})).is_empty());
        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(&schema, &json!({"host": null})).is_empty());
        assert_eq!(validate(&schema, &json!({"host": 8123})).len(), 1);
    }

    #[test]
    fn test_validate_computed_attribute_skipped() {
        let schema = Schema::v0().with_attribute("roles", Attribute::computed_string_list());

        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(&schema, &json!({"roles": 123})).is_empty());
    }

    #[test]
    fn test_validate_list() {
        let schema = Schema::v0().with_attribute(
            "names",
            Attribute::new(
                AttributeType::list(AttributeType::String),
                AttributeFlags::required(),
            ),
        );

        assert!(validate(&schema, &json!({"names": ["a", "b"]})).is_empty());
        assert!(validate(&schema, &json!({"names": []})).is_empty());

        let diagnostics = validate(&schema, &json!({"names": ["a", 1]}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("names.1".to_string()));

        assert_eq!(validate(&schema, &json!({"names": "a"})).len(), 1);
    }

    #[test]
    fn test_validate_unsupported_attribute() {
        let diagnostics = validate(
            &user_schema(),
            &json!({"username": "alice", "password": "x", "role": "admin"}),
        );
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("role".to_string()));
    }

    #[test]
    fn test_validate_multiple_errors() {
        let diagnostics = validate(&user_schema(), &json!({"username": 1}));
        assert_eq!(diagnostics.len(), 2);
    }

    #[test]
    fn test_validate_null_record_reports_required_attributes() {
        let diagnostics = validate(&user_schema(), &Value::Null);
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics
            .iter()
            .all(|d| d.summary.starts_with("Missing required attribute")));

        let schema = Schema::v0().with_attribute("host", Attribute::optional_string());
        assert!(validate(&schema, &Value::Null).is_empty());
    }

    #[test]
    fn test_validate_root_not_object() {
        let diagnostics = validate(&user_schema(), &json!("alice"));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Expected object"));
    }

    #[test]
    fn test_validate_identifiers() {
        let schema = user_schema();

        assert!(validate_identifiers(&schema, &json!({"username": "alice"})).is_empty());

        let diagnostics = validate_identifiers(&schema, &json!({"username": "  ", "password": ""}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("username".to_string()));
    }
}
