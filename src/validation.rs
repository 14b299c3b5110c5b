//! Schema validation helpers.
//!
//! Validates a `serde_json::Value` (provider or resource configuration as
//! handed over by the host) against a [`Schema`] and reports problems as
//! [`Diagnostic`]s.
//!
//! # Example
//!
//! ```
//! use snowplow_provider::schema::{Attribute, Schema};
//! use snowplow_provider::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::new()
//!     .with_attribute("collector_uri", Attribute::optional_string())
//!     .with_attribute("emit_timeout_seconds", Attribute::optional_int64());
//!
//! assert!(validate(&schema, &json!({"collector_uri": "com.acme"})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"emit_timeout_seconds": "soon"}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("emit_timeout_seconds".to_string()));
//! ```

use crate::schema::{
    Attribute, AttributeType, Block, BlockNestingMode, Diagnostic, DiagnosticSeverity, NestedBlock,
    Schema,
};
use serde_json::Value;

/// Validate a JSON value against a schema.
///
/// An empty list means the value is valid.
///
/// - Required attributes must be present and non-null
/// - Computed-only attributes are skipped (the provider sets these)
/// - Attribute types must match the schema
/// - Nested blocks are validated recursively with min/max item constraints
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, value, "", &mut diagnostics);
    diagnostics
}

/// Like [`validate`], but returns `Err` with the diagnostics when any are found.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Check if a JSON value is valid against a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

/// Fill absent or null top-level attributes with their schema defaults.
///
/// Non-object values are returned unchanged.
pub fn apply_defaults(schema: &Schema, value: &Value) -> Value {
    let mut value = match value {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other.clone(),
    };
    if let Value::Object(obj) = &mut value {
        for (name, attr) in &schema.block.attributes {
            let Some(default) = &attr.default else {
                continue;
            };
            if obj.get(name).map_or(true, Value::is_null) {
                obj.insert(name.clone(), default.clone());
            }
        }
    }
    value
}

fn validate_block(block: &Block, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    let obj = match value {
        Value::Object(map) => map,
        Value::Null => return,
        _ => {
            let diagnostic =
                Diagnostic::error("Expected object").with_detail(format!("Got {}", value_type_name(value)));
            diagnostics.push(if path.is_empty() {
                diagnostic
            } else {
                diagnostic.with_attribute(path)
            });
            return;
        },
    };

    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        validate_attribute(attr, obj.get(name), &attr_path, diagnostics);
    }

    for (name, nested_block) in &block.blocks {
        let block_path = join_path(path, name);
        validate_nested_block(nested_block, obj.get(name), &block_path, diagnostics);
    }
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
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
            }
        },
        AttributeType::Dynamic => {},
    }
}

fn validate_nested_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let items: Vec<&Value> = match (nested.nesting_mode, value) {
        (_, None | Some(Value::Null)) => Vec::new(),
        (BlockNestingMode::Single, Some(v @ Value::Object(_))) => vec![v],
        // Hosts commonly encode single blocks as one-element lists.
        (_, Some(Value::Array(arr))) => arr.iter().collect(),
        (_, Some(v)) => {
            diagnostics.push(
                Diagnostic::error(format!("Expected block for '{}'", path))
                    .with_detail(format!("Got {}", value_type_name(v)))
                    .with_attribute(path),
            );
            return;
        },
    };

    let len = items.len() as u32;
    if len < nested.min_items {
        diagnostics.push(
            Diagnostic::error(format!(
                "Block '{}' requires at least {} item(s), got {}",
                path, nested.min_items, len
            ))
            .with_attribute(path),
        );
    }
    if nested.max_items > 0 && len > nested.max_items {
        diagnostics.push(
            Diagnostic::error(format!(
                "Block '{}' allows at most {} item(s), got {}",
                path, nested.max_items, len
            ))
            .with_attribute(path),
        );
    }

    match nested.nesting_mode {
        BlockNestingMode::Single if items.len() == 1 => {
            validate_block(&nested.block, items[0], path, diagnostics);
        },
        _ => {
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{}.{}", path, i);
                validate_block(&nested.block, item, &item_path, diagnostics);
            }
        },
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
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

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.as_i64().is_some(),
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic {
        severity: DiagnosticSeverity::Error,
        summary: format!("Invalid type for attribute '{}'", path),
        detail: Some(format!("Expected {}, got {}", expected, value_type_name(got))),
        attribute: Some(path.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Block, NestedBlock, Schema};
    use serde_json::json;

    fn event_block() -> Block {
        Block::new()
            .with_attribute("iglu_uri", Attribute::required_string())
            .with_attribute("payload", Attribute::required_dynamic())
    }

    #[test]
    fn test_validate_required_string() {
        let schema = Schema::new().with_attribute("page_url", Attribute::required_string());

        assert!(validate(&schema, &json!({"page_url": "https://acme.com"})).is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("page_url".to_string()));

        let diagnostics = validate(&schema, &json!({"page_url": null}));
        assert_eq!(diagnostics.len(), 1);

        let diagnostics = validate(&schema, &json!({"page_url": 123}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));
    }

    #[test]
    fn test_validate_optional_int64() {
        let schema = Schema::new().with_attribute("emit_timeout_seconds", Attribute::optional_int64());

        assert!(validate(&schema, &json!({"emit_timeout_seconds": 30})).is_empty());
        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(&schema, &json!({"emit_timeout_seconds": null})).is_empty());
        assert_eq!(validate(&schema, &json!({"emit_timeout_seconds": 30.0})).len(), 1);
        assert_eq!(validate(&schema, &json!({"emit_timeout_seconds": 2.5})).len(), 1);
        assert_eq!(validate(&schema, &json!({"emit_timeout_seconds": "30"})).len(), 1);
    }

    #[test]
    fn test_validate_computed_attribute_skipped() {
        let schema = Schema::new().with_attribute("id", Attribute::computed_string());

        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(&schema, &json!({"id": 123})).is_empty());
    }

    #[test]
    fn test_validate_single_block() {
        let schema = Schema::new().with_block(
            "create_event",
            NestedBlock::single(event_block()).with_min_items(1),
        );

        let valid = json!({"create_event": {"iglu_uri": "iglu:com.acme/created/jsonschema/1-0-0", "payload": "{}"}});
        assert!(validate(&schema, &valid).is_empty());

        // One-element list encoding is accepted too.
        let listed = json!({"create_event": [{"iglu_uri": "iglu:com.acme/created/jsonschema/1-0-0", "payload": {}}]});
        assert!(validate(&schema, &listed).is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("at least 1"));

        let diagnostics = validate(&schema, &json!({"create_event": {"payload": "{}"}}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].attribute,
            Some("create_event.iglu_uri".to_string())
        );
    }

    #[test]
    fn test_validate_list_block() {
        let schema = Schema::new().with_block("contexts", NestedBlock::list(event_block()));

        let contexts = json!({"contexts": [
            {"iglu_uri": "iglu:com.acme/context_1/jsonschema/1-0-0", "payload": "{\"foo\":\"bar\"}"},
            {"iglu_uri": "iglu:com.acme/context_2/jsonschema/1-0-0", "payload": {"foo2": "bar2"}}
        ]});
        assert!(validate(&schema, &contexts).is_empty());
        assert!(validate(&schema, &json!({"contexts": []})).is_empty());

        let diagnostics = validate(&schema, &json!({"contexts": [{"iglu_uri": 5, "payload": "{}"}]}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].attribute,
            Some("contexts.0.iglu_uri".to_string())
        );

        let diagnostics = validate(&schema, &json!({"contexts": "nope"}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Expected block"));
    }

    #[test]
    fn test_validate_single_block_too_many() {
        let schema = Schema::new().with_block("update_event", NestedBlock::single(event_block()));
        let two = json!({"update_event": [
            {"iglu_uri": "iglu:a/b/jsonschema/1-0-0", "payload": "{}"},
            {"iglu_uri": "iglu:a/c/jsonschema/1-0-0", "payload": "{}"}
        ]});
        let diagnostics = validate(&schema, &two);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("at most 1"));
    }

    #[test]
    fn test_is_valid_and_result_helpers() {
        let schema = Schema::new().with_attribute("page_url", Attribute::required_string());

        assert!(is_valid(&schema, &json!({"page_url": "https://acme.com"})));
        assert!(!is_valid(&schema, &json!({})));
        assert!(validate_result(&schema, &json!({"page_url": "/"})).is_ok());
        assert_eq!(validate_result(&schema, &json!({})).unwrap_err().len(), 1);
    }

    #[test]
    fn test_validate_root_not_object() {
        let schema = Schema::new().with_attribute("page_url", Attribute::required_string());

        let diagnostics = validate(&schema, &json!("not an object"));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Expected object"));
    }

    #[test]
    fn test_apply_defaults() {
        let schema = Schema::new()
            .with_attribute(
                "tracker_platform",
                Attribute::optional_string().with_default(json!("srv")),
            )
            .with_attribute("collector_uri", Attribute::optional_string());

        let applied = apply_defaults(&schema, &json!({"tracker_platform": null}));
        assert_eq!(applied["tracker_platform"], "srv");
        assert!(applied.get("collector_uri").is_none());

        let applied = apply_defaults(&schema, &json!({"tracker_platform": "web"}));
        assert_eq!(applied["tracker_platform"], "web");

        let applied = apply_defaults(&schema, &Value::Null);
        assert_eq!(applied["tracker_platform"], "srv");
    }
}
