//! Schema-driven JSON conversion.

use std::collections::BTreeMap;

use super::types::{FieldType, KindSchema, ObjectSchema};
use crate::error::SchemaError;
use crate::resource::{FieldPath, Resource, Value};

/// How strictly JSON is matched against the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertMode {
    /// Unknown fields are errors. Used for user input.
    Strict,
    /// Unknown fields are dropped. Used for remote responses.
    Lenient,
}

/// Converts a JSON value to a [`Value`] of the given type.
///
/// # Errors
///
/// Returns [`SchemaError::TypeMismatch`] if the JSON shape does not fit the
/// type, or [`SchemaError::UnknownField`] for undeclared object fields in
/// strict mode.
pub fn value_from_json(
    field_type: &FieldType,
    json: &serde_json::Value,
    path: &FieldPath,
    mode: ConvertMode,
) -> Result<Value, SchemaError> {
    convert(field_type, json, path, mode, "")
}

fn convert(
    field_type: &FieldType,
    json: &serde_json::Value,
    path: &FieldPath,
    mode: ConvertMode,
    kind: &str,
) -> Result<Value, SchemaError> {
    use serde_json::Value as Json;

    let mismatch = || SchemaError::TypeMismatch {
        field: path.to_string(),
        expected: field_type.type_name().to_string(),
        found: json_type_name(json).to_string(),
    };

    match (field_type, json) {
        (_, Json::Null) => Ok(Value::Null),
        (FieldType::Bool, Json::Bool(b)) => Ok(Value::Bool(*b)),
        (FieldType::Int, Json::Number(n)) => n.as_i64().map(Value::Int).ok_or_else(mismatch),
        // int64 fields are commonly transported as strings
        (FieldType::Int, Json::String(s)) => s.parse().map(Value::Int).map_err(|_| mismatch()),
        (FieldType::Float, Json::Number(n)) => n.as_f64().map(Value::Float).ok_or_else(mismatch),
        (FieldType::String(_) | FieldType::Enum | FieldType::Reference, Json::String(s)) => {
            Ok(Value::String(s.clone()))
        }
        (FieldType::List { element, .. }, Json::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| convert(element, item, &path.nest(&i.to_string()), mode, kind))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        (FieldType::Map(element), Json::Object(entries)) => entries
            .iter()
            .map(|(k, v)| Ok((k.clone(), convert(element, v, &path.nest(k), mode, kind)?)))
            .collect::<Result<BTreeMap<_, _>, SchemaError>>()
            .map(Value::Map),
        (FieldType::Object(object), Json::Object(entries)) => {
            object_from_json(object, entries, path, mode, kind).map(Value::Object)
        }
        _ => Err(mismatch()),
    }
}

fn object_from_json(
    object: &ObjectSchema,
    entries: &serde_json::Map<String, serde_json::Value>,
    path: &FieldPath,
    mode: ConvertMode,
    kind: &str,
) -> Result<BTreeMap<String, Value>, SchemaError> {
    let mut fields = BTreeMap::new();
    for (name, json) in entries {
        let field_path = path.nest(name);
        let Some(meta) = object.field(name) else {
            if mode == ConvertMode::Strict {
                return Err(SchemaError::UnknownField {
                    kind: kind.to_string(),
                    field: field_path.to_string(),
                });
            }
            continue;
        };
        let value = convert(&meta.field_type, json, &field_path, mode, kind)?;
        if !value.is_null() {
            fields.insert(name.clone(), value);
        }
    }
    Ok(fields)
}

/// Converts a JSON object into a resource of the schema's kind.
///
/// # Errors
///
/// Returns an error if `json` is not an object, or any field fails
/// conversion.
pub fn resource_from_json(
    schema: &KindSchema,
    json: &serde_json::Value,
    mode: ConvertMode,
) -> Result<Resource, SchemaError> {
    let serde_json::Value::Object(entries) = json else {
        return Err(SchemaError::TypeMismatch {
            field: String::from("<root>"),
            expected: String::from("object"),
            found: json_type_name(json).to_string(),
        });
    };
    let fields = object_from_json(&schema.root, entries, &FieldPath::root(), mode, &schema.kind)?;
    Ok(Resource::from_fields(schema.kind.clone(), fields))
}

/// JSON body containing only the fields named by `mask`.
///
/// Masked fields that are unset are omitted, which a PATCH with the same
/// mask interprets as clearing them.
#[must_use]
pub fn masked_json(resource: &Resource, mask: &[FieldPath]) -> serde_json::Value {
    mask.iter()
        .fold(Resource::new(resource.kind()), |acc, path| {
            acc.with_path(path, resource.lookup(path).clone())
        })
        .to_json()
}

const fn json_type_name(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fixtures::key_schema;
    use serde_json::json;

    #[test]
    fn test_resource_from_json_types_objects_and_maps() {
        let resource = resource_from_json(
            &key_schema(),
            &json!({
                "displayName": "foo",
                "labels": {"env": "prod"},
                "webSettings": {"integrationType": "SCORE", "allowedDomains": ["a.com"]}
            }),
            ConvertMode::Strict,
        )
        .expect("convert");

        assert!(matches!(resource.get("labels"), Value::Map(_)));
        assert!(matches!(resource.get("webSettings"), Value::Object(_)));
        assert_eq!(
            resource.lookup(&FieldPath::parse("webSettings.allowedDomains")),
            &Value::strings(["a.com"])
        );
    }

    #[test]
    fn test_strict_rejects_unknown_lenient_drops() {
        let json = json!({"displayName": "foo", "etag": "abc"});
        let err = resource_from_json(&key_schema(), &json, ConvertMode::Strict).expect_err("strict");
        assert!(matches!(err, SchemaError::UnknownField { ref field, .. } if field == "etag"));

        let resource =
            resource_from_json(&key_schema(), &json, ConvertMode::Lenient).expect("lenient");
        assert!(resource.get("etag").is_null());
    }

    #[test]
    fn test_type_mismatch_reports_path() {
        let json = json!({"webSettings": {"allowAllDomains": "yes"}});
        let err = resource_from_json(&key_schema(), &json, ConvertMode::Strict).expect_err("mismatch");
        assert_eq!(
            err,
            SchemaError::TypeMismatch {
                field: String::from("webSettings.allowAllDomains"),
                expected: String::from("bool"),
                found: String::from("string"),
            }
        );
    }

    #[test]
    fn test_masked_json() {
        let resource = Resource::new("Key")
            .with("displayName", "foo")
            .with("labels", Value::map([("env", "prod")]));
        let body = masked_json(
            &resource,
            &[FieldPath::parse("displayName"), FieldPath::parse("webSettings")],
        );
        assert_eq!(body, json!({"displayName": "foo"}));
    }
}
