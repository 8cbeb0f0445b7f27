//! Type-aware value equivalence.

use crate::resource::{NULL, Value};
use crate::schema::{FieldType, ObjectSchema, StringEquivalence};

/// Returns true if `desired` and `actual` are equivalent under `field_type`.
///
/// Unset and zero values (`Null`, `false`, `0`, `""`, empty collections and
/// the empty sentinel) are all equivalent to each other.
#[must_use]
pub fn values_equal(field_type: &FieldType, desired: &Value, actual: &Value) -> bool {
    if desired.is_empty() && actual.is_empty() {
        return true;
    }

    match field_type {
        FieldType::String(equivalence) => strings_equal(*equivalence, desired, actual),
        FieldType::Reference => strings_equal(StringEquivalence::SelfLink, desired, actual),
        FieldType::Float => match (as_f64(desired), as_f64(actual)) {
            (Some(d), Some(a)) => (d - a).abs() < f64::EPSILON,
            _ => false,
        },
        FieldType::List { element, unordered } => match (list_of(desired), list_of(actual)) {
            (Some(d), Some(a)) if *unordered => multiset_equal(element, d, a),
            (Some(d), Some(a)) => {
                d.len() == a.len() && d.iter().zip(a).all(|(x, y)| values_equal(element, x, y))
            }
            _ => false,
        },
        FieldType::Map(element) => match (desired.as_entries(), actual.as_entries()) {
            (Some(d), Some(a)) => d.keys().chain(a.keys()).all(|k| {
                values_equal(element, d.get(k).unwrap_or(&NULL), a.get(k).unwrap_or(&NULL))
            }),
            (Some(entries), None) | (None, Some(entries)) => entries.values().all(Value::is_empty),
            (None, None) => false,
        },
        FieldType::Object(object) => objects_equal(object, desired, actual),
        FieldType::Bool | FieldType::Int | FieldType::Enum => desired == actual,
    }
}

/// Field-wise object comparison.
///
/// Server-defaulted fields left empty in `desired`, and output-only fields
/// left unset, are not compared.
#[must_use]
pub fn objects_equal(object: &ObjectSchema, desired: &Value, actual: &Value) -> bool {
    let is_object = |v: &Value| v.is_empty() || v.as_entries().is_some();
    if !is_object(desired) || !is_object(actual) {
        return false;
    }
    let field = |v: &'_ Value, name: &str| -> Value {
        v.as_entries()
            .and_then(|entries| entries.get(name))
            .cloned()
            .unwrap_or_default()
    };

    object.fields.iter().all(|meta| {
        let d = field(desired, &meta.name);
        if (meta.server_default && d.is_empty()) || (meta.output_only && d.is_null()) {
            return true;
        }
        values_equal(&meta.field_type, &d, &field(actual, &meta.name))
    })
}

fn strings_equal(equivalence: StringEquivalence, desired: &Value, actual: &Value) -> bool {
    let (Some(d), Some(a)) = (desired.as_str(), actual.as_str()) else {
        return false;
    };
    match equivalence {
        StringEquivalence::Exact => d == a,
        StringEquivalence::CaseInsensitive => d.eq_ignore_ascii_case(a),
        StringEquivalence::TrailingSlash => d.trim_end_matches('/') == a.trim_end_matches('/'),
        StringEquivalence::SelfLink => last_segment(d) == last_segment(a),
    }
}

fn last_segment(s: &str) -> &str {
    let trimmed = s.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

#[allow(clippy::cast_precision_loss)]
const fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Float(f) => Some(*f),
        Value::Int(i) => Some(*i as f64),
        Value::Null => Some(0.0),
        _ => None,
    }
}

fn list_of(value: &Value) -> Option<&[Value]> {
    match value {
        Value::Null => Some(&[]),
        other => other.as_list(),
    }
}

fn multiset_equal(element: &FieldType, desired: &[Value], actual: &[Value]) -> bool {
    if desired.len() != actual.len() {
        return false;
    }
    let mut matched = vec![false; actual.len()];
    desired.iter().all(|d| {
        let found = actual
            .iter()
            .enumerate()
            .find(|(i, a)| !matched[*i] && values_equal(element, d, a))
            .map(|(i, _)| i);
        found.is_some_and(|i| {
            matched[i] = true;
            true
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string(eq: StringEquivalence) -> FieldType {
        FieldType::String(eq)
    }

    #[test]
    fn test_string_equivalences() {
        let a = Value::from("projects/p/keys/abc");
        let b = Value::from("abc");
        assert!(values_equal(&string(StringEquivalence::SelfLink), &a, &b));
        assert!(!values_equal(&string(StringEquivalence::Exact), &a, &b));
        assert!(values_equal(
            &string(StringEquivalence::CaseInsensitive),
            &Value::from("Foo"),
            &Value::from("fOO")
        ));
        assert!(values_equal(
            &string(StringEquivalence::TrailingSlash),
            &Value::from("https://a.com/"),
            &Value::from("https://a.com")
        ));
    }

    #[test]
    fn test_zero_values_are_equivalent() {
        assert!(values_equal(&FieldType::Bool, &Value::Null, &Value::from(false)));
        assert!(values_equal(&FieldType::Int, &Value::Int(0), &Value::Null));
        assert!(!values_equal(&FieldType::Bool, &Value::Null, &Value::from(true)));
    }

    #[test]
    fn test_unordered_lists_compare_as_multisets() {
        let ty = FieldType::List {
            element: Box::new(string(StringEquivalence::Exact)),
            unordered: true,
        };
        let a = Value::strings(["a", "b", "b"]);
        assert!(values_equal(&ty, &a, &Value::strings(["b", "a", "b"])));
        assert!(!values_equal(&ty, &a, &Value::strings(["a", "a", "b"])));

        let ordered = FieldType::List {
            element: Box::new(string(StringEquivalence::Exact)),
            unordered: false,
        };
        assert!(!values_equal(&ordered, &a, &Value::strings(["b", "a", "b"])));
    }

    #[test]
    fn test_maps_compare_key_by_key() {
        let ty = FieldType::Map(Box::new(string(StringEquivalence::Exact)));
        let a = Value::map([("env", "prod"), ("team", "x")]);
        assert!(values_equal(&ty, &a, &Value::map([("team", "x"), ("env", "prod")])));
        assert!(!values_equal(&ty, &a, &Value::map([("env", "prod")])));
    }

    #[test]
    fn test_objects_skip_server_defaults() {
        use crate::schema::FieldMeta;

        let object = ObjectSchema::new()
            .with_field(FieldMeta::new("integrationType", FieldType::Enum))
            .with_field(FieldMeta::new("challengeSecurityPreference", FieldType::Enum).server_default());
        let ty = FieldType::Object(object);

        let desired = Value::object([("integrationType", Value::from("SCORE"))]);
        let actual = Value::object([
            ("integrationType", Value::from("SCORE")),
            ("challengeSecurityPreference", Value::from("USABILITY")),
        ]);
        assert!(values_equal(&ty, &desired, &actual));
        assert!(!values_equal(&ty, &actual, &desired));
    }
}
