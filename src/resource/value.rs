//! Dynamic field values.
//!
//! Resources are bags of schema-typed fields. A [`Value`] is one field's
//! content; which variant appears for a JSON object (`Map` or `Object`) is
//! decided by the schema when converting from JSON.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A single field value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Unset. In desired state this means "don't care".
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// String, enum or reference.
    String(String),
    /// Ordered or unordered list.
    List(Vec<Self>),
    /// Free-form string-keyed map (labels, annotations).
    Map(BTreeMap<String, Self>),
    /// Schema-typed sub-object.
    Object(BTreeMap<String, Self>),
    /// Explicitly cleared sub-object, distinct from `Null`.
    Empty,
}

/// Shared `Null` used when a lookup misses.
pub static NULL: Value = Value::Null;

impl Value {
    /// Builds an object from `(name, value)` pairs, dropping `Null` entries.
    #[must_use]
    pub fn object<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Self)>,
    {
        Self::Object(
            fields
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.into(), v))
                .collect(),
        )
    }

    /// Builds a string map from `(key, value)` pairs.
    #[must_use]
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), Self::String(v.into())))
                .collect(),
        )
    }

    /// Builds a list of strings.
    #[must_use]
    pub fn strings<S, I>(items: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = S>,
    {
        Self::List(items.into_iter().map(|s| Self::String(s.into())).collect())
    }

    /// Returns true if the value is unset.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns true if the value is the empty-object sentinel.
    #[must_use]
    pub const fn is_sentinel(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns true for unset values, zero scalars, empty collections and the sentinel.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null | Self::Empty => true,
            Self::Bool(b) => !b,
            Self::Int(i) => *i == 0,
            Self::Float(f) => f.abs() < f64::EPSILON,
            Self::String(s) => s.is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Map(entries) | Self::Object(entries) => entries.is_empty(),
        }
    }

    /// Returns the string content, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean content, if this is a boolean.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the entries of an object or map.
    #[must_use]
    pub const fn as_entries(&self) -> Option<&BTreeMap<String, Self>> {
        match self {
            Self::Map(entries) | Self::Object(entries) => Some(entries),
            _ => None,
        }
    }

    /// Returns the items of a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Short type name used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Object(_) => "object",
            Self::Empty => "empty object",
        }
    }

    /// Converts to JSON. The sentinel becomes `{}`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            Self::Map(entries) | Self::Object(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Self::Empty => serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Vec<Self>> for Value {
    fn from(value: Vec<Self>) -> Self {
        Self::List(value)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "<unset>"),
            Self::Empty => write!(f, "<empty>"),
            Self::String(s) => write!(f, "{s:?}"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_values() {
        assert!(Value::Null.is_empty());
        assert!(Value::Empty.is_empty());
        assert!(Value::from("").is_empty());
        assert!(Value::from(false).is_empty());
        assert!(Value::Object(BTreeMap::new()).is_empty());
        assert!(!Value::from("x").is_empty());
        assert!(!Value::object([("a", Value::from(true))]).is_empty());
    }

    #[test]
    fn test_object_drops_null_fields() {
        let value = Value::object([("a", Value::from("x")), ("b", Value::Null)]);
        let entries = value.as_entries().expect("object entries");
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("a"));
    }

    #[test]
    fn test_sentinel_serializes_as_empty_object() {
        assert_eq!(Value::Empty.to_json(), serde_json::json!({}));
        assert_eq!(Value::Empty.to_string(), "<empty>");
    }
}
