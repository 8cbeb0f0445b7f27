//! Resource values and identities.

use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use super::path::FieldPath;
use super::value::{NULL, Value};

/// Remote identity of a resource instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    /// Resource kind.
    pub kind: String,
    /// Remote name (the identity field's value).
    pub name: String,
}

impl ResourceKey {
    /// Creates a new key.
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Last `/`-separated segment of the name.
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.name
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.name)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// One remote object instance, or a desired state for one.
///
/// Resources are immutable once built: every reconciliation stage produces
/// new values through the consuming `with_*` builders.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    kind: String,
    fields: BTreeMap<String, Value>,
    version: Option<String>,
}

impl Resource {
    /// Creates an empty resource of the given kind.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: BTreeMap::new(),
            version: None,
        }
    }

    /// Creates a resource from an existing field map. `Null` entries are dropped.
    #[must_use]
    pub fn from_fields(kind: impl Into<String>, fields: BTreeMap<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            fields: fields.into_iter().filter(|(_, v)| !v.is_null()).collect(),
            version: None,
        }
    }

    /// Returns a copy with `name` set to `value`. Setting `Null` removes the field.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        let name = name.into();
        if value.is_null() {
            self.fields.remove(&name);
        } else {
            self.fields.insert(name, value);
        }
        self
    }

    /// Returns a copy with the nested field at `path` set to `value`.
    ///
    /// Intermediate objects are created as needed; `Null` removes the leaf.
    #[must_use]
    pub fn with_path(mut self, path: &FieldPath, value: Value) -> Self {
        set_path(&mut self.fields, path.segments(), value);
        self
    }

    /// Returns a copy carrying the given concurrency token.
    #[must_use]
    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }

    /// Resource kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Optimistic-concurrency token observed when this state was fetched.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Top-level field value, `Null` if absent.
    #[must_use]
    pub fn get(&self, name: &str) -> &Value {
        self.fields.get(name).unwrap_or(&NULL)
    }

    /// Nested field value, `Null` if any segment is absent.
    #[must_use]
    pub fn lookup(&self, path: &FieldPath) -> &Value {
        let mut segments = path.segments().iter();
        let Some(first) = segments.next() else {
            return &NULL;
        };
        let mut current = self.get(first);
        for segment in segments {
            current = current
                .as_entries()
                .and_then(|entries| entries.get(segment))
                .unwrap_or(&NULL);
        }
        current
    }

    /// All set fields.
    #[must_use]
    pub const fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Converts the set fields to a JSON object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// SHA-256 of the resource's JSON form, hex encoded.
    ///
    /// The version token is not part of the fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.as_bytes());
        hasher.update(self.to_json().to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn set_path(fields: &mut BTreeMap<String, Value>, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };

    if rest.is_empty() {
        if value.is_null() {
            fields.remove(head);
        } else {
            fields.insert(head.clone(), value);
        }
        return;
    }

    let mut child = match fields.remove(head) {
        Some(Value::Object(entries) | Value::Map(entries)) => entries,
        _ => BTreeMap::new(),
    };
    set_path(&mut child, rest, value);
    if !child.is_empty() {
        fields.insert(head.clone(), Value::Object(child));
    }
}

impl Serialize for Resource {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> Resource {
        Resource::new("Key")
            .with("displayName", "foo")
            .with(
                "webSettings",
                Value::object([("integrationType", Value::from("SCORE"))]),
            )
    }

    #[test]
    fn test_lookup_nested() {
        let resource = key();
        assert_eq!(
            resource.lookup(&FieldPath::parse("webSettings.integrationType")),
            &Value::from("SCORE")
        );
        assert!(resource.lookup(&FieldPath::parse("androidSettings.x")).is_null());
    }

    #[test]
    fn test_with_path_creates_and_removes() {
        let resource = key()
            .with_path(&FieldPath::parse("webSettings.allowAllDomains"), Value::from(true))
            .with_path(&FieldPath::parse("webSettings.integrationType"), Value::Null);

        assert_eq!(
            resource.lookup(&FieldPath::parse("webSettings.allowAllDomains")),
            &Value::from(true)
        );
        assert!(resource
            .lookup(&FieldPath::parse("webSettings.integrationType"))
            .is_null());
    }

    #[test]
    fn test_fingerprint_ignores_version() {
        let a = key();
        let b = key().with_version(Some(String::from("7")));
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), key().with("displayName", "bar").fingerprint());
    }

    #[test]
    fn test_short_name() {
        let key = ResourceKey::new("Key", "projects/p/keys/abc");
        assert_eq!(key.short_name(), "abc");
    }
}
