//! YAML schema definitions.
//!
//! Schemas are data. A definition document looks like:
//!
//! ```yaml
//! kind: Key
//! identity: name
//! fields:
//!   - name: name
//!     type: string
//!     equivalence: self_link
//!     output_only: true
//!   - name: displayName
//!     type: string
//!     required: true
//!     operation: Update
//!   - name: webSettings
//!     type: object
//!     operation: recreate
//!     fields:
//!       - name: allowedDomains
//!         type: list
//!         element: { type: string }
//!         unordered: true
//!         operation: Update
//! exclusive_groups:
//!   - members: [webSettings, androidSettings]
//! ```
//!
//! `operation` is `recreate`, `none`, an operation name, or a list of
//! operation names.

use serde::Deserialize;
use std::path::Path;
use tracing::debug;

use super::convert::{ConvertMode, value_from_json};
use super::types::{
    DEFAULT_IDENTITY, ExclusiveGroup, FieldMeta, FieldType, KindSchema, ObjectSchema,
    OperationSelector, StringEquivalence,
};
use crate::error::{ConfigError, ConvergeError, Result, SchemaError};
use crate::resource::FieldPath;

/// Top-level schema definition document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KindDefinition {
    /// Kind name.
    pub kind: String,
    /// Identity field name.
    #[serde(default = "default_identity")]
    pub identity: String,
    /// Top-level fields.
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    /// Top-level exclusive groups.
    #[serde(default)]
    pub exclusive_groups: Vec<GroupDefinition>,
}

/// One field (or list element / map value) definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDefinition {
    /// Field name; empty for list elements and map values.
    #[serde(default)]
    pub name: String,
    /// Type name: bool, int, float, string, enum, reference, list, map, object.
    #[serde(rename = "type")]
    pub field_type: String,
    /// Element type of a list, or value type of a map.
    #[serde(default)]
    pub element: Option<Box<FieldDefinition>>,
    /// Lists only: compare as a multiset.
    #[serde(default)]
    pub unordered: bool,
    /// Strings only: equivalence rule.
    #[serde(default)]
    pub equivalence: Option<EquivalenceDefinition>,
    /// Operation selector.
    #[serde(default)]
    pub operation: Option<OperationDefinition>,
    /// Server-assigned field.
    #[serde(default)]
    pub output_only: bool,
    /// Must be set in desired state.
    #[serde(default)]
    pub required: bool,
    /// Server fills the value when none is requested.
    #[serde(default)]
    pub server_default: bool,
    /// Canonicalizer default.
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    /// Objects only: nested fields.
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    /// Objects only: nested exclusive groups.
    #[serde(default)]
    pub exclusive_groups: Vec<GroupDefinition>,
}

/// String equivalence names.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquivalenceDefinition {
    /// Exact comparison.
    Exact,
    /// Case-insensitive comparison.
    CaseInsensitive,
    /// Trailing slash ignored.
    TrailingSlash,
    /// Last path segment compared.
    SelfLink,
}

/// Operation selector as written in YAML.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OperationDefinition {
    /// `recreate`, `none`, or one operation name.
    Single(String),
    /// Several operation names.
    Many(Vec<String>),
}

/// Exclusive group as written in YAML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupDefinition {
    /// Member field names.
    pub members: Vec<String>,
    /// Exactly one member must be set.
    #[serde(default)]
    pub required: bool,
}

fn default_identity() -> String {
    DEFAULT_IDENTITY.to_string()
}

impl From<EquivalenceDefinition> for StringEquivalence {
    fn from(value: EquivalenceDefinition) -> Self {
        match value {
            EquivalenceDefinition::Exact => Self::Exact,
            EquivalenceDefinition::CaseInsensitive => Self::CaseInsensitive,
            EquivalenceDefinition::TrailingSlash => Self::TrailingSlash,
            EquivalenceDefinition::SelfLink => Self::SelfLink,
        }
    }
}

impl From<&OperationDefinition> for OperationSelector {
    fn from(value: &OperationDefinition) -> Self {
        match value {
            OperationDefinition::Single(name) if name.eq_ignore_ascii_case("recreate") => {
                Self::RequiresRecreate
            }
            OperationDefinition::Single(name) if name.eq_ignore_ascii_case("none") => {
                Self::NoOperation
            }
            OperationDefinition::Single(name) => Self::triggers([name.as_str()]),
            OperationDefinition::Many(names) => Self::triggers(names.iter().map(String::as_str)),
        }
    }
}

impl KindDefinition {
    /// Compiles the definition into a runtime schema and checks it.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown type names, misplaced attributes, or any
    /// inconsistency reported by [`KindSchema::validate_definition`].
    pub fn compile(&self) -> std::result::Result<KindSchema, SchemaError> {
        let root = compile_object(&self.kind, "", &self.fields, &self.exclusive_groups)?;
        let schema = KindSchema::with_identity(self.kind.clone(), self.identity.clone(), root);
        schema.validate_definition()?;
        debug!("Compiled schema for kind {} ({} fields)", schema.kind, schema.root.fields.len());
        Ok(schema)
    }
}

fn compile_object(
    kind: &str,
    prefix: &str,
    fields: &[FieldDefinition],
    groups: &[GroupDefinition],
) -> std::result::Result<ObjectSchema, SchemaError> {
    let mut object = ObjectSchema::new();
    for field in fields {
        let path = if prefix.is_empty() {
            field.name.clone()
        } else {
            format!("{prefix}.{}", field.name)
        };
        object = object.with_field(compile_field(kind, &path, field)?);
    }
    for group in groups {
        let mut compiled = ExclusiveGroup::new(group.members.iter().cloned());
        if group.required {
            compiled = compiled.required();
        }
        object = object.with_exclusive_group(compiled);
    }
    Ok(object)
}

fn compile_field(
    kind: &str,
    path: &str,
    def: &FieldDefinition,
) -> std::result::Result<FieldMeta, SchemaError> {
    let field_type = compile_type(kind, path, def)?;

    let default = match &def.default {
        Some(json) => Some(
            value_from_json(&field_type, json, &FieldPath::parse(path), ConvertMode::Strict)
                .map_err(|e| SchemaError::definition(kind, format!("default for '{path}': {e}")))?,
        ),
        None => None,
    };

    let mut meta = FieldMeta::new(def.name.clone(), field_type);
    meta.operation = def.operation.as_ref().map(OperationSelector::from);
    meta.output_only = def.output_only;
    meta.required = def.required;
    meta.server_default = def.server_default;
    meta.default = default;
    Ok(meta)
}

fn compile_type(
    kind: &str,
    path: &str,
    def: &FieldDefinition,
) -> std::result::Result<FieldType, SchemaError> {
    let misplaced = |attr: &str| {
        SchemaError::definition(
            kind,
            format!("'{attr}' is not allowed on {} field '{path}'", def.field_type),
        )
    };

    if def.equivalence.is_some() && def.field_type != "string" {
        return Err(misplaced("equivalence"));
    }
    if def.unordered && def.field_type != "list" {
        return Err(misplaced("unordered"));
    }
    if def.element.is_some() && def.field_type != "list" && def.field_type != "map" {
        return Err(misplaced("element"));
    }
    if (!def.fields.is_empty() || !def.exclusive_groups.is_empty()) && def.field_type != "object" {
        return Err(misplaced("fields"));
    }

    let element = || -> std::result::Result<Box<FieldType>, SchemaError> {
        let element = def.element.as_deref().ok_or_else(|| {
            SchemaError::definition(kind, format!("{} field '{path}' needs an element type", def.field_type))
        })?;
        Ok(Box::new(compile_type(kind, path, element)?))
    };

    Ok(match def.field_type.as_str() {
        "bool" => FieldType::Bool,
        "int" => FieldType::Int,
        "float" => FieldType::Float,
        "string" => FieldType::String(def.equivalence.map(Into::into).unwrap_or_default()),
        "enum" => FieldType::Enum,
        "reference" => FieldType::Reference,
        "list" => FieldType::List {
            element: element()?,
            unordered: def.unordered,
        },
        "map" => FieldType::Map(element()?),
        "object" => FieldType::Object(compile_object(kind, path, &def.fields, &def.exclusive_groups)?),
        other => {
            return Err(SchemaError::definition(
                kind,
                format!("unknown type '{other}' for field '{path}'"),
            ));
        }
    })
}

/// Parses and compiles a schema definition from YAML text.
///
/// # Errors
///
/// Returns an error if the YAML is malformed or the definition is invalid.
pub fn parse_schema(content: &str) -> Result<KindSchema> {
    let definition: KindDefinition = serde_yaml::from_str(content)
        .map_err(|e| ConfigError::parse("schema definition", e.to_string()))?;
    Ok(definition.compile()?)
}

/// Loads and compiles a schema definition file.
///
/// # Errors
///
/// Returns an error if the file is missing, unreadable or invalid.
pub fn load_schema(path: impl AsRef<Path>) -> Result<KindSchema> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }
    let content = std::fs::read_to_string(path).map_err(ConvergeError::Io)?;
    parse_schema(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fixtures::{KEY_SCHEMA_YAML, key_schema};

    #[test]
    fn test_yaml_matches_builder_schema() {
        let parsed = parse_schema(KEY_SCHEMA_YAML).expect("parse key schema");
        assert_eq!(parsed, key_schema());
    }

    #[test]
    fn test_operation_forms() {
        let yaml = r"
kind: Thing
fields:
  - name: name
    type: string
  - name: a
    type: bool
    operation: none
  - name: b
    type: int
    operation: [Patch, Relabel]
  - name: c
    type: enum
";
        let schema = parse_schema(yaml).expect("parse");
        assert_eq!(
            schema.root.field("a").and_then(|f| f.operation.clone()),
            Some(OperationSelector::NoOperation)
        );
        assert_eq!(
            schema.root.field("b").and_then(|f| f.operation.clone()),
            Some(OperationSelector::triggers(["Patch", "Relabel"]))
        );
        assert_eq!(schema.root.field("c").and_then(|f| f.operation.clone()), None);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let yaml = "kind: Thing\nfields:\n  - name: name\n    type: string\n  - name: x\n    type: blob\n";
        let err = parse_schema(yaml).expect_err("unknown type");
        assert!(err.to_string().contains("unknown type 'blob'"));
    }

    #[test]
    fn test_default_type_checked() {
        let yaml = "kind: Thing\nfields:\n  - name: name\n    type: string\n  - name: x\n    type: bool\n    default: \"yes\"\n";
        assert!(parse_schema(yaml).is_err());
    }

    #[test]
    fn test_missing_schema_file() {
        let err = load_schema("/nonexistent/schema.yaml").expect_err("missing");
        assert!(matches!(err, ConvergeError::Config(ConfigError::FileNotFound { .. })));
    }
}
