//! Runtime schema side-table.
//!
//! A [`KindSchema`] describes the declared field set of one resource kind:
//! each field's type, how values are compared, and which remote operation a
//! change to it requires. The canonicalizer, differ and planner are written
//! once against these tables.

use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::error::SchemaError;
use crate::resource::{Resource, ResourceKey, Value};

/// Identity field used when a kind does not declare one.
pub const DEFAULT_IDENTITY: &str = "name";

/// Name of a remote operation, e.g. `Update`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct OperationName(String);

impl OperationName {
    /// Creates a new operation name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// What a change to a field requires remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationSelector {
    /// The field is immutable; a change means delete and create.
    RequiresRecreate,
    /// A change is applied by running every named operation.
    TriggersOperation(BTreeSet<OperationName>),
    /// The diff is recorded but needs no remote call.
    NoOperation,
}

impl OperationSelector {
    /// Builds a selector triggering the given operations.
    #[must_use]
    pub fn triggers<I, N>(names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<OperationName>,
    {
        Self::TriggersOperation(names.into_iter().map(Into::into).collect())
    }

    /// Returns true for [`OperationSelector::RequiresRecreate`].
    #[must_use]
    pub const fn requires_recreate(&self) -> bool {
        matches!(self, Self::RequiresRecreate)
    }

    /// Operations triggered by a change, empty unless `TriggersOperation`.
    #[must_use]
    pub fn operations(&self) -> BTreeSet<OperationName> {
        match self {
            Self::TriggersOperation(names) => names.clone(),
            Self::RequiresRecreate | Self::NoOperation => BTreeSet::new(),
        }
    }
}

/// Equivalence rule for string fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringEquivalence {
    /// Byte-for-byte equality.
    #[default]
    Exact,
    /// ASCII case is ignored.
    CaseInsensitive,
    /// A single trailing `/` is ignored.
    TrailingSlash,
    /// Only the last `/`-separated segment is compared.
    SelfLink,
}

/// Declared type of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    /// Boolean.
    Bool,
    /// Integer.
    Int,
    /// Floating point number.
    Float,
    /// Free-form string.
    String(StringEquivalence),
    /// Enumerated string.
    Enum,
    /// Reference to another resource by name or self link.
    Reference,
    /// List of elements.
    List {
        /// Element type.
        element: Box<FieldType>,
        /// Compare as a multiset instead of element-wise.
        unordered: bool,
    },
    /// String-keyed map.
    Map(Box<FieldType>),
    /// Schema-typed sub-object.
    Object(ObjectSchema),
}

impl FieldType {
    /// Short type name used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String(_) => "string",
            Self::Enum => "enum",
            Self::Reference => "reference",
            Self::List { .. } => "list",
            Self::Map(_) => "map",
            Self::Object(_) => "object",
        }
    }

    /// Returns the sub-object schema of an object type.
    #[must_use]
    pub const fn as_object(&self) -> Option<&ObjectSchema> {
        match self {
            Self::Object(schema) => Some(schema),
            _ => None,
        }
    }

    /// Returns true if `value` has the shape this type expects.
    ///
    /// Only the outer shape is checked; nested fields are checked by the
    /// validator as it descends.
    #[must_use]
    pub const fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (Self::Bool, Value::Bool(_))
                | (Self::Int, Value::Int(_))
                | (Self::Float, Value::Float(_) | Value::Int(_))
                | (
                    Self::String(_) | Self::Enum | Self::Reference,
                    Value::String(_)
                )
                | (Self::List { .. }, Value::List(_))
                | (Self::Map(_), Value::Map(_))
                | (Self::Object(_), Value::Object(_) | Value::Empty)
        )
    }
}

/// Metadata for one declared field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMeta {
    /// Field name within its parent object.
    pub name: String,
    /// Declared type.
    pub field_type: FieldType,
    /// Explicit operation selector; `None` inherits from the parent.
    pub operation: Option<OperationSelector>,
    /// Server-assigned; never written by the engine.
    pub output_only: bool,
    /// Immutable identity of the resource (set on the kind's identity field).
    pub identity: bool,
    /// Must be set in the desired state.
    pub required: bool,
    /// The server fills a value when none is requested.
    pub server_default: bool,
    /// Constant filled by the canonicalizer when both sides are empty.
    pub default: Option<Value>,
}

impl FieldMeta {
    /// Creates a field with no flags and an inherited operation selector.
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            operation: None,
            output_only: false,
            identity: false,
            required: false,
            server_default: false,
            default: None,
        }
    }

    /// Sets the operation selector.
    #[must_use]
    pub fn with_operation(mut self, operation: OperationSelector) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Marks the field as triggering the named operation.
    #[must_use]
    pub fn triggers(self, operation: &str) -> Self {
        self.with_operation(OperationSelector::triggers([operation]))
    }

    /// Marks the field as requiring recreation.
    #[must_use]
    pub fn recreate(self) -> Self {
        self.with_operation(OperationSelector::RequiresRecreate)
    }

    /// Marks the field as output only.
    #[must_use]
    pub const fn output_only(mut self) -> Self {
        self.output_only = true;
        self
    }

    /// Marks the field as required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the field as server-defaulted.
    #[must_use]
    pub const fn server_default(mut self) -> Self {
        self.server_default = true;
        self
    }

    /// Sets the canonicalizer default.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Operation selector after inheritance from `parent`.
    #[must_use]
    pub fn effective_operation(&self, parent: &OperationSelector) -> OperationSelector {
        self.operation.clone().unwrap_or_else(|| parent.clone())
    }
}

/// A set of sibling fields of which at most one may be populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusiveGroup {
    /// Member field names.
    pub members: Vec<String>,
    /// Exactly one member must be set.
    pub required: bool,
}

impl ExclusiveGroup {
    /// Creates an optional exclusive group.
    #[must_use]
    pub fn new<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            members: members.into_iter().map(Into::into).collect(),
            required: false,
        }
    }

    /// Makes the group require exactly one member.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Returns true if `field` belongs to the group.
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.members.iter().any(|m| m == field)
    }
}

/// Field set of an object (or of the resource root).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectSchema {
    /// Declared fields, in declaration order.
    pub fields: Vec<FieldMeta>,
    /// Exclusive groups over `fields`.
    pub exclusive_groups: Vec<ExclusiveGroup>,
}

impl ObjectSchema {
    /// Creates an empty object schema.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fields: Vec::new(),
            exclusive_groups: Vec::new(),
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn with_field(mut self, field: FieldMeta) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds an exclusive group.
    #[must_use]
    pub fn with_exclusive_group(mut self, group: ExclusiveGroup) -> Self {
        self.exclusive_groups.push(group);
        self
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Exclusive groups containing `field`.
    pub fn groups_of<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a ExclusiveGroup> {
        self.exclusive_groups.iter().filter(move |g| g.contains(field))
    }

    fn check(&self, kind: &str, prefix: &str) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            let path = join(prefix, &field.name);
            if field.name.is_empty() || field.name.contains('.') {
                return Err(SchemaError::definition(kind, format!("invalid field name '{path}'")));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::definition(kind, format!("duplicate field '{path}'")));
            }
            if let Some(default) = &field.default {
                if !field.field_type.accepts(default) {
                    return Err(SchemaError::definition(
                        kind,
                        format!(
                            "default for '{path}' is {}, expected {}",
                            default.type_name(),
                            field.field_type.type_name()
                        ),
                    ));
                }
            }
            check_type(&field.field_type, kind, &path)?;
        }

        for group in &self.exclusive_groups {
            if group.members.len() < 2 {
                return Err(SchemaError::definition(
                    kind,
                    format!("exclusive group {:?} needs at least two members", group.members),
                ));
            }
            if let Some(unknown) = group.members.iter().find(|m| self.field(m).is_none()) {
                return Err(SchemaError::definition(
                    kind,
                    format!("exclusive group names unknown field '{}'", join(prefix, unknown)),
                ));
            }
        }
        Ok(())
    }
}

fn check_type(field_type: &FieldType, kind: &str, path: &str) -> Result<(), SchemaError> {
    match field_type {
        FieldType::Object(object) => object.check(kind, path),
        FieldType::List { element, .. } | FieldType::Map(element) => check_type(element, kind, path),
        _ => Ok(()),
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// Complete schema of one resource kind.
#[derive(Debug, Clone, PartialEq)]
pub struct KindSchema {
    /// Kind name.
    pub kind: String,
    /// Name of the top-level identity field.
    pub identity: String,
    /// Top-level fields.
    pub root: ObjectSchema,
}

impl KindSchema {
    /// Creates a schema using the default identity field.
    #[must_use]
    pub fn new(kind: impl Into<String>, root: ObjectSchema) -> Self {
        Self::with_identity(kind, DEFAULT_IDENTITY, root)
    }

    /// Creates a schema with an explicit identity field.
    ///
    /// The identity field, if declared, is flagged as identity.
    #[must_use]
    pub fn with_identity(
        kind: impl Into<String>,
        identity: impl Into<String>,
        mut root: ObjectSchema,
    ) -> Self {
        let identity = identity.into();
        for field in &mut root.fields {
            field.identity = field.name == identity;
        }
        Self {
            kind: kind.into(),
            identity,
            root,
        }
    }

    /// The identity field's metadata.
    #[must_use]
    pub fn identity_field(&self) -> Option<&FieldMeta> {
        self.root.field(&self.identity)
    }

    /// Remote key of `resource`, if its identity field is set.
    #[must_use]
    pub fn key_of(&self, resource: &Resource) -> Option<ResourceKey> {
        resource
            .get(&self.identity)
            .as_str()
            .filter(|name| !name.is_empty())
            .map(|name| ResourceKey::new(self.kind.clone(), name))
    }

    /// Checks the schema itself for consistency.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate or malformed field names, defaults of
    /// the wrong type, malformed exclusive groups, or a missing or non-string
    /// identity field.
    pub fn validate_definition(&self) -> Result<(), SchemaError> {
        if self.kind.is_empty() {
            return Err(SchemaError::definition("", "kind name is empty"));
        }
        self.root.check(&self.kind, "")?;

        match self.identity_field().map(|f| &f.field_type) {
            Some(FieldType::String(_) | FieldType::Reference) => Ok(()),
            Some(other) => Err(SchemaError::definition(
                &self.kind,
                format!(
                    "identity field '{}' must be a string, found {}",
                    self.identity,
                    other.type_name()
                ),
            )),
            None => Err(SchemaError::definition(
                &self.kind,
                format!("identity field '{}' is not declared", self.identity),
            )),
        }
    }
}
