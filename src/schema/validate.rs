//! Validation of raw desired resources against their schema.
//!
//! Validation runs before any remote call; a resource that fails it never
//! reaches the store.

use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use super::types::{FieldType, KindSchema, ObjectSchema};
use crate::error::SchemaError;
use crate::resource::{FieldPath, NULL, Resource, Value};

/// Validator for raw desired resources.
#[derive(Debug)]
pub struct ResourceValidator<'a> {
    schema: &'a KindSchema,
}

/// Validation result containing every problem found.
#[derive(Debug, Default)]
pub struct ValidationReport {
    /// Errors that make the resource unusable.
    pub errors: Vec<SchemaError>,
    /// Non-fatal observations.
    pub warnings: Vec<String>,
}

impl<'a> ResourceValidator<'a> {
    /// Creates a validator for one kind.
    #[must_use]
    pub const fn new(schema: &'a KindSchema) -> Self {
        Self { schema }
    }

    /// Checks a resource and reports every problem.
    #[must_use]
    pub fn check(&self, resource: &Resource) -> ValidationReport {
        let mut report = ValidationReport::default();

        if resource.kind() != self.schema.kind {
            report.errors.push(SchemaError::KindMismatch {
                desired: self.schema.kind.clone(),
                actual: resource.kind().to_string(),
            });
            return report;
        }

        self.check_object(&self.schema.root, resource.fields(), &FieldPath::root(), &mut report);

        if let Some(identity) = self.schema.identity_field() {
            if identity.output_only && !resource.get(&identity.name).is_null() {
                report.warnings.push(format!(
                    "'{}' is assigned by the server; it can only match an existing resource",
                    identity.name
                ));
            }
        }

        debug!(
            "Validated {} resource: {} error(s), {} warning(s)",
            self.schema.kind,
            report.errors.len(),
            report.warnings.len()
        );
        report
    }

    /// Checks a resource and returns the first error.
    ///
    /// # Errors
    ///
    /// Returns the first [`SchemaError`] found.
    pub fn validate(&self, resource: &Resource) -> Result<(), SchemaError> {
        self.check(resource).into_result()
    }

    fn check_object(
        &self,
        object: &ObjectSchema,
        fields: &BTreeMap<String, Value>,
        path: &FieldPath,
        report: &mut ValidationReport,
    ) {
        for name in fields.keys() {
            if object.field(name).is_none() {
                report.errors.push(SchemaError::UnknownField {
                    kind: self.schema.kind.clone(),
                    field: path.nest(name).to_string(),
                });
            }
        }

        for meta in &object.fields {
            let field_path = path.nest(&meta.name);
            let value = fields.get(&meta.name).unwrap_or(&NULL);
            if meta.required && value.is_empty() && meta.default.is_none() {
                report.errors.push(SchemaError::MissingRequired {
                    field: field_path.to_string(),
                });
            }
            if !value.is_null() {
                self.check_value(&meta.field_type, value, &field_path, report);
            }
        }

        for group in &object.exclusive_groups {
            let set: Vec<String> = group
                .members
                .iter()
                .filter(|m| fields.get(m.as_str()).is_some_and(|v| !v.is_empty()))
                .map(|m| path.nest(m).to_string())
                .collect();
            let members: Vec<String> = group.members.iter().map(|m| path.nest(m).to_string()).collect();
            if set.len() > 1 {
                report.errors.push(SchemaError::ExclusiveConflict { fields: members, set });
            } else if set.is_empty() && group.required {
                report.errors.push(SchemaError::ExclusiveMissing { fields: members });
            }
        }
    }

    fn check_value(
        &self,
        field_type: &FieldType,
        value: &Value,
        path: &FieldPath,
        report: &mut ValidationReport,
    ) {
        if !field_type.accepts(value) {
            report.errors.push(SchemaError::TypeMismatch {
                field: path.to_string(),
                expected: field_type.type_name().to_string(),
                found: value.type_name().to_string(),
            });
            return;
        }

        match (field_type, value) {
            (FieldType::Object(object), Value::Object(fields)) => {
                self.check_object(object, fields, path, report);
            }
            (FieldType::List { element, .. }, Value::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    self.check_value(element, item, &path.nest(&i.to_string()), report);
                }
            }
            (FieldType::Map(element), Value::Map(entries)) => {
                for (key, item) in entries {
                    self.check_value(element, item, &path.nest(key), report);
                }
            }
            _ => {}
        }
    }
}

impl ValidationReport {
    /// Returns true if no errors were found.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Converts the report into the first error, if any.
    ///
    /// # Errors
    ///
    /// Returns the first recorded error.
    pub fn into_result(self) -> Result<(), SchemaError> {
        self.errors.into_iter().next().map_or(Ok(()), Err)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for error in &self.errors {
            writeln!(f, "ERROR: {error}")?;
        }
        for warning in &self.warnings {
            writeln!(f, "WARNING: {warning}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fixtures::key_schema;

    fn web_key() -> Resource {
        Resource::new("Key").with("displayName", "foo").with(
            "webSettings",
            Value::object([("integrationType", Value::from("SCORE"))]),
        )
    }

    #[test]
    fn test_valid_resource() {
        let schema = key_schema();
        let report = ResourceValidator::new(&schema).check(&web_key());
        assert!(report.is_valid(), "{report}");
    }

    #[test]
    fn test_missing_required() {
        let schema = key_schema();
        let resource = Resource::new("Key").with(
            "webSettings",
            Value::object([("integrationType", Value::from("SCORE"))]),
        );
        let err = ResourceValidator::new(&schema).validate(&resource).expect_err("missing");
        assert_eq!(
            err,
            SchemaError::MissingRequired {
                field: String::from("displayName")
            }
        );
    }

    #[test]
    fn test_exclusive_conflict() {
        let schema = key_schema();
        let resource = web_key().with(
            "androidSettings",
            Value::object([("allowAllPackageNames", Value::from(true))]),
        );
        let report = ResourceValidator::new(&schema).check(&resource);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, SchemaError::ExclusiveConflict { set, .. } if set.len() == 2)));
    }

    #[test]
    fn test_exclusive_missing_when_group_required() {
        use crate::schema::{ExclusiveGroup, FieldMeta, ObjectSchema, StringEquivalence};

        let schema = KindSchema::new(
            "Route",
            ObjectSchema::new()
                .with_field(FieldMeta::new("name", FieldType::String(StringEquivalence::Exact)))
                .with_field(FieldMeta::new("nextHopIp", FieldType::String(StringEquivalence::Exact)))
                .with_field(FieldMeta::new("nextHopGateway", FieldType::Reference))
                .with_exclusive_group(ExclusiveGroup::new(["nextHopIp", "nextHopGateway"]).required()),
        );
        let report = ResourceValidator::new(&schema).check(&Resource::new("Route").with("name", "r1"));
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, SchemaError::ExclusiveMissing { .. })));
    }

    #[test]
    fn test_nested_type_mismatch_and_unknown() {
        let schema = key_schema();
        let resource = web_key().with(
            "webSettings",
            Value::object([
                ("integrationType", Value::from(3_i64)),
                ("bogus", Value::from(true)),
            ]),
        );
        let report = ResourceValidator::new(&schema).check(&resource);
        assert_eq!(report.errors.len(), 2, "{report}");
    }

    #[test]
    fn test_server_assigned_identity_warns() {
        let schema = key_schema();
        let resource = web_key().with("name", "projects/p/keys/k");
        let report = ResourceValidator::new(&schema).check(&resource);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
    }
}
