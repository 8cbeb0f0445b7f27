//! Canonicalization of desired state against a reference state.
//!
//! The canonical form of a desired resource is what the differ compares
//! against the observed state: unset fields adopt the reference's value,
//! server-normalized spellings adopt the reference's spelling, and members
//! of exclusive groups displaced by the user's choice become the empty
//! sentinel.

use std::collections::BTreeMap;
use tracing::debug;

use super::compare::values_equal;
use crate::error::SchemaError;
use crate::resource::{FieldPath, NULL, Resource, Value};
use crate::schema::{FieldMeta, FieldType, KindSchema, ObjectSchema};

/// Normalizes desired state against a reference state.
#[derive(Debug, Clone, Copy)]
pub struct Canonicalizer<'a> {
    schema: &'a KindSchema,
}

impl<'a> Canonicalizer<'a> {
    /// Creates a canonicalizer for one kind.
    #[must_use]
    pub const fn new(schema: &'a KindSchema) -> Self {
        Self { schema }
    }

    /// Canonicalizes `desired` against `reference`.
    ///
    /// With no reference only declared defaults are filled. The result
    /// carries the reference's version token.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::KindMismatch`] if either resource is not of
    /// the schema's kind, and [`SchemaError::UnknownField`] if `desired`
    /// sets a field the schema does not declare.
    pub fn canonicalize(
        &self,
        desired: &Resource,
        reference: Option<&Resource>,
    ) -> Result<Resource, SchemaError> {
        self.check_kind(desired)?;
        if let Some(reference) = reference {
            self.check_kind(reference)?;
        }
        if let Some(field) = find_undeclared(&self.schema.root, desired.fields(), &FieldPath::root()) {
            return Err(SchemaError::UnknownField {
                kind: self.schema.kind.clone(),
                field: field.to_string(),
            });
        }

        let reference = reference.map(|r| self.normalize_observed(r));
        let fields = canonicalize_object(
            &self.schema.root,
            desired.fields(),
            reference.as_ref().map(Resource::fields),
        );

        let canonical = Resource::from_fields(self.schema.kind.clone(), fields)
            .with_version(reference.as_ref().and_then(|r| r.version().map(str::to_string)));
        debug!("Canonical desired state: {}", canonical);
        Ok(canonical)
    }

    /// Applies the exclusive-group rule to an observed state.
    ///
    /// When the remote reports more than one member of a group, every
    /// reported member becomes the empty sentinel.
    #[must_use]
    pub fn normalize_observed(&self, observed: &Resource) -> Resource {
        let fields = normalize_object(&self.schema.root, observed.fields());
        Resource::from_fields(observed.kind(), fields)
            .with_version(observed.version().map(str::to_string))
    }

    fn check_kind(&self, resource: &Resource) -> Result<(), SchemaError> {
        if resource.kind() == self.schema.kind {
            Ok(())
        } else {
            Err(SchemaError::KindMismatch {
                desired: self.schema.kind.clone(),
                actual: resource.kind().to_string(),
            })
        }
    }
}

/// First desired field, at any depth, that the schema does not declare.
fn find_undeclared(
    object: &ObjectSchema,
    desired: &BTreeMap<String, Value>,
    path: &FieldPath,
) -> Option<FieldPath> {
    desired.iter().find_map(|(name, value)| {
        let field_path = path.nest(name);
        let Some(meta) = object.field(name) else {
            return Some(field_path);
        };
        match (&meta.field_type, value) {
            (FieldType::Object(sub), Value::Object(entries)) => find_undeclared(sub, entries, &field_path),
            (FieldType::List { element, .. }, Value::List(items)) => {
                let sub = element.as_object()?;
                items.iter().find_map(|item| {
                    item.as_entries()
                        .and_then(|entries| find_undeclared(sub, entries, &field_path))
                })
            }
            _ => None,
        }
    })
}

fn canonicalize_object(
    object: &ObjectSchema,
    desired: &BTreeMap<String, Value>,
    reference: Option<&BTreeMap<String, Value>>,
) -> BTreeMap<String, Value> {
    let mut canonical = BTreeMap::new();
    for meta in &object.fields {
        let d = desired.get(&meta.name).unwrap_or(&NULL);
        let r = reference.map(|fields| fields.get(&meta.name).unwrap_or(&NULL));
        let value = canonicalize_field(meta, d, r);
        if !value.is_null() {
            canonical.insert(meta.name.clone(), value);
        }
    }
    enforce_groups(object, &mut canonical, desired);
    canonical
}

fn canonicalize_field(meta: &FieldMeta, desired: &Value, reference: Option<&Value>) -> Value {
    if desired.is_sentinel() {
        return Value::Empty;
    }

    let Some(reference) = reference else {
        return fill_defaults(meta, desired);
    };

    if desired.is_empty() {
        return match &meta.default {
            Some(default) if reference.is_empty() => default.clone(),
            _ => reference.clone(),
        };
    }

    match (&meta.field_type, desired, reference) {
        (FieldType::Object(object), Value::Object(d), Value::Object(r)) => {
            Value::Object(canonicalize_object(object, d, Some(r)))
        }
        (FieldType::Object(object), Value::Object(d), _) => {
            Value::Object(canonicalize_object(object, d, None))
        }
        (FieldType::List { element, .. }, Value::List(d), Value::List(r))
            if d.len() == r.len() && element.as_object().is_some() =>
        {
            let element_meta = FieldMeta::new("", (**element).clone());
            Value::List(
                d.iter()
                    .zip(r)
                    .map(|(x, y)| canonicalize_field(&element_meta, x, Some(y)))
                    .collect(),
            )
        }
        (field_type, d, r) if values_equal(field_type, d, r) => r.clone(),
        (_, d, _) => d.clone(),
    }
}

fn fill_defaults(meta: &FieldMeta, desired: &Value) -> Value {
    match (&meta.field_type, desired) {
        (FieldType::Object(object), Value::Object(d)) => {
            Value::Object(canonicalize_object(object, d, None))
        }
        (_, d) if d.is_empty() => meta.default.clone().unwrap_or_else(|| d.clone()),
        (_, d) => d.clone(),
    }
}

/// Forces displaced exclusive-group members to the empty sentinel.
///
/// A member whose canonical value is set becomes `Empty` when any sibling is
/// non-empty in `raw`.
fn enforce_groups(
    object: &ObjectSchema,
    canonical: &mut BTreeMap<String, Value>,
    raw: &BTreeMap<String, Value>,
) {
    for group in &object.exclusive_groups {
        for member in &group.members {
            let displaced = group.members.iter().any(|sibling| {
                sibling != member && raw.get(sibling).is_some_and(|v| !v.is_empty())
            });
            if !displaced {
                continue;
            }
            if let Some(value) = canonical.get_mut(member) {
                if !value.is_sentinel() {
                    debug!("Exclusive group member '{}' displaced; using empty sentinel", member);
                    *value = Value::Empty;
                }
            }
        }
    }
}

fn normalize_object(object: &ObjectSchema, observed: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    let mut normalized: BTreeMap<String, Value> = observed
        .iter()
        .map(|(name, value)| {
            let value = match (object.field(name).map(|m| &m.field_type), value) {
                (Some(FieldType::Object(sub)), Value::Object(entries)) => {
                    Value::Object(normalize_object(sub, entries))
                }
                _ => value.clone(),
            };
            (name.clone(), value)
        })
        .collect();
    enforce_groups(object, &mut normalized, observed);
    normalized
}
