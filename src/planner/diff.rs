//! Field-level diffing of canonical desired state against observed state.
//!
//! The differ only compares values; which remote operation a difference
//! needs is read from the schema side-table.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::compare::values_equal;
use crate::error::SchemaError;
use crate::resource::{FieldPath, NULL, Resource, Value};
use crate::schema::{FieldMeta, FieldType, KindSchema, ObjectSchema, OperationName, OperationSelector};

/// A single field-level discrepancy between desired and actual state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDiff {
    /// Path of the differing field.
    pub field_name: FieldPath,
    /// Canonical desired value.
    pub desired: Value,
    /// Observed value.
    pub actual: Value,
    /// Resolving the diff needs delete and create.
    pub requires_recreate: bool,
    /// Operations that resolve the diff in place.
    pub resulting_operations: BTreeSet<OperationName>,
    /// Server-assigned field; informational only.
    pub output_only: bool,
}

impl FieldDiff {
    fn new(path: FieldPath, desired: &Value, actual: &Value, selector: &OperationSelector) -> Self {
        Self {
            field_name: path,
            desired: desired.clone(),
            actual: actual.clone(),
            requires_recreate: selector.requires_recreate(),
            resulting_operations: selector.operations(),
            output_only: false,
        }
    }

    /// Returns true if the diff needs a recreate or at least one operation.
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        !self.output_only && (self.requires_recreate || !self.resulting_operations.is_empty())
    }
}

/// Engine for computing field diffs for one kind.
#[derive(Debug, Clone, Copy)]
pub struct DiffEngine<'a> {
    schema: &'a KindSchema,
}

impl<'a> DiffEngine<'a> {
    /// Creates a diff engine for one kind.
    #[must_use]
    pub const fn new(schema: &'a KindSchema) -> Self {
        Self { schema }
    }

    /// Compares canonical `desired` with `actual`, in schema declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::KindMismatch`] if the resources are of
    /// different kinds, or not of the schema's kind.
    pub fn diff(&self, desired: &Resource, actual: &Resource) -> Result<Vec<FieldDiff>, SchemaError> {
        if desired.kind() != actual.kind() || desired.kind() != self.schema.kind {
            return Err(SchemaError::KindMismatch {
                desired: desired.kind().to_string(),
                actual: actual.kind().to_string(),
            });
        }

        let mut diffs = Vec::new();
        diff_object(
            &self.schema.root,
            desired.fields(),
            actual.fields(),
            &FieldPath::root(),
            &OperationSelector::RequiresRecreate,
            &mut diffs,
        );

        for diff in &diffs {
            debug!(
                "Diff {}: {} -> {} (recreate: {}, operations: {:?}, output only: {})",
                diff.field_name,
                diff.actual,
                diff.desired,
                diff.requires_recreate,
                diff.resulting_operations,
                diff.output_only
            );
        }
        Ok(diffs)
    }
}

fn diff_object(
    object: &ObjectSchema,
    desired: &BTreeMap<String, Value>,
    actual: &BTreeMap<String, Value>,
    path: &FieldPath,
    parent: &OperationSelector,
    out: &mut Vec<FieldDiff>,
) {
    for meta in &object.fields {
        let d = desired.get(&meta.name).unwrap_or(&NULL);
        let a = actual.get(&meta.name).unwrap_or(&NULL);
        diff_field(meta, d, a, &path.nest(&meta.name), parent, out);
    }
}

fn diff_field(
    meta: &FieldMeta,
    desired: &Value,
    actual: &Value,
    path: &FieldPath,
    parent: &OperationSelector,
    out: &mut Vec<FieldDiff>,
) {
    if meta.server_default && desired.is_empty() {
        return;
    }
    let selector = meta.effective_operation(parent);

    if meta.output_only {
        if desired.is_null() || values_equal(&meta.field_type, desired, actual) {
            return;
        }
        // A differing identity cannot be reconciled in place.
        let mut diff = FieldDiff::new(path.clone(), desired, actual, &OperationSelector::NoOperation);
        diff.requires_recreate = meta.identity;
        diff.output_only = !meta.identity;
        out.push(diff);
        return;
    }

    let FieldType::Object(object) = &meta.field_type else {
        if !values_equal(&meta.field_type, desired, actual) {
            out.push(FieldDiff::new(path.clone(), desired, actual, &selector));
        }
        return;
    };

    let mut leaves = Vec::new();
    diff_object(
        object,
        desired.as_entries().unwrap_or(&BTreeMap::new()),
        actual.as_entries().unwrap_or(&BTreeMap::new()),
        path,
        &selector,
        &mut leaves,
    );

    if leaves.is_empty() {
        return;
    }
    if is_present(desired) == is_present(actual) || leaves.iter().all(|d| d.output_only) {
        out.extend(leaves);
        return;
    }

    // The object appears or disappears as a whole.
    let mut whole = FieldDiff::new(path.clone(), desired, actual, &selector);
    for leaf in leaves.iter().filter(|d| d.is_actionable()) {
        whole.requires_recreate |= leaf.requires_recreate;
        whole.resulting_operations.extend(leaf.resulting_operations.iter().cloned());
    }
    if whole.requires_recreate {
        whole.resulting_operations.clear();
    }
    out.push(whole);
}

fn is_present(value: &Value) -> bool {
    value.as_entries().is_some_and(|entries| !entries.is_empty())
}
