//! Operation plan types and construction.
//!
//! This module turns field diffs into an ordered list of remote operations,
//! or an [`InfeasibleError`] when the lifecycle policy forbids the change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

use super::diff::FieldDiff;
use crate::error::{InfeasibleError, InfeasibleReason};
use crate::resource::FieldPath;
use crate::schema::OperationName;

/// Caller-supplied limits on what an apply may do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecyclePolicy {
    /// Fail instead of creating an absent resource.
    pub block_creation: bool,
    /// Fail if the resource already exists.
    pub block_acquire: bool,
    /// Fail instead of changing an existing resource.
    pub block_modification: bool,
    /// Allow destroying and recreating the resource.
    pub allow_recreate: bool,
}

/// One step of an operation plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum PlanStep {
    /// Create the resource.
    Create,
    /// Delete the resource, then create it.
    Recreate {
        /// Diffs forcing the recreation.
        field_diffs: Vec<FieldDiff>,
    },
    /// Run a named in-place operation.
    Run {
        /// Operation name.
        name: OperationName,
        /// Diffs the operation resolves.
        field_diffs: Vec<FieldDiff>,
    },
}

impl PlanStep {
    /// Display name of the step.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Create => "Create",
            Self::Recreate { .. } => "Recreate",
            Self::Run { name, .. } => name.as_str(),
        }
    }

    /// Diffs resolved by the step.
    #[must_use]
    pub fn field_diffs(&self) -> &[FieldDiff] {
        match self {
            Self::Create => &[],
            Self::Recreate { field_diffs } | Self::Run { field_diffs, .. } => field_diffs,
        }
    }

    /// Deduplicated, sorted paths of the step's diffs.
    #[must_use]
    pub fn field_mask(&self) -> Vec<FieldPath> {
        let mut mask: Vec<FieldPath> = self.field_diffs().iter().map(|d| d.field_name.clone()).collect();
        mask.sort();
        mask.dedup();
        mask
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = self.field_mask();
        if mask.is_empty() {
            write!(f, "{}", self.name())
        } else {
            let fields: Vec<String> = mask.iter().map(ToString::to_string).collect();
            write!(f, "{} [{}]", self.name(), fields.join(", "))
        }
    }
}

/// Ordered steps moving a resource to its desired state.
#[derive(Debug, Clone, Serialize)]
pub struct OperationPlan {
    /// When the plan was computed.
    pub created_at: DateTime<Utc>,
    /// Steps in execution order. `Create` is always first and alone.
    pub steps: Vec<PlanStep>,
    /// The resource is absent and will be created.
    pub create: bool,
    /// Every diff considered, including informational ones.
    pub diffs: Vec<FieldDiff>,
}

impl OperationPlan {
    fn new(steps: Vec<PlanStep>, create: bool, diffs: Vec<FieldDiff>) -> Self {
        Self {
            created_at: Utc::now(),
            steps,
            create,
            diffs,
        }
    }

    /// Returns true if nothing needs to be executed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Diffs that need no remote call.
    pub fn informational(&self) -> impl Iterator<Item = &FieldDiff> {
        self.diffs.iter().filter(|d| !d.is_actionable())
    }

    /// Returns a human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return String::from("No changes required");
        }
        let steps: Vec<String> = self.steps.iter().map(ToString::to_string).collect();
        steps.join(", ")
    }
}

/// Builds operation plans.
#[derive(Debug, Default, Clone, Copy)]
pub struct OperationPlanner;

impl OperationPlanner {
    /// Plans the operations resolving `diffs`.
    ///
    /// # Errors
    ///
    /// Returns an [`InfeasibleError`] when the policy blocks creation,
    /// acquisition or modification, or when a diff needs recreation that the
    /// policy does not allow.
    pub fn plan(
        diffs: Vec<FieldDiff>,
        exists: bool,
        policy: &LifecyclePolicy,
    ) -> Result<OperationPlan, InfeasibleError> {
        if !exists {
            if policy.block_creation {
                return Err(InfeasibleError::new(InfeasibleReason::CreationBlocked));
            }
            debug!("Resource absent; planning creation");
            return Ok(OperationPlan::new(vec![PlanStep::Create], true, diffs));
        }

        if policy.block_acquire {
            return Err(InfeasibleError::new(InfeasibleReason::AcquireBlocked));
        }

        let actionable: Vec<FieldDiff> = diffs.iter().filter(|d| d.is_actionable()).cloned().collect();
        if actionable.is_empty() {
            debug!("No actionable diffs");
            return Ok(OperationPlan::new(Vec::new(), false, diffs));
        }

        if policy.block_modification {
            return Err(InfeasibleError::with_diffs(
                InfeasibleReason::ModificationBlocked,
                actionable,
            ));
        }

        let recreate: Vec<FieldDiff> = actionable.iter().filter(|d| d.requires_recreate).cloned().collect();
        if !recreate.is_empty() {
            if !policy.allow_recreate {
                return Err(InfeasibleError::with_diffs(
                    InfeasibleReason::RequiresRecreation,
                    recreate,
                ));
            }
            info!("{} diff(s) require recreation; planning delete and create", recreate.len());
            return Ok(OperationPlan::new(
                vec![PlanStep::Recreate { field_diffs: actionable }],
                false,
                diffs,
            ));
        }

        let mut by_operation: BTreeMap<OperationName, Vec<FieldDiff>> = BTreeMap::new();
        for diff in &actionable {
            for operation in &diff.resulting_operations {
                by_operation.entry(operation.clone()).or_default().push(diff.clone());
            }
        }

        let steps = by_operation
            .into_iter()
            .map(|(name, field_diffs)| PlanStep::Run { name, field_diffs })
            .collect();
        Ok(OperationPlan::new(steps, false, diffs))
    }
}
