//! Planning module for reconciliation.
//!
//! This module canonicalizes desired state, compares it with observed
//! state, turns the differences into an operation plan and executes it.

mod canonicalize;
mod compare;
mod diff;
mod executor;
mod plan;

pub use canonicalize::Canonicalizer;
pub use compare::{objects_equal, values_equal};
pub use diff::{DiffEngine, FieldDiff};
pub use executor::{DEFAULT_OPERATION_TIMEOUT, ExecutionResult, PlanExecutor};
pub use plan::{LifecyclePolicy, OperationPlan, OperationPlanner, PlanStep};
