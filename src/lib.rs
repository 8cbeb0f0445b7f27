// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Converge Kit
//!
//! A declarative, idempotent reconciliation engine for resources held by a
//! remote API.
//!
//! ## Overview
//!
//! Converge takes a desired state written as a YAML document and brings one
//! remote object in line with it, allowing you to:
//!
//! - Describe a resource kind once as a field schema
//! - Preview the operations an apply would perform
//! - Apply with optimistic-concurrency conflict retry
//! - Track every apply in a local journal
//!
//! ## Architecture
//!
//! Every apply runs the same pipeline:
//!
//! 1. **Fetch**: Read the observed state from the remote store
//! 2. **Canonicalize**: Carry observed values over where they are
//!    semantically equal to the desired ones
//! 3. **Diff**: Compare field by field using the schema's equivalence rules
//! 4. **Plan**: Turn differences into create, recreate or named operations
//! 5. **Execute**: Run the plan against the store
//! 6. **Verify**: Re-read and re-diff; any residual difference is an error
//!
//! A version conflict anywhere in the pipeline restarts it from the fetch.
//!
//! ## Modules
//!
//! - [`resource`]: Resource values, field paths and identities
//! - [`schema`]: Per-kind field metadata and its YAML definition format
//! - [`planner`]: Canonicalization, diffing, planning and plan execution
//! - [`store`]: Remote store clients (HTTP, in-memory)
//! - [`reconciler`]: The apply loop with conflict retry
//! - [`journal`]: Local record of applies
//! - [`config`]: Configuration parsing and validation
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! kind: Key
//! handle: site-key
//! schema: schemas/key.yaml
//! spec:
//!   displayName: Checkout page
//!   webSettings:
//!     integrationType: SCORE
//!     allowedDomains: [shop.example.com]
//!   labels:
//!     team: payments
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod journal;
pub mod planner;
pub mod reconciler;
pub mod resource;
pub mod schema;
pub mod store;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, ReconcileConfig};
pub use error::{ConvergeError, Result};
pub use journal::{Journal, LocalJournal, ResourceRecord};
pub use planner::{
    Canonicalizer, DiffEngine, FieldDiff, LifecyclePolicy, OperationPlan, OperationPlanner,
    PlanExecutor,
};
pub use reconciler::{ApplyOutcome, ReconcileContext, Reconciler, RetryPolicy};
pub use resource::{FieldPath, Resource, ResourceKey, Value};
pub use schema::{KindSchema, ResourceValidator, load_schema};
pub use store::{HttpStore, MemoryStore, ResourceClient};
