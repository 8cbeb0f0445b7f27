//! Resource data model.
//!
//! This module provides the schema-agnostic representation of remote
//! objects: dynamic [`Value`]s, [`Resource`] bags of fields, remote
//! [`ResourceKey`]s and dotted [`FieldPath`]s.

mod path;
#[allow(clippy::module_inception)]
mod resource;
mod value;

pub use path::FieldPath;
pub use resource::{Resource, ResourceKey};
pub use value::{NULL, Value};
