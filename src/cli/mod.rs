//! CLI module for the converge tool.
//!
//! This module provides the command-line interface for validating,
//! planning and applying resource documents.

mod commands;
mod output;

pub use commands::{Cli, Commands, LifecycleArgs, OutputFormat};
pub use output::OutputFormatter;
