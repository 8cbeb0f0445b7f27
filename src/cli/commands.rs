//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::planner::LifecyclePolicy;

/// Converge - declarative reconciliation of remote API resources.
#[derive(Parser, Debug)]
#[command(name = "converge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "CONVERGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the configuration and a resource document.
    Validate {
        /// Resource document to validate.
        document: PathBuf,

        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show what an apply would change, without changing anything.
    Plan {
        /// Resource document to plan.
        document: PathBuf,

        /// Show every field diff.
        #[arg(short, long)]
        detailed: bool,

        /// Lifecycle overrides.
        #[command(flatten)]
        lifecycle: LifecycleArgs,
    },

    /// Converge the remote resource to the document.
    Apply {
        /// Resource document to apply.
        document: PathBuf,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Run field-disjoint operations concurrently.
        #[arg(long)]
        parallel: bool,

        /// Lifecycle overrides.
        #[command(flatten)]
        lifecycle: LifecycleArgs,
    },

    /// Show the journal of a resource document.
    History {
        /// Resource document whose journal to show.
        document: PathBuf,

        /// Number of entries to show.
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

/// Lifecycle policy flags. Set flags override the configuration.
#[derive(Args, Debug, Clone, Copy, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct LifecycleArgs {
    /// Allow deleting and recreating the resource.
    #[arg(long)]
    pub allow_recreate: bool,

    /// Fail instead of modifying an existing resource.
    #[arg(long)]
    pub block_modification: bool,

    /// Fail instead of creating an absent resource.
    #[arg(long)]
    pub block_creation: bool,

    /// Fail if the resource already exists.
    #[arg(long)]
    pub block_acquire: bool,
}

impl LifecycleArgs {
    /// Applies the set flags on top of `base`.
    #[must_use]
    pub const fn apply_to(&self, base: LifecyclePolicy) -> LifecyclePolicy {
        LifecyclePolicy {
            block_creation: base.block_creation || self.block_creation,
            block_acquire: base.block_acquire || self.block_acquire,
            block_modification: base.block_modification || self.block_modification,
            allow_recreate: base.allow_recreate || self.allow_recreate,
        }
    }
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_flags() {
        let cli = Cli::try_parse_from([
            "converge",
            "--output",
            "json",
            "apply",
            "key.yaml",
            "--yes",
            "--allow-recreate",
            "--parallel",
        ])
        .expect("parse");

        let Commands::Apply {
            document,
            yes,
            parallel,
            lifecycle,
        } = cli.command
        else {
            panic!("expected apply");
        };
        assert_eq!(document, PathBuf::from("key.yaml"));
        assert!(yes && parallel);
        let policy = lifecycle.apply_to(LifecyclePolicy {
            block_creation: true,
            ..LifecyclePolicy::default()
        });
        assert!(policy.allow_recreate && policy.block_creation);
        assert!(!policy.block_modification);
        assert!(matches!(cli.output, OutputFormat::Json));
    }
}
