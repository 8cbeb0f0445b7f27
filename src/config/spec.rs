//! Configuration specification types.
//!
//! This module defines the structs that map to `converge.yaml` and to the
//! resource documents the CLI applies. Every section has defaults, so an
//! empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::planner::{DEFAULT_OPERATION_TIMEOUT, LifecyclePolicy};
use crate::reconciler::RetryPolicy;
use crate::store::OperationBinding;

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ReconcileConfig {
    /// Remote object store.
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Conflict retry bounds.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Plan execution settings.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Default lifecycle policy; CLI flags can tighten or relax it.
    #[serde(default)]
    pub lifecycle: LifecyclePolicy,
    /// Journal location.
    #[serde(default)]
    pub journal: JournalConfig,
}

/// Remote object store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Base URL of the HTTP+JSON store.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Name of the environment variable holding the bearer token.
    #[serde(default)]
    pub token_env: Option<String>,
    /// HTTP client timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Collection path per resource kind, e.g. `Key: projects/p/keys`.
    #[serde(default)]
    pub collections: BTreeMap<String, String>,
    /// Request shape per operation name.
    #[serde(default)]
    pub operations: BTreeMap<String, OperationBinding>,
}

/// Conflict retry configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts per apply, including the first.
    pub max_attempts: u32,
    /// Give up after this many seconds; unset means no time limit.
    pub max_elapsed_secs: Option<u64>,
    /// Delay before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound for a single delay, in milliseconds.
    pub max_backoff_ms: u64,
    /// Growth factor between delays.
    pub multiplier: f64,
}

/// Plan execution configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Run in-place operations concurrently.
    pub parallel_operations: bool,
    /// Timeout for each remote call, in seconds.
    pub operation_timeout_secs: u64,
    /// Cancel an apply that runs longer than this many seconds.
    pub apply_timeout_secs: Option<u64>,
}

/// Journal configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct JournalConfig {
    /// Journal directory; defaults to `.converge/journal`.
    #[serde(default)]
    pub path: Option<String>,
}

/// A resource document: one desired state to apply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ResourceDocument {
    /// Resource kind; must match the schema's kind.
    pub kind: String,
    /// Local name used by the journal.
    pub handle: String,
    /// Path to the kind schema, relative to the document.
    pub schema: PathBuf,
    /// Desired field values.
    #[serde(default = "empty_spec")]
    pub spec: serde_json::Value,
}

const fn default_timeout_secs() -> u64 {
    30
}

fn empty_spec() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token_env: None,
            timeout_secs: default_timeout_secs(),
            collections: BTreeMap::new(),
            operations: BTreeMap::new(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_elapsed_secs: Some(120),
            initial_backoff_ms: 200,
            max_backoff_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            parallel_operations: false,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT.as_secs(),
            apply_timeout_secs: None,
        }
    }
}

impl RemoteConfig {
    /// Collection path configured for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownCollection`] if none is configured.
    pub fn collection(&self, kind: &str) -> Result<&str, ConfigError> {
        self.collections
            .get(kind)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::UnknownCollection {
                kind: kind.to_string(),
            })
    }

    /// Reads the bearer token from the configured environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] if `token_env` is set but the
    /// variable is not.
    pub fn token(&self) -> Result<Option<String>, ConfigError> {
        let Some(name) = &self.token_env else {
            return Ok(None);
        };
        std::env::var(name)
            .map(Some)
            .map_err(|_| ConfigError::MissingEnvVar { name: name.clone() })
    }

    /// HTTP client timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RetryConfig {
    /// Converts into the reconciler's retry policy.
    #[must_use]
    pub const fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            max_elapsed: match self.max_elapsed_secs {
                Some(secs) => Some(Duration::from_secs(secs)),
                None => None,
            },
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.multiplier,
        }
    }
}

impl ExecutionConfig {
    /// Timeout for each remote call.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Overall apply timeout, if any.
    #[must_use]
    pub const fn apply_timeout(&self) -> Option<Duration> {
        match self.apply_timeout_secs {
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        }
    }
}

impl JournalConfig {
    /// Journal directory, resolved against `base` when relative.
    #[must_use]
    pub fn directory(&self, base: &std::path::Path) -> PathBuf {
        let path = self
            .path
            .as_deref()
            .map_or_else(|| PathBuf::from(crate::journal::DEFAULT_JOURNAL_DIR), PathBuf::from);
        if path.is_absolute() { path } else { base.join(path) }
    }
}
