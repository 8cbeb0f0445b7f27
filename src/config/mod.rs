//! Configuration module.
//!
//! This module handles all configuration-related functionality:
//! - Parsing `converge.yaml` and resource documents
//! - `.env` loading and `CONVERGE_*` environment overrides
//! - Validation of configuration values

mod parser;
mod spec;
mod validator;

pub use parser::{
    ConfigParser, DEFAULT_CONFIG_FILES, ENV_BASE_URL, ENV_JOURNAL_PATH, ENV_MAX_ATTEMPTS,
    ENV_TOKEN_ENV, LoadedDocument, apply_env_overrides, find_config_file,
};
pub use spec::{
    ExecutionConfig, JournalConfig, ReconcileConfig, RemoteConfig, ResourceDocument, RetryConfig,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
