//! Configuration validation.
//!
//! This module checks a loaded configuration and resource documents for
//! values that would make an apply misbehave, before any remote call.

use tracing::debug;

use super::parser::LoadedDocument;
use super::spec::{ExecutionConfig, ReconcileConfig, RemoteConfig, RetryConfig};
use crate::error::{ConfigError, Result};

/// Validator for configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any check fails.
    pub fn validate(&self, config: &ReconcileConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_remote(&config.remote, &mut result);
        Self::validate_retry(&config.retry, &mut result);
        Self::validate_execution(&config.execution, &mut result);

        if config.lifecycle.block_modification && config.lifecycle.allow_recreate {
            result.warnings.push(String::from(
                "lifecycle.allow_recreate has no effect while block_modification is set",
            ));
        }

        Self::finish(result)
    }

    /// Validates a resource document against the configuration it will be
    /// applied with.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any check fails.
    pub fn validate_document(
        &self,
        config: &ReconcileConfig,
        document: &LoadedDocument,
    ) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        if !is_valid_handle(&document.handle) {
            result.errors.push(ValidationError {
                field: String::from("handle"),
                message: format!(
                    "Handle '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    document.handle
                ),
            });
        }

        if config.remote.base_url.is_some()
            && config.remote.collection(&document.schema.kind).is_err()
        {
            result.errors.push(ValidationError {
                field: format!("remote.collections.{}", document.schema.kind),
                message: format!("No collection configured for kind '{}'", document.schema.kind),
            });
        }

        Self::finish(result)
    }

    fn finish(result: ValidationResult) -> Result<ValidationResult> {
        match result.errors.first() {
            None => {
                debug!("Configuration validation passed");
                Ok(result)
            }
            Some(first_error) => Err(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }
            .into()),
        }
    }

    fn validate_remote(remote: &RemoteConfig, result: &mut ValidationResult) {
        match &remote.base_url {
            None => result
                .warnings
                .push(String::from("remote.base_url is not set; apply needs a remote store")),
            Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                result.errors.push(ValidationError {
                    field: String::from("remote.base_url"),
                    message: format!("Base URL '{url}' must use http or https"),
                });
            }
            Some(url) if url.starts_with("http://") => {
                result.warnings.push(format!("{url} is not using TLS"));
            }
            Some(_) => {}
        }

        if remote.timeout_secs == 0 {
            result.errors.push(ValidationError {
                field: String::from("remote.timeout_secs"),
                message: String::from("Timeout must be greater than zero"),
            });
        }

        for (kind, path) in &remote.collections {
            if path.trim_matches('/').is_empty() {
                result.errors.push(ValidationError {
                    field: format!("remote.collections.{kind}"),
                    message: String::from("Collection path cannot be empty"),
                });
            }
        }

        for (name, binding) in &remote.operations {
            if !matches!(binding.method.as_str(), "PATCH" | "POST" | "PUT") {
                result.errors.push(ValidationError {
                    field: format!("remote.operations.{name}.method"),
                    message: format!("Unsupported method '{}'", binding.method),
                });
            }
        }
    }

    fn validate_retry(retry: &RetryConfig, result: &mut ValidationResult) {
        if retry.max_attempts == 0 {
            result.errors.push(ValidationError {
                field: String::from("retry.max_attempts"),
                message: String::from("At least one attempt is required"),
            });
        }

        if retry.max_elapsed_secs == Some(0) {
            result.errors.push(ValidationError {
                field: String::from("retry.max_elapsed_secs"),
                message: String::from("Elapsed budget must be greater than zero"),
            });
        }

        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            result.errors.push(ValidationError {
                field: String::from("retry.multiplier"),
                message: format!("Backoff multiplier {} must be at least 1", retry.multiplier),
            });
        }

        if retry.max_backoff_ms < retry.initial_backoff_ms {
            result.errors.push(ValidationError {
                field: String::from("retry.max_backoff_ms"),
                message: format!(
                    "Maximum backoff ({}ms) is below the initial backoff ({}ms)",
                    retry.max_backoff_ms, retry.initial_backoff_ms
                ),
            });
        }
    }

    fn validate_execution(execution: &ExecutionConfig, result: &mut ValidationResult) {
        if execution.operation_timeout_secs == 0 {
            result.errors.push(ValidationError {
                field: String::from("execution.operation_timeout_secs"),
                message: String::from("Operation timeout must be greater than zero"),
            });
        }

        if execution.apply_timeout_secs == Some(0) {
            result.errors.push(ValidationError {
                field: String::from("execution.apply_timeout_secs"),
                message: String::from("Apply timeout must be greater than zero"),
            });
        }
    }
}

/// Checks that a handle is lowercase alphanumeric with single hyphens.
fn is_valid_handle(name: &str) -> bool {
    let Some(first) = name.chars().next() else {
        return false;
    };
    if !first.is_ascii_lowercase() {
        return false;
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvergeError;
    use crate::schema::fixtures::key_schema;
    use crate::resource::Resource;
    use std::path::PathBuf;

    fn config() -> ReconcileConfig {
        let mut config = ReconcileConfig::default();
        config.remote.base_url = Some(String::from("https://store.example.com"));
        config
            .remote
            .collections
            .insert(String::from("Key"), String::from("projects/p/keys"));
        config
    }

    fn document(handle: &str) -> LoadedDocument {
        LoadedDocument {
            path: PathBuf::from("doc.yaml"),
            handle: handle.to_string(),
            schema: key_schema(),
            desired: Resource::new("Key").with("displayName", "foo"),
        }
    }

    fn failed_field(err: ConvergeError) -> Option<String> {
        match err {
            ConvergeError::Config(ConfigError::ValidationError { field, .. }) => field,
            _ => None,
        }
    }

    #[test]
    fn test_valid_config() {
        let result = ConfigValidator::new().validate(&config()).expect("valid");
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_defaults_warn_about_missing_remote() {
        let result = ConfigValidator::new()
            .validate(&ReconcileConfig::default())
            .expect("valid");
        assert_eq!(result.warning_count(), 1);
    }

    #[test]
    fn test_rejects_non_http_url() {
        let mut config = config();
        config.remote.base_url = Some(String::from("ftp://store"));
        let err = ConfigValidator::new().validate(&config).expect_err("invalid");
        assert_eq!(failed_field(err).as_deref(), Some("remote.base_url"));
    }

    #[test]
    fn test_rejects_bad_retry_bounds() {
        let mut config = config();
        config.retry.max_attempts = 0;
        let err = ConfigValidator::new().validate(&config).expect_err("invalid");
        assert_eq!(failed_field(err).as_deref(), Some("retry.max_attempts"));

        let mut config = self::config();
        config.retry.multiplier = 0.5;
        let err = ConfigValidator::new().validate(&config).expect_err("invalid");
        assert_eq!(failed_field(err).as_deref(), Some("retry.multiplier"));

        let mut config = self::config();
        config.retry.max_backoff_ms = 10;
        let err = ConfigValidator::new().validate(&config).expect_err("invalid");
        assert_eq!(failed_field(err).as_deref(), Some("retry.max_backoff_ms"));
    }

    #[test]
    fn test_rejects_zero_timeouts() {
        let mut config = config();
        config.execution.operation_timeout_secs = 0;
        let err = ConfigValidator::new().validate(&config).expect_err("invalid");
        assert_eq!(
            failed_field(err).as_deref(),
            Some("execution.operation_timeout_secs")
        );
    }

    #[test]
    fn test_document_needs_collection() {
        let mut config = config();
        config.remote.collections.clear();
        let err = ConfigValidator::new()
            .validate_document(&config, &document("login-page"))
            .expect_err("invalid");
        assert_eq!(failed_field(err).as_deref(), Some("remote.collections.Key"));
    }

    #[test]
    fn test_handle_format() {
        assert!(is_valid_handle("login-page"));
        assert!(is_valid_handle("key2"));
        assert!(!is_valid_handle(""));
        assert!(!is_valid_handle("Login"));
        assert!(!is_valid_handle("2key"));
        assert!(!is_valid_handle("login_page"));
        assert!(!is_valid_handle("login-"));
        assert!(!is_valid_handle("login--page"));

        let err = ConfigValidator::new()
            .validate_document(&config(), &document("Login Page"))
            .expect_err("invalid");
        assert_eq!(failed_field(err).as_deref(), Some("handle"));
    }
}
