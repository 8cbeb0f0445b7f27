//! Configuration parser for loading configuration and resource documents.
//!
//! This module handles loading `converge.yaml` and `.env` files, applying
//! environment overrides, and resolving resource documents against their
//! kind schemas.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::{ReconcileConfig, ResourceDocument};
use crate::error::{ConfigError, ConvergeError, Result, SchemaError};
use crate::resource::Resource;
use crate::schema::{ConvertMode, KindSchema, load_schema, resource_from_json};

/// Overrides `remote.base_url`.
pub const ENV_BASE_URL: &str = "CONVERGE_BASE_URL";
/// Overrides `remote.token_env`.
pub const ENV_TOKEN_ENV: &str = "CONVERGE_TOKEN_ENV";
/// Overrides `journal.path`.
pub const ENV_JOURNAL_PATH: &str = "CONVERGE_JOURNAL_PATH";
/// Overrides `retry.max_attempts`.
pub const ENV_MAX_ATTEMPTS: &str = "CONVERGE_MAX_ATTEMPTS";

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["converge.yaml", "converge.yml"];

/// A resource document resolved against its schema.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    /// Path of the document.
    pub path: PathBuf,
    /// Local handle.
    pub handle: String,
    /// Compiled kind schema.
    pub schema: KindSchema,
    /// Raw desired state.
    pub desired: Resource,
}

/// Configuration parser.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<ReconcileConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = read_file(path)?;
        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<ReconcileConfig> {
        debug!("Parsing YAML configuration");
        if content.trim().is_empty() {
            return Ok(ReconcileConfig::default());
        }

        serde_yaml::from_str(content).map_err(|e| {
            let what = source.map_or_else(|| String::from("configuration"), |p| p.display().to_string());
            ConfigError::parse(what, format!("YAML parse error: {e}")).into()
        })
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// is malformed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<ReconcileConfig> {
        let mut config = self.load_file(path)?;
        apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Loads the given file, or the one [`find_config_file`] finds, or the
    /// defaults when there is none. Overrides apply in every case.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly given file is missing, or any file
    /// or override is malformed.
    pub fn load_or_default(&self, explicit: Option<&Path>) -> Result<ReconcileConfig> {
        if let Some(path) = explicit {
            return self.load_with_env(path);
        }

        let start = self.base_path.clone().unwrap_or_else(|| PathBuf::from("."));
        match find_config_file(&start) {
            Ok(path) => self.load_with_env(path),
            Err(ConvergeError::Config(ConfigError::FileNotFound { .. })) => {
                debug!("No configuration file found; using defaults");
                let mut config = ReconcileConfig::default();
                apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
                Ok(config)
            }
            Err(e) => Err(e),
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                ConfigError::parse(env_path.display().to_string(), format!("Failed to load .env file: {e}"))
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Loads a resource document and resolves it against its schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the document or schema cannot be read or parsed,
    /// the kinds disagree, or the document's `spec` section does not fit the schema.
    pub fn load_document(&self, path: impl AsRef<Path>) -> Result<LoadedDocument> {
        let path = path.as_ref();
        info!("Loading resource document from: {}", path.display());

        let content = read_file(path)?;
        let document: ResourceDocument = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::parse(path.display().to_string(), format!("YAML parse error: {e}"))
        })?;

        let schema_path = if document.schema.is_absolute() {
            document.schema.clone()
        } else {
            path.parent()
                .map_or_else(|| document.schema.clone(), |dir| dir.join(&document.schema))
        };
        let schema = load_schema(&schema_path)?;
        if schema.kind != document.kind {
            return Err(SchemaError::KindMismatch {
                desired: document.kind,
                actual: schema.kind,
            }
            .into());
        }

        let desired = resource_from_json(&schema, &document.spec, ConvertMode::Strict)?;
        debug!("Desired state for {}: {}", document.handle, desired);
        Ok(LoadedDocument {
            path: path.to_path_buf(),
            handle: document.handle,
            schema,
            desired,
        })
    }
}

/// Applies `CONVERGE_*` overrides read through `lookup`.
///
/// # Errors
///
/// Returns an error if `CONVERGE_MAX_ATTEMPTS` is not a number.
pub fn apply_env_overrides<F>(config: &mut ReconcileConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(ENV_BASE_URL) {
        debug!("Overriding remote.base_url from environment");
        config.remote.base_url = Some(url);
    }

    if let Some(name) = lookup(ENV_TOKEN_ENV) {
        debug!("Overriding remote.token_env from environment");
        config.remote.token_env = Some(name);
    }

    if let Some(path) = lookup(ENV_JOURNAL_PATH) {
        debug!("Overriding journal.path from environment");
        config.journal.path = Some(path);
    }

    if let Some(attempts) = lookup(ENV_MAX_ATTEMPTS) {
        debug!("Overriding retry.max_attempts from environment");
        config.retry.max_attempts = attempts.trim().parse().map_err(|e| {
            ConfigError::validation(format!("{ENV_MAX_ATTEMPTS}={attempts}: {e}"), "retry.max_attempts")
        })?;
    }

    Ok(())
}

/// Finds the configuration file in `start_dir` or the user config directory.
///
/// # Errors
///
/// Returns [`ConfigError::FileNotFound`] if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let user_dir = dirs::config_dir().map(|dir| dir.join("converge"));

    for dir in std::iter::once(start.to_path_buf()).chain(user_dir) {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = dir.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }
    }

    Err(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }
    .into())
}

fn read_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }
    std::fs::read_to_string(path)
        .map_err(|e| ConfigError::parse(path.display().to_string(), format!("Failed to read file: {e}")).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Value;
    use crate::schema::fixtures::KEY_SCHEMA_YAML;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let config = ConfigParser::new().parse_yaml("", None).expect("parse");
        assert_eq!(config, ReconcileConfig::default());
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.remote.timeout_secs, 30);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
remote:
  base_url: "https://store.example.com/v1"
  token_env: STORE_TOKEN
  timeout_secs: 10
  collections:
    Key: projects/p/keys
  operations:
    Relabel:
      method: POST
      suffix: ":relabel"
retry:
  max_attempts: 3
  max_elapsed_secs: 30
  initial_backoff_ms: 50
  max_backoff_ms: 1000
  multiplier: 1.5
execution:
  parallel_operations: true
  operation_timeout_secs: 15
  apply_timeout_secs: 300
lifecycle:
  allow_recreate: true
journal:
  path: /var/lib/converge
"#;
        let config = ConfigParser::new().parse_yaml(yaml, None).expect("parse");
        assert_eq!(config.remote.collection("Key").expect("collection"), "projects/p/keys");
        assert_eq!(config.remote.operations["Relabel"].suffix, ":relabel");
        assert!(config.execution.parallel_operations);
        assert_eq!(config.execution.apply_timeout(), Some(Duration::from_secs(300)));
        assert!(config.lifecycle.allow_recreate);
        assert!(!config.lifecycle.block_creation);

        let retry = config.retry.to_policy();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.max_elapsed, Some(Duration::from_secs(30)));
        assert_eq!(retry.initial_backoff, Duration::from_millis(50));
    }

    #[test]
    fn test_unknown_section_is_rejected() {
        let err = ConfigParser::new()
            .parse_yaml("pods: []\n", None)
            .expect_err("unknown section");
        assert!(matches!(err, ConvergeError::Config(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_BASE_URL, "http://localhost:8080"),
            (ENV_MAX_ATTEMPTS, "9"),
            (ENV_JOURNAL_PATH, "/tmp/journal"),
        ]
        .into_iter()
        .collect();

        let mut config = ReconcileConfig::default();
        apply_env_overrides(&mut config, |name| env.get(name).map(|v| (*v).to_string()))
            .expect("overrides");
        assert_eq!(config.remote.base_url.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.retry.max_attempts, 9);
        assert_eq!(config.journal.path.as_deref(), Some("/tmp/journal"));
        assert!(config.remote.token_env.is_none());
    }

    #[test]
    fn test_malformed_attempts_override() {
        let mut config = ReconcileConfig::default();
        let err = apply_env_overrides(&mut config, |name| {
            (name == ENV_MAX_ATTEMPTS).then(|| String::from("many"))
        })
        .expect_err("malformed");
        assert!(matches!(err, ConvergeError::Config(ConfigError::ValidationError { .. })));
    }

    #[test]
    fn test_load_document_resolves_schema() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        std::fs::create_dir_all(dir.path().join("schemas")).expect("mkdir");
        std::fs::write(dir.path().join("schemas/key.yaml"), KEY_SCHEMA_YAML).expect("write schema");
        let doc_path = dir.path().join("login.yaml");
        std::fs::write(
            &doc_path,
            r"
kind: Key
handle: login-page
schema: schemas/key.yaml
spec:
  displayName: Login page
  webSettings:
    integrationType: SCORE
    allowedDomains: [example.com]
  labels:
    team: web
",
        )
        .expect("write document");

        let loaded = ConfigParser::new().load_document(&doc_path).expect("load");
        assert_eq!(loaded.handle, "login-page");
        assert_eq!(loaded.schema.kind, "Key");
        assert_eq!(loaded.desired.get("displayName"), &Value::from("Login page"));
        assert_eq!(loaded.desired.get("labels"), &Value::map([("team", "web")]));
    }

    #[test]
    fn test_document_kind_must_match_schema() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        std::fs::write(dir.path().join("key.yaml"), KEY_SCHEMA_YAML).expect("write schema");
        let doc_path = dir.path().join("doc.yaml");
        std::fs::write(&doc_path, "kind: Bucket\nhandle: b\nschema: key.yaml\n").expect("write");

        let err = ConfigParser::new().load_document(&doc_path).expect_err("mismatch");
        assert!(matches!(err, ConvergeError::Schema(SchemaError::KindMismatch { .. })));
    }

    #[test]
    fn test_missing_document() {
        let err = ConfigParser::new()
            .load_document("/nonexistent/doc.yaml")
            .expect_err("missing");
        assert!(matches!(err, ConvergeError::Config(ConfigError::FileNotFound { .. })));
    }
}
