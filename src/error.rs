//! Error types for the convergence engine.
//!
//! This module provides the error hierarchy for every stage of a
//! reconciliation: configuration, schema handling, remote store calls,
//! planning feasibility, post-apply verification and the journal.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::planner::FieldDiff;
use crate::reconciler::ApplyPhase;

/// The main error type for the convergence engine.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Schema definition or validation errors.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Errors reported by the remote state store.
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The desired change cannot be satisfied under the lifecycle policy.
    #[error(transparent)]
    Infeasible(#[from] InfeasibleError),

    /// The remote API did not honor a requested change.
    #[error(transparent)]
    DiffAfterApply(#[from] DiffAfterApplyError),

    /// Optimistic-concurrency conflicts persisted past the retry budget.
    #[error(transparent)]
    ConflictExhausted(#[from] ConflictExhaustedError),

    /// Journal errors.
    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    /// The apply was cancelled by the caller.
    #[error("Apply cancelled while {phase}")]
    Cancelled {
        /// Phase the state machine was in when cancellation was observed.
        phase: ApplyPhase,
    },

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration or resource file was not found.
    #[error("File not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// A file could not be parsed.
    #[error("Failed to parse {what}: {message}")]
    ParseError {
        /// What was being parsed.
        what: String,
        /// Description of the parse error.
        message: String,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// No collection path is configured for a resource kind.
    #[error("No remote collection configured for kind '{kind}'")]
    UnknownCollection {
        /// The resource kind.
        kind: String,
    },
}

/// Schema definition and resource validation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// The schema definition itself is malformed.
    #[error("Invalid schema for kind '{kind}': {message}")]
    InvalidDefinition {
        /// Kind being defined.
        kind: String,
        /// What is wrong with it.
        message: String,
    },

    /// Two resources of different kinds were compared.
    #[error("Cannot compare a '{desired}' resource with a '{actual}' resource")]
    KindMismatch {
        /// Kind of the desired resource.
        desired: String,
        /// Kind of the actual resource.
        actual: String,
    },

    /// A field is not declared in the schema.
    #[error("Unknown field '{field}' for kind '{kind}'")]
    UnknownField {
        /// Resource kind.
        kind: String,
        /// Offending field path.
        field: String,
    },

    /// A required field is missing.
    #[error("Required field '{field}' is not set")]
    MissingRequired {
        /// Missing field path.
        field: String,
    },

    /// More than one member of an exclusive group is set.
    #[error("Fields {fields:?} are mutually exclusive but {set:?} are set")]
    ExclusiveConflict {
        /// Members of the group.
        fields: Vec<String>,
        /// Members that are set.
        set: Vec<String>,
    },

    /// No member of a required exclusive group is set.
    #[error("Exactly one of {fields:?} must be set")]
    ExclusiveMissing {
        /// Members of the group.
        fields: Vec<String>,
    },

    /// A value does not match the declared type.
    #[error("Field '{field}' expects {expected}, found {found}")]
    TypeMismatch {
        /// Field path.
        field: String,
        /// Expected type name.
        expected: String,
        /// Found JSON/value type name.
        found: String,
    },
}

/// Errors returned by a remote state store client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The resource does not exist.
    #[error("Resource not found: {id}")]
    NotFound {
        /// Identity that was looked up.
        id: String,
    },

    /// Optimistic-concurrency failure; the resource changed since it was read.
    #[error("Write conflict on {id}: {message}")]
    Conflict {
        /// Identity of the resource.
        id: String,
        /// Message from the store.
        message: String,
    },

    /// Authentication failed.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// API request failed.
    #[error("API request failed: {status} - {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Network error.
    #[error("Network error: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from the API.
    #[error("Invalid response: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// The request could not be built from the resource or the store's
    /// configuration.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// What was wrong with the request.
        message: String,
    },

    /// A single remote call exceeded its timeout.
    #[error("Remote {operation} timed out after {timeout:?}")]
    Timeout {
        /// The remote call that timed out.
        operation: String,
        /// Configured timeout.
        timeout: Duration,
    },
}

/// Coarse classification of remote errors used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// The resource does not exist.
    NotFound,
    /// Retryable optimistic-concurrency failure.
    Conflict,
    /// Everything else; fatal for the apply.
    Other,
}

/// Why a plan cannot be carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfeasibleReason {
    /// The resource is absent and the policy forbids creating it.
    CreationBlocked,
    /// The resource exists and the policy expected to create it.
    AcquireBlocked,
    /// The resource exists, differs, and the policy forbids modifying it.
    ModificationBlocked,
    /// At least one diff requires destroying and recreating the resource.
    RequiresRecreation,
    /// An output-only identity field was set on a resource that does not exist.
    ServerAssignedField(String),
}

/// The desired change cannot be satisfied under the current lifecycle policy.
#[derive(Debug, Clone, Error)]
#[error("Infeasible apply: {reason} ({} diff(s))", .diffs.len())]
pub struct InfeasibleError {
    /// Why the apply is infeasible.
    pub reason: InfeasibleReason,
    /// Diffs responsible, if any.
    pub diffs: Vec<FieldDiff>,
}

/// The remote state still differs from the desired state after applying.
#[derive(Debug, Clone, Error)]
#[error("Diffs remain after apply: {}", join_paths(.diffs))]
pub struct DiffAfterApplyError {
    /// Residual actionable diffs.
    pub diffs: Vec<FieldDiff>,
}

/// Conflicts kept happening until the retry policy gave up.
#[derive(Debug, Clone, Error)]
#[error("Gave up after {attempts} attempt(s) in {elapsed:?}: {last}")]
pub struct ConflictExhaustedError {
    /// Number of reconciliation attempts made.
    pub attempts: u32,
    /// Time spent across all attempts.
    pub elapsed: Duration,
    /// Last conflict reported by the store.
    pub last: RemoteError,
}

/// Journal errors.
#[derive(Debug, Error)]
pub enum JournalError {
    /// The journal record is corrupted.
    #[error("Journal record is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// The journal could not be written.
    #[error("Failed to write journal: {message}")]
    WriteFailed {
        /// Description of the failure.
        message: String,
    },

    /// Serialization error.
    #[error("Journal serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, ConvergeError>;

fn join_paths(diffs: &[FieldDiff]) -> String {
    diffs
        .iter()
        .map(|d| d.field_name.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ConvergeError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is an optimistic-concurrency conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Remote(RemoteError::Conflict { .. }))
    }

    /// Returns true if the outer reconciliation loop may retry after this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.is_conflict()
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a parse error.
    #[must_use]
    pub fn parse(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ParseError {
            what: what.into(),
            message: message.into(),
        }
    }
}

impl SchemaError {
    /// Creates a definition error for a kind.
    #[must_use]
    pub fn definition(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl RemoteError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates an invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a conflict error.
    #[must_use]
    pub fn conflict(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Classifies the error for the reconciliation state machine.
    #[must_use]
    pub const fn kind(&self) -> RemoteErrorKind {
        match self {
            Self::NotFound { .. } => RemoteErrorKind::NotFound,
            Self::Conflict { .. } => RemoteErrorKind::Conflict,
            _ => RemoteErrorKind::Other,
        }
    }
}

impl InfeasibleError {
    /// Creates an infeasible error without associated diffs.
    #[must_use]
    pub const fn new(reason: InfeasibleReason) -> Self {
        Self {
            reason,
            diffs: Vec::new(),
        }
    }

    /// Creates an infeasible error carrying the responsible diffs.
    #[must_use]
    pub const fn with_diffs(reason: InfeasibleReason, diffs: Vec<FieldDiff>) -> Self {
        Self { reason, diffs }
    }
}

impl fmt::Display for InfeasibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreationBlocked => write!(f, "creation blocked"),
            Self::AcquireBlocked => write!(f, "resource already exists and acquire is blocked"),
            Self::ModificationBlocked => write!(f, "modification blocked"),
            Self::RequiresRecreation => write!(f, "would require recreation"),
            Self::ServerAssignedField(field) => write!(
                f,
                "server-assigned field '{field}' was specified for a resource that does not exist"
            ),
        }
    }
}

impl JournalError {
    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_classification() {
        assert_eq!(
            RemoteError::NotFound { id: String::from("keys/a") }.kind(),
            RemoteErrorKind::NotFound
        );
        assert_eq!(
            RemoteError::conflict("keys/a", "etag mismatch").kind(),
            RemoteErrorKind::Conflict
        );
        assert_eq!(
            RemoteError::api_error(400, "bad request").kind(),
            RemoteErrorKind::Other
        );
        assert_eq!(
            RemoteError::invalid_request("bad method").kind(),
            RemoteErrorKind::Other
        );
    }

    #[test]
    fn test_only_conflicts_are_retryable() {
        let conflict = ConvergeError::from(RemoteError::conflict("keys/a", "stale"));
        assert!(conflict.is_retryable());

        let infeasible = ConvergeError::from(InfeasibleError::new(InfeasibleReason::CreationBlocked));
        assert!(!infeasible.is_retryable());

        let auth = ConvergeError::from(RemoteError::AuthenticationFailed {
            message: String::from("bad token"),
        });
        assert!(!auth.is_retryable());
    }

    #[test]
    fn test_infeasible_message_names_reason() {
        let err = InfeasibleError::new(InfeasibleReason::RequiresRecreation);
        assert!(err.to_string().contains("would require recreation"));
    }
}
