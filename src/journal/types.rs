//! Journal record types.
//!
//! A record holds the last converged canonical state of one resource
//! handle, used as the state hint of the next apply, plus a bounded
//! history of apply runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConvergeError, Result};
use crate::reconciler::ApplyOutcome;
use crate::resource::Resource;
use crate::schema::{ConvertMode, KindSchema, resource_from_json};

/// Current version of the record format.
pub const JOURNAL_VERSION: &str = "1.0";

/// Maximum number of history entries kept per record.
pub const MAX_HISTORY: usize = 100;

/// Journal record of one resource handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Record format version.
    pub version: String,
    /// Resource kind.
    pub kind: String,
    /// Local handle naming the resource document.
    pub handle: String,
    /// Remote identity of the converged resource.
    #[serde(default)]
    pub name: Option<String>,
    /// Last converged canonical state.
    #[serde(default)]
    pub state: Option<serde_json::Value>,
    /// Fingerprint of `state`.
    #[serde(default)]
    pub fingerprint: Option<String>,
    /// Concurrency token observed with `state`.
    #[serde(default)]
    pub remote_version: Option<String>,
    /// When the record was last updated.
    pub last_updated: DateTime<Utc>,
    /// Apply history, oldest first.
    #[serde(default)]
    pub history: Vec<JournalEntry>,
}

/// One apply run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Run identifier.
    pub run_id: Uuid,
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// How the run ended.
    pub status: ApplyStatus,
    /// Plan steps executed.
    #[serde(default)]
    pub steps: Vec<String>,
    /// Attempts made, including conflict retries.
    #[serde(default)]
    pub attempts: u32,
    /// Fingerprint of the resulting state.
    #[serde(default)]
    pub fingerprint: Option<String>,
    /// Error message of a failed run.
    #[serde(default)]
    pub error: Option<String>,
}

/// Outcome of an apply run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    /// Remote writes were made and verified.
    Converged,
    /// Nothing needed to change.
    Unchanged,
    /// The run failed.
    Failed,
}

impl ResourceRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new(kind: &str, handle: &str) -> Self {
        Self {
            version: JOURNAL_VERSION.to_string(),
            kind: kind.to_string(),
            handle: handle.to_string(),
            name: None,
            state: None,
            fingerprint: None,
            remote_version: None,
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Records a successful apply.
    pub fn record_success(&mut self, schema: &KindSchema, run_id: Uuid, outcome: &ApplyOutcome) {
        let fingerprint = outcome.state.fingerprint();
        self.name = schema.key_of(&outcome.state).map(|key| key.name);
        self.state = Some(outcome.state.to_json());
        self.fingerprint = Some(fingerprint.clone());
        self.remote_version = outcome.state.version().map(str::to_string);
        self.last_updated = Utc::now();

        let status = if outcome.mutated {
            ApplyStatus::Converged
        } else {
            ApplyStatus::Unchanged
        };
        self.add_history(JournalEntry {
            run_id,
            timestamp: self.last_updated,
            status,
            steps: outcome.plan.steps.iter().map(|s| s.name().to_string()).collect(),
            attempts: outcome.attempts,
            fingerprint: Some(fingerprint),
            error: None,
        });
    }

    /// Records a failed apply. The last converged state is kept.
    pub fn record_failure(&mut self, run_id: Uuid, error: &ConvergeError) {
        self.last_updated = Utc::now();
        self.add_history(JournalEntry {
            run_id,
            timestamp: self.last_updated,
            status: ApplyStatus::Failed,
            steps: Vec::new(),
            attempts: 0,
            fingerprint: None,
            error: Some(error.to_string()),
        });
    }

    /// Adds a history entry, dropping the oldest beyond [`MAX_HISTORY`].
    pub fn add_history(&mut self, entry: JournalEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// Rebuilds the last converged state as a state hint.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored state no longer fits the schema.
    pub fn hint(&self, schema: &KindSchema) -> Result<Option<Resource>> {
        let Some(state) = &self.state else {
            return Ok(None);
        };
        let resource = resource_from_json(schema, state, ConvertMode::Lenient)?;
        Ok(Some(resource.with_version(self.remote_version.clone())))
    }

    /// Most recent history entry.
    #[must_use]
    pub fn last_entry(&self) -> Option<&JournalEntry> {
        self.history.last()
    }
}
