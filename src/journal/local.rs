//! Local file-based journal.
//!
//! Records live at `<base>/<kind>/<handle>.json` and are replaced through a
//! temporary file and a rename.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::store::Journal;
use super::types::ResourceRecord;
use crate::error::{ConvergeError, JournalError, Result};

/// Default journal directory, relative to the working directory.
pub const DEFAULT_JOURNAL_DIR: &str = ".converge/journal";

/// Local file-based journal.
#[derive(Debug, Clone)]
pub struct LocalJournal {
    /// Base directory for record files.
    base_dir: PathBuf,
}

impl LocalJournal {
    /// Creates a journal under [`DEFAULT_JOURNAL_DIR`] in the working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the working directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| ConvergeError::internal(format!("Cannot determine current directory: {e}")))?
            .join(DEFAULT_JOURNAL_DIR);
        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a journal with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Base directory of the journal.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the record file for a handle.
    #[must_use]
    pub fn record_path(&self, kind: &str, handle: &str) -> PathBuf {
        self.base_dir
            .join(sanitize(kind))
            .join(format!("{}.json", sanitize(handle)))
    }
}

/// Keeps a path component inside the journal directory.
fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.chars().all(|c| c == '.') {
        cleaned.replace('.', "_")
    } else {
        cleaned
    }
}

fn write_failed(action: &str, e: &std::io::Error) -> ConvergeError {
    ConvergeError::Journal(JournalError::WriteFailed {
        message: format!("Failed to {action}: {e}"),
    })
}

#[async_trait]
impl Journal for LocalJournal {
    async fn load(&self, kind: &str, handle: &str) -> Result<Option<ResourceRecord>> {
        let path = self.record_path(kind, handle);
        if !path.exists() {
            debug!("No journal record at {}", path.display());
            return Ok(None);
        }

        debug!("Loading journal record from {}", path.display());
        let content = fs::read_to_string(&path).await.map_err(|e| {
            ConvergeError::Journal(JournalError::Corrupted {
                message: format!("Failed to read {}: {e}", path.display()),
            })
        })?;

        let record: ResourceRecord = serde_json::from_str(&content).map_err(|e| {
            ConvergeError::Journal(JournalError::Corrupted {
                message: format!("Failed to parse {}: {e}", path.display()),
            })
        })?;

        Ok(Some(record))
    }

    async fn record(&self, record: &ResourceRecord) -> Result<()> {
        let path = self.record_path(&record.kind, &record.handle);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| write_failed("create journal directory", &e))?;
        }

        let content = serde_json::to_string_pretty(record)
            .map_err(|e| JournalError::serialization(format!("Failed to serialize record: {e}")))?;

        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| write_failed("create temp record", &e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| write_failed("write record", &e))?;
        file.sync_all()
            .await
            .map_err(|e| write_failed("sync record", &e))?;

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| write_failed("rename record", &e))?;

        info!("Journal updated: {}", path.display());
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::journal::{ApplyStatus, JournalEntry, MAX_HISTORY};
    use crate::planner::{LifecyclePolicy, OperationPlanner};
    use crate::reconciler::ApplyOutcome;
    use crate::resource::{Resource, Value};
    use crate::schema::fixtures::key_schema;
    use chrono::Utc;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn create_test_journal() -> (LocalJournal, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let journal = LocalJournal::with_base_dir(temp_dir.path());
        (journal, temp_dir)
    }

    fn outcome() -> ApplyOutcome {
        let state = Resource::new("Key")
            .with("name", "projects/p/keys/k1")
            .with("displayName", "foo")
            .with(
                "webSettings",
                Value::object([
                    ("integrationType", Value::from("SCORE")),
                    ("allowedDomains", Value::strings(["example.com"])),
                ]),
            )
            .with_version(Some(String::from("3")));
        ApplyOutcome {
            state,
            attempts: 2,
            plan: OperationPlanner::plan(vec![], false, &LifecyclePolicy::default()).expect("plan"),
            mutated: true,
            informational: vec![],
        }
    }

    #[tokio::test]
    async fn test_record_and_load_hint() {
        let (journal, _temp) = create_test_journal();
        let schema = key_schema();
        let outcome = outcome();

        let mut record = ResourceRecord::new("Key", "login-page");
        record.record_success(&schema, Uuid::new_v4(), &outcome);
        journal.record(&record).await.expect("Failed to record");

        let loaded = journal
            .load("Key", "login-page")
            .await
            .expect("Failed to load")
            .expect("Record should exist");
        assert_eq!(loaded.name.as_deref(), Some("projects/p/keys/k1"));
        assert_eq!(loaded.fingerprint, Some(outcome.state.fingerprint()));

        let hint = loaded.hint(&schema).expect("hint").expect("state");
        assert_eq!(hint, outcome.state);
        assert_eq!(loaded.last_entry().map(|e| e.status), Some(ApplyStatus::Converged));
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (journal, _temp) = create_test_journal();
        let result = journal.load("Key", "missing").await.expect("Load should not fail");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_failure_keeps_last_state() {
        let (journal, _temp) = create_test_journal();
        let schema = key_schema();

        let mut record = ResourceRecord::new("Key", "login-page");
        record.record_success(&schema, Uuid::new_v4(), &outcome());
        record.record_failure(
            Uuid::new_v4(),
            &ConvergeError::from(RemoteError::api_error(500, "boom")),
        );
        journal.record(&record).await.expect("Failed to record");

        let loaded = journal.load("Key", "login-page").await.expect("load").expect("record");
        assert!(loaded.state.is_some());
        assert_eq!(loaded.history.len(), 2);
        let last = loaded.last_entry().expect("entry");
        assert_eq!(last.status, ApplyStatus::Failed);
        assert!(last.error.as_deref().is_some_and(|e| e.contains("boom")));
    }

    #[tokio::test]
    async fn test_corrupted_record() {
        let (journal, _temp) = create_test_journal();
        let path = journal.record_path("Key", "broken");
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, "{ not json").expect("write");

        let err = journal.load("Key", "broken").await.expect_err("corrupted");
        assert!(matches!(err, ConvergeError::Journal(JournalError::Corrupted { .. })));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut record = ResourceRecord::new("Key", "login-page");
        for attempts in 0..=u32::try_from(MAX_HISTORY).expect("fits") {
            record.add_history(JournalEntry {
                run_id: Uuid::new_v4(),
                timestamp: Utc::now(),
                status: ApplyStatus::Unchanged,
                steps: vec![],
                attempts,
                fingerprint: None,
                error: None,
            });
        }
        assert_eq!(record.history.len(), MAX_HISTORY);
        assert_eq!(record.history[0].attempts, 1);
    }

    #[test]
    fn test_handles_stay_inside_journal() {
        let journal = LocalJournal::with_base_dir("/tmp/journal");
        let path = journal.record_path("Key", "../../etc/passwd");
        assert!(path.starts_with("/tmp/journal/Key"));
        assert_eq!(journal.record_path("Key", ".."), PathBuf::from("/tmp/journal/Key/__.json"));
    }
}
