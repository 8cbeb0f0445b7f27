//! Journal trait definition.

use async_trait::async_trait;

use super::types::ResourceRecord;
use crate::error::Result;

/// Trait for journal backends.
#[async_trait]
pub trait Journal: Send + Sync {
    /// Loads the record of a resource handle.
    ///
    /// Returns `None` if the handle was never applied.
    async fn load(&self, kind: &str, handle: &str) -> Result<Option<ResourceRecord>>;

    /// Saves a record, replacing the previous one.
    async fn record(&self, record: &ResourceRecord) -> Result<()>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl Journal for Box<dyn Journal> {
    async fn load(&self, kind: &str, handle: &str) -> Result<Option<ResourceRecord>> {
        (**self).load(kind, handle).await
    }

    async fn record(&self, record: &ResourceRecord) -> Result<()> {
        (**self).record(record).await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::LocalJournal;
    use tokio_test::block_on;

    #[test]
    fn test_boxed_journal_delegates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let journal: Box<dyn Journal> = Box::new(LocalJournal::with_base_dir(dir.path()));

        block_on(async {
            journal
                .record(&ResourceRecord::new("Key", "site-key"))
                .await
                .expect("record");
            let loaded = journal.load("Key", "site-key").await.expect("load");
            assert_eq!(loaded.map(|r| r.handle), Some(String::from("site-key")));
            assert!(journal.load("Key", "other").await.expect("load").is_none());
        });
        assert_eq!(journal.backend_type(), "local");
    }
}
