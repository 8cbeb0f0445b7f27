//! Journal of converged states.
//!
//! This module persists, per resource handle, the last converged canonical
//! state (used as the state hint of the next apply) and a bounded apply
//! history.

mod local;
mod store;
mod types;

pub use local::{DEFAULT_JOURNAL_DIR, LocalJournal};
pub use store::Journal;
pub use types::{ApplyStatus, JOURNAL_VERSION, JournalEntry, MAX_HISTORY, ResourceRecord};
