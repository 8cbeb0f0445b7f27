//! Remote state store clients.
//!
//! This module provides the client interface the engine drives, and two
//! backends:
//! - In-memory store with injectable conflicts (for tests and embedding)
//! - Generic HTTP+JSON object store

mod client;
mod http;
mod memory;

pub use client::{FetchResult, ResourceClient, call_with_timeout};
pub use http::{HttpStore, OperationBinding};
pub use memory::{CallCounts, MemoryStore};
