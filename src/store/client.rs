//! Remote state store client trait.
//!
//! This module defines the interface the engine uses to read and write one
//! resource instance.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::error::RemoteError;
use crate::resource::{FieldPath, Resource, ResourceKey};
use crate::schema::OperationName;

/// Outcome of a fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    /// The resource exists.
    Found(Resource),
    /// The resource does not exist.
    Absent,
}

impl FetchResult {
    /// Converts into an optional resource.
    #[must_use]
    pub fn into_option(self) -> Option<Resource> {
        match self {
            Self::Found(resource) => Some(resource),
            Self::Absent => None,
        }
    }
}

/// Trait for remote state store clients.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Fetches the current state of a resource.
    ///
    /// Returns [`FetchResult::Absent`] rather than an error when the
    /// resource does not exist.
    async fn get(&self, key: &ResourceKey) -> Result<FetchResult, RemoteError>;

    /// Creates a resource and returns the server's response.
    async fn create(&self, desired: &Resource) -> Result<Resource, RemoteError>;

    /// Runs a named in-place operation for the fields in `field_mask`.
    ///
    /// `resource` carries the version token observed before planning.
    async fn run_operation(
        &self,
        operation: &OperationName,
        resource: &Resource,
        field_mask: &[FieldPath],
    ) -> Result<(), RemoteError>;

    /// Deletes a resource.
    async fn delete(&self, key: &ResourceKey) -> Result<(), RemoteError>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl ResourceClient for Box<dyn ResourceClient> {
    async fn get(&self, key: &ResourceKey) -> Result<FetchResult, RemoteError> {
        (**self).get(key).await
    }

    async fn create(&self, desired: &Resource) -> Result<Resource, RemoteError> {
        (**self).create(desired).await
    }

    async fn run_operation(
        &self,
        operation: &OperationName,
        resource: &Resource,
        field_mask: &[FieldPath],
    ) -> Result<(), RemoteError> {
        (**self).run_operation(operation, resource, field_mask).await
    }

    async fn delete(&self, key: &ResourceKey) -> Result<(), RemoteError> {
        (**self).delete(key).await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}

/// Runs one remote call under a timeout.
///
/// # Errors
///
/// Returns [`RemoteError::Timeout`] if `call` does not finish in time, or
/// the call's own error.
pub async fn call_with_timeout<T, F>(
    timeout: Duration,
    operation: &str,
    call: F,
) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| RemoteError::Timeout {
            operation: operation.to_string(),
            timeout,
        })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_call_with_timeout_expires() {
        let result: Result<(), RemoteError> = call_with_timeout(
            Duration::from_millis(10),
            "get",
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;
        assert!(matches!(result, Err(RemoteError::Timeout { ref operation, .. }) if operation == "get"));
    }

    #[tokio::test]
    async fn test_call_with_timeout_passes_through() {
        let result = call_with_timeout(Duration::from_secs(1), "get", async {
            Err::<(), _>(RemoteError::conflict("keys/a", "stale"))
        })
        .await;
        assert_eq!(result, Err(RemoteError::conflict("keys/a", "stale")));
    }
}
