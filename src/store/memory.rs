//! In-memory state store.
//!
//! Behaves like a remote object store with optimistic concurrency: every
//! stored object carries a generation that is returned as its version token
//! and checked on writes. Conflicts and failures can be injected and calls
//! are counted, which makes it the store of choice for exercising the
//! engine.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::client::{FetchResult, ResourceClient};
use crate::error::RemoteError;
use crate::resource::{FieldPath, Resource, ResourceKey, Value};
use crate::schema::{KindSchema, OperationName};

/// Number of calls made to a [`MemoryStore`], by method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `get` calls.
    pub get: usize,
    /// `create` calls.
    pub create: usize,
    /// `run_operation` calls.
    pub run_operation: usize,
    /// `delete` calls.
    pub delete: usize,
}

impl CallCounts {
    /// Calls that could have changed remote state.
    #[must_use]
    pub const fn mutations(&self) -> usize {
        self.create + self.run_operation + self.delete
    }
}

#[derive(Debug)]
struct Stored {
    resource: Resource,
    generation: u64,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, Stored>,
    calls: CallCounts,
    failures: VecDeque<RemoteError>,
}

/// In-memory store for one resource kind.
#[derive(Debug)]
pub struct MemoryStore {
    kind: String,
    identity: String,
    collection: String,
    server_defaults: Vec<(FieldPath, Value)>,
    creation_timestamp: Option<String>,
    ignored_fields: Vec<FieldPath>,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Creates an empty store for the schema's kind.
    ///
    /// Generated names are placed under `collection`.
    #[must_use]
    pub fn new(schema: &KindSchema, collection: impl Into<String>) -> Self {
        Self {
            kind: schema.kind.clone(),
            identity: schema.identity.clone(),
            collection: collection.into(),
            server_defaults: Vec::new(),
            creation_timestamp: None,
            ignored_fields: Vec::new(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Fills `value` at `path` whenever a stored object leaves it unset.
    ///
    /// Nested defaults only apply when the enclosing object is present.
    #[must_use]
    pub fn with_server_default(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.server_defaults.push((FieldPath::parse(path), value.into()));
        self
    }

    /// Stamps the creation time (RFC 3339) into `field` on create.
    #[must_use]
    pub fn with_creation_timestamp(mut self, field: impl Into<String>) -> Self {
        self.creation_timestamp = Some(field.into());
        self
    }

    /// Silently ignores updates to `path`, like an API dropping a change.
    #[must_use]
    pub fn ignoring_updates_to(mut self, path: &str) -> Self {
        self.ignored_fields.push(FieldPath::parse(path));
        self
    }

    /// Stores an object directly, bypassing call counting.
    pub async fn insert(&self, resource: Resource) -> ResourceKey {
        let mut inner = self.inner.lock().await;
        let (name, resource) = self.assign_identity(resource);
        let resource = self.apply_server_defaults(resource);
        inner.objects.insert(name.clone(), Stored { resource, generation: 1 });
        ResourceKey::new(self.kind.clone(), name)
    }

    /// Changes a stored object the way a concurrent writer would.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::NotFound`] if the object does not exist.
    pub async fn touch(&self, key: &ResourceKey, path: &str, value: impl Into<Value>) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .objects
            .get_mut(&key.name)
            .ok_or_else(|| not_found(key))?;
        stored.resource = stored.resource.clone().with_path(&FieldPath::parse(path), value.into());
        stored.generation += 1;
        Ok(())
    }

    /// Makes the next `count` mutating calls fail with a conflict.
    pub async fn inject_conflicts(&self, count: usize) {
        let mut inner = self.inner.lock().await;
        for _ in 0..count {
            inner
                .failures
                .push_back(RemoteError::conflict(&self.collection, "injected conflict"));
        }
    }

    /// Makes the next mutating call fail with `error`.
    pub async fn inject_failure(&self, error: RemoteError) {
        self.inner.lock().await.failures.push_back(error);
    }

    /// Calls made so far.
    pub async fn calls(&self) -> CallCounts {
        self.inner.lock().await.calls
    }

    /// Current stored state of an object.
    pub async fn snapshot(&self, key: &ResourceKey) -> Option<Resource> {
        self.inner
            .lock()
            .await
            .objects
            .get(&key.name)
            .map(|s| s.resource.clone())
    }

    fn assign_identity(&self, resource: Resource) -> (String, Resource) {
        if let Some(name) = resource.get(&self.identity).as_str().filter(|n| !n.is_empty()) {
            return (name.to_string(), resource);
        }
        let name = format!("{}/{}", self.collection, Uuid::new_v4());
        (name.clone(), resource.with(self.identity.clone(), name))
    }

    fn apply_server_defaults(&self, mut resource: Resource) -> Resource {
        for (path, value) in &self.server_defaults {
            let parent_present = path
                .parent()
                .is_some_and(|parent| parent.is_root() || resource.lookup(&parent).as_entries().is_some());
            if parent_present && resource.lookup(path).is_null() {
                resource = resource.with_path(path, value.clone());
            }
        }
        resource
    }

    fn take_failure(inner: &mut Inner) -> Result<(), RemoteError> {
        inner.failures.pop_front().map_or(Ok(()), Err)
    }
}

fn not_found(key: &ResourceKey) -> RemoteError {
    RemoteError::NotFound {
        id: key.to_string(),
    }
}

fn check_version(stored: &Stored, resource: &Resource, key: &ResourceKey) -> Result<(), RemoteError> {
    match resource.version() {
        Some(version) if version != stored.generation.to_string() => Err(RemoteError::conflict(
            key.to_string(),
            format!("version {version} is stale; current is {}", stored.generation),
        )),
        _ => Ok(()),
    }
}

/// Drops sentinels; the store keeps "no object" as an absent field.
fn strip_sentinels(value: Value) -> Value {
    match value {
        Value::Empty => Value::Null,
        Value::Object(entries) => {
            let entries: BTreeMap<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k, strip_sentinels(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            Value::Object(entries)
        }
        other => other,
    }
}

#[async_trait]
impl ResourceClient for MemoryStore {
    async fn get(&self, key: &ResourceKey) -> Result<FetchResult, RemoteError> {
        let mut inner = self.inner.lock().await;
        inner.calls.get += 1;
        Ok(inner.objects.get(&key.name).map_or(FetchResult::Absent, |stored| {
            FetchResult::Found(
                stored
                    .resource
                    .clone()
                    .with_version(Some(stored.generation.to_string())),
            )
        }))
    }

    async fn create(&self, desired: &Resource) -> Result<Resource, RemoteError> {
        let mut inner = self.inner.lock().await;
        inner.calls.create += 1;
        Self::take_failure(&mut inner)?;

        let fields = desired
            .fields()
            .iter()
            .map(|(k, v)| (k.clone(), strip_sentinels(v.clone())))
            .collect();
        let (name, mut resource) = self.assign_identity(Resource::from_fields(self.kind.clone(), fields));
        if inner.objects.contains_key(&name) {
            return Err(RemoteError::conflict(name, "already exists"));
        }
        if let Some(field) = &self.creation_timestamp {
            resource = resource.with(field.clone(), Utc::now().to_rfc3339());
        }
        let resource = self.apply_server_defaults(resource);

        info!("Created {}/{}", self.kind, name);
        inner.objects.insert(
            name,
            Stored {
                resource: resource.clone(),
                generation: 1,
            },
        );
        Ok(resource.with_version(Some(String::from("1"))))
    }

    async fn run_operation(
        &self,
        operation: &OperationName,
        resource: &Resource,
        field_mask: &[FieldPath],
    ) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().await;
        inner.calls.run_operation += 1;
        Self::take_failure(&mut inner)?;

        let name = resource
            .get(&self.identity)
            .as_str()
            .map(str::to_string)
            .unwrap_or_default();
        let key = ResourceKey::new(self.kind.clone(), name);
        let stored = inner.objects.get_mut(&key.name).ok_or_else(|| not_found(&key))?;
        check_version(stored, resource, &key)?;

        let mut updated = stored.resource.clone();
        for path in field_mask {
            if self.ignored_fields.iter().any(|ignored| ignored.contains(path)) {
                debug!("Ignoring update to {}", path);
                continue;
            }
            updated = updated.with_path(path, strip_sentinels(resource.lookup(path).clone()));
        }
        stored.resource = self.apply_server_defaults(updated);
        stored.generation += 1;
        info!("Ran {} on {} (generation {})", operation, key, stored.generation);
        Ok(())
    }

    async fn delete(&self, key: &ResourceKey) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().await;
        inner.calls.delete += 1;
        Self::take_failure(&mut inner)?;

        inner.objects.remove(&key.name).ok_or_else(|| not_found(key))?;
        info!("Deleted {}", key);
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
