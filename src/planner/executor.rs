//! Plan executor.
//!
//! This module runs the steps of an [`OperationPlan`] against a
//! [`ResourceClient`]. A failing step is fatal for the attempt; the caller
//! decides whether the whole reconciliation is retried.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::plan::{OperationPlan, PlanStep};
use crate::error::{RemoteError, RemoteErrorKind};
use crate::resource::{FieldPath, Resource, Value};
use crate::schema::{KindSchema, OperationName};
use crate::store::{ResourceClient, call_with_timeout};

/// Default timeout for a single remote operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Executor for operation plans.
pub struct PlanExecutor<'a> {
    /// Remote store client.
    client: &'a dyn ResourceClient,
    /// Schema of the resource kind.
    schema: &'a KindSchema,
    /// Run field-disjoint operations concurrently.
    parallel: bool,
    /// Timeout for each remote call.
    operation_timeout: Duration,
}

/// Result of executing a plan.
#[derive(Debug, Default)]
pub struct ExecutionResult {
    /// Server response to a create, if the plan created the resource.
    pub created: Option<Resource>,
    /// Names of the steps executed, in completion order.
    pub executed: Vec<String>,
}

impl<'a> PlanExecutor<'a> {
    /// Creates a sequential executor.
    #[must_use]
    pub const fn new(client: &'a dyn ResourceClient, schema: &'a KindSchema) -> Self {
        Self {
            client,
            schema,
            parallel: false,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Sets whether in-place operations run concurrently.
    #[must_use]
    pub const fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Sets the timeout for each remote call.
    #[must_use]
    pub const fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Executes a plan.
    ///
    /// `desired` is the canonical desired state; `initial` is the state the
    /// plan was computed from.
    ///
    /// # Errors
    ///
    /// Returns the first remote error. With concurrent execution every
    /// operation is awaited and a conflict is preferred over other errors.
    pub async fn execute(
        &self,
        plan: &OperationPlan,
        desired: &Resource,
        initial: Option<&Resource>,
    ) -> Result<ExecutionResult, RemoteError> {
        info!("Executing plan: {}", plan.summary());
        let mut result = ExecutionResult::default();

        let mut operations = Vec::new();
        for step in &plan.steps {
            match step {
                PlanStep::Create => {
                    result.created = Some(self.create(desired).await?);
                    result.executed.push(step.name().to_string());
                }
                PlanStep::Recreate { .. } => {
                    self.delete_existing(initial).await?;
                    result.created = Some(self.create(desired).await?);
                    result.executed.push(step.name().to_string());
                }
                PlanStep::Run { name, .. } => operations.push((name, step.field_mask())),
            }
        }

        if self.parallel && operations.len() > 1 {
            let outcomes = join_all(
                operations
                    .iter()
                    .map(|(name, mask)| self.run(name, desired, mask)),
            )
            .await;

            let mut errors = Vec::new();
            for ((name, _), outcome) in operations.iter().zip(outcomes) {
                match outcome {
                    Ok(()) => result.executed.push(name.to_string()),
                    Err(e) => {
                        warn!("Operation {} failed: {}", name, e);
                        errors.push(e);
                    }
                }
            }
            if let Some(error) = pick_error(errors) {
                return Err(error);
            }
        } else {
            for (name, mask) in &operations {
                self.run(name, desired, mask).await?;
                result.executed.push(name.to_string());
            }
        }

        Ok(result)
    }

    async fn create(&self, desired: &Resource) -> Result<Resource, RemoteError> {
        let body = self.writable(desired);
        info!("Creating {} resource", self.schema.kind);
        debug!("Create request: {}", body);
        call_with_timeout(self.operation_timeout, "create", self.client.create(&body)).await
    }

    async fn delete_existing(&self, initial: Option<&Resource>) -> Result<(), RemoteError> {
        let Some(key) = initial.and_then(|r| self.schema.key_of(r)) else {
            return Ok(());
        };
        info!("Deleting {} for recreation", key);
        match call_with_timeout(self.operation_timeout, "delete", self.client.delete(&key)).await {
            Err(e) if e.kind() == RemoteErrorKind::NotFound => {
                debug!("{} already gone", key);
                Ok(())
            }
            other => other,
        }
    }

    async fn run(
        &self,
        name: &OperationName,
        desired: &Resource,
        mask: &[FieldPath],
    ) -> Result<(), RemoteError> {
        info!("Running {} on {} field(s)", name, mask.len());
        call_with_timeout(
            self.operation_timeout,
            name.as_str(),
            self.client.run_operation(name, desired, mask),
        )
        .await
    }

    /// Desired state without server-assigned fields or sentinels.
    fn writable(&self, desired: &Resource) -> Resource {
        let fields: BTreeMap<String, Value> = desired
            .fields()
            .iter()
            .filter(|(name, _)| !self.schema.root.field(name).is_some_and(|f| f.output_only))
            .map(|(name, value)| (name.clone(), without_sentinels(value)))
            .collect();
        Resource::from_fields(desired.kind(), fields)
    }
}

fn without_sentinels(value: &Value) -> Value {
    match value {
        Value::Empty => Value::Null,
        Value::Object(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), without_sentinels(v)))
                .filter(|(_, v)| !v.is_null())
                .collect(),
        ),
        other => other.clone(),
    }
}

fn pick_error(errors: Vec<RemoteError>) -> Option<RemoteError> {
    let (conflicts, others): (Vec<_>, Vec<_>) = errors
        .into_iter()
        .partition(|e| e.kind() == RemoteErrorKind::Conflict);
    conflicts.into_iter().next().or_else(|| others.into_iter().next())
}

impl std::fmt::Debug for PlanExecutor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("backend", &self.client.backend_type())
            .field("kind", &self.schema.kind)
            .field("parallel", &self.parallel)
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{FieldDiff, LifecyclePolicy, OperationPlanner};
    use crate::resource::ResourceKey;
    use crate::schema::fixtures::key_schema;
    use crate::store::FetchResult;
    use async_trait::async_trait;
    use mockall::{Sequence, mock};
    use std::collections::BTreeSet;

    mock! {
        Client {}

        #[async_trait]
        impl ResourceClient for Client {
            async fn get(&self, key: &ResourceKey) -> Result<FetchResult, RemoteError>;
            async fn create(&self, desired: &Resource) -> Result<Resource, RemoteError>;
            async fn run_operation(
                &self,
                operation: &OperationName,
                resource: &Resource,
                field_mask: &[FieldPath],
            ) -> Result<(), RemoteError>;
            async fn delete(&self, key: &ResourceKey) -> Result<(), RemoteError>;
            fn backend_type(&self) -> &'static str;
        }
    }

    fn diff(path: &str, operations: &[&str], recreate: bool) -> FieldDiff {
        FieldDiff {
            field_name: FieldPath::parse(path),
            desired: Value::from("new"),
            actual: Value::from("old"),
            requires_recreate: recreate,
            resulting_operations: operations.iter().map(|o| OperationName::new(*o)).collect::<BTreeSet<_>>(),
            output_only: false,
        }
    }

    fn existing() -> Resource {
        Resource::new("Key")
            .with("name", "projects/p/keys/k1")
            .with("displayName", "foo")
            .with("createTime", "2024-01-01T00:00:00Z")
            .with_version(Some(String::from("4")))
    }

    #[tokio::test]
    async fn test_create_strips_server_fields() {
        let schema = key_schema();
        let mut client = MockClient::new();
        client
            .expect_create()
            .withf(|r| r.get("name").is_null() && r.get("androidSettings").is_null())
            .times(1)
            .returning(|r| Ok(r.clone().with("name", "projects/p/keys/new")));

        let desired = Resource::new("Key")
            .with("displayName", "foo")
            .with("createTime", "ignored")
            .with("androidSettings", Value::Empty);
        let plan = OperationPlanner::plan(vec![], false, &LifecyclePolicy::default()).expect("plan");

        let result = PlanExecutor::new(&client, &schema)
            .execute(&plan, &desired, None)
            .await
            .expect("execute");
        assert_eq!(result.executed, vec!["Create"]);
        assert_eq!(
            result.created.map(|r| r.get("name").clone()),
            Some(Value::from("projects/p/keys/new"))
        );
    }

    #[tokio::test]
    async fn test_sequential_operations_stop_at_first_failure() {
        let schema = key_schema();
        let mut client = MockClient::new();
        let mut seq = Sequence::new();
        client
            .expect_run_operation()
            .withf(|op, r, mask| {
                op.as_str() == "Relabel"
                    && r.version() == Some("4")
                    && mask.to_vec() == vec![FieldPath::parse("labels")]
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Err(RemoteError::api_error(400, "bad labels")));
        client
            .expect_run_operation()
            .withf(|op, _, _| op.as_str() == "Update")
            .times(0);

        let plan = OperationPlanner::plan(
            vec![diff("displayName", &["Update"], false), diff("labels", &["Relabel"], false)],
            true,
            &LifecyclePolicy::default(),
        )
        .expect("plan");

        let err = PlanExecutor::new(&client, &schema)
            .execute(&plan, &existing(), Some(&existing()))
            .await
            .expect_err("failure");
        assert_eq!(err, RemoteError::api_error(400, "bad labels"));
    }

    #[tokio::test]
    async fn test_parallel_operations_prefer_conflict() {
        let schema = key_schema();
        let mut client = MockClient::new();
        client
            .expect_run_operation()
            .withf(|op, _, _| op.as_str() == "Relabel")
            .times(1)
            .returning(|_, _, _| Err(RemoteError::api_error(500, "boom")));
        client
            .expect_run_operation()
            .withf(|op, _, _| op.as_str() == "Update")
            .times(1)
            .returning(|_, _, _| Err(RemoteError::conflict("projects/p/keys/k1", "stale")));

        let plan = OperationPlanner::plan(
            vec![diff("displayName", &["Update"], false), diff("labels", &["Relabel"], false)],
            true,
            &LifecyclePolicy::default(),
        )
        .expect("plan");

        let err = PlanExecutor::new(&client, &schema)
            .with_parallel(true)
            .execute(&plan, &existing(), Some(&existing()))
            .await
            .expect_err("failure");
        assert!(matches!(err, RemoteError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_recreate_deletes_then_creates() {
        let schema = key_schema();
        let mut client = MockClient::new();
        let mut seq = Sequence::new();
        client
            .expect_delete()
            .withf(|key| key.name == "projects/p/keys/k1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|key| Err(RemoteError::NotFound { id: key.to_string() }));
        client
            .expect_create()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|r| Ok(r.clone().with("name", "projects/p/keys/k2")));

        let policy = LifecyclePolicy {
            allow_recreate: true,
            ..LifecyclePolicy::default()
        };
        let plan = OperationPlanner::plan(vec![diff("webSettings", &[], true)], true, &policy).expect("plan");

        let result = PlanExecutor::new(&client, &schema)
            .execute(&plan, &existing(), Some(&existing()))
            .await
            .expect("execute");
        assert_eq!(result.executed, vec!["Recreate"]);
        assert!(result.created.is_some());
    }
}
