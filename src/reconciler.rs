//! Reconciler for converging one resource to its desired state.
//!
//! This module implements the apply state machine: fetch the observed
//! state, canonicalize and diff the desired state against it, plan and
//! execute the operations, then re-fetch and verify that nothing actionable
//! is left. Write conflicts restart the whole attempt from a fresh read.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::{
    ConflictExhaustedError, ConvergeError, DiffAfterApplyError, InfeasibleError, InfeasibleReason,
    RemoteError, Result,
};
use crate::planner::{
    Canonicalizer, DEFAULT_OPERATION_TIMEOUT, DiffEngine, FieldDiff, LifecyclePolicy,
    OperationPlan, OperationPlanner, PlanExecutor, PlanStep,
};
use crate::resource::{Resource, ResourceKey};
use crate::schema::{KindSchema, ResourceValidator};
use crate::store::{ResourceClient, call_with_timeout};

/// Phase of the apply state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyPhase {
    /// Reading the current remote state.
    Fetching,
    /// Canonicalizing, diffing and planning.
    Diffing,
    /// Running the planned operations.
    Executing,
    /// Re-reading and re-diffing after execution.
    Verifying,
}

impl fmt::Display for ApplyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fetching => "fetching",
            Self::Diffing => "diffing",
            Self::Executing => "executing",
            Self::Verifying => "verifying",
        };
        write!(f, "{name}")
    }
}

/// Time source used for retry budgets and backoff sleeps.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Waits for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Bounds on the conflict retry loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of reconciliation attempts, including the first.
    pub max_attempts: u32,
    /// Give up once this much time has passed since the first attempt.
    pub max_elapsed: Option<Duration>,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_elapsed: Some(Duration::from_secs(120)),
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with no delay between attempts.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            max_elapsed: None,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay after the given failed attempt (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Returns true if another attempt is allowed.
    #[must_use]
    pub fn allows_retry(&self, attempts: u32, elapsed: Duration) -> bool {
        attempts < self.max_attempts && self.max_elapsed.is_none_or(|max| elapsed < max)
    }
}

/// Everything an apply needs, passed explicitly.
#[derive(Clone)]
pub struct ReconcileContext {
    /// Remote store client.
    pub client: Arc<dyn ResourceClient>,
    /// Schema of the resource kind.
    pub schema: Arc<KindSchema>,
    /// What the apply is allowed to do.
    pub policy: LifecyclePolicy,
    /// Conflict retry bounds.
    pub retry: RetryPolicy,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Cancellation signal checked at every phase.
    pub cancel: CancellationToken,
    /// Timeout for each remote call.
    pub call_timeout: Duration,
    /// Run in-place operations concurrently.
    pub parallel_operations: bool,
}

impl ReconcileContext {
    /// Creates a context with default policies and the system clock.
    #[must_use]
    pub fn new(client: Arc<dyn ResourceClient>, schema: Arc<KindSchema>) -> Self {
        Self {
            client,
            schema,
            policy: LifecyclePolicy::default(),
            retry: RetryPolicy::default(),
            clock: Arc::new(SystemClock),
            cancel: CancellationToken::new(),
            call_timeout: DEFAULT_OPERATION_TIMEOUT,
            parallel_operations: false,
        }
    }

    /// Sets the lifecycle policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: LifecyclePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sets the timeout for each remote call.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Sets whether in-place operations run concurrently.
    #[must_use]
    pub const fn with_parallel_operations(mut self, parallel: bool) -> Self {
        self.parallel_operations = parallel;
        self
    }
}

impl fmt::Debug for ReconcileContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconcileContext")
            .field("backend", &self.client.backend_type())
            .field("kind", &self.schema.kind)
            .field("policy", &self.policy)
            .field("retry", &self.retry)
            .field("call_timeout", &self.call_timeout)
            .field("parallel_operations", &self.parallel_operations)
            .finish_non_exhaustive()
    }
}

/// Result of a successful apply.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutcome {
    /// Canonical state after convergence.
    pub state: Resource,
    /// Number of attempts, including conflict retries.
    pub attempts: u32,
    /// Plan executed by the final attempt.
    pub plan: OperationPlan,
    /// Whether any remote write was made by the final attempt.
    pub mutated: bool,
    /// Diffs that remain but need no remote call.
    pub informational: Vec<FieldDiff>,
}

/// What an apply would do, without doing it.
#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    /// Observed state, if the resource exists.
    pub initial: Option<Resource>,
    /// Canonical desired state.
    pub desired: Resource,
    /// Planned operations and the diffs behind them.
    pub plan: OperationPlan,
}

/// Drives resources of one kind to their desired state.
#[derive(Debug)]
pub struct Reconciler {
    ctx: ReconcileContext,
}

impl Reconciler {
    /// Creates a new reconciler.
    #[must_use]
    pub const fn new(ctx: ReconcileContext) -> Self {
        Self { ctx }
    }

    /// The context this reconciler runs with.
    #[must_use]
    pub const fn context(&self) -> &ReconcileContext {
        &self.ctx
    }

    /// Converges the remote resource to `raw`.
    ///
    /// `hint` is the last known state of the resource; its identity is used
    /// when `raw` does not carry one.
    ///
    /// # Errors
    ///
    /// Returns a [`ConvergeError::Schema`] if `raw` is invalid, an
    /// [`InfeasibleError`] if the policy forbids the change,
    /// [`DiffAfterApplyError`] if the remote did not honor it,
    /// [`ConflictExhaustedError`] once conflicts outlast the retry policy,
    /// [`ConvergeError::Cancelled`] on cancellation, and any other remote
    /// error as is.
    pub async fn apply(&self, raw: &Resource, hint: Option<&Resource>) -> Result<ApplyOutcome> {
        ResourceValidator::new(&self.ctx.schema).validate(raw)?;

        let span = info_span!(
            "apply",
            kind = %self.ctx.schema.kind,
            name = %self.label(raw, hint),
            attempt = tracing::field::Empty,
        );
        self.apply_with_retry(raw, hint).instrument(span).await
    }

    /// Computes the plan an apply would start with.
    ///
    /// Makes at most one `get` call and never writes.
    ///
    /// # Errors
    ///
    /// Returns the same validation, feasibility and remote errors as
    /// [`Reconciler::apply`]'s first attempt.
    pub async fn preview(&self, raw: &Resource, hint: Option<&Resource>) -> Result<Preview> {
        ResourceValidator::new(&self.ctx.schema).validate(raw)?;

        let initial = self.fetch(raw, hint).await?;
        let (desired, plan) = self.plan_changes(raw, initial.as_ref())?;
        info!("Preview for {}: {}", self.label(raw, hint), plan.summary());
        Ok(Preview {
            initial,
            desired,
            plan,
        })
    }

    async fn apply_with_retry(&self, raw: &Resource, hint: Option<&Resource>) -> Result<ApplyOutcome> {
        let started = self.ctx.clock.now();
        let mut hint = hint.cloned();
        let mut attempts = 0;

        loop {
            attempts += 1;
            tracing::Span::current().record("attempt", attempts);

            match self.attempt(raw, &mut hint).await {
                Ok(mut outcome) => {
                    outcome.attempts = attempts;
                    info!(
                        "Converged after {} attempt(s): {}",
                        attempts,
                        outcome.plan.summary()
                    );
                    return Ok(outcome);
                }
                Err(ConvergeError::Remote(last @ RemoteError::Conflict { .. })) => {
                    let elapsed = self.ctx.clock.now().saturating_duration_since(started);
                    if !self.ctx.retry.allows_retry(attempts, elapsed) {
                        error!("Giving up after {} attempt(s): {}", attempts, last);
                        return Err(ConflictExhaustedError {
                            attempts,
                            elapsed,
                            last,
                        }
                        .into());
                    }
                    let delay = self.ctx.retry.backoff(attempts);
                    warn!(
                        "Conflict on attempt {}: {}; retrying in {:?}",
                        attempts, last, delay
                    );
                    self.guard(ApplyPhase::Fetching, self.ctx.clock.sleep(delay))
                        .await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One pass through Fetching, Diffing, Executing and Verifying.
    async fn attempt(&self, raw: &Resource, hint: &mut Option<Resource>) -> Result<ApplyOutcome> {
        let initial = self.fetch(raw, hint.as_ref()).await?;

        let (desired, plan) = self.plan_changes(raw, initial.as_ref())?;
        if plan.is_empty() {
            info!("Already converged");
            let informational = plan.informational().cloned().collect();
            return Ok(ApplyOutcome {
                state: desired,
                attempts: 0,
                plan,
                mutated: false,
                informational,
            });
        }

        info!("Executing {} step(s)", plan.steps.len());
        let executor = PlanExecutor::new(&*self.ctx.client, &self.ctx.schema)
            .with_parallel(self.ctx.parallel_operations)
            .with_operation_timeout(self.ctx.call_timeout);
        let result = self
            .guard(
                ApplyPhase::Executing,
                executor.execute(&plan, &desired, initial.as_ref()),
            )
            .await??;

        let created_key = result.created.as_ref().and_then(|r| self.ctx.schema.key_of(r));
        if let Some(created) = result.created {
            *hint = Some(created);
        }
        let key = created_key
            .or_else(|| self.key_for(raw, hint.as_ref()))
            .ok_or_else(|| ConvergeError::internal("resource has no identity after apply"))?;

        let (state, informational) = self.verify(raw, &key).await?;
        *hint = Some(state.clone());
        Ok(ApplyOutcome {
            state,
            attempts: 0,
            plan,
            mutated: true,
            informational,
        })
    }

    async fn fetch(&self, raw: &Resource, hint: Option<&Resource>) -> Result<Option<Resource>> {
        let Some(key) = self.key_for(raw, hint) else {
            debug!("No identity known; treating resource as absent");
            return Ok(None);
        };

        debug!("Fetching {}", key);
        let fetched = self
            .guard(
                ApplyPhase::Fetching,
                call_with_timeout(self.ctx.call_timeout, "get", self.ctx.client.get(&key)),
            )
            .await??;

        let canonicalizer = Canonicalizer::new(&self.ctx.schema);
        Ok(fetched
            .into_option()
            .map(|observed| canonicalizer.normalize_observed(&observed)))
    }

    fn plan_changes(
        &self,
        raw: &Resource,
        initial: Option<&Resource>,
    ) -> Result<(Resource, OperationPlan)> {
        self.check_cancelled(ApplyPhase::Diffing)?;
        let schema = &*self.ctx.schema;

        let desired = Canonicalizer::new(schema).canonicalize(raw, initial)?;
        let diffs = match initial {
            Some(initial) => DiffEngine::new(schema).diff(&desired, initial)?,
            None => {
                self.check_server_assigned(raw)?;
                Vec::new()
            }
        };
        for diff in &diffs {
            debug!(
                "Diff {}: {} -> {}",
                diff.field_name, diff.actual, diff.desired
            );
        }

        let plan = OperationPlanner::plan(diffs, initial.is_some(), &self.ctx.policy)?;
        if plan
            .steps
            .iter()
            .any(|step| matches!(step, PlanStep::Recreate { .. }))
        {
            self.check_server_assigned(raw)?;
        }
        Ok((desired, plan))
    }

    async fn verify(&self, raw: &Resource, key: &ResourceKey) -> Result<(Resource, Vec<FieldDiff>)> {
        debug!("Verifying {}", key);
        let fetched = self
            .guard(
                ApplyPhase::Verifying,
                call_with_timeout(self.ctx.call_timeout, "get", self.ctx.client.get(key)),
            )
            .await??;
        let Some(observed) = fetched.into_option() else {
            error!("{} vanished after apply", key);
            return Err(RemoteError::NotFound {
                id: key.to_string(),
            }
            .into());
        };

        let schema = &*self.ctx.schema;
        let canonicalizer = Canonicalizer::new(schema);
        let new_state = canonicalizer.normalize_observed(&observed);
        let state = canonicalizer.canonicalize(raw, Some(&new_state))?;
        let (residual, informational): (Vec<FieldDiff>, Vec<FieldDiff>) = DiffEngine::new(schema)
            .diff(&state, &new_state)?
            .into_iter()
            .partition(FieldDiff::is_actionable);

        if !residual.is_empty() {
            let err = DiffAfterApplyError { diffs: residual };
            error!("{}", err);
            return Err(err.into());
        }
        Ok((state, informational))
    }

    /// Rejects a server-assigned identity the remote would not reproduce.
    fn check_server_assigned(&self, raw: &Resource) -> Result<()> {
        let Some(identity) = self.ctx.schema.identity_field() else {
            return Ok(());
        };
        if identity.output_only && self.ctx.schema.key_of(raw).is_some() {
            return Err(InfeasibleError::new(InfeasibleReason::ServerAssignedField(
                identity.name.clone(),
            ))
            .into());
        }
        Ok(())
    }

    fn key_for(&self, raw: &Resource, hint: Option<&Resource>) -> Option<ResourceKey> {
        let schema = &self.ctx.schema;
        schema
            .key_of(raw)
            .or_else(|| hint.and_then(|h| schema.key_of(h)))
    }

    fn label(&self, raw: &Resource, hint: Option<&Resource>) -> String {
        self.key_for(raw, hint)
            .map_or_else(|| String::from("<new>"), |key| key.short_name().to_string())
    }

    fn check_cancelled(&self, phase: ApplyPhase) -> Result<()> {
        if self.ctx.cancel.is_cancelled() {
            return Err(ConvergeError::Cancelled { phase });
        }
        Ok(())
    }

    /// Runs `fut` unless cancellation is observed first.
    async fn guard<T>(&self, phase: ApplyPhase, fut: impl Future<Output = T>) -> Result<T> {
        tokio::select! {
            biased;
            () = self.ctx.cancel.cancelled() => {
                warn!("Cancelled while {}", phase);
                Err(ConvergeError::Cancelled { phase })
            }
            out = fut => Ok(out),
        }
    }
}
