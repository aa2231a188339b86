//! Execution engine: staged unit execution with retries and durable checkpoints.
//!
//! The `ExecutionEngine` runs the units of an `ExecutionSpec` in stage order.
//! Units within one stage run concurrently via `tokio::JoinSet`, optionally
//! bounded by a semaphore. Steps within one unit run strictly in order, each
//! attempted under its retry policy, and the unit's log is checkpointed after
//! every step so that a crashed or failed run can be resumed.
//!
//! # Execution flow
//!
//! 1. Validate the spec and build the staged plan (any cycle is fatal).
//! 2. Acquire the lease on the execution id.
//! 3. For each stage, spawn one task per unit; each task runs its steps,
//!    persisting after every step, then evaluates postconditions.
//! 4. The first failing unit halts the run: running siblings stop before
//!    their next step (or mid-backoff), and later stages are not attempted.
//! 5. Release the lease and return the logs of every unit in the spec.
//!
//! Every unit gets a `pending` checkpoint when the run starts, so a crash
//! between stages leaves the not-yet-started units visible to `resume`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tessera_types::config::EngineConfig;
use tessera_types::error::ConfigValidationError;
use tessera_types::execution::{
    CheckpointSummary, ExecutionLog, ExecutionStatus, StepResult, aggregate_status,
};
use tessera_types::unit::{ExecutionSpec, RetryPolicy, StepDefinition, Unit};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::repository::checkpoint::CheckpointRepository;
use crate::security::sanitizer::{SanitizerError, SecretSanitizer};

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::context::ExecutionContext;
use super::dag::{self, ExecutionPlan, GraphError, GraphValidation};
use super::definition::{SpecError, validate_spec};
use super::postcondition::BoxPostconditionChecker;
use super::retry::{RetryDecision, RetryHandler};
use super::step_runner::{BoxStepExecutor, StepError, StepOutcome};

// ---------------------------------------------------------------------------
// ExecutionResult
// ---------------------------------------------------------------------------

/// Outcome of an `execute` or `resume` call.
///
/// Unit failures and postcondition failures are reported here with
/// `success = false`; only local-boundary failures (graph, checkpoint, lease)
/// surface as `ExecutorError`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    /// Aggregate status over the unit logs.
    pub status: ExecutionStatus,
    pub success: bool,
    pub error: Option<String>,
    /// Logs of every unit, in spec order. Units that never started are
    /// `pending`. Complete even on failure.
    pub logs: Vec<ExecutionLog>,
    pub completed_units: Vec<String>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn log(&self, unit_id: &str) -> Option<&ExecutionLog> {
        self.logs.iter().find(|l| l.unit_id == unit_id)
    }
}

// ---------------------------------------------------------------------------
// Run signal
// ---------------------------------------------------------------------------

/// Cancellation token of one run plus why it fired.
#[derive(Debug, Default)]
struct RunSignal {
    token: CancellationToken,
    timed_out: AtomicBool,
}

impl RunSignal {
    fn message(&self) -> &'static str {
        if self.timed_out.load(Ordering::SeqCst) {
            "execution timed out"
        } else {
            "execution cancelled"
        }
    }
}

/// Cancels the run once `limit` elapses, unless the run ends first.
fn spawn_watchdog(signal: Arc<RunSignal>, limit: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = signal.token.cancelled() => {}
            _ = tokio::time::sleep(limit) => {
                signal.timed_out.store(true, Ordering::SeqCst);
                signal.token.cancel();
                tracing::warn!(limit_secs = limit.as_secs(), "execution exceeded run timeout");
            }
        }
    })
}

// ---------------------------------------------------------------------------
// ExecutionEngine
// ---------------------------------------------------------------------------

/// Stage-based unit executor with durable checkpointing.
///
/// Generic over `R: CheckpointRepository` for storage flexibility.
pub struct ExecutionEngine<R: CheckpointRepository> {
    checkpoint: Arc<CheckpointManager<R>>,
    executor: BoxStepExecutor,
    checker: BoxPostconditionChecker,
    config: EngineConfig,
    /// Lease owner id of this engine instance.
    owner: String,
    /// Cancellation tokens keyed by execution id, present while a run is active.
    cancellation_tokens: DashMap<Uuid, CancellationToken>,
}

impl<R: CheckpointRepository + 'static> ExecutionEngine<R> {
    pub fn new(
        repo: R,
        executor: BoxStepExecutor,
        sanitizer: Arc<SecretSanitizer>,
        config: EngineConfig,
    ) -> Self {
        Self {
            checkpoint: Arc::new(CheckpointManager::new(repo, sanitizer)),
            executor,
            checker: BoxPostconditionChecker::default(),
            config,
            owner: format!("engine-{}", Uuid::now_v7()),
            cancellation_tokens: DashMap::new(),
        }
    }

    /// Create an engine whose sanitizer is built from the configuration.
    pub fn from_config(
        repo: R,
        executor: BoxStepExecutor,
        config: EngineConfig,
    ) -> Result<Self, ExecutorError> {
        config.validate()?;
        let sanitizer = Arc::new(SecretSanitizer::from_config(&config)?);
        Ok(Self::new(repo, executor, sanitizer, config))
    }

    pub fn with_postcondition_checker(mut self, checker: BoxPostconditionChecker) -> Self {
        self.checker = checker;
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn checkpoint(&self) -> &CheckpointManager<R> {
        &self.checkpoint
    }

    pub fn sanitizer(&self) -> &Arc<SecretSanitizer> {
        self.checkpoint.sanitizer()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Ids of the runs this engine is currently driving.
    pub fn active_executions(&self) -> Vec<Uuid> {
        self.cancellation_tokens.iter().map(|e| *e.key()).collect()
    }

    // -----------------------------------------------------------------------
    // Planning
    // -----------------------------------------------------------------------

    /// Validate the spec and compute its stages.
    pub fn plan(&self, spec: &ExecutionSpec) -> Result<ExecutionPlan, ExecutorError> {
        validate_spec(spec)?;
        Ok(dag::build_execution_plan(&spec.units)?)
    }

    /// Validate the spec's graph without rejecting cycles, for reporting.
    pub fn validate(&self, spec: &ExecutionSpec) -> Result<GraphValidation, ExecutorError> {
        validate_spec(spec)?;
        let graph = dag::build_graph(&spec.units)?;
        Ok(dag::validate(&graph))
    }

    // -----------------------------------------------------------------------
    // Execute / resume
    // -----------------------------------------------------------------------

    /// Execute a spec from the beginning under a fresh execution id.
    pub async fn execute(&self, spec: &ExecutionSpec) -> Result<ExecutionResult, ExecutorError> {
        let plan = self.plan(spec)?;
        let execution_id = Uuid::now_v7();

        tracing::info!(
            execution_id = %execution_id,
            spec = spec.name.as_str(),
            units = spec.units.len(),
            stages = plan.stages.len(),
            "starting execution"
        );

        self.drive(spec, &plan, execution_id, HashMap::new()).await
    }

    /// Resume a run from its checkpoints.
    ///
    /// Completed units are not re-run; started units continue from their
    /// first step lacking a recorded success. A run whose checkpoints are
    /// completed or rolled back is rejected with `NotResumable`.
    pub async fn resume(
        &self,
        execution_id: Uuid,
        spec: &ExecutionSpec,
    ) -> Result<ExecutionResult, ExecutorError> {
        let plan = self.plan(spec)?;
        let stored = self.checkpoint.load_logs(&execution_id).await?;

        let mut by_unit = HashMap::with_capacity(spec.units.len());
        for log in stored {
            let Some(unit) = spec.unit(&log.unit_id) else {
                return Err(ExecutorError::SpecMismatch(format!(
                    "checkpointed unit '{}' is not part of spec '{}'",
                    log.unit_id, spec.name
                )));
            };
            if log.steps.len() > unit.steps.len() {
                return Err(ExecutorError::SpecMismatch(format!(
                    "unit '{}' has {} recorded steps but declares {}",
                    unit.id,
                    log.steps.len(),
                    unit.steps.len()
                )));
            }
            by_unit.insert(log.unit_id.clone(), log);
        }
        // Units without a checkpoint never started.
        for unit in &spec.units {
            by_unit
                .entry(unit.id.clone())
                .or_insert_with(|| ExecutionLog::pending(execution_id, unit.id.clone()));
        }

        let ordered: Vec<ExecutionLog> = spec
            .units
            .iter()
            .filter_map(|u| by_unit.get(&u.id).cloned())
            .collect();
        let decision = CheckpointManager::<R>::can_resume_run(&ordered);
        if !decision.can_resume {
            let reason = decision.reason.unwrap_or_default();
            tracing::info!(execution_id = %execution_id, reason = %reason, "execution not resumable");
            return Err(ExecutorError::NotResumable {
                execution_id,
                reason,
            });
        }

        tracing::info!(
            execution_id = %execution_id,
            spec = spec.name.as_str(),
            resume_from = ?decision.resume_from_step,
            pending_units = ordered
                .iter()
                .filter(|l| l.status == ExecutionStatus::Pending)
                .count(),
            "resuming execution"
        );

        self.drive(spec, &plan, execution_id, by_unit).await
    }

    /// Run the plan under the lease, a cancellation token, and the run timeout.
    async fn drive(
        &self,
        spec: &ExecutionSpec,
        plan: &ExecutionPlan,
        execution_id: Uuid,
        logs: HashMap<String, ExecutionLog>,
    ) -> Result<ExecutionResult, ExecutorError> {
        self.config.validate()?;
        let ttl = Duration::from_secs(self.config.lease_ttl_secs);
        self.checkpoint
            .acquire_lease(&execution_id, &self.owner, ttl)
            .await?;

        let signal = Arc::new(RunSignal::default());
        self.cancellation_tokens
            .insert(execution_id, signal.token.clone());
        let watchdog = spawn_watchdog(
            Arc::clone(&signal),
            Duration::from_secs(self.config.run_timeout_secs),
        );

        let started = Instant::now();
        let outcome = self
            .run_stages(spec, plan, execution_id, logs, &signal)
            .await;

        watchdog.abort();
        self.cancellation_tokens.remove(&execution_id);
        self.release_lease(&execution_id).await;

        let (mut logs, error) = outcome?;
        let ordered: Vec<ExecutionLog> = spec
            .units
            .iter()
            .filter_map(|u| logs.remove(&u.id))
            .collect();
        let status = if error.is_some() {
            ExecutionStatus::Failed
        } else {
            aggregate_status(&ordered)
        };
        let completed_units = ordered
            .iter()
            .filter(|l| l.status == ExecutionStatus::Completed)
            .map(|l| l.unit_id.clone())
            .collect::<Vec<_>>();
        let duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            execution_id = %execution_id,
            status = %status,
            completed_units = completed_units.len(),
            duration_ms,
            "execution finished"
        );

        Ok(ExecutionResult {
            execution_id,
            success: status == ExecutionStatus::Completed,
            status,
            error,
            logs: ordered,
            completed_units,
            duration_ms,
        })
    }

    /// Execute stages in order. Returns the unit logs and, if the run
    /// failed, the error of the first failing unit of the failing stage.
    async fn run_stages(
        &self,
        spec: &ExecutionSpec,
        plan: &ExecutionPlan,
        execution_id: Uuid,
        mut logs: HashMap<String, ExecutionLog>,
        signal: &Arc<RunSignal>,
    ) -> Result<(HashMap<String, ExecutionLog>, Option<String>), ExecutorError> {
        let semaphore = spec
            .max_concurrency
            .or(self.config.max_concurrency)
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        // Cancelled by the first unit failure; child of the run token so
        // cancellation and timeouts reach every unit through it too.
        let halt = signal.token.child_token();

        for unit in &spec.units {
            let log = logs
                .entry(unit.id.clone())
                .or_insert_with(|| ExecutionLog::pending(execution_id, unit.id.clone()));
            if log.status == ExecutionStatus::Pending {
                self.checkpoint.save(log).await?;
            }
        }

        for stage in &plan.stages {
            if signal.token.is_cancelled() {
                return Ok((logs, Some(signal.message().to_string())));
            }

            let mut units: Vec<&Unit> = stage
                .unit_ids
                .iter()
                .filter_map(|id| spec.unit(id))
                .collect();
            // Stable: equal priorities keep input order.
            units.sort_by_key(|u| std::cmp::Reverse(u.priority));

            tracing::debug!(
                execution_id = %execution_id,
                stage = stage.index,
                units = units.len(),
                "processing stage"
            );

            let mut join_set = JoinSet::new();
            for unit in units {
                if logs.get(&unit.id).is_some_and(|l| l.status.is_final()) {
                    tracing::debug!(
                        execution_id = %execution_id,
                        unit_id = unit.id.as_str(),
                        "skipping finished unit"
                    );
                    continue;
                }

                let task = UnitTask {
                    execution_id,
                    unit: unit.clone(),
                    log: logs.remove(&unit.id),
                    checkpoint: Arc::clone(&self.checkpoint),
                    executor: self.executor.clone(),
                    checker: self.checker.clone(),
                    default_retry: self.config.default_retry.clone(),
                    step_timeout_secs: self.config.step_timeout_secs,
                    variables: spec.metadata.clone(),
                    signal: Arc::clone(signal),
                    semaphore: semaphore.clone(),
                    halt: halt.clone(),
                };
                join_set.spawn(task.run());
            }

            let mut failures: HashMap<String, String> = HashMap::new();
            let mut fatal: Option<ExecutorError> = None;
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(Ok(UnitReport::Finished { log, error })) => {
                        if let Some(error) = error {
                            halt.cancel();
                            failures.insert(log.unit_id.clone(), error);
                        }
                        logs.insert(log.unit_id.clone(), log);
                    }
                    Ok(Ok(UnitReport::Halted { log })) => {
                        logs.insert(log.unit_id.clone(), log);
                    }
                    Ok(Ok(UnitReport::NotStarted { unit_id, log })) => {
                        if let Some(log) = log {
                            logs.insert(unit_id, log);
                        }
                    }
                    Ok(Err(e)) => {
                        signal.token.cancel();
                        if fatal.is_none() {
                            fatal = Some(e);
                        }
                    }
                    Err(join_err) => {
                        signal.token.cancel();
                        if fatal.is_none() {
                            fatal = Some(ExecutorError::TaskJoin(join_err.to_string()));
                        }
                    }
                }
            }

            if let Some(e) = fatal {
                return Err(e);
            }
            if !failures.is_empty() {
                let first = stage
                    .unit_ids
                    .iter()
                    .find_map(|id| failures.remove(id))
                    .or_else(|| failures.into_values().next());
                return Ok((logs, first));
            }
        }

        if signal.token.is_cancelled() {
            return Ok((logs, Some(signal.message().to_string())));
        }
        Ok((logs, None))
    }

    async fn release_lease(&self, execution_id: &Uuid) {
        if let Err(e) = self.checkpoint.release_lease(execution_id, &self.owner).await {
            tracing::warn!(execution_id = %execution_id, error = %e, "failed to release lease");
        }
    }

    // -----------------------------------------------------------------------
    // Control
    // -----------------------------------------------------------------------

    /// Cancel an active run. In-flight attempts and backoff sleeps stop, and
    /// every running unit is finalized as failed.
    pub fn cancel(&self, execution_id: &Uuid) -> Result<(), ExecutorError> {
        match self.cancellation_tokens.get(execution_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(execution_id = %execution_id, "execution cancellation requested");
                Ok(())
            }
            None => Err(ExecutorError::RunNotFound(*execution_id)),
        }
    }

    /// Mark every unit log of a run as rolled back.
    ///
    /// This only records the caller's decision; the engine performs no undo
    /// of step side effects.
    pub async fn rollback(&self, execution_id: Uuid) -> Result<Vec<ExecutionLog>, ExecutorError> {
        if self.cancellation_tokens.contains_key(&execution_id) {
            return Err(ExecutorError::RunActive(execution_id));
        }
        let ttl = Duration::from_secs(self.config.lease_ttl_secs);
        self.checkpoint
            .acquire_lease(&execution_id, &self.owner, ttl)
            .await?;
        let result = self.mark_rolled_back(execution_id).await;
        self.release_lease(&execution_id).await;
        result
    }

    async fn mark_rolled_back(&self, execution_id: Uuid) -> Result<Vec<ExecutionLog>, ExecutorError> {
        let mut logs = self.checkpoint.load_logs(&execution_id).await?;
        for log in &mut logs {
            if log.status == ExecutionStatus::RolledBack && log.rollback_executed {
                continue;
            }
            log.finalize(ExecutionStatus::RolledBack);
            log.rollback_executed = true;
            self.checkpoint.save(log).await?;
        }
        tracing::info!(execution_id = %execution_id, units = logs.len(), "execution rolled back");
        Ok(logs)
    }

    /// Summaries of every stored checkpoint.
    pub async fn list_checkpoints(&self) -> Result<Vec<CheckpointSummary>, ExecutorError> {
        Ok(self.checkpoint.list().await?)
    }

    /// Delete a run's checkpoints. Refused while the run is active here.
    pub async fn delete_checkpoint(&self, execution_id: Uuid) -> Result<bool, ExecutorError> {
        if self.cancellation_tokens.contains_key(&execution_id) {
            return Err(ExecutorError::RunActive(execution_id));
        }
        Ok(self.checkpoint.delete(&execution_id).await?)
    }
}

// ---------------------------------------------------------------------------
// Unit task
// ---------------------------------------------------------------------------

enum UnitReport {
    /// The unit ran to a terminal status. `error` is set when it failed.
    Finished {
        log: ExecutionLog,
        error: Option<String>,
    },
    /// Stopped early because another unit failed. Not a cause of failure.
    Halted { log: ExecutionLog },
    /// Skipped because the run halted or was cancelled before it started.
    NotStarted {
        unit_id: String,
        log: Option<ExecutionLog>,
    },
}

/// Everything one spawned unit needs, owned so the task is `'static`.
struct UnitTask<R: CheckpointRepository> {
    execution_id: Uuid,
    unit: Unit,
    /// Checkpointed log when resuming.
    log: Option<ExecutionLog>,
    checkpoint: Arc<CheckpointManager<R>>,
    executor: BoxStepExecutor,
    checker: BoxPostconditionChecker,
    default_retry: RetryPolicy,
    step_timeout_secs: u64,
    variables: HashMap<String, serde_json::Value>,
    signal: Arc<RunSignal>,
    semaphore: Option<Arc<Semaphore>>,
    /// Run-wide stop signal: fires on cancellation, timeout, or any unit failure.
    halt: CancellationToken,
}

impl<R: CheckpointRepository + 'static> UnitTask<R> {
    async fn run(mut self) -> Result<UnitReport, ExecutorError> {
        let _permit = match &self.semaphore {
            Some(semaphore) => Some(
                Arc::clone(semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|e| ExecutorError::TaskJoin(e.to_string()))?,
            ),
            None => None,
        };

        if self.halt.is_cancelled() {
            return Ok(UnitReport::NotStarted {
                unit_id: self.unit.id.clone(),
                log: self.log.take(),
            });
        }

        let mut log = match self.log.take() {
            Some(mut log) => {
                if log.status == ExecutionStatus::Pending {
                    log.started_at = Utc::now();
                }
                log.truncate_to_resume_point();
                log.status = ExecutionStatus::Running;
                log.completed_at = None;
                log.postcondition_results = None;
                log
            }
            None => ExecutionLog::start(self.execution_id, self.unit.id.clone()),
        };

        let mut ctx = ExecutionContext::new(
            self.execution_id,
            self.unit.id.clone(),
            Arc::clone(self.checkpoint.sanitizer()),
            self.halt.clone(),
        )
        .with_variables(std::mem::take(&mut self.variables));
        for (result, step) in log.steps.iter().zip(&self.unit.steps) {
            if let Some(output) = &result.output {
                ctx.set_step_output(&step.id, output.clone());
            }
        }

        self.checkpoint.save(&log).await?;
        let start = log.resume_index();

        tracing::debug!(
            execution_id = %self.execution_id,
            unit_id = self.unit.id.as_str(),
            steps = self.unit.steps.len(),
            resume_from = start,
            "unit started"
        );

        for (index, step) in self.unit.steps.iter().enumerate().skip(start) {
            if self.halt.is_cancelled() {
                log.finalize(ExecutionStatus::Failed);
                self.checkpoint.save(&log).await?;
                return Ok(self.stopped(log));
            }

            let (result, interrupted) = self.run_step(step, index, &mut ctx).await;
            let success = result.success;
            let error = result.error.clone();
            if success {
                if let Some(output) = &result.output {
                    ctx.set_step_output(&step.id, output.clone());
                }
            }

            log.append_step(result);
            self.checkpoint.save(&log).await?;

            if !success {
                log.finalize(ExecutionStatus::Failed);
                self.checkpoint.save(&log).await?;
                if interrupted {
                    return Ok(self.stopped(log));
                }
                self.halt.cancel();
                let reason = error.unwrap_or_else(|| "step failed".to_string());
                return Ok(UnitReport::Finished {
                    log,
                    error: Some(format!(
                        "unit '{}' failed at step {index} ('{}'): {reason}",
                        self.unit.id, step.id
                    )),
                });
            }
        }

        if !self.unit.postconditions.is_empty() {
            let mut results = Vec::with_capacity(self.unit.postconditions.len());
            for postcondition in &self.unit.postconditions {
                let result = self.checker.check(postcondition, &ctx).await;
                tracing::debug!(
                    execution_id = %self.execution_id,
                    unit_id = self.unit.id.as_str(),
                    postcondition = postcondition.id.as_str(),
                    passed = result.passed,
                    "postcondition checked"
                );
                results.push(result);
            }
            log.postcondition_results = Some(results);
        }

        let error = if log.postconditions_passed() {
            log.finalize(ExecutionStatus::Completed);
            None
        } else {
            log.finalize(ExecutionStatus::Failed);
            let failed: Vec<&str> = log
                .postcondition_results
                .iter()
                .flatten()
                .filter(|r| !r.passed)
                .map(|r| r.postcondition_id.as_str())
                .collect();
            self.halt.cancel();
            Some(format!(
                "unit '{}' failed postconditions: {}",
                self.unit.id,
                failed.join(", ")
            ))
        };
        self.checkpoint.save(&log).await?;

        tracing::debug!(
            execution_id = %self.execution_id,
            unit_id = self.unit.id.as_str(),
            status = %log.status,
            "unit finished"
        );

        Ok(UnitReport::Finished { log, error })
    }

    /// Why the halt token fired.
    fn stop_message(&self) -> &'static str {
        if self.signal.token.is_cancelled() {
            self.signal.message()
        } else {
            "execution halted after another unit failed"
        }
    }

    /// Report for a unit stopped by the halt token. Cancellation and timeouts
    /// are failures of this unit; a sibling's failure is not.
    fn stopped(&self, log: ExecutionLog) -> UnitReport {
        if self.signal.token.is_cancelled() {
            UnitReport::Finished {
                error: Some(format!("unit '{}': {}", self.unit.id, self.signal.message())),
                log,
            }
        } else {
            tracing::debug!(
                execution_id = %self.execution_id,
                unit_id = self.unit.id.as_str(),
                steps = log.steps.len(),
                "unit halted"
            );
            UnitReport::Halted { log }
        }
    }

    /// Attempt one step until it succeeds, its retry budget runs out, or the
    /// run halts. Always yields exactly one result for the position; the flag
    /// is set when the halt token cut the step short.
    async fn run_step(
        &self,
        step: &StepDefinition,
        index: usize,
        ctx: &mut ExecutionContext,
    ) -> (StepResult, bool) {
        let policy = RetryHandler::resolve_policy(step, &self.unit, &self.default_retry);
        let timeout_secs = step.timeout_secs.unwrap_or(self.step_timeout_secs);
        let token = self.halt.clone();
        let started_at = Utc::now();
        let clock = Instant::now();

        ctx.begin_attempt(index, 0);
        if self.executor.is_already_applied(step, ctx).await {
            tracing::debug!(
                execution_id = %self.execution_id,
                unit_id = self.unit.id.as_str(),
                step_index = index,
                "step already applied, skipping"
            );
            return (step_result(started_at, clock, 0, StepOutcome::skipped()), false);
        }

        let mut attempts_made: u32 = 0;
        loop {
            ctx.begin_attempt(index, attempts_made);
            let attempt = tokio::select! {
                biased;
                _ = token.cancelled() => Err(StepError::Cancelled),
                r = tokio::time::timeout(
                    Duration::from_secs(timeout_secs),
                    self.executor.execute(step, ctx),
                ) => match r {
                    Ok(r) => r,
                    Err(_) => Err(StepError::Timeout { timeout_secs }),
                },
            };
            attempts_made += 1;

            let error = match attempt {
                Ok(outcome) if outcome.success => {
                    return (step_result(started_at, clock, attempts_made - 1, outcome), false);
                }
                Ok(outcome) => outcome
                    .error
                    .unwrap_or_else(|| "step reported failure".to_string()),
                Err(StepError::Cancelled) => {
                    let outcome = StepOutcome::failed(self.stop_message());
                    return (step_result(started_at, clock, attempts_made - 1, outcome), true);
                }
                Err(e) => e.to_string(),
            };
            let error = ctx.sanitizer().sanitize(&error);

            match RetryHandler::decide(policy, attempts_made) {
                RetryDecision::Retry { attempt, delay } => {
                    tracing::warn!(
                        execution_id = %self.execution_id,
                        unit_id = self.unit.id.as_str(),
                        step_index = index,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "step failed, retrying"
                    );
                    let cancelled = tokio::select! {
                        biased;
                        _ = token.cancelled() => true,
                        _ = tokio::time::sleep(delay) => false,
                    };
                    if cancelled {
                        let outcome = StepOutcome::failed(self.stop_message());
                        return (step_result(started_at, clock, attempts_made - 1, outcome), true);
                    }
                }
                RetryDecision::GiveUp => {
                    tracing::debug!(
                        execution_id = %self.execution_id,
                        unit_id = self.unit.id.as_str(),
                        step_index = index,
                        attempts = attempts_made,
                        error = %error,
                        "step failed, retry budget exhausted"
                    );
                    let outcome = StepOutcome::failed(error);
                    return (step_result(started_at, clock, attempts_made - 1, outcome), false);
                }
            }
        }
    }
}

fn step_result(
    started_at: DateTime<Utc>,
    clock: Instant,
    retries: u32,
    outcome: StepOutcome,
) -> StepResult {
    StepResult {
        step_index: 0,
        success: outcome.success,
        started_at,
        completed_at: Some(Utc::now()),
        duration_ms: clock.elapsed().as_millis() as u64,
        retry_attempts: retries,
        output: outcome.output,
        error: outcome.error,
        skipped: outcome.skipped,
    }
}

// ---------------------------------------------------------------------------
// ExecutorError
// ---------------------------------------------------------------------------

/// Errors that stop an engine call before or outside of unit execution.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("spec error: {0}")]
    Spec(#[from] SpecError),

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("sanitizer error: {0}")]
    Sanitizer(#[from] SanitizerError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigValidationError),

    #[error("execution {execution_id} cannot be resumed: {reason}")]
    NotResumable { execution_id: Uuid, reason: String },

    #[error("checkpoint does not match spec: {0}")]
    SpecMismatch(String),

    /// No active run with this id (for cancel).
    #[error("execution not running: {0}")]
    RunNotFound(Uuid),

    #[error("execution {0} is still running")]
    RunActive(Uuid),

    #[error("unit task failed: {0}")]
    TaskJoin(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
