//! Workflow orchestrator: the public entry point of the engine.
//!
//! `execute` validates the definition, resolves every agent reference,
//! then drives the scheduling loop: compute the ready set, gate each step
//! through the evaluator, run the survivors through the retry controller,
//! and apply outcomes through the aggregator until no step remains
//! runnable. Step tasks run on a `JoinSet`; under the sequential discipline
//! the "wave" is a single step.
//!
//! Cancellation is per run: `cancel` trips a `CancellationToken` held in a
//! `DashMap` keyed by execution id. In-flight steps get a grace period to
//! finish; everything not yet started is skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use maestro_types::agent::{AgentDefinition, ProjectRef};
use maestro_types::error::RepositoryError;
use maestro_types::event::{RunEvent, SkipReason};
use maestro_types::workflow::{ExecutionRecord, RunStatus, StepSpec, WorkflowDefinition};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::invoke::AgentInvoker;
use crate::registry::AgentRegistry;
use crate::repository::ExecutionRepository;

use super::aggregator::{FailureDisposition, ResultAggregator};
use super::context::RunContext;
use super::definition::{self, DefinitionError};
use super::evaluator;
use super::retry::{AttemptOutcome, BackoffPolicy, RetryController};
use super::scheduler::{self, Discipline};

/// Default whole-run ceiling (30 minutes).
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 1800;

/// Default per-attempt timeout (5 minutes).
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 300;

/// Default grace period for in-flight steps on cancellation.
pub const DEFAULT_CANCEL_GRACE_SECS: u64 = 5;

// ---------------------------------------------------------------------------
// Options / configuration
// ---------------------------------------------------------------------------

/// Per-call execution options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    pub discipline: Discipline,
}

/// Engine tuning knobs, shared by every run of one orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Ceiling on one whole run; expiry is a scheduling failure.
    pub run_timeout: Duration,
    /// Per-attempt timeout for steps that don't set their own.
    pub default_step_timeout: Duration,
    /// How long in-flight steps may keep running after cancellation.
    pub cancel_grace: Duration,
    /// Inter-attempt backoff curve.
    pub backoff: BackoffPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            run_timeout: Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS),
            default_step_timeout: Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS),
            cancel_grace: Duration::from_secs(DEFAULT_CANCEL_GRACE_SECS),
            backoff: BackoffPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors surfaced by the orchestrator's public API.
///
/// Ordinary step failures never appear here -- they are absorbed by the
/// per-step `on_error` policy and reflected in the `ExecutionRecord`.
/// Scheduling errors are reflected there too (status `Failed`); only
/// definition errors, storage faults, and unknown-run lookups are `Err`.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The workflow is invalid; no record was created.
    #[error("definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// No further progress was possible despite pending steps, or the run
    /// exceeded its ceiling.
    #[error("scheduling error: {0}")]
    Scheduling(String),

    /// The record store failed.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// `cancel` was called with an unknown or already-finished execution id.
    #[error("execution not found: {0}")]
    RunNotFound(Uuid),
}

// ---------------------------------------------------------------------------
// WorkflowOrchestrator
// ---------------------------------------------------------------------------

/// Composes scheduler, evaluator, retry controller, and aggregator into
/// `execute` / `cancel`.
pub struct WorkflowOrchestrator<G, I, R>
where
    G: AgentRegistry,
    I: AgentInvoker + 'static,
    R: ExecutionRepository,
{
    registry: G,
    invoker: Arc<I>,
    repository: R,
    bus: EventBus,
    config: OrchestratorConfig,
    retry: RetryController,
    cancellations: DashMap<Uuid, CancellationToken>,
}

impl<G, I, R> WorkflowOrchestrator<G, I, R>
where
    G: AgentRegistry,
    I: AgentInvoker + 'static,
    R: ExecutionRepository,
{
    pub fn new(
        registry: G,
        invoker: Arc<I>,
        repository: R,
        bus: EventBus,
        config: OrchestratorConfig,
    ) -> Self {
        let retry = RetryController::new(config.backoff.clone(), config.cancel_grace);
        Self {
            registry,
            invoker,
            repository,
            bus,
            config,
            retry,
            cancellations: DashMap::new(),
        }
    }

    /// The record store this orchestrator writes through.
    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Subscribe to live progress events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.bus.subscribe()
    }

    /// Execute one workflow instance to completion or terminal failure.
    ///
    /// Definition errors (invalid structure, cycle, unresolvable agent) are
    /// returned as `Err` and produce no record. Scheduling errors seal the
    /// record with status `Failed`. Everything else lands in the per-step
    /// results.
    pub async fn execute(
        &self,
        workflow: &WorkflowDefinition,
        project: &ProjectRef,
        options: ExecuteOptions,
    ) -> Result<ExecutionRecord, OrchestratorError> {
        definition::validate_definition(workflow)?;
        let agents = self.resolve_agents(workflow).await?;

        let execution_id = Uuid::now_v7();
        let token = CancellationToken::new();
        self.cancellations.insert(execution_id, token.clone());

        let mut ctx = RunContext::new(workflow.name.clone(), execution_id, project.clone());
        let mut agg = ResultAggregator::start(
            workflow,
            project,
            execution_id,
            &self.repository,
            self.bus.clone(),
        )
        .await?;

        tracing::info!(
            execution_id = %execution_id,
            workflow = workflow.name.as_str(),
            discipline = ?options.discipline,
            "starting workflow execution"
        );

        let driven = tokio::time::timeout(
            self.config.run_timeout,
            self.drive(workflow, &agents, options.discipline, &mut agg, &mut ctx, &token),
        )
        .await;

        self.cancellations.remove(&execution_id);

        let result = match driven {
            Ok(inner) => inner,
            Err(_) => Err(OrchestratorError::Scheduling(
                "workflow run timed out".to_string(),
            )),
        };

        match result {
            Ok(status) => {
                agg.finish(status, None).await?;
                Ok(agg.into_record())
            }
            Err(OrchestratorError::Scheduling(message)) => {
                tracing::error!(execution_id = %execution_id, error = message.as_str(), "run failed");
                agg.abort_running(&message).await?;
                agg.skip_remaining(SkipReason::RunStopped).await?;
                agg.finish(RunStatus::Failed, Some(&message)).await?;
                Ok(agg.into_record())
            }
            Err(e) => {
                let _ = agg.finish(RunStatus::Failed, Some(&e.to_string())).await;
                Err(e)
            }
        }
    }

    /// Request cancellation of a running execution.
    ///
    /// Dispatched steps get the configured grace period; nothing new is
    /// dispatched; the run ends `Stopped`.
    pub fn cancel(&self, execution_id: Uuid) -> Result<(), OrchestratorError> {
        match self.cancellations.get(&execution_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(execution_id = %execution_id, "cancellation requested");
                Ok(())
            }
            None => Err(OrchestratorError::RunNotFound(execution_id)),
        }
    }

    /// Resolve every step's agent reference up front. An unresolvable
    /// reference is a definition error; the run never starts.
    async fn resolve_agents(
        &self,
        workflow: &WorkflowDefinition,
    ) -> Result<HashMap<Uuid, AgentDefinition>, OrchestratorError> {
        let mut agents = HashMap::new();
        for step in &workflow.steps {
            if agents.contains_key(&step.agent_id) {
                continue;
            }
            let agent = self
                .registry
                .get_agent(&step.agent_id)
                .await?
                .ok_or_else(|| DefinitionError::UnknownAgent {
                    step_id: step.id.clone(),
                    agent_id: step.agent_id,
                })?;
            agents.insert(step.agent_id, agent);
        }
        Ok(agents)
    }

    /// The scheduling loop: one iteration per readiness wave.
    async fn drive(
        &self,
        workflow: &WorkflowDefinition,
        agents: &HashMap<Uuid, AgentDefinition>,
        discipline: Discipline,
        agg: &mut ResultAggregator<'_, R>,
        ctx: &mut RunContext,
        token: &CancellationToken,
    ) -> Result<RunStatus, OrchestratorError> {
        loop {
            if token.is_cancelled() {
                agg.skip_remaining(SkipReason::Cancelled).await?;
                return Ok(RunStatus::Stopped);
            }

            let ready = scheduler::ready_steps(&workflow.steps, agg.record());
            if ready.is_empty() {
                if scheduler::has_pending(agg.record()) {
                    let stuck = scheduler::pending_step_ids(agg.record()).join(", ");
                    return Err(OrchestratorError::Scheduling(format!(
                        "no step is ready but steps remain pending: {stuck}"
                    )));
                }
                break;
            }

            let batch: Vec<&StepSpec> = match discipline {
                Discipline::Sequential => vec![ready[0]],
                Discipline::Parallel => ready,
            };

            tracing::debug!(
                execution_id = %ctx.execution_id,
                wave = batch.len(),
                "dispatching ready steps"
            );

            let mut join_set: JoinSet<(String, AttemptOutcome, Duration)> = JoinSet::new();
            for step in batch {
                if !evaluator::should_run(step, ctx) {
                    agg.mark_skipped(&step.id, SkipReason::ConditionNotMet).await?;
                    continue;
                }

                let Some(agent) = agents.get(&step.agent_id) else {
                    return Err(OrchestratorError::Scheduling(format!(
                        "agent {} vanished during the run",
                        step.agent_id
                    )));
                };
                let resolved = evaluator::resolve_step(step, agent, ctx);
                agg.mark_running(&step.id).await?;

                let invoker = Arc::clone(&self.invoker);
                let retry = self.retry.clone();
                let request = resolved.request;
                let max_retries = step.max_retries;
                let attempt_timeout = step
                    .timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(self.config.default_step_timeout);
                let step_token = token.clone();
                let retry_bus = self.bus.clone();
                let execution_id = ctx.execution_id;
                let step_id = step.id.clone();

                join_set.spawn(async move {
                    let started = std::time::Instant::now();
                    let retry_step = step_id.clone();
                    let outcome = retry
                        .run(
                            invoker.as_ref(),
                            &request,
                            max_retries,
                            attempt_timeout,
                            &step_token,
                            |attempt, delay, error| {
                                retry_bus.publish(RunEvent::StepRetrying {
                                    execution_id,
                                    step_id: retry_step.clone(),
                                    attempt,
                                    delay_ms: delay.as_millis() as u64,
                                    error: error.to_string(),
                                });
                            },
                        )
                        .await;
                    (step_id, outcome, started.elapsed())
                });
            }

            // Fan back in: apply outcomes one at a time, in completion order.
            let mut stop_triggered = false;
            let mut cancelled = false;
            while let Some(joined) = join_set.join_next().await {
                let (step_id, outcome, elapsed) = joined.map_err(|e| {
                    OrchestratorError::Scheduling(format!("step task join error: {e}"))
                })?;
                let Some(spec) = workflow.steps.iter().find(|s| s.id == step_id) else {
                    continue;
                };

                match outcome {
                    AttemptOutcome::Succeeded { output, attempts } => {
                        agg.apply_success(&step_id, output.clone(), attempts, elapsed)
                            .await?;
                        ctx.record_output(&step_id, output);
                    }
                    AttemptOutcome::Failed { error, attempts } => {
                        match agg.apply_failure(spec, attempts, &error, elapsed).await? {
                            FailureDisposition::Continued => {}
                            FailureDisposition::Stopped => stop_triggered = true,
                            FailureDisposition::Fallback(payload) => {
                                ctx.record_output(&step_id, payload);
                            }
                        }
                    }
                    AttemptOutcome::Cancelled { attempts } => {
                        agg.mark_abandoned(&step_id, attempts).await?;
                        cancelled = true;
                    }
                }
            }

            if cancelled || token.is_cancelled() {
                agg.skip_remaining(SkipReason::Cancelled).await?;
                return Ok(RunStatus::Stopped);
            }
            if stop_triggered {
                // apply_failure already skipped everything not started.
                return Ok(RunStatus::Stopped);
            }
        }

        Ok(RunStatus::Completed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
