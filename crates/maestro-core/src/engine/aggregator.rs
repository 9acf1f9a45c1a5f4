//! Result aggregator: the sole writer of the `ExecutionRecord`.
//!
//! Every step transition funnels through one `&mut self` method here -- the
//! orchestrator's control loop applies parallel-wave completions one at a
//! time, so the record stays internally consistent regardless of wall-clock
//! finish order. Each transition is written through to the repository and
//! published on the event bus before the loop moves on.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use maestro_types::agent::ProjectRef;
use maestro_types::error::RepositoryError;
use maestro_types::event::{RunEvent, SkipReason};
use maestro_types::workflow::{
    ErrorPolicy, ExecutionRecord, RunStatus, StepResult, StepSpec, StepStatus, WorkflowDefinition,
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::ExecutionRepository;

use super::dag;

/// What the orchestrator should do after a step's attempts were exhausted.
#[derive(Debug)]
pub enum FailureDisposition {
    /// Keep scheduling; the failure was absorbed (dependents skipped).
    Continued,
    /// Halt dispatch; the run is stopping.
    Stopped,
    /// The failure was substituted with this fallback payload; dependents
    /// schedule normally and should see it as the step's output.
    Fallback(Value),
}

/// Collects per-step outcomes into one `ExecutionRecord` and derives the
/// terminal run status.
pub struct ResultAggregator<'a, R: ExecutionRepository> {
    record: ExecutionRecord,
    steps: &'a [StepSpec],
    repo: &'a R,
    bus: EventBus,
}

impl<'a, R: ExecutionRepository> ResultAggregator<'a, R> {
    /// Create the run record (all steps pending, ordered by `order`),
    /// persist it, and announce the run.
    pub async fn start(
        workflow: &'a WorkflowDefinition,
        project: &ProjectRef,
        execution_id: Uuid,
        repo: &'a R,
        bus: EventBus,
    ) -> Result<ResultAggregator<'a, R>, RepositoryError> {
        let mut ordered: Vec<&StepSpec> = workflow.steps.iter().collect();
        ordered.sort_by_key(|s| s.order);

        let record = ExecutionRecord {
            id: execution_id,
            workflow_id: workflow.id,
            workflow_name: workflow.name.clone(),
            project_id: project.id,
            status: RunStatus::Running,
            steps: ordered.iter().map(|s| StepResult::pending(&s.id)).collect(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        repo.create_record(&record).await?;

        bus.publish(RunEvent::RunStarted {
            execution_id,
            workflow_id: workflow.id,
            workflow_name: workflow.name.clone(),
            project_id: project.id,
        });

        Ok(Self {
            record,
            steps: &workflow.steps,
            repo,
            bus,
        })
    }

    /// Read-only view for the scheduler.
    pub fn record(&self) -> &ExecutionRecord {
        &self.record
    }

    pub fn into_record(self) -> ExecutionRecord {
        self.record
    }

    fn step_mut(&mut self, step_id: &str) -> Option<&mut StepResult> {
        self.record.steps.iter_mut().find(|s| s.step_id == step_id)
    }

    async fn persist_step(&self, step_id: &str) -> Result<(), RepositoryError> {
        if let Some(step) = self.record.step(step_id) {
            self.repo
                .upsert_step_result(&self.record.id, step)
                .await?;
        }
        Ok(())
    }

    /// Pending -> Running.
    pub async fn mark_running(&mut self, step_id: &str) -> Result<(), RepositoryError> {
        let execution_id = self.record.id;
        let Some(step) = self.step_mut(step_id) else {
            return Ok(());
        };
        step.status = StepStatus::Running;
        step.started_at = Some(Utc::now());
        self.persist_step(step_id).await?;

        self.bus.publish(RunEvent::StepStarted {
            execution_id,
            step_id: step_id.to_string(),
            attempt: 1,
        });
        Ok(())
    }

    /// Running -> Succeeded with a genuine agent response.
    pub async fn apply_success(
        &mut self,
        step_id: &str,
        output: Value,
        attempts: u32,
        duration: Duration,
    ) -> Result<(), RepositoryError> {
        let execution_id = self.record.id;
        let Some(step) = self.step_mut(step_id) else {
            return Ok(());
        };
        step.status = StepStatus::Succeeded;
        step.attempts = attempts;
        step.output = Some(output);
        step.finished_at = Some(Utc::now());
        self.persist_step(step_id).await?;

        tracing::debug!(execution_id = %execution_id, step_id, attempts, "step succeeded");
        self.bus.publish(RunEvent::StepSucceeded {
            execution_id,
            step_id: step_id.to_string(),
            attempts,
            duration_ms: duration.as_millis() as u64,
            fallback: false,
        });
        Ok(())
    }

    /// Resolve an exhausted step according to its `on_error` policy.
    pub async fn apply_failure(
        &mut self,
        spec: &StepSpec,
        attempts: u32,
        error: &str,
        duration: Duration,
    ) -> Result<FailureDisposition, RepositoryError> {
        let execution_id = self.record.id;

        if spec.on_error == ErrorPolicy::Fallback {
            let payload = fallback_payload(spec);
            let Some(step) = self.step_mut(&spec.id) else {
                return Ok(FailureDisposition::Continued);
            };
            step.status = StepStatus::Succeeded;
            step.attempts = attempts;
            step.output = Some(payload.clone());
            step.error = Some(error.to_string());
            step.fallback_applied = true;
            step.finished_at = Some(Utc::now());
            self.persist_step(&spec.id).await?;

            tracing::warn!(
                execution_id = %execution_id,
                step_id = spec.id.as_str(),
                attempts,
                error,
                "step failed, substituting fallback output"
            );
            self.bus.publish(RunEvent::StepSucceeded {
                execution_id,
                step_id: spec.id.clone(),
                attempts,
                duration_ms: duration.as_millis() as u64,
                fallback: true,
            });
            return Ok(FailureDisposition::Fallback(payload));
        }

        let Some(step) = self.step_mut(&spec.id) else {
            return Ok(FailureDisposition::Continued);
        };
        step.status = StepStatus::Failed;
        step.attempts = attempts;
        step.error = Some(error.to_string());
        step.finished_at = Some(Utc::now());
        self.persist_step(&spec.id).await?;

        tracing::warn!(
            execution_id = %execution_id,
            step_id = spec.id.as_str(),
            attempts,
            error,
            policy = ?spec.on_error,
            "step failed after exhausting attempts"
        );
        self.bus.publish(RunEvent::StepFailed {
            execution_id,
            step_id: spec.id.clone(),
            attempts,
            error: error.to_string(),
        });

        match spec.on_error {
            ErrorPolicy::Continue => {
                self.skip_dependents(&spec.id).await?;
                Ok(FailureDisposition::Continued)
            }
            ErrorPolicy::Stop => {
                self.record.status = RunStatus::Stopped;
                self.skip_remaining(SkipReason::RunStopped).await?;
                Ok(FailureDisposition::Stopped)
            }
            ErrorPolicy::Fallback => unreachable!("handled above"),
        }
    }

    /// Pending -> Skipped. A no-op for steps already terminal or running.
    pub async fn mark_skipped(
        &mut self,
        step_id: &str,
        reason: SkipReason,
    ) -> Result<(), RepositoryError> {
        let execution_id = self.record.id;
        let Some(step) = self.step_mut(step_id) else {
            return Ok(());
        };
        if step.status != StepStatus::Pending {
            return Ok(());
        }
        step.status = StepStatus::Skipped;
        step.finished_at = Some(Utc::now());
        self.persist_step(step_id).await?;

        tracing::debug!(execution_id = %execution_id, step_id, ?reason, "step skipped");
        self.bus.publish(RunEvent::StepSkipped {
            execution_id,
            step_id: step_id.to_string(),
            reason,
        });
        Ok(())
    }

    /// Running -> Failed for a step abandoned on cancellation.
    pub async fn mark_abandoned(
        &mut self,
        step_id: &str,
        attempts: u32,
    ) -> Result<(), RepositoryError> {
        let execution_id = self.record.id;
        let error = "run cancelled before step completed";
        let Some(step) = self.step_mut(step_id) else {
            return Ok(());
        };
        step.status = StepStatus::Failed;
        step.attempts = attempts;
        step.error = Some(error.to_string());
        step.finished_at = Some(Utc::now());
        self.persist_step(step_id).await?;

        self.bus.publish(RunEvent::StepFailed {
            execution_id,
            step_id: step_id.to_string(),
            attempts,
            error: error.to_string(),
        });
        Ok(())
    }

    /// Running -> Failed for steps left in flight by a fatal scheduling
    /// failure (e.g. the whole-run timeout).
    pub async fn abort_running(&mut self, error: &str) -> Result<(), RepositoryError> {
        let running: Vec<String> = self
            .record
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Running)
            .map(|s| s.step_id.clone())
            .collect();
        let execution_id = self.record.id;
        for step_id in running {
            if let Some(step) = self.step_mut(&step_id) {
                step.status = StepStatus::Failed;
                step.error = Some(error.to_string());
                step.finished_at = Some(Utc::now());
            }
            self.persist_step(&step_id).await?;
            self.bus.publish(RunEvent::StepFailed {
                execution_id,
                step_id,
                attempts: 0,
                error: error.to_string(),
            });
        }
        Ok(())
    }

    /// Skip every step still pending.
    pub async fn skip_remaining(&mut self, reason: SkipReason) -> Result<(), RepositoryError> {
        let pending: Vec<String> = self
            .record
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Pending)
            .map(|s| s.step_id.clone())
            .collect();
        for step_id in pending {
            self.mark_skipped(&step_id, reason).await?;
        }
        Ok(())
    }

    /// Skip the direct and transitive dependents of a failed step.
    async fn skip_dependents(&mut self, step_id: &str) -> Result<(), RepositoryError> {
        let closure: HashSet<String> = dag::transitive_dependents(step_id, self.steps);
        for dependent in closure {
            self.mark_skipped(&dependent, SkipReason::DependencyFailed)
                .await?;
        }
        Ok(())
    }

    /// Seal the record with its terminal status.
    pub async fn finish(
        &mut self,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        self.record.status = status;
        self.record.error = error.map(String::from);
        self.record.finished_at = Some(Utc::now());
        self.repo
            .update_run_status(&self.record.id, status, error, self.record.finished_at)
            .await?;

        tracing::info!(
            execution_id = %self.record.id,
            workflow = self.record.workflow_name.as_str(),
            status = ?status,
            "workflow run finished"
        );
        self.bus.publish(RunEvent::RunFinished {
            execution_id: self.record.id,
            status,
        });
        Ok(())
    }
}

/// The policy-defined substitute output for a `Fallback` step: a marker
/// object carrying the step's optional `fallback_output` config entry.
fn fallback_payload(spec: &StepSpec) -> Value {
    json!({
        "fallback": true,
        "output": spec.config.get("fallback_output").cloned().unwrap_or(Value::Null),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryExecutionRepository;
    use crate::testing::{agent_step, minimal_workflow};
    use serde_json::json;

    async fn start<'a>(
        workflow: &'a WorkflowDefinition,
        repo: &'a MemoryExecutionRepository,
    ) -> ResultAggregator<'a, MemoryExecutionRepository> {
        let project = ProjectRef {
            id: Uuid::now_v7(),
            name: "demo".to_string(),
        };
        ResultAggregator::start(workflow, &project, Uuid::now_v7(), repo, EventBus::new(64))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn start_creates_pending_record_ordered_by_step_order() {
        let workflow = minimal_workflow(
            "wf",
            vec![agent_step("second", 5, &[]), agent_step("first", 1, &[])],
        );
        let repo = MemoryExecutionRepository::new();
        let agg = start(&workflow, &repo).await;

        let ids: Vec<&str> = agg.record().steps.iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
        assert!(agg.record().steps.iter().all(|s| s.status == StepStatus::Pending));
        assert_eq!(repo.record_count().await, 1);
    }

    #[tokio::test]
    async fn success_transition_is_persisted() {
        let workflow = minimal_workflow("wf", vec![agent_step("a", 0, &[])]);
        let repo = MemoryExecutionRepository::new();
        let mut agg = start(&workflow, &repo).await;

        agg.mark_running("a").await.unwrap();
        assert_eq!(agg.record().step("a").unwrap().status, StepStatus::Running);

        agg.apply_success("a", json!({"n": 1}), 2, Duration::from_millis(10))
            .await
            .unwrap();

        let step = agg.record().step("a").unwrap();
        assert_eq!(step.status, StepStatus::Succeeded);
        assert_eq!(step.attempts, 2);
        assert!(step.finished_at.is_some());

        let stored = repo.get_record(&agg.record().id).await.unwrap().unwrap();
        assert_eq!(stored.step("a").unwrap().status, StepStatus::Succeeded);
    }

    #[tokio::test]
    async fn continue_failure_skips_transitive_dependents_only() {
        // b fails; c and d hang off b, e is independent.
        let mut b = agent_step("b", 1, &[]);
        b.on_error = ErrorPolicy::Continue;
        let workflow = minimal_workflow(
            "wf",
            vec![
                b.clone(),
                agent_step("c", 2, &["b"]),
                agent_step("d", 3, &["c"]),
                agent_step("e", 4, &[]),
            ],
        );
        let repo = MemoryExecutionRepository::new();
        let mut agg = start(&workflow, &repo).await;

        agg.mark_running("b").await.unwrap();
        let disposition = agg
            .apply_failure(&b, 1, "boom", Duration::ZERO)
            .await
            .unwrap();
        assert!(matches!(disposition, FailureDisposition::Continued));

        assert_eq!(agg.record().step("b").unwrap().status, StepStatus::Failed);
        assert_eq!(agg.record().step("c").unwrap().status, StepStatus::Skipped);
        assert_eq!(agg.record().step("d").unwrap().status, StepStatus::Skipped);
        assert_eq!(agg.record().step("e").unwrap().status, StepStatus::Pending);
        assert_eq!(agg.record().status, RunStatus::Running, "run keeps going");
    }

    #[tokio::test]
    async fn stop_failure_skips_everything_not_started() {
        let mut b = agent_step("b", 0, &[]);
        b.on_error = ErrorPolicy::Stop;
        let workflow = minimal_workflow(
            "wf",
            vec![b.clone(), agent_step("x", 1, &[]), agent_step("y", 2, &["x"])],
        );
        let repo = MemoryExecutionRepository::new();
        let mut agg = start(&workflow, &repo).await;

        agg.mark_running("b").await.unwrap();
        let disposition = agg
            .apply_failure(&b, 2, "fatal", Duration::ZERO)
            .await
            .unwrap();
        assert!(matches!(disposition, FailureDisposition::Stopped));

        assert_eq!(agg.record().step("b").unwrap().status, StepStatus::Failed);
        assert_eq!(agg.record().step("b").unwrap().error.as_deref(), Some("fatal"));
        assert_eq!(agg.record().step("x").unwrap().status, StepStatus::Skipped);
        assert_eq!(agg.record().step("y").unwrap().status, StepStatus::Skipped);
        assert_eq!(agg.record().status, RunStatus::Stopped);
    }

    #[tokio::test]
    async fn fallback_failure_records_audited_substitute() {
        let mut b = agent_step("b", 0, &[]);
        b.on_error = ErrorPolicy::Fallback;
        b.config
            .insert("fallback_output".to_string(), json!({"summary": "n/a"}));
        let workflow = minimal_workflow("wf", vec![b.clone()]);
        let repo = MemoryExecutionRepository::new();
        let mut agg = start(&workflow, &repo).await;

        agg.mark_running("b").await.unwrap();
        let disposition = agg
            .apply_failure(&b, 3, "exhausted", Duration::ZERO)
            .await
            .unwrap();

        let FailureDisposition::Fallback(payload) = disposition else {
            panic!("expected fallback disposition");
        };
        assert_eq!(payload["fallback"], json!(true));
        assert_eq!(payload["output"], json!({"summary": "n/a"}));

        let step = agg.record().step("b").unwrap();
        assert_eq!(step.status, StepStatus::Succeeded, "counts as satisfied");
        assert!(step.fallback_applied, "audit marker set");
        assert_eq!(step.error.as_deref(), Some("exhausted"), "original error kept");
        assert_eq!(step.attempts, 3);
    }

    #[tokio::test]
    async fn skip_is_monotonic_and_terminal_states_never_regress() {
        let workflow = minimal_workflow("wf", vec![agent_step("a", 0, &[])]);
        let repo = MemoryExecutionRepository::new();
        let mut agg = start(&workflow, &repo).await;

        agg.mark_running("a").await.unwrap();
        agg.apply_success("a", json!(1), 1, Duration::ZERO).await.unwrap();

        // Skipping a terminal step is a no-op.
        agg.mark_skipped("a", SkipReason::RunStopped).await.unwrap();
        assert_eq!(agg.record().step("a").unwrap().status, StepStatus::Succeeded);

        // Skipping a running step is a no-op too: it already left Pending.
        let workflow2 = minimal_workflow("wf2", vec![agent_step("r", 0, &[])]);
        let mut agg2 = start(&workflow2, &repo).await;
        agg2.mark_running("r").await.unwrap();
        agg2.mark_skipped("r", SkipReason::Cancelled).await.unwrap();
        assert_eq!(agg2.record().step("r").unwrap().status, StepStatus::Running);
    }

    #[tokio::test]
    async fn finish_seals_record_and_persists_status() {
        let workflow = minimal_workflow("wf", vec![agent_step("a", 0, &[])]);
        let repo = MemoryExecutionRepository::new();
        let mut agg = start(&workflow, &repo).await;
        let execution_id = agg.record().id;

        agg.finish(RunStatus::Completed, None).await.unwrap();
        assert_eq!(agg.record().status, RunStatus::Completed);
        assert!(agg.record().finished_at.is_some());

        let stored = repo.get_record(&execution_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn abort_running_fails_in_flight_steps() {
        let workflow = minimal_workflow(
            "wf",
            vec![agent_step("a", 0, &[]), agent_step("b", 1, &[])],
        );
        let repo = MemoryExecutionRepository::new();
        let mut agg = start(&workflow, &repo).await;

        agg.mark_running("a").await.unwrap();
        agg.abort_running("workflow run timed out").await.unwrap();

        assert_eq!(agg.record().step("a").unwrap().status, StepStatus::Failed);
        assert!(agg.record().step("a").unwrap().error.as_deref().unwrap().contains("timed out"));
        assert_eq!(agg.record().step("b").unwrap().status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn events_are_published_in_apply_order() {
        let workflow = minimal_workflow("wf", vec![agent_step("a", 0, &[])]);
        let repo = MemoryExecutionRepository::new();
        let project = ProjectRef {
            id: Uuid::now_v7(),
            name: "demo".to_string(),
        };
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();

        let mut agg =
            ResultAggregator::start(&workflow, &project, Uuid::now_v7(), &repo, bus.clone())
                .await
                .unwrap();
        agg.mark_running("a").await.unwrap();
        agg.apply_success("a", json!(1), 1, Duration::ZERO).await.unwrap();
        agg.finish(RunStatus::Completed, None).await.unwrap();

        assert!(matches!(rx.try_recv().unwrap(), RunEvent::RunStarted { .. }));
        assert!(matches!(rx.try_recv().unwrap(), RunEvent::StepStarted { .. }));
        assert!(matches!(rx.try_recv().unwrap(), RunEvent::StepSucceeded { fallback: false, .. }));
        assert!(matches!(
            rx.try_recv().unwrap(),
            RunEvent::RunFinished {
                status: RunStatus::Completed,
                ..
            }
        ));
    }
}
