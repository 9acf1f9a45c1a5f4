//! Execution scheduler: readiness computation and execution disciplines.
//!
//! A step is ready when it is still pending and every dependency reached a
//! satisfied terminal state (`Succeeded` or `Skipped`). Failed dependencies
//! never satisfy dependents; the aggregator resolves those dependents to
//! `Skipped` at failure time, so a run can only stall if the definition
//! checks were bypassed -- which the deadlock check reports as fatal.

use maestro_types::workflow::{ExecutionRecord, StepSpec, StepStatus};
use serde::{Deserialize, Serialize};

/// How ready steps are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Discipline {
    /// One ready step at a time, ascending order. The "chain" mental model.
    #[default]
    Sequential,
    /// All currently-ready steps run concurrently; readiness is re-evaluated
    /// only after the whole wave finishes. Terminal record semantics are
    /// identical to sequential for the same step outcomes.
    Parallel,
}

/// Steps eligible to run right now, ascending by `order`.
pub fn ready_steps<'a>(steps: &'a [StepSpec], record: &ExecutionRecord) -> Vec<&'a StepSpec> {
    let status_of = |id: &str| record.step(id).map(|s| s.status);
    let mut ready: Vec<&StepSpec> = steps
        .iter()
        .filter(|step| {
            matches!(status_of(&step.id), Some(StepStatus::Pending))
                && step
                    .depends_on
                    .iter()
                    .all(|dep| status_of(dep).is_some_and(|s| s.satisfies_dependents()))
        })
        .collect();
    ready.sort_by_key(|s| s.order);
    ready
}

/// Whether any step is still pending.
pub fn has_pending(record: &ExecutionRecord) -> bool {
    record
        .steps
        .iter()
        .any(|s| s.status == StepStatus::Pending)
}

/// Ids of steps still pending, for stall diagnostics.
pub fn pending_step_ids(record: &ExecutionRecord) -> Vec<&str> {
    record
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Pending)
        .map(|s| s.step_id.as_str())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
