//! Workflow domain types for maestro.
//!
//! Defines the canonical representation of a workflow: an ordered chain of
//! agent steps with dependencies, conditions, retry policy, and failure
//! handling. This module also contains the execution tracking types
//! (`ExecutionRecord`, `StepResult`) produced by the orchestrator.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::condition::Condition;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// The canonical workflow definition.
///
/// Authored once (YAML file or API payload), then read-only for execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// UUIDv7 assigned on first save.
    pub id: Uuid,
    /// Human-readable workflow name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// How execution is initiated. Only `Manual` carries behavior today.
    #[serde(default)]
    pub trigger: TriggerKind,
    /// The agent steps forming the workflow DAG, in authoring order.
    pub steps: Vec<StepSpec>,
}

/// How a workflow run is initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    #[default]
    Manual,
    Scheduled,
    Event,
}

// ---------------------------------------------------------------------------
// Step Spec
// ---------------------------------------------------------------------------

/// A single agent invocation within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    /// User-defined step ID (e.g. "gather-news"). Unique within a workflow.
    pub id: String,
    /// Agent registry entry to invoke. Looked up at execution time.
    pub agent_id: Uuid,
    /// Default sequence position. Unique within a workflow; ties among
    /// simultaneously ready steps break on ascending order.
    pub order: u32,
    /// Step IDs that must reach a satisfied terminal state before this step
    /// is eligible.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Optional gate evaluated against prior step outputs. Absent means the
    /// step is always eligible once its dependencies are satisfied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    /// Key/value overrides merged over the agent's default configuration
    /// (step-level keys win).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, Value>,
    /// Policy applied once this step's attempts are exhausted with failure.
    #[serde(default)]
    pub on_error: ErrorPolicy,
    /// Bound on re-attempts after the first failure.
    #[serde(default)]
    pub max_retries: u32,
    /// Forwarded verbatim to the invocation call.
    #[serde(default)]
    pub use_internet_context: bool,
    /// Per-attempt timeout in seconds (default 300).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Policy applied when a step's attempts are exhausted with failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Halt dispatch; every not-yet-started step is skipped and the run ends
    /// `Stopped`.
    #[default]
    Stop,
    /// Record the failure, skip the step's transitive dependents, keep
    /// independent branches running.
    Continue,
    /// Substitute the policy-defined fallback payload and schedule dependents
    /// as if the step had succeeded. The substitution is recorded distinctly
    /// for audit.
    Fallback,
}

// ---------------------------------------------------------------------------
// Execution Status
// ---------------------------------------------------------------------------

/// Overall status of one workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    /// Terminal statuses never transition further.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Status of an individual step within a run.
///
/// Transitions are monotonic: `Pending -> Running -> {Skipped | Succeeded |
/// Failed}`, or `Pending -> Skipped` when the step is resolved without being
/// attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Skipped,
    Succeeded,
    Failed,
}

impl StepStatus {
    /// Terminal statuses never transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Skipped | StepStatus::Succeeded | StepStatus::Failed
        )
    }

    /// Whether a dependency in this status satisfies a dependent's readiness.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::Skipped)
    }
}

// ---------------------------------------------------------------------------
// Execution Record
// ---------------------------------------------------------------------------

/// Outcome of one step within an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Step ID matching `StepSpec.id`.
    pub step_id: String,
    /// Current step status.
    pub status: StepStatus,
    /// Invocation attempts made (0 if the step never ran).
    pub attempts: u32,
    /// Opaque result payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Last error verbatim, when attempts were exhausted with failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the recorded output is a fallback substitution rather than a
    /// genuine agent response.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback_applied: bool,
    /// When the first attempt was dispatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the step reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepResult {
    /// A fresh pending result for the given step.
    pub fn pending(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Pending,
            attempts: 0,
            output: None,
            error: None,
            fallback_applied: false,
            started_at: None,
            finished_at: None,
        }
    }
}

/// One execution instance of a workflow.
///
/// Created fresh per run, mutated only by the orchestrator's aggregator,
/// immutable once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// UUIDv7 execution ID.
    pub id: Uuid,
    /// ID of the workflow definition being executed.
    pub workflow_id: Uuid,
    /// Workflow name (denormalized for display).
    pub workflow_name: String,
    /// The project this run executes against.
    pub project_id: Uuid,
    /// Current run status.
    pub status: RunStatus,
    /// Per-step outcomes, ordered by `StepSpec.order`.
    pub steps: Vec<StepResult>,
    /// Error message when the run ended `Failed` (scheduling errors only;
    /// per-step failures live on the step results).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// Look up a step result by step ID.
    pub fn step(&self, step_id: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
