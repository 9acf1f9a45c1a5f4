//! Run progress events.
//!
//! The orchestrator publishes a `RunEvent` for every step transition so
//! presentation layers can render live progress without polling the record
//! store. Events are broadcast; consumers that lag simply miss events.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::RunStatus;

/// Why a step was resolved to `Skipped` without being attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The step's condition evaluated to false (or could not be evaluated).
    ConditionNotMet,
    /// A dependency failed and its policy does not satisfy dependents.
    DependencyFailed,
    /// A stop-policy failure halted dispatch before this step started.
    RunStopped,
    /// The run was cancelled before this step started.
    Cancelled,
}

/// A single progress transition within one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        execution_id: Uuid,
        workflow_id: Uuid,
        workflow_name: String,
        project_id: Uuid,
    },
    StepStarted {
        execution_id: Uuid,
        step_id: String,
        attempt: u32,
    },
    /// An attempt failed and another one will follow after the backoff delay.
    StepRetrying {
        execution_id: Uuid,
        step_id: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    StepSucceeded {
        execution_id: Uuid,
        step_id: String,
        attempts: u32,
        duration_ms: u64,
        /// True when the recorded output is a fallback substitution.
        fallback: bool,
    },
    StepFailed {
        execution_id: Uuid,
        step_id: String,
        attempts: u32,
        error: String,
    },
    StepSkipped {
        execution_id: Uuid,
        step_id: String,
        reason: SkipReason,
    },
    RunFinished {
        execution_id: Uuid,
        status: RunStatus,
    },
}

impl RunEvent {
    /// The execution this event belongs to.
    pub fn execution_id(&self) -> Uuid {
        match self {
            RunEvent::RunStarted { execution_id, .. }
            | RunEvent::StepStarted { execution_id, .. }
            | RunEvent::StepRetrying { execution_id, .. }
            | RunEvent::StepSucceeded { execution_id, .. }
            | RunEvent::StepFailed { execution_id, .. }
            | RunEvent::StepSkipped { execution_id, .. }
            | RunEvent::RunFinished { execution_id, .. } => *execution_id,
        }
    }
}
