//! Shared fixtures for engine tests: step/workflow builders and canned
//! invoker implementations.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use maestro_types::agent::{AgentDefinition, ProjectRef};
use maestro_types::invoke::{InvokeError, InvokeRequest};
use maestro_types::workflow::{StepSpec, TriggerKind, WorkflowDefinition};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::engine::context::RunContext;
use crate::engine::retry::BackoffPolicy;
use crate::invoke::AgentInvoker;

/// The agent every `agent_step` references; register `test_agent()` to
/// resolve it.
pub const TEST_AGENT_ID: Uuid = Uuid::from_u128(0xA6E17);

pub fn test_agent() -> AgentDefinition {
    AgentDefinition {
        id: TEST_AGENT_ID,
        name: "test-agent".to_string(),
        system_prompt: "You are a careful assistant.".to_string(),
        default_config: HashMap::new(),
        response_schema: None,
    }
}

pub fn sample_agent(name: &str) -> AgentDefinition {
    AgentDefinition {
        id: Uuid::now_v7(),
        name: name.to_string(),
        system_prompt: "You are a careful assistant.".to_string(),
        default_config: HashMap::new(),
        response_schema: None,
    }
}

/// A step whose prompt carries a `step:<id>` marker, so scripted invokers
/// can key responses by step.
pub fn agent_step(id: &str, order: u32, depends_on: &[&str]) -> StepSpec {
    StepSpec {
        id: id.to_string(),
        agent_id: TEST_AGENT_ID,
        order,
        depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        condition: None,
        config: HashMap::from([("prompt".to_string(), json!(format!("step:{id}")))]),
        on_error: Default::default(),
        max_retries: 0,
        use_internet_context: false,
        timeout_secs: None,
    }
}

pub fn minimal_workflow(name: &str, steps: Vec<StepSpec>) -> WorkflowDefinition {
    WorkflowDefinition {
        id: Uuid::now_v7(),
        name: name.to_string(),
        description: None,
        trigger: TriggerKind::Manual,
        steps,
    }
}

pub fn run_context() -> RunContext {
    RunContext::new(
        "test-workflow".to_string(),
        Uuid::now_v7(),
        ProjectRef {
            id: Uuid::now_v7(),
            name: "demo-project".to_string(),
        },
    )
}

/// A backoff policy fast enough for tests.
pub fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        initial: Duration::from_millis(1),
        multiplier: 2.0,
        max: Duration::from_millis(5),
    }
}

// ---------------------------------------------------------------------------
// Canned invokers
// ---------------------------------------------------------------------------

/// Fails a fixed number of attempts, then succeeds with a canned payload.
pub struct FlakyInvoker {
    failures_remaining: AtomicU32,
    error: String,
    output: Value,
    calls: AtomicU32,
}

impl FlakyInvoker {
    pub fn failing_times(failures: u32, output: Value) -> Self {
        Self {
            failures_remaining: AtomicU32::new(failures),
            error: "transient failure".to_string(),
            output,
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing_forever(error: &str) -> Self {
        Self {
            failures_remaining: AtomicU32::new(u32::MAX),
            error: error.to_string(),
            output: Value::Null,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AgentInvoker for FlakyInvoker {
    async fn invoke(&self, _request: &InvokeRequest) -> Result<Value, InvokeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(InvokeError::Transport(self.error.clone()));
        }
        Ok(self.output.clone())
    }
}

/// Sleeps before answering; for timeout and cancellation tests.
pub struct SleepyInvoker {
    delay: Duration,
    output: Value,
}

impl SleepyInvoker {
    pub fn new(delay: Duration, output: Value) -> Self {
        Self { delay, output }
    }
}

impl AgentInvoker for SleepyInvoker {
    async fn invoke(&self, _request: &InvokeRequest) -> Result<Value, InvokeError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.output.clone())
    }
}

/// Scripted per-step responses, keyed by a marker substring of the prompt.
///
/// Steps built with `agent_step` put `step:<id>` into their prompt, so
/// `script("step:b", ...)` targets step `b`. Unscripted calls succeed with
/// the default payload.
pub struct ScriptedInvoker {
    scripts: Mutex<HashMap<String, VecDeque<Result<Value, InvokeError>>>>,
    calls: Mutex<HashMap<String, u32>>,
    default_output: Value,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            default_output: json!({"ok": true}),
        }
    }

    /// Queue responses for prompts containing `key`.
    pub fn script(
        self,
        key: &str,
        responses: impl IntoIterator<Item = Result<Value, InvokeError>>,
    ) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(key.to_string(), responses.into_iter().collect());
        self
    }

    /// How many invocations matched `key`.
    pub fn calls(&self, key: &str) -> u32 {
        self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

impl AgentInvoker for ScriptedInvoker {
    async fn invoke(&self, request: &InvokeRequest) -> Result<Value, InvokeError> {
        let mut scripts = self.scripts.lock().unwrap();
        let key = scripts
            .keys()
            .find(|k| request.prompt.contains(k.as_str()))
            .cloned();

        if let Some(key) = &key {
            *self.calls.lock().unwrap().entry(key.clone()).or_insert(0) += 1;
            if let Some(queue) = scripts.get_mut(key) {
                if let Some(response) = queue.pop_front() {
                    return response;
                }
            }
        }

        Ok(self.default_output.clone())
    }
}
