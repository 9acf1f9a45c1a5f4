//! Retry controller: bounded retry around one step invocation.
//!
//! A step with `max_retries = n` makes at most `n + 1` attempts. Every
//! attempt is bounded by a per-call timeout; a timeout, a transport failure,
//! and a schema-violating payload all count the same way. Between attempts
//! the controller sleeps an exponentially growing, capped delay.
//!
//! Cancellation is honored at every suspension point: an in-flight attempt
//! gets a grace period to finish, the backoff sleep is abandoned
//! immediately, and no further attempts are dispatched.

use std::time::Duration;

use maestro_types::invoke::{InvokeError, InvokeRequest};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::invoke::AgentInvoker;

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Exponential backoff: `initial * multiplier^(attempt - 1)`, capped at
/// `max`. Monotonically non-decreasing for multiplier >= 1.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            multiplier: 2.0,
            max: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    /// Delay to apply after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.initial.as_millis() as f64 * factor).round() as u128;
        Duration::from_millis(millis.min(self.max.as_millis()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Terminal result of a step's attempt loop.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// An attempt produced a well-formed payload.
    Succeeded { output: Value, attempts: u32 },
    /// Every attempt failed; `error` is the last failure verbatim.
    Failed { error: String, attempts: u32 },
    /// The run was cancelled before the loop could resolve.
    Cancelled { attempts: u32 },
}

// ---------------------------------------------------------------------------
// RetryController
// ---------------------------------------------------------------------------

/// Executes one step's underlying call with bounded retries.
#[derive(Debug, Clone)]
pub struct RetryController {
    backoff: BackoffPolicy,
    cancel_grace: Duration,
}

impl RetryController {
    pub fn new(backoff: BackoffPolicy, cancel_grace: Duration) -> Self {
        Self {
            backoff,
            cancel_grace,
        }
    }

    /// Run the attempt loop for one step.
    ///
    /// `on_retry(attempt, delay, error)` fires before each backoff sleep so
    /// the caller can surface retry progress.
    pub async fn run<I, F>(
        &self,
        invoker: &I,
        request: &InvokeRequest,
        max_retries: u32,
        attempt_timeout: Duration,
        cancel: &CancellationToken,
        on_retry: F,
    ) -> AttemptOutcome
    where
        I: AgentInvoker,
        F: Fn(u32, Duration, &str),
    {
        let total_attempts = max_retries.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=total_attempts {
            if cancel.is_cancelled() {
                return AttemptOutcome::Cancelled {
                    attempts: attempt - 1,
                };
            }

            let attempt_fut = tokio::time::timeout(attempt_timeout, invoker.invoke(request));
            tokio::pin!(attempt_fut);

            let mut cancelled = false;
            let result = tokio::select! {
                r = &mut attempt_fut => r,
                _ = cancel.cancelled() => {
                    // The attempt is already in flight: let it finish within
                    // the grace period, then abandon it.
                    cancelled = true;
                    match tokio::time::timeout(self.cancel_grace, &mut attempt_fut).await {
                        Ok(r) => r,
                        Err(_) => return AttemptOutcome::Cancelled { attempts: attempt },
                    }
                }
            };

            match flatten_attempt(result, request) {
                Ok(output) => {
                    return AttemptOutcome::Succeeded {
                        output,
                        attempts: attempt,
                    };
                }
                Err(e) => last_error = e.to_string(),
            }

            if cancelled {
                return AttemptOutcome::Cancelled { attempts: attempt };
            }

            if attempt < total_attempts {
                let delay = self.backoff.delay_for(attempt);
                on_retry(attempt, delay, &last_error);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return AttemptOutcome::Cancelled { attempts: attempt };
                    }
                }
            }
        }

        AttemptOutcome::Failed {
            error: last_error,
            attempts: total_attempts,
        }
    }
}

/// Collapse timeout, invocation, and schema layers into one attempt result.
fn flatten_attempt(
    result: Result<Result<Value, InvokeError>, tokio::time::error::Elapsed>,
    request: &InvokeRequest,
) -> Result<Value, InvokeError> {
    match result {
        Ok(Ok(payload)) => {
            validate_payload(&payload, request.response_schema.as_ref())?;
            Ok(payload)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(InvokeError::Timeout),
    }
}

/// Validate a response payload against the agent's declared JSON Schema.
///
/// A violating payload is a failure for retry purposes, never success with
/// garbage output.
fn validate_payload(payload: &Value, schema: Option<&Value>) -> Result<(), InvokeError> {
    let Some(schema) = schema else {
        return Ok(());
    };
    let compiled = jsonschema::JSONSchema::compile(schema)
        .map_err(|e| InvokeError::MalformedResponse(format!("invalid response schema: {e}")))?;
    if let Err(errors) = compiled.validate(payload) {
        let detail: Vec<String> = errors.map(|e| e.to_string()).collect();
        return Err(InvokeError::MalformedResponse(detail.join("; ")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
