//! Invocation call contract.
//!
//! The language-model invocation service is an external collaborator: the
//! engine hands it a resolved prompt plus an optional response schema and
//! gets back an opaque JSON payload or an error. These types are the whole
//! of that boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One invocation of the external agent call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeRequest {
    /// Fully resolved prompt (agent system prompt + step instructions with
    /// template references already substituted).
    pub prompt: String,
    /// JSON Schema the response payload must conform to, when the agent
    /// declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,
    /// Whether the service may consult live internet context.
    #[serde(default)]
    pub use_internet_context: bool,
}

/// Failure modes of a single invocation attempt.
///
/// Every variant counts as an ordinary attempt failure for retry purposes;
/// none is fatal to the run by itself.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// Could not reach the service at all.
    #[error("transport error: {0}")]
    Transport(String),

    /// The attempt exceeded its per-call timeout.
    #[error("invocation timed out")]
    Timeout,

    /// The service answered with an error status.
    #[error("service error ({status}): {message}")]
    Service { status: u16, message: String },

    /// The response arrived but is not a well-formed payload (undecodable, or
    /// violating the declared response schema).
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}
