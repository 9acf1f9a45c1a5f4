//! Agent definition and project reference types.
//!
//! Agent definitions are installed by a user ahead of time and are read-only
//! for the duration of a run; the engine only ever looks them up by ID.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// An installed agent: the template a workflow step instantiates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// UUIDv7 assigned on install.
    pub id: Uuid,
    /// Human-readable agent name.
    pub name: String,
    /// The system prompt every invocation of this agent starts from.
    pub system_prompt: String,
    /// Default configuration; step-level `config` keys override these.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub default_config: HashMap<String, Value>,
    /// JSON Schema the invocation response must conform to. A response that
    /// violates the schema counts as a failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,
}

/// The project a workflow run executes against. Opaque to the engine beyond
/// identity and display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub id: Uuid,
    pub name: String,
}
