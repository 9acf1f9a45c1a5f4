//! Shared domain types for the maestro workflow engine.
//!
//! This crate contains the data contract honored by every other maestro
//! crate: workflow definitions and their steps, the condition AST, execution
//! records, agent definitions, invocation request/error types, and run
//! progress events.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod agent;
pub mod condition;
pub mod error;
pub mod event;
pub mod invoke;
pub mod workflow;
