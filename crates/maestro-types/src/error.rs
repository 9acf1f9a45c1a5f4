//! Shared error types for storage boundaries.

use thiserror::Error;

/// Errors from repository operations (the trait definitions live in
/// `maestro-core`; implementations in `maestro-infra`).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("storage connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    /// A stored JSON blob failed to round-trip through serde.
    #[error("serialization error: {0}")]
    Serialization(String),
}
