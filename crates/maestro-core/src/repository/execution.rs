//! Execution repository trait definition.
//!
//! The store treats records as eventually-consistent entities keyed by
//! opaque ids: create, targeted update, get, filter. Uses native async fn in
//! traits (RPITIT) -- no `async_trait` macro.

use chrono::{DateTime, Utc};
use maestro_types::error::RepositoryError;
use maestro_types::workflow::{ExecutionRecord, RunStatus, StepResult};
use uuid::Uuid;

/// Persistence port for workflow execution records and their step results.
pub trait ExecutionRepository: Send + Sync {
    /// Persist a freshly created record (all steps pending).
    fn create_record(
        &self,
        record: &ExecutionRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Update a run's status and error. Implementations stamp `finished_at`
    /// when the status is terminal.
    fn update_run_status(
        &self,
        execution_id: &Uuid,
        status: RunStatus,
        error: Option<&str>,
        finished_at: Option<DateTime<Utc>>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Insert or replace one step result within a record.
    fn upsert_step_result(
        &self,
        execution_id: &Uuid,
        step: &StepResult,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a record (with its step results) by execution id.
    fn get_record(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ExecutionRecord>, RepositoryError>> + Send;

    /// List records for a workflow, newest first.
    fn list_records(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionRecord>, RepositoryError>> + Send;

    /// List the step results of one record, ordered as recorded.
    fn list_step_results(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StepResult>, RepositoryError>> + Send;
}
