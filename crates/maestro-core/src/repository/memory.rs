//! In-memory execution repository.
//!
//! The default store: the engine does not require durability across process
//! restarts, so a `RwLock`-guarded map is the primary implementation. Also
//! the fixture every engine test runs against.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use maestro_types::error::RepositoryError;
use maestro_types::workflow::{ExecutionRecord, RunStatus, StepResult};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::execution::ExecutionRepository;

/// Map-backed `ExecutionRepository`.
#[derive(Debug, Default)]
pub struct MemoryExecutionRepository {
    records: RwLock<HashMap<Uuid, ExecutionRecord>>,
}

impl MemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

impl ExecutionRepository for MemoryExecutionRepository {
    async fn create_record(&self, record: &ExecutionRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(RepositoryError::Conflict(format!(
                "execution {} already exists",
                record.id
            )));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_run_status(
        &self,
        execution_id: &Uuid,
        status: RunStatus,
        error: Option<&str>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(execution_id)
            .ok_or(RepositoryError::NotFound)?;
        record.status = status;
        if let Some(error) = error {
            record.error = Some(error.to_string());
        }
        if status.is_terminal() {
            record.finished_at = finished_at.or_else(|| Some(Utc::now()));
        }
        Ok(())
    }

    async fn upsert_step_result(
        &self,
        execution_id: &Uuid,
        step: &StepResult,
    ) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(execution_id)
            .ok_or(RepositoryError::NotFound)?;
        match record
            .steps
            .iter_mut()
            .find(|s| s.step_id == step.step_id)
        {
            Some(existing) => *existing = step.clone(),
            None => record.steps.push(step.clone()),
        }
        Ok(())
    }

    async fn get_record(
        &self,
        execution_id: &Uuid,
    ) -> Result<Option<ExecutionRecord>, RepositoryError> {
        Ok(self.records.read().await.get(execution_id).cloned())
    }

    async fn list_records(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut matching: Vec<ExecutionRecord> = records
            .values()
            .filter(|r| r.workflow_id == *workflow_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn list_step_results(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<StepResult>, RepositoryError> {
        let records = self.records.read().await;
        let record = records.get(execution_id).ok_or(RepositoryError::NotFound)?;
        Ok(record.steps.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
