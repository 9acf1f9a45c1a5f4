//! SQLite execution repository implementation.
//!
//! Implements `ExecutionRepository` from `maestro-core` using sqlx with the
//! split read/write pool. Record rows hold run-level state; step results are
//! one row each, keyed `(execution_id, step_id)` and kept in dispatch order
//! via a `position` column so records reconstitute exactly as written.

use chrono::{DateTime, Utc};
use maestro_core::repository::ExecutionRepository;
use maestro_types::error::RepositoryError;
use maestro_types::workflow::{ExecutionRecord, RunStatus, StepResult, StepStatus};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ExecutionRepository`.
pub struct SqliteExecutionRepository {
    pool: DatabasePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

struct ExecutionRow {
    id: String,
    workflow_id: String,
    workflow_name: String,
    project_id: String,
    status: String,
    error: Option<String>,
    started_at: String,
    finished_at: Option<String>,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            workflow_name: row.try_get("workflow_name")?,
            project_id: row.try_get("project_id")?,
            status: row.try_get("status")?,
            error: row.try_get("error")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    fn into_record(self, steps: Vec<StepResult>) -> Result<ExecutionRecord, RepositoryError> {
        Ok(ExecutionRecord {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            workflow_name: self.workflow_name,
            project_id: parse_uuid(&self.project_id)?,
            status: parse_status(&self.status)?,
            steps,
            error: self.error,
            started_at: parse_datetime(&self.started_at)?,
            finished_at: self.finished_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

struct StepRow {
    step_id: String,
    status: String,
    attempts: i64,
    output: Option<String>,
    error: Option<String>,
    fallback_applied: i64,
    started_at: Option<String>,
    finished_at: Option<String>,
}

impl StepRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            step_id: row.try_get("step_id")?,
            status: row.try_get("status")?,
            attempts: row.try_get("attempts")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            fallback_applied: row.try_get("fallback_applied")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    fn into_step_result(self) -> Result<StepResult, RepositoryError> {
        let output = self
            .output
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Serialization(format!("step output: {e}")))
            })
            .transpose()?;

        Ok(StepResult {
            step_id: self.step_id,
            status: parse_step_status(&self.status)?,
            attempts: self.attempts as u32,
            output,
            error: self.error,
            fallback_applied: self.fallback_applied != 0,
            started_at: self.started_at.as_deref().map(parse_datetime).transpose()?,
            finished_at: self.finished_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Serialization(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Serialization(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Serde snake_case form of a status enum, as stored in status columns.
fn status_to_str<T: serde::Serialize>(status: &T) -> Result<String, RepositoryError> {
    serde_json::to_value(status)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .ok_or_else(|| RepositoryError::Serialization("status is not a string".to_string()))
}

fn parse_status(s: &str) -> Result<RunStatus, RepositoryError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| RepositoryError::Serialization(format!("invalid run status: {s}")))
}

fn parse_step_status(s: &str) -> Result<StepStatus, RepositoryError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| RepositoryError::Serialization(format!("invalid step status: {s}")))
}

fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

// ---------------------------------------------------------------------------
// ExecutionRepository impl
// ---------------------------------------------------------------------------

impl SqliteExecutionRepository {
    async fn load_steps(&self, execution_id: &Uuid) -> Result<Vec<StepResult>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM step_results WHERE execution_id = ? ORDER BY position ASC",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let mut steps = Vec::with_capacity(rows.len());
        for row in &rows {
            steps.push(StepRow::from_row(row).map_err(query_err)?.into_step_result()?);
        }
        Ok(steps)
    }
}

impl ExecutionRepository for SqliteExecutionRepository {
    async fn create_record(&self, record: &ExecutionRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO execution_records
               (id, workflow_id, workflow_name, project_id, status, error, started_at, finished_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.id.to_string())
        .bind(record.workflow_id.to_string())
        .bind(&record.workflow_name)
        .bind(record.project_id.to_string())
        .bind(status_to_str(&record.status)?)
        .bind(&record.error)
        .bind(format_datetime(&record.started_at))
        .bind(record.finished_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        for (position, step) in record.steps.iter().enumerate() {
            sqlx::query(
                r#"INSERT INTO step_results
                   (execution_id, step_id, position, status, attempts, output, error,
                    fallback_applied, started_at, finished_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(record.id.to_string())
            .bind(&step.step_id)
            .bind(position as i64)
            .bind(status_to_str(&step.status)?)
            .bind(step.attempts as i64)
            .bind(
                step.output
                    .as_ref()
                    .map(|v| serde_json::to_string(v))
                    .transpose()
                    .map_err(|e| RepositoryError::Serialization(e.to_string()))?,
            )
            .bind(&step.error)
            .bind(step.fallback_applied as i64)
            .bind(step.started_at.as_ref().map(format_datetime))
            .bind(step.finished_at.as_ref().map(format_datetime))
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        }

        Ok(())
    }

    async fn update_run_status(
        &self,
        execution_id: &Uuid,
        status: RunStatus,
        error: Option<&str>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        let finished_at = if status.is_terminal() {
            Some(format_datetime(&finished_at.unwrap_or_else(Utc::now)))
        } else {
            None
        };

        let result = sqlx::query(
            "UPDATE execution_records SET status = ?, error = COALESCE(?, error), finished_at = COALESCE(?, finished_at) WHERE id = ?",
        )
        .bind(status_to_str(&status)?)
        .bind(error)
        .bind(&finished_at)
        .bind(execution_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn upsert_step_result(
        &self,
        execution_id: &Uuid,
        step: &StepResult,
    ) -> Result<(), RepositoryError> {
        let output = step
            .output
            .as_ref()
            .map(|v| serde_json::to_string(v))
            .transpose()
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO step_results
               (execution_id, step_id, position, status, attempts, output, error,
                fallback_applied, started_at, finished_at)
               VALUES (?, ?,
                       (SELECT COALESCE(MAX(position) + 1, 0) FROM step_results WHERE execution_id = ?),
                       ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(execution_id, step_id) DO UPDATE SET
                 status = excluded.status,
                 attempts = excluded.attempts,
                 output = COALESCE(excluded.output, output),
                 error = COALESCE(excluded.error, error),
                 fallback_applied = excluded.fallback_applied,
                 started_at = COALESCE(excluded.started_at, started_at),
                 finished_at = COALESCE(excluded.finished_at, finished_at)"#,
        )
        .bind(execution_id.to_string())
        .bind(&step.step_id)
        .bind(execution_id.to_string())
        .bind(status_to_str(&step.status)?)
        .bind(step.attempts as i64)
        .bind(&output)
        .bind(&step.error)
        .bind(step.fallback_applied as i64)
        .bind(step.started_at.as_ref().map(format_datetime))
        .bind(step.finished_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn get_record(
        &self,
        execution_id: &Uuid,
    ) -> Result<Option<ExecutionRecord>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM execution_records WHERE id = ?")
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let record_row = ExecutionRow::from_row(&row).map_err(query_err)?;
                let steps = self.load_steps(execution_id).await?;
                Ok(Some(record_row.into_record(steps)?))
            }
            None => Ok(None),
        }
    }

    async fn list_records(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM execution_records WHERE workflow_id = ? ORDER BY started_at DESC LIMIT ?",
        )
        .bind(workflow_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let record_row = ExecutionRow::from_row(row).map_err(query_err)?;
            let execution_id = parse_uuid(&record_row.id)?;
            let steps = self.load_steps(&execution_id).await?;
            records.push(record_row.into_record(steps)?);
        }
        Ok(records)
    }

    async fn list_step_results(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<StepResult>, RepositoryError> {
        self.load_steps(execution_id).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    fn sample_record() -> ExecutionRecord {
        ExecutionRecord {
            id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            workflow_name: "daily-triage".to_string(),
            project_id: Uuid::now_v7(),
            status: RunStatus::Running,
            steps: vec![StepResult::pending("gather"), StepResult::pending("draft")],
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn create_and_get_record_roundtrip() {
        let repo = SqliteExecutionRepository::new(test_pool().await);
        let record = sample_record();
        repo.create_record(&record).await.unwrap();

        let loaded = repo.get_record(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.workflow_name, "daily-triage");
        assert_eq!(loaded.status, RunStatus::Running);
        let ids: Vec<&str> = loaded.steps.iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, vec!["gather", "draft"], "step order preserved");
    }

    #[tokio::test]
    async fn get_missing_record_is_none() {
        let repo = SqliteExecutionRepository::new(test_pool().await);
        assert!(repo.get_record(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn terminal_status_update_stamps_finished_at() {
        let repo = SqliteExecutionRepository::new(test_pool().await);
        let record = sample_record();
        repo.create_record(&record).await.unwrap();

        repo.update_run_status(&record.id, RunStatus::Stopped, Some("stop policy"), None)
            .await
            .unwrap();

        let loaded = repo.get_record(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Stopped);
        assert_eq!(loaded.error.as_deref(), Some("stop policy"));
        assert!(loaded.finished_at.is_some());
    }

    #[tokio::test]
    async fn update_missing_record_is_not_found() {
        let repo = SqliteExecutionRepository::new(test_pool().await);
        let err = repo
            .update_run_status(&Uuid::now_v7(), RunStatus::Failed, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn upsert_updates_existing_step_row() {
        let repo = SqliteExecutionRepository::new(test_pool().await);
        let record = sample_record();
        repo.create_record(&record).await.unwrap();

        let mut step = StepResult::pending("gather");
        step.status = StepStatus::Succeeded;
        step.attempts = 2;
        step.output = Some(json!({"items": 3}));
        step.started_at = Some(Utc::now());
        step.finished_at = Some(Utc::now());
        repo.upsert_step_result(&record.id, &step).await.unwrap();

        let steps = repo.list_step_results(&record.id).await.unwrap();
        assert_eq!(steps.len(), 2, "no duplicate row");
        let gather = steps.iter().find(|s| s.step_id == "gather").unwrap();
        assert_eq!(gather.status, StepStatus::Succeeded);
        assert_eq!(gather.attempts, 2);
        assert_eq!(gather.output, Some(json!({"items": 3})));
    }

    #[tokio::test]
    async fn fallback_marker_roundtrips() {
        let repo = SqliteExecutionRepository::new(test_pool().await);
        let record = sample_record();
        repo.create_record(&record).await.unwrap();

        let mut step = StepResult::pending("gather");
        step.status = StepStatus::Succeeded;
        step.fallback_applied = true;
        step.error = Some("exhausted".to_string());
        step.output = Some(json!({"fallback": true, "output": null}));
        repo.upsert_step_result(&record.id, &step).await.unwrap();

        let loaded = repo.get_record(&record.id).await.unwrap().unwrap();
        let gather = loaded.step("gather").unwrap();
        assert!(gather.fallback_applied);
        assert_eq!(gather.error.as_deref(), Some("exhausted"));
    }

    #[tokio::test]
    async fn list_records_newest_first_with_limit() {
        let repo = SqliteExecutionRepository::new(test_pool().await);
        let workflow_id = Uuid::now_v7();

        for i in 0..3 {
            let mut record = sample_record();
            record.workflow_id = workflow_id;
            record.started_at = Utc::now() + chrono::Duration::seconds(i);
            repo.create_record(&record).await.unwrap();
        }
        // A record for another workflow must not appear.
        repo.create_record(&sample_record()).await.unwrap();

        let listed = repo.list_records(&workflow_id, 10).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert!(listed[0].started_at >= listed[1].started_at);

        let limited = repo.list_records(&workflow_id, 2).await.unwrap();
        assert_eq!(limited.len(), 2);
    }
}
