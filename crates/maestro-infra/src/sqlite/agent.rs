//! SQLite agent store.
//!
//! Stores agent definitions as JSON blobs and implements the read-only
//! `AgentRegistry` port plus the install/remove surface the CLI uses.

use chrono::Utc;
use maestro_core::registry::AgentRegistry;
use maestro_types::agent::AgentDefinition;
use maestro_types::error::RepositoryError;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed agent definition store.
pub struct SqliteAgentStore {
    pool: DatabasePool,
}

impl SqliteAgentStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Install or update an agent definition (upsert by id).
    pub async fn save_agent(&self, agent: &AgentDefinition) -> Result<(), RepositoryError> {
        let definition = serde_json::to_string(agent)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"INSERT INTO agents (id, name, definition, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 definition = excluded.definition,
                 updated_at = excluded.updated_at"#,
        )
        .bind(agent.id.to_string())
        .bind(&agent.name)
        .bind(&definition)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    /// Remove an agent definition. Returns `true` if it existed.
    pub async fn delete_agent(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM agents WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }
}

fn decode_definition(row: &sqlx::sqlite::SqliteRow) -> Result<AgentDefinition, RepositoryError> {
    let definition: String = row
        .try_get("definition")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    serde_json::from_str(&definition)
        .map_err(|e| RepositoryError::Serialization(format!("invalid agent definition JSON: {e}")))
}

impl AgentRegistry for SqliteAgentStore {
    async fn get_agent(&self, id: &Uuid) -> Result<Option<AgentDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT definition FROM agents WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(decode_definition).transpose()
    }

    async fn list_agents(&self) -> Result<Vec<AgentDefinition>, RepositoryError> {
        let rows = sqlx::query("SELECT definition FROM agents ORDER BY name ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(decode_definition).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    fn sample_agent(name: &str) -> AgentDefinition {
        AgentDefinition {
            id: Uuid::now_v7(),
            name: name.to_string(),
            system_prompt: "You research codebases.".to_string(),
            default_config: HashMap::from([("temperature".to_string(), json!(0.2))]),
            response_schema: Some(json!({"type": "object"})),
        }
    }

    #[tokio::test]
    async fn save_and_get_agent() {
        let store = SqliteAgentStore::new(test_pool().await);
        let agent = sample_agent("researcher");
        store.save_agent(&agent).await.unwrap();

        let loaded = store.get_agent(&agent.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "researcher");
        assert_eq!(loaded.default_config["temperature"], json!(0.2));
        assert!(loaded.response_schema.is_some());
    }

    #[tokio::test]
    async fn get_missing_agent_is_none() {
        let store = SqliteAgentStore::new(test_pool().await);
        assert!(store.get_agent(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_is_an_upsert() {
        let store = SqliteAgentStore::new(test_pool().await);
        let mut agent = sample_agent("researcher");
        store.save_agent(&agent).await.unwrap();

        agent.system_prompt = "You research codebases very carefully.".to_string();
        store.save_agent(&agent).await.unwrap();

        let loaded = store.get_agent(&agent.id).await.unwrap().unwrap();
        assert!(loaded.system_prompt.contains("very carefully"));

        let all = store.list_agents().await.unwrap();
        assert_eq!(all.len(), 1, "upsert must not duplicate");
    }

    #[tokio::test]
    async fn list_agents_sorted_by_name() {
        let store = SqliteAgentStore::new(test_pool().await);
        store.save_agent(&sample_agent("zeta")).await.unwrap();
        store.save_agent(&sample_agent("alpha")).await.unwrap();

        let names: Vec<String> = store
            .list_agents()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn delete_agent_reports_existence() {
        let store = SqliteAgentStore::new(test_pool().await);
        let agent = sample_agent("researcher");
        store.save_agent(&agent).await.unwrap();

        assert!(store.delete_agent(&agent.id).await.unwrap());
        assert!(!store.delete_agent(&agent.id).await.unwrap());
        assert!(store.get_agent(&agent.id).await.unwrap().is_none());
    }
}
