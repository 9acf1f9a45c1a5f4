//! Agent registry: read-only lookup of installed agent definitions.
//!
//! The registry is supplied externally; the engine resolves every step's
//! `agent_id` against it before execution starts. `StaticAgentRegistry`
//! covers the embedded case; `maestro-infra` provides the SQLite-backed
//! store.

use std::collections::HashMap;

use maestro_types::agent::AgentDefinition;
use maestro_types::error::RepositoryError;
use uuid::Uuid;

/// Read-only lookup of agent definitions.
pub trait AgentRegistry: Send + Sync {
    /// Get an agent definition by id.
    fn get_agent(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<AgentDefinition>, RepositoryError>> + Send;

    /// List all installed agents, ordered by name.
    fn list_agents(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<AgentDefinition>, RepositoryError>> + Send;
}

/// In-memory registry built from a fixed set of definitions.
#[derive(Debug, Clone, Default)]
pub struct StaticAgentRegistry {
    agents: HashMap<Uuid, AgentDefinition>,
}

impl StaticAgentRegistry {
    pub fn new(agents: impl IntoIterator<Item = AgentDefinition>) -> Self {
        Self {
            agents: agents.into_iter().map(|a| (a.id, a)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl AgentRegistry for StaticAgentRegistry {
    async fn get_agent(&self, id: &Uuid) -> Result<Option<AgentDefinition>, RepositoryError> {
        Ok(self.agents.get(id).cloned())
    }

    async fn list_agents(&self) -> Result<Vec<AgentDefinition>, RepositoryError> {
        let mut agents: Vec<AgentDefinition> = self.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(agents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_agent;

    #[tokio::test]
    async fn static_registry_lookup() {
        let agent = sample_agent("researcher");
        let id = agent.id;
        let registry = StaticAgentRegistry::new([agent]);

        let found = registry.get_agent(&id).await.unwrap();
        assert_eq!(found.unwrap().name, "researcher");

        let missing = registry.get_agent(&Uuid::now_v7()).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn static_registry_lists_sorted_by_name() {
        let registry = StaticAgentRegistry::new([sample_agent("zeta"), sample_agent("alpha")]);
        let names: Vec<String> = registry
            .list_agents()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(registry.len(), 2);
        assert!(!registry.is_empty());
    }
}
