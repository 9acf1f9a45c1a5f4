//! Agent management commands: install, list, remove.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, ContentArrangement, Table, presets};
use console::style;
use serde::Deserialize;
use uuid::Uuid;

use maestro_core::registry::AgentRegistry;
use maestro_infra::sqlite::SqliteAgentStore;
use maestro_types::agent::AgentDefinition;

use crate::state::AppState;

/// The authored form of an agent file: identical to `AgentDefinition`
/// except the id may be omitted (assigned on install).
#[derive(Deserialize)]
struct AgentManifest {
    #[serde(default)]
    id: Option<Uuid>,
    name: String,
    system_prompt: String,
    #[serde(default)]
    default_config: HashMap<String, serde_json::Value>,
    #[serde(default)]
    response_schema: Option<serde_json::Value>,
}

pub async fn handle_install(file: &Path, state: &AppState, json: bool) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let manifest: AgentManifest =
        serde_yaml_ng::from_str(&content).context("parsing agent YAML")?;

    let agent = AgentDefinition {
        id: manifest.id.unwrap_or_else(Uuid::now_v7),
        name: manifest.name,
        system_prompt: manifest.system_prompt,
        default_config: manifest.default_config,
        response_schema: manifest.response_schema,
    };

    let store = SqliteAgentStore::new(state.db_pool.clone());
    store
        .save_agent(&agent)
        .await
        .map_err(|e| anyhow::anyhow!("saving agent: {e}"))?;

    if json {
        println!(
            "{}",
            serde_json::json!({"installed": true, "id": agent.id, "name": agent.name})
        );
    } else {
        println!(
            "{} installed agent '{}' ({})",
            style("ok").green().bold(),
            agent.name,
            agent.id
        );
    }
    Ok(())
}

pub async fn handle_list(state: &AppState, json: bool) -> Result<()> {
    let store = SqliteAgentStore::new(state.db_pool.clone());
    let agents = store
        .list_agents()
        .await
        .map_err(|e| anyhow::anyhow!("listing agents: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&agents)?);
        return Ok(());
    }

    if agents.is_empty() {
        println!("no agents installed");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_BORDERS_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Id", "Name", "Response schema"]);
    for agent in &agents {
        table.add_row(vec![
            Cell::new(agent.id),
            Cell::new(&agent.name),
            Cell::new(if agent.response_schema.is_some() {
                "yes"
            } else {
                "no"
            }),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn handle_remove(id: Uuid, state: &AppState, json: bool) -> Result<()> {
    let store = SqliteAgentStore::new(state.db_pool.clone());
    let removed = store
        .delete_agent(&id)
        .await
        .map_err(|e| anyhow::anyhow!("removing agent: {e}"))?;

    if !removed {
        bail!("agent {id} not found");
    }

    if json {
        println!("{}", serde_json::json!({"removed": true, "id": id}));
    } else {
        println!("{} removed agent {}", style("ok").green().bold(), id);
    }
    Ok(())
}
