//! Command-line interface definition and handlers.

pub mod agent;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

/// maestro -- execute agent workflow chains against a project.
#[derive(Parser)]
#[command(name = "maestro", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit machine-readable JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,

    /// Export spans via OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a workflow YAML file without running it.
    Validate {
        /// Path to the workflow YAML file.
        file: PathBuf,
    },

    /// Execute a workflow against a project.
    Run {
        /// Path to the workflow YAML file.
        file: PathBuf,

        /// Project display name.
        #[arg(long, default_value = "default")]
        project: String,

        /// Project id (random when omitted).
        #[arg(long)]
        project_id: Option<Uuid>,

        /// Run independent ready steps concurrently (wavefront execution).
        #[arg(long)]
        parallel: bool,
    },

    /// List recent executions of a workflow.
    Runs {
        /// Workflow UUID.
        workflow_id: Uuid,

        /// Maximum number of executions to display.
        #[arg(long, default_value = "10")]
        limit: u32,
    },

    /// Show per-step results for one execution.
    Logs {
        /// Execution UUID.
        execution_id: Uuid,
    },

    /// Manage installed agent definitions.
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },
}

#[derive(Subcommand)]
pub enum AgentCommand {
    /// Install (or update) an agent definition from a YAML file.
    Install {
        /// Path to the agent YAML file.
        file: PathBuf,
    },

    /// List installed agents.
    List,

    /// Remove an installed agent.
    Remove {
        /// Agent UUID.
        id: Uuid,
    },
}
