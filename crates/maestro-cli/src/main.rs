//! maestro CLI entry point.
//!
//! Parses arguments, initializes tracing and application state, then
//! dispatches to the command handlers.

mod cli;
mod state;

use clap::Parser;

use cli::{AgentCommand, Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,maestro=debug",
        _ => "trace",
    };
    maestro_observe::tracing_setup::init_tracing(Some(filter), cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = match cli.command {
        // Validation needs no state; everything else hits the database.
        Commands::Validate { file } => cli::workflow::handle_validate(&file, cli.json),
        Commands::Run {
            file,
            project,
            project_id,
            parallel,
        } => {
            let state = AppState::init().await?;
            cli::workflow::handle_run(&file, &project, project_id, parallel, &state, cli.json).await
        }
        Commands::Runs { workflow_id, limit } => {
            let state = AppState::init().await?;
            cli::workflow::handle_runs(workflow_id, limit, &state, cli.json).await
        }
        Commands::Logs { execution_id } => {
            let state = AppState::init().await?;
            cli::workflow::handle_logs(execution_id, &state, cli.json).await
        }
        Commands::Agent { command } => {
            let state = AppState::init().await?;
            match command {
                AgentCommand::Install { file } => {
                    cli::agent::handle_install(&file, &state, cli.json).await
                }
                AgentCommand::List => cli::agent::handle_list(&state, cli.json).await,
                AgentCommand::Remove { id } => cli::agent::handle_remove(id, &state, cli.json).await,
            }
        }
    };

    maestro_observe::tracing_setup::shutdown_tracing();
    result
}
