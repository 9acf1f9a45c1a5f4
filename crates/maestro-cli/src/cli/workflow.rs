//! Workflow commands: validate, run, runs, logs.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use maestro_core::engine::definition::{DefinitionError, load_workflow_file};
use maestro_core::engine::orchestrator::{ExecuteOptions, WorkflowOrchestrator};
use maestro_core::engine::scheduler::Discipline;
use maestro_core::event::EventBus;
use maestro_core::repository::ExecutionRepository;
use maestro_infra::invoke::HttpAgentInvoker;
use maestro_infra::sqlite::{SqliteAgentStore, SqliteExecutionRepository};
use maestro_types::agent::ProjectRef;
use maestro_types::event::RunEvent;
use maestro_types::workflow::{ExecutionRecord, RunStatus, StepStatus};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub fn handle_validate(file: &Path, json: bool) -> Result<()> {
    let workflow = load_workflow_file(file).map_err(|e| match e {
        DefinitionError::Parse(msg) => anyhow::anyhow!("failed to parse workflow YAML: {msg}"),
        other => anyhow::anyhow!("invalid workflow: {other}"),
    })?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "valid": true,
                "name": workflow.name,
                "steps": workflow.steps.len(),
            })
        );
    } else {
        println!(
            "{} workflow '{}' is valid ({} steps)",
            style("ok").green().bold(),
            workflow.name,
            workflow.steps.len()
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub async fn handle_run(
    file: &Path,
    project_name: &str,
    project_id: Option<Uuid>,
    parallel: bool,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let workflow =
        load_workflow_file(file).map_err(|e| anyhow::anyhow!("invalid workflow: {e}"))?;

    let orchestrator = WorkflowOrchestrator::new(
        SqliteAgentStore::new(state.db_pool.clone()),
        Arc::new(HttpAgentInvoker::new(state.config.invoker_endpoint.clone())),
        SqliteExecutionRepository::new(state.db_pool.clone()),
        EventBus::new(state.config.event_capacity),
        state.config.orchestrator_config(),
    );

    let project = ProjectRef {
        id: project_id.unwrap_or_else(Uuid::now_v7),
        name: project_name.to_string(),
    };
    let discipline = if parallel {
        Discipline::Parallel
    } else {
        Discipline::Sequential
    };

    // Live progress on stderr-adjacent stdout; suppressed for JSON output.
    let mut events = orchestrator.subscribe();
    let progress = (!json).then(|| {
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                let finished = matches!(event, RunEvent::RunFinished { .. });
                print_event(&event);
                if finished {
                    break;
                }
            }
        })
    });

    let record = orchestrator
        .execute(&workflow, &project, ExecuteOptions { discipline })
        .await
        .with_context(|| format!("executing workflow '{}'", workflow.name))?;

    if let Some(handle) = progress {
        let _ = handle.await;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!();
        print_step_table(&record);
    }

    if record.status != RunStatus::Completed {
        bail!(
            "execution {} ended with status {}",
            record.id,
            status_label(record.status)
        );
    }
    Ok(())
}

fn print_event(event: &RunEvent) {
    match event {
        RunEvent::RunStarted {
            execution_id,
            workflow_name,
            ..
        } => {
            println!(
                "{} {} ({})",
                style("run").cyan().bold(),
                workflow_name,
                execution_id
            );
        }
        RunEvent::StepStarted { step_id, .. } => {
            println!("  {} {step_id}", style("→").dim());
        }
        RunEvent::StepRetrying {
            step_id,
            attempt,
            delay_ms,
            error,
            ..
        } => {
            println!(
                "  {} {step_id}: attempt {attempt} failed ({error}), retrying in {delay_ms} ms",
                style("↻").yellow()
            );
        }
        RunEvent::StepSucceeded {
            step_id, fallback, ..
        } => {
            let suffix = if *fallback { " (fallback)" } else { "" };
            println!("  {} {step_id}{suffix}", style("✓").green());
        }
        RunEvent::StepFailed { step_id, error, .. } => {
            println!("  {} {step_id}: {error}", style("✗").red());
        }
        RunEvent::StepSkipped { step_id, reason, .. } => {
            println!("  {} {step_id} skipped ({reason:?})", style("-").dim());
        }
        RunEvent::RunFinished { status, .. } => {
            println!("{} {}", style("done").cyan().bold(), status_label(*status));
        }
    }
}

// ---------------------------------------------------------------------------
// Runs / Logs
// ---------------------------------------------------------------------------

pub async fn handle_runs(
    workflow_id: Uuid,
    limit: u32,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let repo = SqliteExecutionRepository::new(state.db_pool.clone());
    let records = repo
        .list_records(&workflow_id, limit)
        .await
        .map_err(|e| anyhow::anyhow!("listing executions: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("no executions recorded for workflow {workflow_id}");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_BORDERS_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Execution", "Status", "Started", "Finished", "Steps"]);

    for record in &records {
        let succeeded = record
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Succeeded)
            .count();
        table.add_row(vec![
            Cell::new(record.id),
            status_cell(record.status),
            Cell::new(record.started_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(
                record
                    .finished_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(format!("{succeeded}/{}", record.steps.len())),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn handle_logs(execution_id: Uuid, state: &AppState, json: bool) -> Result<()> {
    let repo = SqliteExecutionRepository::new(state.db_pool.clone());
    let record = repo
        .get_record(&execution_id)
        .await
        .map_err(|e| anyhow::anyhow!("loading execution: {e}"))?;

    let Some(record) = record else {
        bail!("execution {execution_id} not found");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    println!(
        "{} {} · {} · started {}",
        style(&record.workflow_name).bold(),
        record.id,
        status_label(record.status),
        record.started_at.format("%Y-%m-%d %H:%M:%S"),
    );
    if let Some(error) = &record.error {
        println!("{} {error}", style("error:").red().bold());
    }
    print_step_table(&record);
    Ok(())
}

// ---------------------------------------------------------------------------
// Rendering helpers
// ---------------------------------------------------------------------------

fn print_step_table(record: &ExecutionRecord) {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_BORDERS_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Step", "Status", "Attempts", "Detail"]);

    for step in &record.steps {
        let detail = if step.fallback_applied {
            format!(
                "fallback applied ({})",
                step.error.as_deref().unwrap_or("unknown error")
            )
        } else {
            step.error.clone().unwrap_or_default()
        };
        table.add_row(vec![
            Cell::new(&step.step_id),
            step_status_cell(step.status),
            Cell::new(step.attempts),
            Cell::new(detail),
        ]);
    }
    println!("{table}");
}

fn status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Running => "running",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
        RunStatus::Stopped => "stopped",
    }
}

fn status_cell(status: RunStatus) -> Cell {
    let cell = Cell::new(status_label(status));
    match status {
        RunStatus::Completed => cell.fg(Color::Green),
        RunStatus::Failed => cell.fg(Color::Red),
        RunStatus::Stopped => cell.fg(Color::Yellow),
        RunStatus::Running => cell.fg(Color::Cyan),
    }
}

fn step_status_cell(status: StepStatus) -> Cell {
    let label = match status {
        StepStatus::Pending => "pending",
        StepStatus::Running => "running",
        StepStatus::Skipped => "skipped",
        StepStatus::Succeeded => "succeeded",
        StepStatus::Failed => "failed",
    };
    let cell = Cell::new(label);
    match status {
        StepStatus::Succeeded => cell.fg(Color::Green),
        StepStatus::Failed => cell.fg(Color::Red),
        StepStatus::Skipped => cell.fg(Color::Yellow),
        StepStatus::Running => cell.fg(Color::Cyan),
        StepStatus::Pending => cell.fg(Color::Grey),
    }
}
