//! Workflow definition parsing, validation, and filesystem operations.
//!
//! Converts between YAML files and `WorkflowDefinition`, and enforces the
//! structural constraints that must hold before any step runs: unique step
//! ids and orders, resolvable dependencies, and an acyclic dependency graph.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use maestro_types::workflow::WorkflowDefinition;
use thiserror::Error;
use uuid::Uuid;

use super::dag;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors detected before execution starts. A workflow with any of these
/// never produces an `ExecutionRecord`.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Two steps share the same id.
    #[error("duplicate step ID: '{0}'")]
    DuplicateStepId(String),

    /// Two steps share the same order.
    #[error("duplicate step order: {0}")]
    DuplicateOrder(u32),

    /// A step depends on an id not present in the workflow.
    #[error("unknown dependency: {0}")]
    UnknownDependency(String),

    /// The dependency graph contains a cycle.
    #[error("cycle detected: {0}")]
    CycleDetected(String),

    /// A step references an agent the registry cannot resolve.
    #[error("step '{step_id}' references unknown agent {agent_id}")]
    UnknownAgent { step_id: String, agent_id: Uuid },
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
///
/// Runs `validate_definition` after deserialization, so the returned value
/// is guaranteed to be structurally valid and acyclic.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, DefinitionError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Serialize a `WorkflowDefinition` to a YAML string.
pub fn serialize_workflow_yaml(def: &WorkflowDefinition) -> Result<String, DefinitionError> {
    serde_yaml_ng::to_string(def).map_err(|e| DefinitionError::Parse(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Name is non-empty, alphanumeric plus hyphens
/// - At least one step exists
/// - Step ids are unique; step orders are unique
/// - All `depends_on` references resolve to steps in the same workflow
/// - The dependency graph is acyclic
/// - Per-attempt timeouts are > 0 when set
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), DefinitionError> {
    if def.name.is_empty() {
        return Err(DefinitionError::Validation(
            "workflow name must not be empty".to_string(),
        ));
    }
    if !def.name.chars().all(|c| c.is_alphanumeric() || c == '-') {
        return Err(DefinitionError::Validation(format!(
            "workflow name '{}' contains invalid characters (only alphanumeric and hyphens allowed)",
            def.name
        )));
    }

    if def.steps.is_empty() {
        return Err(DefinitionError::Validation(
            "workflow must have at least one step".to_string(),
        ));
    }

    let mut seen_ids = HashSet::new();
    let mut seen_orders = HashSet::new();
    for step in &def.steps {
        if !seen_ids.insert(step.id.as_str()) {
            return Err(DefinitionError::DuplicateStepId(step.id.clone()));
        }
        if !seen_orders.insert(step.order) {
            return Err(DefinitionError::DuplicateOrder(step.order));
        }
        if step.timeout_secs == Some(0) {
            return Err(DefinitionError::Validation(format!(
                "step '{}': timeout must be > 0",
                step.id
            )));
        }
    }

    for step in &def.steps {
        for dep in &step.depends_on {
            if !seen_ids.contains(dep.as_str()) {
                return Err(DefinitionError::UnknownDependency(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, dep
                )));
            }
        }
    }

    // Cycle detection happens last so that dangling references surface with
    // their own error variant first.
    dag::validate_dag(&def.steps)?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow definition from a YAML file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, DefinitionError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content)
}

/// Save a workflow definition to a YAML file, creating parent directories.
pub fn save_workflow_file(path: &Path, def: &WorkflowDefinition) -> Result<(), DefinitionError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serialize_workflow_yaml(def)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

/// Discover all workflow YAML files under `base_dir`.
///
/// Scans recursively for `.yaml`/`.yml` files. Files that fail to parse or
/// validate are skipped with a warning rather than aborting discovery.
pub fn discover_workflows(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, WorkflowDefinition)>, DefinitionError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, WorkflowDefinition)>,
) -> Result<(), DefinitionError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if let Some(ext) = path.extension() {
            if ext == "yaml" || ext == "yml" {
                match load_workflow_file(&path) {
                    Ok(def) => results.push((path, def)),
                    Err(_) => {
                        tracing::warn!(?path, "skipping unparseable workflow file");
                    }
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{agent_step, minimal_workflow};

    #[test]
    fn parse_yaml_roundtrip() {
        let yaml = r#"
id: "01938e90-0000-7000-8000-000000000001"
name: release-notes
description: Draft release notes
steps:
  - id: collect
    agent_id: "01938e90-0000-7000-8000-000000000002"
    order: 0
    config:
      prompt: Collect merged pull requests
  - id: draft
    agent_id: "01938e90-0000-7000-8000-000000000003"
    order: 1
    depends_on: [collect]
    max_retries: 1
"#;
        let def = parse_workflow_yaml(yaml).expect("should parse");
        assert_eq!(def.name, "release-notes");
        assert_eq!(def.steps.len(), 2);

        let yaml2 = serialize_workflow_yaml(&def).expect("should serialize");
        let def2 = parse_workflow_yaml(&yaml2).expect("should re-parse");
        assert_eq!(def2.name, def.name);
        assert_eq!(def2.steps.len(), def.steps.len());
    }

    #[test]
    fn validation_rejects_duplicate_step_ids() {
        let mut b = agent_step("dup", 0, &[]);
        b.order = 1;
        let def = minimal_workflow("test-wf", vec![agent_step("dup", 0, &[]), b]);
        let err = validate_definition(&def).unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateStepId(id) if id == "dup"));
    }

    #[test]
    fn validation_rejects_duplicate_orders() {
        let def = minimal_workflow(
            "test-wf",
            vec![agent_step("a", 3, &[]), agent_step("b", 3, &[])],
        );
        let err = validate_definition(&def).unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateOrder(3)));
    }

    #[test]
    fn validation_rejects_unknown_dependency() {
        let def = minimal_workflow("test-wf", vec![agent_step("a", 0, &["missing"])]);
        let err = validate_definition(&def).unwrap_err();
        assert!(err.to_string().contains("unknown step"));
    }

    #[test]
    fn validation_rejects_cycle() {
        let def = minimal_workflow(
            "test-wf",
            vec![
                agent_step("a", 0, &["c"]),
                agent_step("b", 1, &["a"]),
                agent_step("c", 2, &["b"]),
            ],
        );
        let err = validate_definition(&def).unwrap_err();
        assert!(matches!(err, DefinitionError::CycleDetected(_)));
    }

    #[test]
    fn validation_rejects_empty_workflow() {
        let def = minimal_workflow("test-wf", vec![]);
        let err = validate_definition(&def).unwrap_err();
        assert!(err.to_string().contains("at least one step"));
    }

    #[test]
    fn validation_rejects_invalid_name() {
        let def = minimal_workflow("has spaces!", vec![agent_step("a", 0, &[])]);
        assert!(validate_definition(&def).is_err());

        let def = minimal_workflow("", vec![agent_step("a", 0, &[])]);
        assert!(validate_definition(&def).is_err());
    }

    #[test]
    fn validation_rejects_zero_timeout() {
        let mut step = agent_step("a", 0, &[]);
        step.timeout_secs = Some(0);
        let def = minimal_workflow("test-wf", vec![step]);
        let err = validate_definition(&def).unwrap_err();
        assert!(err.to_string().contains("timeout must be > 0"));
    }

    #[test]
    fn save_and_load_workflow_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflows/test.yaml");

        let def = minimal_workflow("test-wf", vec![agent_step("a", 0, &[])]);
        save_workflow_file(&path, &def).expect("should save");

        let loaded = load_workflow_file(&path).expect("should load");
        assert_eq!(loaded.name, "test-wf");
        assert_eq!(loaded.steps.len(), 1);
    }

    #[test]
    fn discover_workflows_skips_invalid_files() {
        let dir = tempfile::tempdir().unwrap();

        let wf1 = minimal_workflow("wf-one", vec![agent_step("a", 0, &[])]);
        let wf2 = minimal_workflow("wf-two", vec![agent_step("b", 0, &[])]);

        save_workflow_file(&dir.path().join("wf1.yaml"), &wf1).unwrap();
        save_workflow_file(&dir.path().join("sub/wf2.yml"), &wf2).unwrap();
        std::fs::write(dir.path().join("not-a-workflow.yaml"), "key: value").unwrap();

        let found = discover_workflows(dir.path()).expect("should discover");
        assert_eq!(found.len(), 2, "should find exactly 2 valid workflows");
    }

    #[test]
    fn discover_nonexistent_dir_is_empty() {
        let result = discover_workflows(Path::new("/nonexistent/path"));
        assert!(result.unwrap().is_empty());
    }
}
