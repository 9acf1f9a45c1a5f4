//! Dependency graph analysis: cycle detection, wave computation, and the
//! transitive-dependent closure used for failure propagation.
//!
//! Steps are modeled as a `petgraph` directed graph with `depends_on` edges.
//! Topological sort detects cycles; depth grouping produces the parallel
//! execution waves the bounded-parallel discipline dispatches.

use std::collections::{HashMap, HashSet};

use maestro_types::workflow::StepSpec;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use super::definition::DefinitionError;

/// Build the dependency graph for a step set.
///
/// Edges run from dependency to dependent. Returns the graph plus the node
/// index for each step id.
fn build_graph<'a>(
    steps: &'a [StepSpec],
) -> Result<
    (
        DiGraph<&'a str, ()>,
        HashMap<&'a str, petgraph::graph::NodeIndex>,
    ),
    DefinitionError,
> {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut nodes = HashMap::with_capacity(steps.len());
    for step in steps {
        nodes.insert(step.id.as_str(), graph.add_node(step.id.as_str()));
    }

    for step in steps {
        let to = nodes[step.id.as_str()];
        for dep in &step.depends_on {
            let from = nodes.get(dep.as_str()).ok_or_else(|| {
                DefinitionError::UnknownDependency(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, dep
                ))
            })?;
            graph.add_edge(*from, to, ());
        }
    }

    Ok((graph, nodes))
}

/// Validate that steps form a DAG (all references resolve, no cycles).
pub fn validate_dag(steps: &[StepSpec]) -> Result<(), DefinitionError> {
    let (graph, _) = build_graph(steps)?;
    toposort(&graph, None).map_err(|cycle| {
        let step_id = graph[cycle.node_id()];
        DefinitionError::CycleDetected(format!("cycle involving step '{step_id}'"))
    })?;
    Ok(())
}

/// Group steps into parallel execution waves.
///
/// Each wave contains steps whose dependencies are all satisfied by prior
/// waves; wave 0 holds the roots. Within a wave, steps are ordered by
/// ascending `order`. Depth is the longest dependency chain above a step.
pub fn execution_waves(steps: &[StepSpec]) -> Result<Vec<Vec<&StepSpec>>, DefinitionError> {
    if steps.is_empty() {
        return Ok(vec![]);
    }

    let (graph, _) = build_graph(steps)?;
    let sorted = toposort(&graph, None).map_err(|cycle| {
        let step_id = graph[cycle.node_id()];
        DefinitionError::CycleDetected(format!("cycle involving step '{step_id}'"))
    })?;

    let by_id: HashMap<&str, &StepSpec> = steps.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut depths: HashMap<&str, usize> = HashMap::new();
    for node in &sorted {
        let step_id = graph[*node];
        let step = by_id[step_id];
        let depth = step
            .depends_on
            .iter()
            .map(|dep| depths.get(dep.as_str()).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        depths.insert(step_id, depth);
    }

    let max_depth = depths.values().copied().max().unwrap_or(0);
    let mut waves: Vec<Vec<&StepSpec>> = vec![vec![]; max_depth + 1];
    for step in steps {
        waves[depths[step.id.as_str()]].push(step);
    }
    for wave in &mut waves {
        wave.sort_by_key(|s| s.order);
    }

    Ok(waves)
}

/// The transitive closure of steps that depend on `step_id`, directly or
/// through intermediaries.
///
/// Used to propagate skips when a dependency fails. Unknown ids yield an
/// empty set.
pub fn transitive_dependents(step_id: &str, steps: &[StepSpec]) -> HashSet<String> {
    // dependency -> direct dependents
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in steps {
        for dep in &step.depends_on {
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(step.id.as_str());
        }
    }

    let mut closure = HashSet::new();
    let mut stack = vec![step_id];
    while let Some(current) = stack.pop() {
        if let Some(children) = dependents.get(current) {
            for child in children {
                if closure.insert(child.to_string()) {
                    stack.push(child);
                }
            }
        }
    }
    closure
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
