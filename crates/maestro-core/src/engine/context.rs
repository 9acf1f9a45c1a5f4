//! Per-run view of accumulated step outputs.
//!
//! `RunContext` is the read surface the step evaluator works against:
//! condition paths and `{{ steps.<id>.output }}` template references both
//! resolve here. The aggregator owns the `ExecutionRecord`; this holds only
//! what later steps are allowed to see.

use std::collections::HashMap;

use maestro_types::agent::ProjectRef;
use serde_json::{Value, json};
use uuid::Uuid;

/// Maximum size of a single stored step output (1 MB). Oversized outputs are
/// replaced with a truncation marker rather than failing the run.
pub const MAX_STEP_OUTPUT_SIZE: usize = 1_048_576;

/// Read-mostly execution context for one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Outputs of terminal-successful steps, keyed by step id. Fallback
    /// substitutions appear here too, so dependents can consume them.
    step_outputs: HashMap<String, Value>,
    /// Workflow name, for diagnostics.
    pub workflow_name: String,
    /// The execution this context belongs to.
    pub execution_id: Uuid,
    /// The project this run executes against.
    pub project: ProjectRef,
}

impl RunContext {
    pub fn new(workflow_name: String, execution_id: Uuid, project: ProjectRef) -> Self {
        Self {
            step_outputs: HashMap::new(),
            workflow_name,
            execution_id,
            project,
        }
    }

    /// Record the output of a completed step.
    ///
    /// Outputs above `MAX_STEP_OUTPUT_SIZE` are replaced with a marker object
    /// so one runaway payload cannot grow the context without bound.
    pub fn record_output(&mut self, step_id: &str, output: Value) {
        let size = serde_json::to_string(&output).map(|s| s.len()).unwrap_or(0);
        if size > MAX_STEP_OUTPUT_SIZE {
            tracing::warn!(
                step_id,
                size,
                max = MAX_STEP_OUTPUT_SIZE,
                "step output exceeds size limit, truncating"
            );
            self.step_outputs.insert(
                step_id.to_string(),
                json!({
                    "_truncated": true,
                    "_original_size": size,
                }),
            );
        } else {
            self.step_outputs.insert(step_id.to_string(), output);
        }
    }

    /// The recorded output of a prior step, if any.
    pub fn output(&self, step_id: &str) -> Option<&Value> {
        self.step_outputs.get(step_id)
    }

    /// Resolve a dot-separated condition path rooted at prior step outputs:
    /// `"<step_id>.<field>..."`. A bare `"<step_id>"` yields the whole
    /// output. Numeric segments index into arrays. Returns `None` when any
    /// segment fails to resolve.
    pub fn lookup_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let step_id = segments.next()?;
        let mut current = self.step_outputs.get(step_id)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Resolve template references in a string.
    ///
    /// Supported tokens:
    /// - `{{ steps.<id>.output }}` -- a prior step's whole output
    /// - `{{ steps.<id>.output.<path> }}` -- a field within it
    /// - `{{ project.name }}` -- the project display name
    ///
    /// Unknown references are left as-is (not an error).
    pub fn resolve_template(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start..].find("}}") else {
                break;
            };
            let end = start + len;
            out.push_str(&rest[..start]);
            let token = rest[start + 2..end].trim();
            match self.resolve_token(token) {
                Some(value) => out.push_str(&value),
                None => out.push_str(&rest[start..end + 2]),
            }
            rest = &rest[end + 2..];
        }
        out.push_str(rest);
        out
    }

    fn resolve_token(&self, token: &str) -> Option<String> {
        if token == "project.name" {
            return Some(self.project.name.clone());
        }
        let rest = token.strip_prefix("steps.")?;
        let (step_id, field) = rest.split_once('.')?;
        if field == "output" {
            return self.step_outputs.get(step_id).map(value_to_string);
        }
        let path = field.strip_prefix("output.")?;
        let mut current = self.step_outputs.get(step_id)?;
        for segment in path.split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(value_to_string(current))
    }
}

/// Render a JSON value for template substitution: strings bare, scalars via
/// Display, containers as compact JSON.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> RunContext {
        RunContext::new(
            "test-workflow".to_string(),
            Uuid::now_v7(),
            ProjectRef {
                id: Uuid::now_v7(),
                name: "demo-project".to_string(),
            },
        )
    }

    #[test]
    fn record_and_read_output() {
        let mut ctx = ctx();
        ctx.record_output("gather", json!({"count": 3}));
        assert_eq!(ctx.output("gather"), Some(&json!({"count": 3})));
        assert_eq!(ctx.output("missing"), None);
    }

    #[test]
    fn lookup_path_resolves_nested_fields() {
        let mut ctx = ctx();
        ctx.record_output(
            "gather",
            json!({"items": [{"title": "first"}, {"title": "second"}], "count": 2}),
        );
        assert_eq!(ctx.lookup_path("gather.count"), Some(&json!(2)));
        assert_eq!(ctx.lookup_path("gather.items.1.title"), Some(&json!("second")));
        assert_eq!(
            ctx.lookup_path("gather"),
            Some(&json!({"items": [{"title": "first"}, {"title": "second"}], "count": 2}))
        );
    }

    #[test]
    fn lookup_path_fails_on_missing_segments() {
        let mut ctx = ctx();
        ctx.record_output("gather", json!({"count": 2}));
        assert_eq!(ctx.lookup_path("gather.missing"), None);
        assert_eq!(ctx.lookup_path("absent.count"), None);
        assert_eq!(ctx.lookup_path("gather.count.deeper"), None);
        assert_eq!(ctx.lookup_path("gather.items.notanumber"), None);
    }

    #[test]
    fn template_resolves_step_output() {
        let mut ctx = ctx();
        ctx.record_output("gather", json!("top issues"));
        let result = ctx.resolve_template("Results: {{ steps.gather.output }}");
        assert_eq!(result, "Results: top issues");
    }

    #[test]
    fn template_resolves_nested_field_and_project() {
        let mut ctx = ctx();
        ctx.record_output("score", json!({"value": 0.9}));
        let result =
            ctx.resolve_template("{{ project.name }} scored {{ steps.score.output.value }}");
        assert_eq!(result, "demo-project scored 0.9");
    }

    #[test]
    fn template_leaves_unknown_references_intact() {
        let ctx = ctx();
        let template = "before {{ steps.absent.output }} after {{ nonsense }}";
        assert_eq!(ctx.resolve_template(template), template);
    }

    #[test]
    fn template_resolves_multiple_tokens() {
        let mut ctx = ctx();
        ctx.record_output("a", json!("one"));
        ctx.record_output("b", json!("two"));
        let result = ctx.resolve_template("{{ steps.a.output }} and {{ steps.b.output }}");
        assert_eq!(result, "one and two");
    }

    #[test]
    fn oversized_output_is_truncated() {
        let mut ctx = ctx();
        let huge = "x".repeat(MAX_STEP_OUTPUT_SIZE + 16);
        ctx.record_output("big", json!(huge));
        let stored = ctx.output("big").unwrap();
        assert_eq!(stored["_truncated"], json!(true));
    }
}
