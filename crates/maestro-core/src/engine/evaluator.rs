//! Step evaluator: condition gating and effective configuration resolution.
//!
//! Conditions evaluate against the `RunContext` and fail closed: any
//! evaluation error means "do not run", never an execution failure. Config
//! resolution merges step overrides onto the agent's defaults and renders
//! template references before the invocation request is built.

use std::collections::HashMap;

use maestro_types::agent::AgentDefinition;
use maestro_types::condition::{CompareOp, Condition, Expr};
use maestro_types::invoke::InvokeRequest;
use maestro_types::workflow::StepSpec;
use serde_json::Value;
use thiserror::Error;

use super::context::RunContext;

// ---------------------------------------------------------------------------
// Condition evaluation
// ---------------------------------------------------------------------------

/// Reasons a condition cannot be evaluated. Always resolved to "do not run".
#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("path '{0}' does not resolve against prior outputs")]
    UnresolvablePath(String),

    #[error("cannot order {left} against {right}")]
    NotComparable {
        left: &'static str,
        right: &'static str,
    },
}

/// Decide whether a ready step actually executes.
///
/// Absent condition means run. An evaluation error fails closed to false.
pub fn should_run(step: &StepSpec, ctx: &RunContext) -> bool {
    let Some(condition) = &step.condition else {
        return true;
    };
    match evaluate_condition(condition, ctx) {
        Ok(run) => run,
        Err(e) => {
            tracing::debug!(
                step_id = step.id.as_str(),
                error = %e,
                "condition unevaluable, failing closed"
            );
            false
        }
    }
}

/// Evaluate a condition AST against prior step outputs.
pub fn evaluate_condition(cond: &Condition, ctx: &RunContext) -> Result<bool, ConditionError> {
    match cond {
        Condition::Compare { left, op, right } => {
            let left = resolve_expr(left, ctx)?;
            let right = resolve_expr(right, ctx)?;
            compare(*op, &left, &right)
        }
        Condition::All { conditions } => {
            for c in conditions {
                if !evaluate_condition(c, ctx)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Condition::Any { conditions } => {
            for c in conditions {
                if evaluate_condition(c, ctx)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Condition::Not { condition } => Ok(!evaluate_condition(condition, ctx)?),
        Condition::Truthy { expr } => Ok(truthy(&resolve_expr(expr, ctx)?)),
    }
}

fn resolve_expr(expr: &Expr, ctx: &RunContext) -> Result<Value, ConditionError> {
    match expr {
        Expr::Literal { value } => Ok(value.clone()),
        Expr::Path { path } => ctx
            .lookup_path(path)
            .cloned()
            .ok_or_else(|| ConditionError::UnresolvablePath(path.clone())),
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, ConditionError> {
    match op {
        CompareOp::Eq => Ok(values_equal(left, right)),
        CompareOp::Ne => Ok(!values_equal(left, right)),
        CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte => {
            let ordering = order_values(left, right)?;
            Ok(match op {
                CompareOp::Gt => ordering.is_gt(),
                CompareOp::Gte => ordering.is_ge(),
                CompareOp::Lt => ordering.is_lt(),
                CompareOp::Lte => ordering.is_le(),
                _ => unreachable!(),
            })
        }
    }
}

/// Equality with numeric coercion: `1` and `1.0` are equal.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

/// Ordering is defined for number/number and string/string only.
fn order_values(left: &Value, right: &Value) -> Result<std::cmp::Ordering, ConditionError> {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return l
            .partial_cmp(&r)
            .ok_or(ConditionError::NotComparable {
                left: "number",
                right: "number",
            });
    }
    if let (Some(l), Some(r)) = (left.as_str(), right.as_str()) {
        return Ok(l.cmp(r));
    }
    Err(ConditionError::NotComparable {
        left: value_kind(left),
        right: value_kind(right),
    })
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// JSON truthiness: null, false, 0, and "" are false; everything else true.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Configuration resolution
// ---------------------------------------------------------------------------

/// A step with its effective configuration and the invocation request built
/// from it.
#[derive(Debug, Clone)]
pub struct ResolvedStep {
    /// Step config merged over the agent's defaults, templates rendered.
    pub config: HashMap<String, Value>,
    /// The request handed to the retry controller.
    pub request: InvokeRequest,
}

/// Merge the step's config over the agent's defaults and assemble the
/// invocation request.
///
/// String values anywhere in the merged config are template-resolved against
/// prior outputs. The prompt is the agent's system prompt, the project line,
/// and the merged `prompt` entry (when present), in that order.
pub fn resolve_step(step: &StepSpec, agent: &AgentDefinition, ctx: &RunContext) -> ResolvedStep {
    let mut config = agent.default_config.clone();
    for (key, value) in &step.config {
        config.insert(key.clone(), value.clone());
    }
    for value in config.values_mut() {
        render_templates(value, ctx);
    }

    let mut prompt = agent.system_prompt.clone();
    prompt.push_str(&format!("\n\nProject: {}", ctx.project.name));
    if let Some(instructions) = config.get("prompt").and_then(Value::as_str) {
        prompt.push_str("\n\n");
        prompt.push_str(instructions);
    }

    let request = InvokeRequest {
        prompt,
        response_schema: agent.response_schema.clone(),
        use_internet_context: step.use_internet_context,
    };

    ResolvedStep { config, request }
}

/// Resolve template references in every string within a JSON value tree.
fn render_templates(value: &mut Value, ctx: &RunContext) {
    match value {
        Value::String(s) => *s = ctx.resolve_template(s),
        Value::Array(items) => {
            for item in items {
                render_templates(item, ctx);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                render_templates(item, ctx);
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{agent_step, run_context, sample_agent};
    use serde_json::json;

    fn compare_cond(path: &str, op: CompareOp, value: Value) -> Condition {
        Condition::Compare {
            left: Expr::Path {
                path: path.to_string(),
            },
            op,
            right: Expr::Literal { value },
        }
    }

    // -------------------------------------------------------------------
    // Condition evaluation
    // -------------------------------------------------------------------

    #[test]
    fn numeric_comparison() {
        let mut ctx = run_context();
        ctx.record_output("analyze", json!({"score": 0.5}));

        let cond = compare_cond("analyze.score", CompareOp::Gt, json!(0.8));
        assert!(!evaluate_condition(&cond, &ctx).unwrap());

        let cond = compare_cond("analyze.score", CompareOp::Lte, json!(0.5));
        assert!(evaluate_condition(&cond, &ctx).unwrap());
    }

    #[test]
    fn integer_and_float_compare_equal() {
        let mut ctx = run_context();
        ctx.record_output("count", json!({"n": 3}));
        let cond = compare_cond("count.n", CompareOp::Eq, json!(3.0));
        assert!(evaluate_condition(&cond, &ctx).unwrap());
    }

    #[test]
    fn string_ordering() {
        let mut ctx = run_context();
        ctx.record_output("triage", json!({"severity": "high"}));
        let cond = compare_cond("triage.severity", CompareOp::Eq, json!("high"));
        assert!(evaluate_condition(&cond, &ctx).unwrap());

        let cond = compare_cond("triage.severity", CompareOp::Lt, json!("low"));
        assert!(evaluate_condition(&cond, &ctx).unwrap(), "\"high\" < \"low\"");
    }

    #[test]
    fn combinators_nest() {
        let mut ctx = run_context();
        ctx.record_output("a", json!({"x": 1}));
        ctx.record_output("b", json!({"y": 2}));

        let cond = Condition::All {
            conditions: vec![
                compare_cond("a.x", CompareOp::Eq, json!(1)),
                Condition::Not {
                    condition: Box::new(compare_cond("b.y", CompareOp::Gt, json!(5))),
                },
            ],
        };
        assert!(evaluate_condition(&cond, &ctx).unwrap());

        let cond = Condition::Any {
            conditions: vec![
                compare_cond("a.x", CompareOp::Eq, json!(99)),
                compare_cond("b.y", CompareOp::Eq, json!(2)),
            ],
        };
        assert!(evaluate_condition(&cond, &ctx).unwrap());
    }

    #[test]
    fn empty_combinators() {
        let ctx = run_context();
        assert!(evaluate_condition(&Condition::All { conditions: vec![] }, &ctx).unwrap());
        assert!(!evaluate_condition(&Condition::Any { conditions: vec![] }, &ctx).unwrap());
    }

    #[test]
    fn truthiness() {
        let mut ctx = run_context();
        ctx.record_output("flags", json!({"on": true, "off": false, "empty": "", "zero": 0, "list": [1]}));

        let truthy_of = |path: &str| {
            evaluate_condition(
                &Condition::Truthy {
                    expr: Expr::Path {
                        path: path.to_string(),
                    },
                },
                &ctx,
            )
            .unwrap()
        };
        assert!(truthy_of("flags.on"));
        assert!(!truthy_of("flags.off"));
        assert!(!truthy_of("flags.empty"));
        assert!(!truthy_of("flags.zero"));
        assert!(truthy_of("flags.list"));
    }

    #[test]
    fn unresolvable_path_is_an_error() {
        let ctx = run_context();
        let cond = compare_cond("absent.field", CompareOp::Eq, json!(1));
        assert!(matches!(
            evaluate_condition(&cond, &ctx),
            Err(ConditionError::UnresolvablePath(_))
        ));
    }

    #[test]
    fn unordered_comparison_is_an_error() {
        let mut ctx = run_context();
        ctx.record_output("a", json!({"list": [1, 2]}));
        let cond = compare_cond("a.list", CompareOp::Gt, json!(1));
        assert!(matches!(
            evaluate_condition(&cond, &ctx),
            Err(ConditionError::NotComparable { .. })
        ));
    }

    // -------------------------------------------------------------------
    // should_run fails closed
    // -------------------------------------------------------------------

    #[test]
    fn should_run_without_condition() {
        let ctx = run_context();
        let step = agent_step("a", 0, &[]);
        assert!(should_run(&step, &ctx));
    }

    #[test]
    fn should_run_fails_closed_on_unresolvable_condition() {
        let ctx = run_context();
        let mut step = agent_step("c", 0, &[]);
        step.condition = Some(compare_cond("absent.score", CompareOp::Gt, json!(0.8)));
        assert!(!should_run(&step, &ctx), "unevaluable condition must gate the step off");
    }

    // -------------------------------------------------------------------
    // Config resolution
    // -------------------------------------------------------------------

    #[test]
    fn step_config_overrides_agent_defaults() {
        let ctx = run_context();
        let mut agent = sample_agent("researcher");
        agent
            .default_config
            .insert("temperature".to_string(), json!(0.7));
        agent
            .default_config
            .insert("style".to_string(), json!("terse"));

        let mut step = agent_step("a", 0, &[]);
        step.config.insert("temperature".to_string(), json!(0.1));

        let resolved = resolve_step(&step, &agent, &ctx);
        assert_eq!(resolved.config["temperature"], json!(0.1), "step key wins");
        assert_eq!(resolved.config["style"], json!("terse"), "default survives");
    }

    #[test]
    fn prompt_includes_system_project_and_instructions() {
        let mut ctx = run_context();
        ctx.record_output("gather", json!("three open issues"));

        let agent = sample_agent("summarizer");
        let mut step = agent_step("a", 0, &[]);
        step.config.insert(
            "prompt".to_string(),
            json!("Summarize: {{ steps.gather.output }}"),
        );
        step.use_internet_context = true;

        let resolved = resolve_step(&step, &agent, &ctx);
        assert!(resolved.request.prompt.starts_with(&agent.system_prompt));
        assert!(resolved.request.prompt.contains("Project: demo-project"));
        assert!(resolved.request.prompt.contains("Summarize: three open issues"));
        assert!(resolved.request.use_internet_context);
    }

    #[test]
    fn templates_render_inside_nested_config_values() {
        let mut ctx = run_context();
        ctx.record_output("gather", json!("payload"));

        let agent = sample_agent("summarizer");
        let mut step = agent_step("a", 0, &[]);
        step.config.insert(
            "extra".to_string(),
            json!({"inner": ["{{ steps.gather.output }}"]}),
        );

        let resolved = resolve_step(&step, &agent, &ctx);
        assert_eq!(resolved.config["extra"]["inner"][0], json!("payload"));
    }

    #[test]
    fn response_schema_flows_into_request() {
        let ctx = run_context();
        let mut agent = sample_agent("strict");
        agent.response_schema = Some(json!({"type": "object"}));
        let step = agent_step("a", 0, &[]);

        let resolved = resolve_step(&step, &agent, &ctx);
        assert_eq!(resolved.request.response_schema, Some(json!({"type": "object"})));
    }
}
