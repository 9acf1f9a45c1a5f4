//! Tagged condition AST for step gating.
//!
//! Conditions are plain data, not an evaluated scripting language: a small
//! tree of comparisons and boolean combinators over literals and path
//! lookups into prior step outputs. Evaluation lives in `maestro-core`; this
//! module only defines the serialized shape.
//!
//! A path is a dot-separated lookup rooted at the prior outputs map, so
//! `"gather.score"` reads field `score` of step `gather`'s output. Numeric
//! segments index into arrays.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An operand: a literal JSON value or a path into prior step outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expr {
    /// A constant value.
    Literal { value: Value },
    /// A dot-separated lookup, e.g. `"gather.score"`.
    Path { path: String },
}

/// Comparison operators over JSON-like values.
///
/// Equality is defined for all value kinds; ordering only for numbers and
/// strings. Comparing unordered kinds is an evaluation error, which the
/// engine resolves fail-closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// A boolean expression over prior step outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Compare two operands.
    Compare {
        left: Expr,
        op: CompareOp,
        right: Expr,
    },
    /// True iff every sub-condition is true. Empty is true.
    All { conditions: Vec<Condition> },
    /// True iff at least one sub-condition is true. Empty is false.
    Any { conditions: Vec<Condition> },
    /// Logical negation.
    Not { condition: Box<Condition> },
    /// Coerce a single operand to boolean (JSON truthiness: null and absent
    /// are false, zero and empty string are false, everything else true).
    Truthy { expr: Expr },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compare_condition_serde_roundtrip() {
        let cond = Condition::Compare {
            left: Expr::Path {
                path: "analyze.score".to_string(),
            },
            op: CompareOp::Gt,
            right: Expr::Literal { value: json!(0.8) },
        };
        let json_str = serde_json::to_string(&cond).unwrap();
        assert!(json_str.contains("\"type\":\"compare\""));
        assert!(json_str.contains("\"op\":\"gt\""));
        let parsed: Condition = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed, cond);
    }

    #[test]
    fn nested_combinator_serde_roundtrip() {
        let cond = Condition::All {
            conditions: vec![
                Condition::Truthy {
                    expr: Expr::Path {
                        path: "gather.items".to_string(),
                    },
                },
                Condition::Not {
                    condition: Box::new(Condition::Any {
                        conditions: vec![Condition::Compare {
                            left: Expr::Path {
                                path: "gather.error_count".to_string(),
                            },
                            op: CompareOp::Gte,
                            right: Expr::Literal { value: json!(1) },
                        }],
                    }),
                },
            ],
        };
        let json_str = serde_json::to_string(&cond).unwrap();
        let parsed: Condition = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed, cond);
    }

    #[test]
    fn condition_parses_from_yaml() {
        let yaml = r#"
type: any
conditions:
  - type: compare
    left: { type: path, path: "triage.severity" }
    op: eq
    right: { type: literal, value: "high" }
  - type: truthy
    expr: { type: path, path: "triage.escalate" }
"#;
        let cond: Condition = serde_yaml_ng::from_str(yaml).unwrap();
        match cond {
            Condition::Any { conditions } => assert_eq!(conditions.len(), 2),
            other => panic!("expected Any, got {other:?}"),
        }
    }
}
