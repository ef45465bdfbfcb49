//! Execution contexts and the trigger conditions evaluated against them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Key/value view of whatever a condition is evaluated against.
pub type Context = HashMap<String, serde_json::Value>;

/// Read a context value as a number (booleans map to 0/1).
pub fn numeric(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        other => other.as_f64(),
    }
}

/// All numeric entries of a context.
pub fn numeric_features(context: &Context) -> HashMap<String, f64> {
    context
        .iter()
        .filter_map(|(k, v)| numeric(v).map(|n| (k.clone(), n)))
        .collect()
}

/// Comparison operator used by a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    /// Strictly greater than
    Gt,
    /// Greater than or equal
    Ge,
    /// Strictly less than
    Lt,
    /// Less than or equal
    Le,
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Key is present, value ignored
    Exists,
}

impl ConditionOp {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionOp::Gt => ">",
            ConditionOp::Ge => ">=",
            ConditionOp::Lt => "<",
            ConditionOp::Le => "<=",
            ConditionOp::Eq => "==",
            ConditionOp::Ne => "!=",
            ConditionOp::Exists => "exists",
        }
    }
}

/// A trigger condition over one context key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Context key
    pub key: String,

    /// Comparison
    pub op: ConditionOp,

    /// Threshold the value is compared to
    pub value: serde_json::Value,
}

impl Condition {
    /// Create a numeric condition.
    pub fn new(key: impl Into<String>, op: ConditionOp, value: f64) -> Self {
        Self {
            key: key.into(),
            op,
            value: serde_json::json!(value),
        }
    }

    /// Condition that only requires the key to be present.
    pub fn exists(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            op: ConditionOp::Exists,
            value: serde_json::Value::Null,
        }
    }

    /// Condition matching an exact (possibly non-numeric) value.
    pub fn equals(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            op: ConditionOp::Eq,
            value,
        }
    }

    /// Numeric threshold, if the condition carries one.
    pub fn threshold(&self) -> Option<f64> {
        numeric(&self.value)
    }

    /// Evaluate against a context. Missing keys never match.
    pub fn evaluate(&self, context: &Context) -> bool {
        let Some(actual) = context.get(&self.key) else {
            return false;
        };

        match self.op {
            ConditionOp::Exists => true,
            ConditionOp::Eq => match (numeric(actual), numeric(&self.value)) {
                (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
                _ => actual == &self.value,
            },
            ConditionOp::Ne => match (numeric(actual), numeric(&self.value)) {
                (Some(a), Some(b)) => (a - b).abs() >= f64::EPSILON,
                _ => actual != &self.value,
            },
            op => {
                let (Some(a), Some(b)) = (numeric(actual), numeric(&self.value)) else {
                    return false;
                };
                match op {
                    ConditionOp::Gt => a > b,
                    ConditionOp::Ge => a >= b,
                    ConditionOp::Lt => a < b,
                    ConditionOp::Le => a <= b,
                    _ => false,
                }
            }
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.op {
            ConditionOp::Exists => write!(f, "{} exists", self.key),
            op => write!(f, "{} {} {}", self.key, op.as_str(), self.value),
        }
    }
}

/// Fraction of conditions satisfied by the context (1.0 when there are none).
pub fn match_ratio(conditions: &[Condition], context: &Context) -> f64 {
    if conditions.is_empty() {
        return 1.0;
    }
    let matched = conditions.iter().filter(|c| c.evaluate(context)).count();
    matched as f64 / conditions.len() as f64
}

/// Whether every condition holds.
pub fn all_match(conditions: &[Condition], context: &Context) -> bool {
    conditions.iter().all(|c| c.evaluate(context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Context {
        let mut c = Context::new();
        c.insert("severity".to_string(), json!(0.9));
        c.insert("type".to_string(), json!("energetic"));
        c.insert("stable".to_string(), json!(true));
        c
    }

    #[test]
    fn test_numeric_comparisons() {
        let c = ctx();
        assert!(Condition::new("severity", ConditionOp::Gt, 0.5).evaluate(&c));
        assert!(!Condition::new("severity", ConditionOp::Lt, 0.5).evaluate(&c));
        assert!(Condition::new("stable", ConditionOp::Eq, 1.0).evaluate(&c));
    }

    #[test]
    fn test_string_equality_and_exists() {
        let c = ctx();
        assert!(Condition::equals("type", json!("energetic")).evaluate(&c));
        assert!(!Condition::equals("type", json!("structural")).evaluate(&c));
        assert!(Condition::exists("type").evaluate(&c));
        assert!(!Condition::exists("missing").evaluate(&c));
    }

    #[test]
    fn test_match_ratio_partial() {
        let c = ctx();
        let conditions = vec![
            Condition::new("severity", ConditionOp::Gt, 0.5),
            Condition::new("severity", ConditionOp::Gt, 0.95),
        ];
        assert_eq!(match_ratio(&conditions, &c), 0.5);
        assert_eq!(match_ratio(&[], &c), 1.0);
        assert!(!all_match(&conditions, &c));
    }

    #[test]
    fn test_numeric_features_skip_strings() {
        let features = numeric_features(&ctx());
        assert_eq!(features.len(), 2);
        assert_eq!(features["stable"], 1.0);
    }
}
