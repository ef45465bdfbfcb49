//! Corrective actions and the outbound executor contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::context::Context;
use crate::id::ActionId;
use crate::Time;

/// Prefix marking a template parameter that is resolved from the execution context.
pub const CONTEXT_SENTINEL: char = '$';

/// What an action does to the monitored system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum ActionKind {
    /// Push a parameter change to a target
    AdjustParameter,
    /// Trigger a broader optimization pass
    Optimize,
    /// Request a structural transform
    Transform,
    /// Collaborator-defined action
    Custom(String),
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::AdjustParameter => write!(f, "adjust_parameter"),
            ActionKind::Optimize => write!(f, "optimize"),
            ActionKind::Transform => write!(f, "transform"),
            ActionKind::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

/// Reusable description of an action, instantiated per execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTemplate {
    /// Action kind
    pub kind: ActionKind,

    /// Target (parameter name, subsystem, entity)
    pub target: String,

    /// Parameters; strings starting with `$` name context keys
    pub parameters: HashMap<String, serde_json::Value>,

    /// Per-action timeout in seconds
    pub timeout_secs: u64,
}

impl ActionTemplate {
    /// Create a template with no parameters.
    pub fn new(kind: ActionKind, target: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            kind,
            target: target.into(),
            parameters: HashMap::new(),
            timeout_secs,
        }
    }

    /// Add a parameter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Resolve sentinel parameters against a context.
    ///
    /// Unresolvable references become `null` and are reported back by name.
    pub fn resolve(&self, context: &Context) -> (HashMap<String, serde_json::Value>, Vec<String>) {
        let mut unresolved = Vec::new();
        let parameters = self
            .parameters
            .iter()
            .map(|(name, value)| {
                let resolved = match value.as_str().and_then(|s| s.strip_prefix(CONTEXT_SENTINEL)) {
                    Some(key) => match context.get(key) {
                        Some(v) => v.clone(),
                        None => {
                            unresolved.push(key.to_string());
                            serde_json::Value::Null
                        }
                    },
                    None => value.clone(),
                };
                (name.clone(), resolved)
            })
            .collect();
        (parameters, unresolved)
    }

    /// Instantiate a concrete action from this template.
    pub fn instantiate(&self, context: &Context) -> ResponseAction {
        let (parameters, _) = self.resolve(context);
        ResponseAction::new(self.kind.clone(), self.target.clone(), parameters, self.timeout_secs)
    }
}

/// Lifecycle of a single action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Not started
    Pending,
    /// Dispatched to the executor
    Running,
    /// Finished successfully
    Completed,
    /// Last attempt failed (may be retried)
    Failed,
    /// Last attempt exceeded its timeout (may be retried)
    TimedOut,
}

/// One concrete action executed against the monitored system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseAction {
    /// Unique identifier
    pub id: ActionId,

    /// Action kind
    pub kind: ActionKind,

    /// Target
    pub target: String,

    /// Resolved parameters
    pub parameters: HashMap<String, serde_json::Value>,

    /// Current status
    pub status: ActionStatus,

    /// Per-action timeout in seconds
    pub timeout_secs: u64,

    /// Number of execution attempts
    pub attempts: u32,

    /// When the first attempt started
    pub started_at: Option<Time>,

    /// When the action completed
    pub completed_at: Option<Time>,

    /// Last error, if any
    pub error: Option<String>,
}

impl ResponseAction {
    /// Create a pending action.
    pub fn new(
        kind: ActionKind,
        target: impl Into<String>,
        parameters: HashMap<String, serde_json::Value>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            id: ActionId::new(),
            kind,
            target: target.into(),
            parameters,
            status: ActionStatus::Pending,
            timeout_secs,
            attempts: 0,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Numeric parameters only.
    pub fn numeric_parameters(&self) -> HashMap<String, f64> {
        self.parameters
            .iter()
            .filter_map(|(k, v)| crate::context::numeric(v).map(|n| (k.clone(), n)))
            .collect()
    }

    /// Whether the action finished successfully.
    pub fn is_completed(&self) -> bool {
        self.status == ActionStatus::Completed
    }
}

/// What the monitored system reported back for an action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Whether the action had its intended effect
    pub success: bool,

    /// Human-readable message
    pub message: String,

    /// Metrics observed after the action
    pub metrics: HashMap<String, f64>,
}

impl ActionOutcome {
    /// Successful outcome.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            metrics: HashMap::new(),
        }
    }

    /// Unsuccessful outcome.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            metrics: HashMap::new(),
        }
    }
}

/// Pushes actions out to the monitored system.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Execute one action. Implementations should return promptly; callers
    /// enforce `action.timeout_secs` on top.
    async fn execute(&self, action: &ResponseAction) -> anyhow::Result<ActionOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_sentinel_parameters() {
        let template = ActionTemplate::new(ActionKind::AdjustParameter, "damping", 10)
            .with_parameter("amount", json!("$severity"))
            .with_parameter("mode", json!("soft"))
            .with_parameter("source", json!("$missing"));

        let mut context = Context::new();
        context.insert("severity".to_string(), json!(0.7));

        let (params, unresolved) = template.resolve(&context);
        assert_eq!(params["amount"], json!(0.7));
        assert_eq!(params["mode"], json!("soft"));
        assert_eq!(params["source"], serde_json::Value::Null);
        assert_eq!(unresolved, vec!["missing".to_string()]);
    }

    #[test]
    fn test_instantiate_creates_pending_action() {
        let template = ActionTemplate::new(ActionKind::Transform, "lattice", 5);
        let action = template.instantiate(&Context::new());
        assert_eq!(action.status, ActionStatus::Pending);
        assert_eq!(action.attempts, 0);
        assert_eq!(action.timeout_secs, 5);
    }

    #[test]
    fn test_action_kind_display() {
        assert_eq!(ActionKind::AdjustParameter.to_string(), "adjust_parameter");
        assert_eq!(ActionKind::Custom("vent".into()).to_string(), "custom:vent");
    }
}
