//! Routes strategy actions into the handler's direct entry points.

use async_trait::async_trait;
use morphos_core::{ActionExecutor, ActionKind, ActionOutcome, MorphosError, ResponseAction};
use morphos_response::MutationHandler;
use std::sync::Arc;

/// [`ActionExecutor`] that applies actions through a [`MutationHandler`], so
/// strategy-driven changes show up in the handler's parameter and action history.
///
/// A successful outcome reports the applied values and the handler's
/// stability right after the change.
pub struct HandlerActuator {
    handler: Arc<MutationHandler>,
}

impl HandlerActuator {
    /// Wrap a handler.
    pub fn new(handler: Arc<MutationHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl ActionExecutor for HandlerActuator {
    async fn execute(&self, action: &ResponseAction) -> anyhow::Result<ActionOutcome> {
        let parameters = action.numeric_parameters();
        let result = match &action.kind {
            ActionKind::AdjustParameter => {
                self.handler.adjust_parameter(&action.target, parameters.clone()).await
            }
            ActionKind::Optimize => self.handler.optimize(parameters.clone()).await,
            ActionKind::Transform => self.handler.transform(parameters.clone()).await,
            ActionKind::Custom(name) => anyhow::bail!("no route for custom action {}", name),
        };

        match result {
            Ok(id) => {
                let mut outcome = ActionOutcome::ok(format!("applied as {}", id));
                outcome.metrics = parameters;
                outcome
                    .metrics
                    .insert("stability".to_string(), self.handler.system_state().await.stability);
                Ok(outcome)
            }
            // Refusals by the monitored system are outcomes, not transport failures.
            Err(e @ MorphosError::Operation { .. }) => Ok(ActionOutcome::rejected(e.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morphos_core::{RecognizedPattern, SystemObserver, SystemState};
    use morphos_detection::MutationDetector;
    use serde_json::json;
    use std::collections::HashMap;

    struct QuietObserver;

    #[async_trait]
    impl SystemObserver for QuietObserver {
        async fn current_patterns(&self) -> anyhow::Result<Vec<RecognizedPattern>> {
            Ok(Vec::new())
        }

        async fn current_state(&self) -> anyhow::Result<SystemState> {
            Ok(SystemState::calm())
        }
    }

    /// Refuses every action on the `locked` target.
    struct GuardedExecutor;

    #[async_trait]
    impl ActionExecutor for GuardedExecutor {
        async fn execute(&self, action: &ResponseAction) -> anyhow::Result<ActionOutcome> {
            if action.target == "locked" {
                return Ok(ActionOutcome::rejected("locked"));
            }
            Ok(ActionOutcome::ok("applied"))
        }
    }

    fn actuator() -> (HandlerActuator, Arc<MutationHandler>) {
        let detector = Arc::new(MutationDetector::new(Arc::new(QuietObserver)));
        let handler = Arc::new(MutationHandler::new(detector, Arc::new(GuardedExecutor)));
        (HandlerActuator::new(handler.clone()), handler)
    }

    fn action(kind: ActionKind, target: &str) -> ResponseAction {
        ResponseAction::new(
            kind,
            target,
            HashMap::from([
                ("gain".to_string(), json!(0.4)),
                ("mode".to_string(), json!("soft")),
            ]),
            5,
        )
    }

    #[tokio::test]
    async fn test_adjust_parameter_lands_in_handler() {
        let (actuator, handler) = actuator();
        let outcome = actuator.execute(&action(ActionKind::AdjustParameter, "damping")).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.metrics["gain"], 0.4);
        assert_eq!(outcome.metrics["stability"], 1.0);
        let parameters = handler.parameters().await;
        assert_eq!(parameters["damping"], HashMap::from([("gain".to_string(), 0.4)]));
        assert_eq!(handler.metrics().await.direct_actions, 1);
    }

    #[tokio::test]
    async fn test_refusal_becomes_rejected_outcome() {
        let (actuator, handler) = actuator();
        let outcome = actuator.execute(&action(ActionKind::AdjustParameter, "locked")).await.unwrap();

        assert!(!outcome.success);
        assert!(handler.parameters().await.is_empty());
        assert_eq!(handler.metrics().await.actions_failed, 1);
    }

    #[tokio::test]
    async fn test_custom_and_invalid_actions_error() {
        let (actuator, _) = actuator();
        assert!(actuator
            .execute(&action(ActionKind::Custom("reseed".to_string()), "core"))
            .await
            .is_err());

        let empty = ResponseAction::new(ActionKind::Transform, "core", HashMap::new(), 5);
        assert!(actuator.execute(&empty).await.is_err());
    }
}
