//! Effectiveness scoring and automatic re-tuning.

use morphos_core::{numeric, stats, Condition, ConditionOp};

use crate::strategy::{ExecutionRecord, Strategy};

/// Per-step decay of an execution's weight, newest first.
pub const RECENCY_DECAY: f64 = 0.9;

/// Recency-weighted success rate over records ordered newest first.
///
/// The record at age `k` carries weight `0.9^k`. `None` without records.
pub fn effectiveness(records: &[&ExecutionRecord]) -> Option<f64> {
    if records.is_empty() {
        return None;
    }
    let mut weighted = 0.0;
    let mut total = 0.0;
    let mut weight = 1.0;
    for record in records {
        if record.success {
            weighted += weight;
        }
        total += weight;
        weight *= RECENCY_DECAY;
    }
    Some(weighted / total)
}

fn retune_condition(condition: &mut Condition, successes: &[&ExecutionRecord]) -> bool {
    if !matches!(
        condition.op,
        ConditionOp::Gt | ConditionOp::Ge | ConditionOp::Lt | ConditionOp::Le
    ) {
        return false;
    }
    let values: Vec<f64> = successes
        .iter()
        .filter_map(|r| r.context.get(&condition.key))
        .filter_map(numeric)
        .collect();

    match stats::optimal_threshold(&values) {
        Some(threshold) if condition.threshold() != Some(threshold) => {
            condition.value = serde_json::json!(threshold);
            true
        }
        _ => false,
    }
}

/// Move numeric thresholds and parameters toward the values seen in
/// successful executions (0.6 × mean + 0.4 × median).
///
/// Returns the number of adjustments made. Nothing changes when no
/// execution succeeded.
pub fn retune_strategy(strategy: &mut Strategy, records: &[&ExecutionRecord]) -> usize {
    let successes: Vec<&ExecutionRecord> = records.iter().copied().filter(|r| r.success).collect();
    if successes.is_empty() {
        return 0;
    }

    let mut adjusted = 0;
    for condition in strategy.conditions.iter_mut() {
        if retune_condition(condition, &successes) {
            adjusted += 1;
        }
    }
    for rule in strategy.rules.iter_mut() {
        for condition in rule.conditions.iter_mut() {
            if retune_condition(condition, &successes) {
                adjusted += 1;
            }
        }
    }

    for (name, value) in strategy.parameters.iter_mut() {
        let history: Vec<f64> = successes
            .iter()
            .filter_map(|r| r.context.get(name))
            .filter_map(numeric)
            .collect();
        if let Some(tuned) = stats::optimal_threshold(&history) {
            if tuned != *value {
                *value = tuned;
                adjusted += 1;
            }
        }
    }
    adjusted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::StrategyType;
    use morphos_core::{ActionKind, ActionTemplate, Context, ExecutionId, StrategyId};
    use std::collections::HashMap;

    fn record(success: bool, entropy: f64, gain: f64) -> ExecutionRecord {
        let now = chrono::Utc::now();
        ExecutionRecord {
            id: ExecutionId::new(),
            strategy_id: StrategyId::new("s"),
            started_at: now,
            finished_at: now,
            success,
            actions_run: 1,
            actions_failed: usize::from(!success),
            error: None,
            context: Context::from([
                ("entropy".to_string(), serde_json::json!(entropy)),
                ("gain".to_string(), serde_json::json!(gain)),
            ]),
            metrics: HashMap::new(),
        }
    }

    #[test]
    fn test_effectiveness_weights_recent_records() {
        let records = [record(false, 0.5, 1.0), record(true, 0.5, 1.0), record(true, 0.5, 1.0)];
        let refs: Vec<&ExecutionRecord> = records.iter().collect();
        let e = effectiveness(&refs).unwrap();
        assert!((e - 1.71 / 2.71).abs() < 1e-9);
        assert!(effectiveness(&[]).is_none());
    }

    #[test]
    fn test_retune_uses_successful_history() {
        let mut strategy = Strategy::new("s", "S", StrategyType::Adaptive, 50)
            .with_condition(Condition::new("entropy", ConditionOp::Gt, 0.1))
            .with_condition(Condition::exists("entropy"))
            .with_parameter("gain", 1.0)
            .with_action(ActionTemplate::new(ActionKind::Optimize, "system", 5));

        let records = [
            record(true, 0.4, 2.0),
            record(true, 0.6, 2.0),
            record(true, 0.8, 2.0),
            record(false, 0.1, 9.0),
        ];
        let refs: Vec<&ExecutionRecord> = records.iter().collect();

        assert_eq!(retune_strategy(&mut strategy, &refs), 2);
        // mean 0.6, median 0.6
        assert!((strategy.conditions[0].threshold().unwrap() - 0.6).abs() < 1e-9);
        assert_eq!(strategy.parameters["gain"], 2.0);
    }

    #[test]
    fn test_retune_without_successes_changes_nothing() {
        let mut strategy = Strategy::new("s", "S", StrategyType::Adaptive, 50)
            .with_condition(Condition::new("entropy", ConditionOp::Gt, 0.1));
        let records = [record(false, 0.9, 1.0)];
        let refs: Vec<&ExecutionRecord> = records.iter().collect();
        assert_eq!(retune_strategy(&mut strategy, &refs), 0);
        assert_eq!(strategy.conditions[0].threshold(), Some(0.1));
    }
}
