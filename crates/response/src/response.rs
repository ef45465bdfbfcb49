//! Response state machine.
//!
//! ```text
//! pending → executing → {completed | failed | timeout}
//! ```

use chrono::Duration;
use morphos_core::{
    Context, MorphosError, MutationId, ResponseAction, ResponseId, Result, StrategyId, Time,
};
use serde::{Deserialize, Serialize};

use crate::selector::ResponseStrategy;

/// Lifecycle of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// Created, no action dispatched yet
    Pending,
    /// Actions are being dispatched
    Executing,
    /// Every action completed
    Completed,
    /// Retry budget exhausted, or the mutation disappeared first
    Failed,
    /// Ran past the strategy's longest action timeout
    Timeout,
}

impl ResponseStatus {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Pending => "pending",
            ResponseStatus::Executing => "executing",
            ResponseStatus::Completed => "completed",
            ResponseStatus::Failed => "failed",
            ResponseStatus::Timeout => "timeout",
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResponseStatus::Completed | ResponseStatus::Failed | ResponseStatus::Timeout
        )
    }

    fn can_become(&self, next: ResponseStatus) -> bool {
        use ResponseStatus::*;
        matches!(
            (self, next),
            (Pending, Executing) | (Pending, Failed) | (Executing, Completed) | (Executing, Failed) | (Executing, Timeout)
        )
    }
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution instance applying a strategy to a mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationResponse {
    /// Unique identifier
    pub id: ResponseId,

    /// Mutation being handled
    pub mutation_id: MutationId,

    /// Strategy applied
    pub strategy_id: StrategyId,

    /// Instantiated actions
    pub actions: Vec<ResponseAction>,

    /// Current status
    pub status: ResponseStatus,

    /// Fraction of actions completed; never decreases
    pub progress: f64,

    /// Passes that ended with incomplete actions
    pub retry_count: u32,

    /// Retry budget
    pub max_retries: u32,

    /// Longest action timeout of the strategy, in seconds
    pub timeout_secs: u64,

    /// Creation time
    pub created_at: Time,

    /// First dispatch
    pub started_at: Option<Time>,

    /// Terminal transition
    pub completed_at: Option<Time>,

    /// Why the response did not complete
    pub error: Option<String>,
}

impl MutationResponse {
    /// Instantiate a response from a strategy's action templates.
    pub fn new(
        mutation_id: MutationId,
        strategy: &ResponseStrategy,
        context: &Context,
        default_retries: u32,
        now: Time,
    ) -> Self {
        Self {
            id: ResponseId::new(),
            mutation_id,
            strategy_id: strategy.id.clone(),
            actions: strategy.actions.iter().map(|t| t.instantiate(context)).collect(),
            status: ResponseStatus::Pending,
            progress: 0.0,
            retry_count: 0,
            max_retries: strategy.max_retries.unwrap_or(default_retries),
            timeout_secs: strategy.max_action_timeout_secs(),
            created_at: now,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Apply a status transition, rejecting illegal ones.
    pub fn transition(&mut self, next: ResponseStatus, now: Time) -> Result<()> {
        if !self.status.can_become(next) {
            return Err(MorphosError::validation(format!(
                "response {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        match next {
            ResponseStatus::Executing => self.started_at = Some(now),
            s if s.is_terminal() => self.completed_at = Some(now),
            _ => {}
        }
        Ok(())
    }

    /// Number of completed actions.
    pub fn completed_actions(&self) -> usize {
        self.actions.iter().filter(|a| a.is_completed()).count()
    }

    /// Whether every action completed.
    pub fn all_completed(&self) -> bool {
        self.actions.iter().all(|a| a.is_completed())
    }

    /// Recompute progress without ever moving it backwards.
    pub fn update_progress(&mut self) {
        let current = if self.actions.is_empty() {
            1.0
        } else {
            self.completed_actions() as f64 / self.actions.len() as f64
        };
        self.progress = self.progress.max(current);
    }

    /// Whether the response has run past its timeout at `now`.
    pub fn is_timed_out(&self, now: Time) -> bool {
        match self.started_at {
            Some(started) => now - started > Duration::seconds(self.timeout_secs as i64),
            None => false,
        }
    }

    /// Whether the retry budget is spent.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}
