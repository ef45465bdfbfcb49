//! Unique identifiers for Morphos entities.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Declares a ULID-backed identifier newtype.
macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Ulid);

        impl $name {
            /// Generate a new identifier
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }
    };
}

ulid_id!(
    /// Unique identifier for a Mutation
    MutationId
);
ulid_id!(
    /// Unique identifier for a MutationResponse
    ResponseId
);
ulid_id!(
    /// Unique identifier for a single response action
    ActionId
);
ulid_id!(
    /// Unique identifier for a MutationPattern
    PatternId
);
ulid_id!(
    /// Unique identifier for a Prediction
    PredictionId
);
ulid_id!(
    /// Unique identifier for a StrategyRule
    RuleId
);
ulid_id!(
    /// Unique identifier for a strategy execution record
    ExecutionId
);
ulid_id!(
    /// Unique identifier for a LearningExperience
    ExperienceId
);
ulid_id!(
    /// Unique identifier for a KnowledgeUnit
    KnowledgeId
);
ulid_id!(
    /// Unique identifier for an Optimization run
    OptimizationId
);

/// Identifier for a strategy, chosen by whoever registers it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StrategyId(pub String);

impl StrategyId {
    /// Create a strategy ID from a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Generate a unique ID for a synthesized strategy.
    pub fn generated(prefix: &str) -> Self {
        Self(format!("{}_{}", prefix, Ulid::new()))
    }

    /// Borrow the raw string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StrategyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StrategyId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier for an optimization objective, chosen by whoever registers it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectiveId(pub String);

impl ObjectiveId {
    /// Create an objective ID from a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the raw string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectiveId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ObjectiveId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier for a monitored entity (owned by the monitored system).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    /// Create an entity ID.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the raw string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ulid_ids_are_unique() {
        let a = MutationId::new();
        let b = MutationId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_ulid_id_round_trips_through_display() {
        let id = KnowledgeId::new();
        let parsed: KnowledgeId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_generated_strategy_id_keeps_prefix() {
        let id = StrategyId::generated("learned");
        assert!(id.as_str().starts_with("learned_"));
    }
}
