//! Morphos core data models.
//!
//! This crate defines the data structures and collaborator contracts shared
//! by the components of the self-adaptation loop.

#![warn(missing_docs)]

// Core identities
mod id;
mod error;

// Shared model
mod traits;
mod context;
mod action;
mod state;
mod observer;
mod mutation;
mod experience;

pub mod stats;

// Re-exports
pub use id::*;
pub use error::{MorphosError, Result};

pub use traits::{Identifiable, Scored, Timestamped};
pub use context::{Context, Condition, ConditionOp, numeric, numeric_features, match_ratio, all_match};
pub use action::{
    ActionKind, ActionTemplate, ActionStatus, ResponseAction, ActionOutcome, ActionExecutor,
    CONTEXT_SENTINEL,
};
pub use state::{SystemState, SystemPhase};
pub use observer::{RecognizedPattern, SystemObserver};
pub use mutation::{Mutation, MutationType, MutationStatus, PropertyChange};
pub use experience::{
    LearningExperience, ExperienceSource, STRATEGY_OUTCOME, OPTIMIZATION_OUTCOME,
};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
