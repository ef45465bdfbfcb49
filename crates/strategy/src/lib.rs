//! Morphos strategy manager.
//!
//! Keeps a capacity-bounded catalog of strategies, executes the applicable
//! ones each cycle in priority order and tracks their effectiveness. The
//! learning and optimization components feed parameters, rules and new
//! strategies back through [`StrategyManager`].

#![warn(missing_docs)]

mod catalog;
mod config;
pub mod manager;
pub mod strategy;
pub mod tuning;

pub use catalog::StrategyCatalog;
pub use config::StrategyConfig;
pub use manager::{StrategyManager, StrategyMetrics};
pub use strategy::{
    ExecutionRecord, RuleSource, Strategy, StrategyEvent, StrategyEventKind, StrategyRule,
    StrategyType, INITIAL_EFFECTIVENESS, MAX_PRIORITY,
};
