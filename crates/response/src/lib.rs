//! Mutation handling - strategy selection, the response state machine,
//! and direct parameter/optimize/transform actions.

#![warn(missing_docs)]

pub mod config;
pub mod selector;
pub mod scheduler;
pub mod response;
pub mod handler;

pub use config::ResponseConfig;
pub use selector::{ResponseStrategy, StrategySelector, WeightedSelector, Selection};
pub use scheduler::{ResourceScheduler, Budget};
pub use response::{MutationResponse, ResponseStatus};
pub use handler::{MutationHandler, ResponseMetrics, SYSTEM_TARGET};
