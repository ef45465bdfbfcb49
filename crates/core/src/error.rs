//! Error taxonomy shared by every Morphos component.

/// Result type for Morphos operations.
pub type Result<T> = std::result::Result<T, MorphosError>;

/// Errors that can occur across the adaptation loop.
#[derive(Debug, thiserror::Error)]
pub enum MorphosError {
    /// Malformed registration (strategy, objective, rule) rejected before storage
    #[error("Validation error: {0}")]
    Validation(String),

    /// A catalog or queue is full
    #[error("{resource} at capacity ({capacity})")]
    Capacity {
        /// What is full
        resource: String,
        /// Configured capacity
        capacity: usize,
    },

    /// Unknown id
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of entity looked up
        kind: &'static str,
        /// The id that was requested
        id: String,
    },

    /// An outbound call (fetch, action execution) failed
    #[error("{context}: {reason}")]
    Operation {
        /// What was being attempted
        context: String,
        /// Underlying failure
        reason: String,
    },

    /// Invalid configuration at construction time
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MorphosError {
    /// Build a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Build a not-found error.
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Build a capacity error.
    pub fn capacity(resource: impl Into<String>, capacity: usize) -> Self {
        Self::Capacity {
            resource: resource.into(),
            capacity,
        }
    }

    /// Wrap an outbound failure with context.
    pub fn operation(context: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::Operation {
            context: context.into(),
            reason: format!("{:#}", err),
        }
    }

    /// Build a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
