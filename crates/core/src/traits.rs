//! Narrow capability traits shared by pattern-like entities.

use crate::Time;

/// Something with a stable identity.
pub trait Identifiable {
    /// Identifier type
    type Id: Clone + Eq + std::hash::Hash + std::fmt::Display;

    /// The entity's identifier.
    fn id(&self) -> &Self::Id;
}

/// Something carrying a strength and a stability score, both in [0, 1].
pub trait Scored {
    /// How pronounced the entity is.
    fn strength(&self) -> f64;

    /// How steady the entity has been over time.
    fn stability(&self) -> f64;
}

/// Something observed at a point in time.
pub trait Timestamped {
    /// When the entity was first seen.
    fn first_seen(&self) -> Time;

    /// When the entity was last refreshed.
    fn last_seen(&self) -> Time;
}
