//! Capacity-bounded strategy catalog.

use morphos_core::{MorphosError, Result, StrategyId};
use std::collections::HashMap;

use crate::strategy::Strategy;

/// Store of registered strategies, owned by the strategy manager.
#[derive(Debug)]
pub struct StrategyCatalog {
    strategies: HashMap<StrategyId, Strategy>,
    capacity: usize,
}

impl StrategyCatalog {
    /// Create an empty catalog.
    pub fn new(capacity: usize) -> Self {
        Self {
            strategies: HashMap::new(),
            capacity,
        }
    }

    /// Number of strategies.
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Whether the catalog is at capacity.
    pub fn is_full(&self) -> bool {
        self.strategies.len() >= self.capacity
    }

    /// Register a strategy, refusing duplicates and refusing when full.
    pub fn register(&mut self, strategy: Strategy) -> Result<()> {
        strategy.validate()?;
        if self.strategies.contains_key(&strategy.id) {
            return Err(MorphosError::validation(format!(
                "strategy {} is already registered",
                strategy.id
            )));
        }
        if self.is_full() {
            return Err(MorphosError::capacity("strategy catalog", self.capacity));
        }
        self.strategies.insert(strategy.id.clone(), strategy);
        Ok(())
    }

    /// Register a strategy, evicting the least effective one when full.
    ///
    /// Returns the evicted strategy, if any.
    pub fn register_evicting(&mut self, strategy: Strategy) -> Result<Option<Strategy>> {
        strategy.validate()?;
        if self.strategies.contains_key(&strategy.id) {
            return Err(MorphosError::validation(format!(
                "strategy {} is already registered",
                strategy.id
            )));
        }
        let mut evicted = None;
        if self.is_full() {
            let weakest = self.least_effective().map(|s| s.id.clone());
            if let Some(id) = weakest {
                evicted = self.strategies.remove(&id);
            }
        }
        self.strategies.insert(strategy.id.clone(), strategy);
        Ok(evicted)
    }

    /// Remove a strategy.
    pub fn unregister(&mut self, id: &StrategyId) -> Option<Strategy> {
        self.strategies.remove(id)
    }

    /// Get a strategy by id.
    pub fn get(&self, id: &StrategyId) -> Option<&Strategy> {
        self.strategies.get(id)
    }

    /// Get a strategy by id for mutation.
    pub fn get_mut(&mut self, id: &StrategyId) -> Option<&mut Strategy> {
        self.strategies.get_mut(id)
    }

    /// All strategies, highest priority first (ties by id).
    pub fn list(&self) -> Vec<&Strategy> {
        let mut list: Vec<&Strategy> = self.strategies.values().collect();
        list.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        list
    }

    /// Mutable iteration in no particular order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Strategy> {
        self.strategies.values_mut()
    }

    /// The strategy with the lowest effectiveness (oldest first on ties).
    pub fn least_effective(&self) -> Option<&Strategy> {
        self.strategies.values().min_by(|a, b| {
            a.effectiveness
                .partial_cmp(&b.effectiveness)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.created_at.cmp(&b.created_at))
        })
    }
}
