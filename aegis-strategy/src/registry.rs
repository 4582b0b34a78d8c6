//! Compile-time strategy registry.
//!
//! The dynamic module import of a scripting runtime becomes registration:
//! each strategy's factory is stored under its canonical name and the
//! runner looks it up from the configured `strategy.name`.

use std::collections::HashMap;

use tracing::debug;

use crate::builtin;
use crate::strategy::Strategy;

/// Factory producing a fresh strategy instance.
pub type StrategyFactory = fn() -> Box<dyn Strategy>;

/// Name → factory map.
pub struct StrategyRegistry {
    factories: HashMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in strategies.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("sma_cross", || Box::new(builtin::SmaCross::default()));
        registry.register("atr_risk", || Box::new(builtin::AtrRisk::default()));
        registry
    }

    pub fn register(&mut self, name: &str, factory: StrategyFactory) {
        debug!(name, "Strategy registered");
        self.factories.insert(name.to_string(), factory);
    }

    /// Instantiate by canonical name.
    pub fn create(&self, name: &str) -> Option<Box<dyn Strategy>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = StrategyRegistry::with_builtins();

        let sma = registry.create("sma_cross").unwrap();
        assert_eq!(sma.name(), "sma_cross");

        let atr = registry.create("atr_risk").unwrap();
        assert_eq!(atr.name(), "atr_risk");

        assert!(registry.create("does_not_exist").is_none());
    }

    #[test]
    fn factories_produce_fresh_instances() {
        let registry = StrategyRegistry::with_builtins();
        let a = registry.create("sma_cross").unwrap();
        let b = registry.create("sma_cross").unwrap();

        // Two loads must not share state
        assert_eq!(a.name(), b.name());
    }
}
