//! Name-keyed table of training algorithms

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rlx_core::{PPOConfig, RLError, Result, UpdateStats, VectorEnv};

use crate::network::ParameterSnapshot;
use crate::trainer::PPOTrainer;

/// A trainer driven through the registry
pub trait Algorithm: Send {
    /// Registered name
    fn name(&self) -> &'static str;

    /// Run the full training loop, see [`PPOTrainer::train`]
    fn train(&mut self, on_update: &mut dyn FnMut(&UpdateStats)) -> Result<u64>;

    /// Environment steps taken so far
    fn global_step(&self) -> u64;

    /// Flag that stops training before the next rollout
    fn stop_handle(&self) -> Arc<AtomicBool>;

    /// Serializable copy of the current parameters
    fn snapshot(&self) -> ParameterSnapshot;
}

impl Algorithm for PPOTrainer {
    fn name(&self) -> &'static str {
        "ppo"
    }

    fn train(&mut self, on_update: &mut dyn FnMut(&UpdateStats)) -> Result<u64> {
        PPOTrainer::train(self, on_update)
    }

    fn global_step(&self) -> u64 {
        PPOTrainer::global_step(self)
    }

    fn stop_handle(&self) -> Arc<AtomicBool> {
        PPOTrainer::stop_handle(self)
    }

    fn snapshot(&self) -> ParameterSnapshot {
        PPOTrainer::snapshot(self)
    }
}

type AlgorithmConstructor = Box<dyn Fn(PPOConfig, Box<dyn VectorEnv>) -> Result<Box<dyn Algorithm>> + Send + Sync>;

/// Algorithm registry
#[derive(Default)]
pub struct AlgorithmRegistry {
    algorithms: HashMap<String, AlgorithmConstructor>,
}

impl AlgorithmRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in algorithm
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("ppo", |config, env| {
            Ok(Box::new(PPOTrainer::new(config, env)?) as Box<dyn Algorithm>)
        });
        registry
    }

    /// Register an algorithm, replacing any previous entry with that name
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(PPOConfig, Box<dyn VectorEnv>) -> Result<Box<dyn Algorithm>> + Send + Sync + 'static,
    {
        self.algorithms.insert(name.into(), Box::new(constructor));
    }

    /// Create an algorithm by name
    pub fn make(&self, name: &str, config: PPOConfig, env: Box<dyn VectorEnv>) -> Result<Box<dyn Algorithm>> {
        self.algorithms
            .get(name)
            .ok_or_else(|| RLError::UnknownVariant {
                kind: "algorithm",
                name: name.to_string(),
            })
            .and_then(|constructor| constructor(config, env))
    }

    /// Registered names, sorted
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.algorithms.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlgorithmRegistry")
            .field("algorithms", &self.list())
            .finish()
    }
}
