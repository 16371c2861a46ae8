//! Environment registry for creating vector environments by name

use std::collections::HashMap;

use rlx_core::{EnvironmentConfig, RLError, Result};

use crate::environment::Environment;
use crate::vector::SyncVectorEnv;
use crate::{pendulum, target, Pendulum, TargetSeeking, TimeLimit};

/// Dimension of the registered target-seeking task
const TARGET_SEEKING_DIM: usize = 2;

type EnvConstructor = Box<dyn Fn(&EnvironmentConfig, u64) -> Result<Box<dyn Environment>> + Send + Sync>;

struct EnvEntry {
    default_config: EnvironmentConfig,
    constructor: EnvConstructor,
}

/// Environment registry
#[derive(Default)]
pub struct EnvRegistry {
    /// Registered environments
    envs: HashMap<String, EnvEntry>,
}

impl EnvRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in environments
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            "pendulum",
            EnvironmentConfig {
                name: "pendulum".to_string(),
                max_episode_steps: Some(pendulum::DEFAULT_MAX_EPISODE_STEPS),
                ..EnvironmentConfig::default()
            },
            |config, seed| {
                let limit = config
                    .max_episode_steps
                    .unwrap_or(pendulum::DEFAULT_MAX_EPISODE_STEPS);
                Ok(Box::new(TimeLimit::new(Pendulum::new(seed), limit)))
            },
        );
        registry.register(
            "target-seeking",
            EnvironmentConfig {
                name: "target-seeking".to_string(),
                max_episode_steps: Some(target::DEFAULT_MAX_EPISODE_STEPS),
                ..EnvironmentConfig::default()
            },
            |config, seed| {
                let limit = config
                    .max_episode_steps
                    .unwrap_or(target::DEFAULT_MAX_EPISODE_STEPS);
                Ok(Box::new(TimeLimit::new(TargetSeeking::new(TARGET_SEEKING_DIM, seed), limit)))
            },
        );
        registry
    }

    /// Register an environment with its default config and a constructor
    /// taking the config and a per-instance seed
    pub fn register<F>(&mut self, name: impl Into<String>, default_config: EnvironmentConfig, constructor: F)
    where
        F: Fn(&EnvironmentConfig, u64) -> Result<Box<dyn Environment>> + Send + Sync + 'static,
    {
        self.envs.insert(
            name.into(),
            EnvEntry {
                default_config,
                constructor: Box::new(constructor),
            },
        );
    }

    /// Default config of a registered environment
    pub fn default_config(&self, name: &str) -> Result<EnvironmentConfig> {
        self.entry(name).map(|e| e.default_config.clone())
    }

    /// Create `nr_envs` instances of `config.name`, instance `i` seeded with
    /// `config.seed + i`, behind a synchronous vector env
    pub fn make(&self, config: &EnvironmentConfig, nr_envs: usize) -> Result<SyncVectorEnv> {
        let entry = self.entry(&config.name)?;
        let envs = (0..nr_envs as u64)
            .map(|i| (entry.constructor)(config, config.seed.wrapping_add(i)))
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(name = %config.name, nr_envs, seed = config.seed, "created vector env");
        SyncVectorEnv::new(envs)
    }

    /// List registered environments, sorted
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.envs.keys().cloned().collect();
        names.sort();
        names
    }

    fn entry(&self, name: &str) -> Result<&EnvEntry> {
        self.envs.get(name).ok_or_else(|| RLError::UnknownVariant {
            kind: "environment",
            name: name.to_string(),
        })
    }
}

impl std::fmt::Debug for EnvRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvRegistry").field("envs", &self.list()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rlx_core::{ActionSpace, VectorEnv};

    #[test]
    fn test_defaults() {
        let registry = EnvRegistry::with_defaults();
        assert_eq!(registry.list(), vec!["pendulum".to_string(), "target-seeking".to_string()]);
        assert_eq!(registry.default_config("pendulum").unwrap().max_episode_steps, Some(200));
    }

    #[test]
    fn test_unknown_name() {
        let registry = EnvRegistry::with_defaults();
        let config = EnvironmentConfig {
            name: "cartpole".to_string(),
            ..EnvironmentConfig::default()
        };
        assert!(matches!(
            registry.make(&config, 2),
            Err(RLError::UnknownVariant { kind: "environment", .. })
        ));
        assert!(registry.default_config("cartpole").is_err());
    }

    #[test]
    fn test_instances_get_distinct_seeds() {
        let registry = EnvRegistry::with_defaults();
        let config = registry.default_config("pendulum").unwrap();
        let mut env = registry.make(&config, 3).unwrap();
        assert_eq!(env.num_envs(), 3);
        assert_eq!(
            env.action_space(),
            ActionSpace::Continuous { low: vec![-2.0], high: vec![2.0] }
        );

        let obs = env.reset().unwrap();
        assert_ne!(obs.row(0), obs.row(1));

        // same config, same initial observations
        let again = registry.make(&config, 3).unwrap().reset().unwrap();
        assert_eq!(obs, again);
    }

    #[test]
    fn test_episode_limit_from_config() {
        let registry = EnvRegistry::with_defaults();
        let config = EnvironmentConfig {
            name: "target-seeking".to_string(),
            max_episode_steps: Some(2),
            ..EnvironmentConfig::default()
        };
        let mut env = registry.make(&config, 1).unwrap();
        env.reset().unwrap();
        let actions = ndarray::Array2::zeros((1, TARGET_SEEKING_DIM));
        assert!(!env.step(&actions).unwrap().dones[0]);
        assert!(env.step(&actions).unwrap().dones[0]);
    }
}
