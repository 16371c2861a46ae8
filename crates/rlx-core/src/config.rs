//! Training and environment configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{DeltaCalcOperator, RLError, Result};

/// Configuration for the PPO training engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PPOConfig {
    /// Overall training budget in environment steps (summed over instances)
    pub total_timesteps: u64,
    /// Number of parallel environment instances
    pub nr_envs: usize,
    /// Rollout length per instance
    pub nr_steps: usize,
    /// Adam step size
    pub learning_rate: f64,
    /// Decay the learning rate linearly to zero over `total_timesteps`
    pub anneal_learning_rate: bool,
    /// Discount factor
    pub gamma: f64,
    /// GAE trace-decay factor
    pub gae_lambda: f64,
    /// Upper bound on passes over each rollout
    pub max_epochs: usize,
    /// Rows per gradient step
    pub minibatch_size: usize,
    /// Stop the remaining epochs once the aggregated approximate KL exceeds this
    pub max_ratio_delta: Option<f64>,
    /// How per-minibatch approximate KL values are aggregated within an epoch
    pub delta_calc_operator: DeltaCalcOperator,
    /// PPO ratio clip range
    pub clip_range: f64,
    /// Entropy bonus coefficient
    pub ent_coef: f64,
    /// Value loss coefficient
    pub vf_coef: f64,
    /// Global gradient norm limit
    pub max_grad_norm: f64,
    /// Initial standard deviation of the action distribution
    pub std_dev: f64,
    /// Hidden layers in each of the actor and critic torsos
    pub nr_hidden_layers: usize,
    /// Units per hidden layer
    pub nr_hidden_units: usize,
    /// Seed for initialization, sampling and minibatch shuffles
    pub seed: u64,
}

impl Default for PPOConfig {
    fn default() -> Self {
        Self {
            total_timesteps: 1_000_000,
            nr_envs: 1,
            nr_steps: 2048,
            learning_rate: 3e-4,
            anneal_learning_rate: false,
            gamma: 0.99,
            gae_lambda: 0.95,
            max_epochs: 10,
            minibatch_size: 64,
            max_ratio_delta: None,
            delta_calc_operator: DeltaCalcOperator::Mean,
            clip_range: 0.2,
            ent_coef: 0.0,
            vf_coef: 0.5,
            max_grad_norm: 0.5,
            std_dev: 1.0,
            nr_hidden_layers: 2,
            nr_hidden_units: 64,
            seed: 1,
        }
    }
}

impl PPOConfig {
    /// Load from a JSON file; missing fields take their defaults.
    ///
    /// Not validated here, callers run [`PPOConfig::validate`] once any
    /// overrides are applied.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        tracing::debug!(path = %path.display(), "loaded training config");
        Ok(config)
    }

    /// Transitions per rollout, `nr_steps * nr_envs`
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.nr_steps * self.nr_envs
    }

    /// Number of rollout/update cycles the budget allows
    #[must_use]
    pub fn nr_updates(&self) -> u64 {
        self.total_timesteps / self.batch_size().max(1) as u64
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, value: f64) -> Result<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(RLError::Config(format!("{name} must be positive, got {value}")))
            }
        }
        fn non_negative(name: &str, value: f64) -> Result<()> {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(RLError::Config(format!("{name} must be >= 0, got {value}")))
            }
        }
        fn unit_interval(name: &str, value: f64) -> Result<()> {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(RLError::Config(format!("{name} must be in [0, 1], got {value}")))
            }
        }

        if self.nr_envs == 0 || self.nr_steps == 0 {
            return Err(RLError::Config("nr_envs and nr_steps must be >= 1".to_string()));
        }
        if self.max_epochs == 0 {
            return Err(RLError::Config("max_epochs must be >= 1".to_string()));
        }
        if self.minibatch_size == 0 || self.minibatch_size > self.batch_size() {
            return Err(RLError::Config(format!(
                "minibatch_size must be in 1..={}, got {}",
                self.batch_size(),
                self.minibatch_size
            )));
        }
        if self.nr_hidden_units == 0 {
            return Err(RLError::Config("nr_hidden_units must be >= 1".to_string()));
        }
        positive("learning_rate", self.learning_rate)?;
        positive("clip_range", self.clip_range)?;
        positive("max_grad_norm", self.max_grad_norm)?;
        positive("std_dev", self.std_dev)?;
        non_negative("ent_coef", self.ent_coef)?;
        non_negative("vf_coef", self.vf_coef)?;
        unit_interval("gamma", self.gamma)?;
        unit_interval("gae_lambda", self.gae_lambda)?;
        if let Some(delta) = self.max_ratio_delta {
            positive("max_ratio_delta", delta)?;
        }
        Ok(())
    }
}

/// Configuration handed to environment factories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Registered environment name
    pub name: String,
    /// Random seed; instance `i` is seeded with `seed + i`
    pub seed: u64,
    /// Episode length limit, environment default when absent
    pub max_episode_steps: Option<usize>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            name: "pendulum".to_string(),
            seed: 1,
            max_episode_steps: None,
        }
    }
}
