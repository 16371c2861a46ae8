//! Vectorized environment interface consumed by the trainer

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::{ensure_dim, ActionSpace, ObservationSpace};

/// Result of advancing every environment instance by one step
#[derive(Debug, Clone)]
pub struct VecStep {
    /// Next observations, `(nr_envs, obs_dim)`. For instances that finished
    /// an episode this is already the first observation of the next one.
    pub observations: Array2<f32>,
    /// Rewards, `(nr_envs,)`
    pub rewards: Array1<f32>,
    /// Episode-ended flags, `(nr_envs,)`
    pub dones: Array1<bool>,
    /// Episodes that ended during this step
    pub finished: Vec<EpisodeSummary>,
}

impl VecStep {
    /// Check the step against the expected batch shape
    pub fn validate(&self, nr_envs: usize, obs_dim: usize) -> crate::Result<()> {
        ensure_dim("step observation rows", nr_envs, self.observations.nrows())?;
        ensure_dim("step observation width", obs_dim, self.observations.ncols())?;
        ensure_dim("step rewards", nr_envs, self.rewards.len())?;
        ensure_dim("step dones", nr_envs, self.dones.len())
    }

    /// Done flags as 0/1 floats
    #[must_use]
    pub fn done_mask(&self) -> Array1<f32> {
        self.dones.mapv(|d| if d { 1.0 } else { 0.0 })
    }
}

/// Summary of a completed episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    /// Index of the environment instance
    pub env_index: usize,
    /// Undiscounted episode return
    pub total_reward: f64,
    /// Number of steps
    pub steps: usize,
}

/// Batch of environment instances that advance together.
///
/// `step` returns only once every instance has stepped, so callers never see
/// a partial batch of observations.
pub trait VectorEnv: Send {
    /// Number of parallel instances
    fn num_envs(&self) -> usize;

    /// Observation space of a single instance
    fn observation_space(&self) -> ObservationSpace;

    /// Action space of a single instance
    fn action_space(&self) -> ActionSpace;

    /// Reset every instance and return the initial observation batch
    fn reset(&mut self) -> crate::Result<Array2<f32>>;

    /// Apply one action row per instance
    fn step(&mut self, actions: &Array2<f32>) -> crate::Result<VecStep>;
}

impl<E: VectorEnv + ?Sized> VectorEnv for Box<E> {
    fn num_envs(&self) -> usize {
        (**self).num_envs()
    }

    fn observation_space(&self) -> ObservationSpace {
        (**self).observation_space()
    }

    fn action_space(&self) -> ActionSpace {
        (**self).action_space()
    }

    fn reset(&mut self) -> crate::Result<Array2<f32>> {
        (**self).reset()
    }

    fn step(&mut self, actions: &Array2<f32>) -> crate::Result<VecStep> {
        (**self).step(actions)
    }
}
