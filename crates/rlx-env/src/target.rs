//! Target seeking: output the point you are shown

use ndarray::{Array1, ArrayView1};
use rand::{rngs::StdRng, Rng, SeedableRng};

use rlx_core::{ensure_dim, ActionSpace, ObservationSpace, Result};

use crate::environment::{Environment, Step};

/// Episode length used when no limit is configured
pub const DEFAULT_MAX_EPISODE_STEPS: usize = 50;

/// Observation is a random target in `[-1, 1]^dim`; the reward is the
/// negative squared distance between action and target. A fresh target is
/// drawn after every step. Learnable within a few thousand steps, which
/// makes it the smoke test for the whole pipeline.
#[derive(Debug, Clone)]
pub struct TargetSeeking {
    dim: usize,
    target: Array1<f32>,
    rng: StdRng,
}

impl TargetSeeking {
    /// `dim`-dimensional target seeking
    #[must_use]
    pub fn new(dim: usize, seed: u64) -> Self {
        Self {
            dim,
            target: Array1::zeros(dim),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn draw(&mut self) -> Array1<f32> {
        let rng = &mut self.rng;
        self.target = Array1::from_shape_fn(self.dim, |_| rng.gen_range(-1.0..1.0));
        self.target.clone()
    }
}

impl Environment for TargetSeeking {
    fn observation_space(&self) -> ObservationSpace {
        ObservationSpace::FlatValues { dim: self.dim }
    }

    fn action_space(&self) -> ActionSpace {
        ActionSpace::Continuous {
            low: vec![-1.0; self.dim],
            high: vec![1.0; self.dim],
        }
    }

    fn reset(&mut self) -> Result<Array1<f32>> {
        Ok(self.draw())
    }

    fn step(&mut self, action: ArrayView1<f32>) -> Result<Step> {
        ensure_dim("target-seeking action", self.dim, action.len())?;
        let action = self.action_space().clip(action);
        let reward = -(&action - &self.target).mapv(|d| d * d).sum();
        Ok(Step {
            observation: self.draw(),
            reward,
            terminated: false,
            truncated: false,
        })
    }
}
