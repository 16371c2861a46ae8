//! Transitions stored during rollout collection

use ndarray::{Array1, Array2};

use crate::{ensure_dim, Result};

/// One timestep across all parallel environments
#[derive(Debug, Clone)]
pub struct Transition {
    /// Observations the actions were taken from, `(nr_envs, obs_dim)`
    pub observations: Array2<f32>,
    /// Sampled actions, `(nr_envs, act_dim)`
    pub actions: Array2<f32>,
    /// Joint log-probability of each action, `(nr_envs,)`
    pub log_probs: Array1<f32>,
    /// Critic estimate for each observation, `(nr_envs,)`
    pub values: Array1<f32>,
    /// Rewards received, `(nr_envs,)`
    pub rewards: Array1<f32>,
    /// 1.0 where the episode ended on this step, `(nr_envs,)`
    pub dones: Array1<f32>,
}

impl Transition {
    /// Check every field against `(nr_envs, obs_dim, act_dim)`
    pub fn validate(&self, nr_envs: usize, obs_dim: usize, act_dim: usize) -> Result<()> {
        ensure_dim("transition observation rows", nr_envs, self.observations.nrows())?;
        ensure_dim("transition observation width", obs_dim, self.observations.ncols())?;
        ensure_dim("transition action rows", nr_envs, self.actions.nrows())?;
        ensure_dim("transition action width", act_dim, self.actions.ncols())?;
        ensure_dim("transition log_probs", nr_envs, self.log_probs.len())?;
        ensure_dim("transition values", nr_envs, self.values.len())?;
        ensure_dim("transition rewards", nr_envs, self.rewards.len())?;
        ensure_dim("transition dones", nr_envs, self.dones.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RLError;

    fn transition(nr_envs: usize) -> Transition {
        Transition {
            observations: Array2::zeros((nr_envs, 3)),
            actions: Array2::zeros((nr_envs, 1)),
            log_probs: Array1::zeros(nr_envs),
            values: Array1::zeros(nr_envs),
            rewards: Array1::zeros(nr_envs),
            dones: Array1::zeros(nr_envs),
        }
    }

    #[test]
    fn test_validate_shapes() {
        assert!(transition(2).validate(2, 3, 1).is_ok());

        let mut bad = transition(2);
        bad.rewards = Array1::zeros(3);
        match bad.validate(2, 3, 1) {
            Err(RLError::DimensionMismatch { expected, actual, .. }) => {
                assert_eq!((expected, actual), (2, 3));
            }
            other => panic!("expected dimension mismatch, got {other:?}"),
        }
    }
}
