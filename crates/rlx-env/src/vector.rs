//! Synchronous vector environment

use ndarray::{Array1, Array2};

use rlx_core::{
    ensure_dim, ActionSpace, EpisodeSummary, ObservationSpace, RLError, Result, VecStep, VectorEnv,
};

use crate::environment::Environment;

/// Steps a fixed set of environments one after another and returns once all
/// of them have stepped. Finished instances are reset immediately; their row
/// in the returned observations is the first observation of the new episode.
pub struct SyncVectorEnv {
    envs: Vec<Box<dyn Environment>>,
    observation_space: ObservationSpace,
    action_space: ActionSpace,
    obs_dim: usize,
    act_dim: usize,
    episode_returns: Vec<f64>,
    episode_lengths: Vec<usize>,
}

impl SyncVectorEnv {
    /// Wrap `envs`, which must agree on their spaces
    pub fn new(envs: Vec<Box<dyn Environment>>) -> Result<Self> {
        let first = envs
            .first()
            .ok_or_else(|| RLError::Config("vector env needs at least one instance".to_string()))?;
        let observation_space = first.observation_space();
        let action_space = first.action_space();
        if envs
            .iter()
            .any(|e| e.observation_space() != observation_space || e.action_space() != action_space)
        {
            return Err(RLError::Environment(
                "all instances of a vector env must share their spaces".to_string(),
            ));
        }

        let obs_dim = observation_space.require_flat()?;
        let act_dim = action_space.require_continuous()?;
        let n = envs.len();
        Ok(Self {
            envs,
            observation_space,
            action_space,
            obs_dim,
            act_dim,
            episode_returns: vec![0.0; n],
            episode_lengths: vec![0; n],
        })
    }
}

impl std::fmt::Debug for SyncVectorEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncVectorEnv")
            .field("num_envs", &self.envs.len())
            .field("observation_space", &self.observation_space)
            .field("action_space", &self.action_space)
            .finish_non_exhaustive()
    }
}

impl VectorEnv for SyncVectorEnv {
    fn num_envs(&self) -> usize {
        self.envs.len()
    }

    fn observation_space(&self) -> ObservationSpace {
        self.observation_space.clone()
    }

    fn action_space(&self) -> ActionSpace {
        self.action_space.clone()
    }

    fn reset(&mut self) -> Result<Array2<f32>> {
        let mut observations = Array2::zeros((self.envs.len(), self.obs_dim));
        for (i, env) in self.envs.iter_mut().enumerate() {
            let obs = env.reset()?;
            ensure_dim("reset observation", self.obs_dim, obs.len())?;
            observations.row_mut(i).assign(&obs);
        }
        self.episode_returns.fill(0.0);
        self.episode_lengths.fill(0);
        Ok(observations)
    }

    fn step(&mut self, actions: &Array2<f32>) -> Result<VecStep> {
        let n = self.envs.len();
        ensure_dim("vector env action rows", n, actions.nrows())?;
        ensure_dim("vector env action width", self.act_dim, actions.ncols())?;

        let mut observations = Array2::zeros((n, self.obs_dim));
        let mut rewards = Array1::zeros(n);
        let mut dones = Array1::from_elem(n, false);
        let mut finished = Vec::new();

        for (i, env) in self.envs.iter_mut().enumerate() {
            let step = env.step(actions.row(i))?;
            ensure_dim("step observation", self.obs_dim, step.observation.len())?;

            rewards[i] = step.reward;
            self.episode_returns[i] += f64::from(step.reward);
            self.episode_lengths[i] += 1;

            if step.done() {
                dones[i] = true;
                finished.push(EpisodeSummary {
                    env_index: i,
                    total_reward: self.episode_returns[i],
                    steps: self.episode_lengths[i],
                });
                self.episode_returns[i] = 0.0;
                self.episode_lengths[i] = 0;
                let obs = env.reset()?;
                ensure_dim("reset observation", self.obs_dim, obs.len())?;
                observations.row_mut(i).assign(&obs);
            } else {
                observations.row_mut(i).assign(&step.observation);
            }
        }

        Ok(VecStep {
            observations,
            rewards,
            dones,
            finished,
        })
    }
}
