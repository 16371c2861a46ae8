//! Fixed-length rollout storage and generalized advantage estimation

use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, Axis, Zip};

use rlx_core::{ensure_dim, RLError, Result, Transition};

/// Lifecycle of a [`RolloutBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferPhase {
    /// Accepting transitions
    Collecting,
    /// Advantages computed, read-only until consumed
    Ready,
    /// Consumed by an update, only a reset leaves this phase
    Done,
}

/// Rollout of `nr_steps` transitions, each `nr_envs` wide
#[derive(Debug, Clone)]
pub struct RolloutBuffer {
    nr_steps: usize,
    nr_envs: usize,
    obs_dim: usize,
    act_dim: usize,
    observations: Array3<f32>,
    actions: Array3<f32>,
    log_probs: Array2<f32>,
    values: Array2<f32>,
    rewards: Array2<f32>,
    dones: Array2<f32>,
    advantages: Array2<f32>,
    returns: Array2<f32>,
    pos: usize,
    phase: BufferPhase,
}

impl RolloutBuffer {
    /// Allocate storage for one rollout
    #[must_use]
    pub fn new(nr_steps: usize, nr_envs: usize, obs_dim: usize, act_dim: usize) -> Self {
        Self {
            nr_steps,
            nr_envs,
            obs_dim,
            act_dim,
            observations: Array3::zeros((nr_steps, nr_envs, obs_dim)),
            actions: Array3::zeros((nr_steps, nr_envs, act_dim)),
            log_probs: Array2::zeros((nr_steps, nr_envs)),
            values: Array2::zeros((nr_steps, nr_envs)),
            rewards: Array2::zeros((nr_steps, nr_envs)),
            dones: Array2::zeros((nr_steps, nr_envs)),
            advantages: Array2::zeros((nr_steps, nr_envs)),
            returns: Array2::zeros((nr_steps, nr_envs)),
            pos: 0,
            phase: BufferPhase::Collecting,
        }
    }

    /// Rollout length
    #[must_use]
    pub fn nr_steps(&self) -> usize {
        self.nr_steps
    }

    /// Parallel environment count
    #[must_use]
    pub fn nr_envs(&self) -> usize {
        self.nr_envs
    }

    /// Number of stored timesteps
    #[must_use]
    pub fn len(&self) -> usize {
        self.pos
    }

    /// Whether nothing has been stored since the last reset
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    /// Whether every timestep slot is filled
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.pos == self.nr_steps
    }

    /// Current lifecycle phase
    #[must_use]
    pub fn phase(&self) -> BufferPhase {
        self.phase
    }

    /// Append one timestep
    pub fn store(&mut self, transition: &Transition) -> Result<()> {
        if self.phase != BufferPhase::Collecting {
            return Err(RLError::InvalidState(
                "cannot store into a buffer whose advantages were computed".to_string(),
            ));
        }
        if self.is_full() {
            return Err(RLError::InvalidState(format!(
                "rollout buffer full ({} steps)",
                self.nr_steps
            )));
        }
        transition.validate(self.nr_envs, self.obs_dim, self.act_dim)?;

        let t = self.pos;
        self.observations.slice_mut(s![t, .., ..]).assign(&transition.observations);
        self.actions.slice_mut(s![t, .., ..]).assign(&transition.actions);
        self.log_probs.row_mut(t).assign(&transition.log_probs);
        self.values.row_mut(t).assign(&transition.values);
        self.rewards.row_mut(t).assign(&transition.rewards);
        self.dones.row_mut(t).assign(&transition.dones);
        self.pos += 1;
        Ok(())
    }

    /// Run GAE over the full rollout, `bootstrap_value` being the critic's
    /// estimate for the observation that follows the last stored step.
    pub fn compute_advantages(
        &mut self,
        bootstrap_value: &Array1<f32>,
        gamma: f32,
        gae_lambda: f32,
    ) -> Result<()> {
        if !self.is_full() {
            return Err(RLError::InvalidState(format!(
                "rollout incomplete: {} of {} steps stored",
                self.pos, self.nr_steps
            )));
        }
        let (advantages, returns) = compute_gae(
            self.rewards.view(),
            self.values.view(),
            self.dones.view(),
            bootstrap_value.view(),
            gamma,
            gae_lambda,
        )?;
        self.advantages = advantages;
        self.returns = returns;
        self.phase = BufferPhase::Ready;
        Ok(())
    }

    /// Advantages, `(nr_steps, nr_envs)`
    #[must_use]
    pub fn advantages(&self) -> &Array2<f32> {
        &self.advantages
    }

    /// Returns, `(nr_steps, nr_envs)`
    #[must_use]
    pub fn returns(&self) -> &Array2<f32> {
        &self.returns
    }

    /// Stored value estimates, `(nr_steps, nr_envs)`
    #[must_use]
    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    /// Flatten the time and environment axes for minibatching
    pub fn flatten(&self) -> Result<FlatRollout> {
        match self.phase {
            BufferPhase::Ready => {}
            BufferPhase::Collecting => {
                return Err(RLError::InvalidState(
                    "advantages have not been computed for this rollout".to_string(),
                ))
            }
            BufferPhase::Done => {
                return Err(RLError::InvalidState(
                    "rollout was already used by an update".to_string(),
                ))
            }
        }
        let n = self.nr_steps * self.nr_envs;
        let flat2 = |a: &Array2<f32>| Array1::from_iter(a.iter().copied());
        let flat3 = |a: &Array3<f32>, width: usize| {
            Array2::from_shape_vec((n, width), a.iter().copied().collect())
                .map_err(|e| RLError::InvalidState(e.to_string()))
        };
        Ok(FlatRollout {
            observations: flat3(&self.observations, self.obs_dim)?,
            actions: flat3(&self.actions, self.act_dim)?,
            log_probs: flat2(&self.log_probs),
            values: flat2(&self.values),
            advantages: flat2(&self.advantages),
            returns: flat2(&self.returns),
        })
    }

    /// Mark a ready rollout as consumed
    pub fn finish(&mut self) -> Result<()> {
        if self.phase != BufferPhase::Ready {
            return Err(RLError::InvalidState(format!(
                "cannot finish a rollout in phase {:?}",
                self.phase
            )));
        }
        self.phase = BufferPhase::Done;
        Ok(())
    }

    /// Start a new collection cycle
    pub fn reset(&mut self) {
        self.pos = 0;
        self.phase = BufferPhase::Collecting;
    }
}

/// Backward GAE recursion over `(nr_steps, nr_envs)` arrays:
///
/// ```text
/// delta[t]     = reward[t] + gamma * (1 - done[t]) * value[t+1] - value[t]
/// advantage[t] = delta[t] + gamma * lambda * (1 - done[t]) * advantage[t+1]
/// return[t]    = advantage[t] + value[t]
/// ```
///
/// with `value[nr_steps] = bootstrap` and `advantage[nr_steps] = 0`.
/// Columns are independent.
pub fn compute_gae(
    rewards: ArrayView2<f32>,
    values: ArrayView2<f32>,
    dones: ArrayView2<f32>,
    bootstrap: ArrayView1<f32>,
    gamma: f32,
    gae_lambda: f32,
) -> Result<(Array2<f32>, Array2<f32>)> {
    let (nr_steps, nr_envs) = rewards.dim();
    ensure_dim("gae value rows", nr_steps, values.nrows())?;
    ensure_dim("gae value columns", nr_envs, values.ncols())?;
    ensure_dim("gae done rows", nr_steps, dones.nrows())?;
    ensure_dim("gae done columns", nr_envs, dones.ncols())?;
    ensure_dim("gae bootstrap", nr_envs, bootstrap.len())?;

    let mut advantages = Array2::zeros((nr_steps, nr_envs));
    let mut last_gae = Array1::<f32>::zeros(nr_envs);
    let mut next_value = bootstrap.to_owned();

    for t in (0..nr_steps).rev() {
        Zip::from(&mut last_gae)
            .and(&mut next_value)
            .and(rewards.row(t))
            .and(values.row(t))
            .and(dones.row(t))
            .for_each(|gae, next_v, &r, &v, &d| {
                let not_done = 1.0 - d;
                let delta = r + gamma * not_done * *next_v - v;
                *gae = delta + gamma * gae_lambda * not_done * *gae;
                *next_v = v;
            });
        advantages.row_mut(t).assign(&last_gae);
    }

    let returns = &advantages + &values;
    Ok((advantages, returns))
}

/// Rollout with time and environment axes merged, row `t * nr_envs + e`
#[derive(Debug, Clone)]
pub struct FlatRollout {
    /// `(n, obs_dim)`
    pub observations: Array2<f32>,
    /// `(n, act_dim)`
    pub actions: Array2<f32>,
    /// `(n,)`
    pub log_probs: Array1<f32>,
    /// `(n,)`
    pub values: Array1<f32>,
    /// `(n,)`
    pub advantages: Array1<f32>,
    /// `(n,)`
    pub returns: Array1<f32>,
}

impl FlatRollout {
    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.log_probs.len()
    }

    /// Whether the rollout is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log_probs.is_empty()
    }

    /// Gather the rows at `indices`
    #[must_use]
    pub fn minibatch(&self, indices: &[usize]) -> Minibatch {
        Minibatch {
            observations: self.observations.select(Axis(0), indices),
            actions: self.actions.select(Axis(0), indices),
            old_log_probs: self.log_probs.select(Axis(0), indices),
            advantages: self.advantages.select(Axis(0), indices),
            returns: self.returns.select(Axis(0), indices),
        }
    }
}

/// Rows fed to one evaluation of the PPO loss
#[derive(Debug, Clone)]
pub struct Minibatch {
    /// `(b, obs_dim)`
    pub observations: Array2<f32>,
    /// `(b, act_dim)`
    pub actions: Array2<f32>,
    /// Log-probabilities under the collecting policy, `(b,)`
    pub old_log_probs: Array1<f32>,
    /// Raw (unnormalized) advantages, `(b,)`
    pub advantages: Array1<f32>,
    /// Return targets, `(b,)`
    pub returns: Array1<f32>,
}

/// Fraction of return variance explained by the value estimates
#[must_use]
pub fn explained_variance(values: &Array1<f32>, returns: &Array1<f32>) -> f32 {
    let var = |a: &Array1<f32>| {
        let mean = a.mean().unwrap_or(0.0);
        a.mapv(|x| (x - mean).powi(2)).mean().unwrap_or(0.0)
    };
    let var_returns = var(returns);
    if var_returns == 0.0 {
        return f32::NAN;
    }
    1.0 - var(&(returns - values)) / var_returns
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    fn transition(nr_envs: usize, reward: f32, value: f32, done: f32) -> Transition {
        Transition {
            observations: Array2::zeros((nr_envs, 2)),
            actions: Array2::zeros((nr_envs, 1)),
            log_probs: Array1::zeros(nr_envs),
            values: Array1::from_elem(nr_envs, value),
            rewards: Array1::from_elem(nr_envs, reward),
            dones: Array1::from_elem(nr_envs, done),
        }
    }

    #[test]
    fn test_closed_form_gae() {
        let mut buffer = RolloutBuffer::new(3, 2, 2, 1);
        for _ in 0..3 {
            buffer.store(&transition(2, 1.0, 0.0, 0.0)).unwrap();
        }
        buffer.compute_advantages(&arr1(&[0.0, 0.0]), 0.99, 0.95).unwrap();

        let expected = [2.8250, 1.9405, 1.0000];
        for (t, &e) in expected.iter().enumerate() {
            for env in 0..2 {
                assert_abs_diff_eq!(buffer.advantages()[[t, env]], e, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn test_returns_are_advantage_plus_value() {
        let mut buffer = RolloutBuffer::new(4, 3, 2, 1);
        let rewards = [0.5, -1.0, 2.0, 0.0];
        let values = [0.3, 0.1, -0.4, 1.2];
        let dones = [0.0, 1.0, 0.0, 0.0];
        for t in 0..4 {
            buffer.store(&transition(3, rewards[t], values[t], dones[t])).unwrap();
        }
        buffer.compute_advantages(&arr1(&[0.7, -0.2, 0.0]), 0.99, 0.95).unwrap();

        let sum = buffer.advantages() + buffer.values();
        for (r, s) in buffer.returns().iter().zip(sum.iter()) {
            assert_abs_diff_eq!(r, s, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_lambda_zero_gives_td_error() {
        let rewards = ndarray::arr2(&[[1.0, 0.5], [0.0, 2.0], [3.0, -1.0]]);
        let values = ndarray::arr2(&[[0.2, 0.4], [0.6, -0.3], [1.0, 0.9]]);
        let dones = ndarray::arr2(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]);
        let bootstrap = arr1(&[0.8, 5.0]);
        let gamma = 0.9;

        let (adv, _) =
            compute_gae(rewards.view(), values.view(), dones.view(), bootstrap.view(), gamma, 0.0).unwrap();

        for t in 0..3 {
            for e in 0..2 {
                let next_v = if t == 2 { bootstrap[e] } else { values[[t + 1, e]] };
                let delta = rewards[[t, e]] + gamma * (1.0 - dones[[t, e]]) * next_v - values[[t, e]];
                assert_abs_diff_eq!(adv[[t, e]], delta, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_done_truncates_bootstrap() {
        let rewards = ndarray::arr2(&[[1.0], [1.0]]);
        let values = ndarray::arr2(&[[0.0], [0.0]]);
        let dones = ndarray::arr2(&[[0.0], [1.0]]);
        let (adv, _) =
            compute_gae(rewards.view(), values.view(), dones.view(), arr1(&[100.0]).view(), 1.0, 1.0).unwrap();
        assert_abs_diff_eq!(adv[[1, 0]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(adv[[0, 0]], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_lifecycle() {
        let mut buffer = RolloutBuffer::new(1, 1, 2, 1);
        assert!(buffer.flatten().is_err());
        assert!(buffer.compute_advantages(&arr1(&[0.0]), 0.99, 0.95).is_err());

        buffer.store(&transition(1, 1.0, 0.0, 0.0)).unwrap();
        assert!(buffer.store(&transition(1, 1.0, 0.0, 0.0)).is_err());
        assert!(buffer.compute_advantages(&arr1(&[0.0, 0.0]), 0.99, 0.95).is_err());

        buffer.compute_advantages(&arr1(&[0.0]), 0.99, 0.95).unwrap();
        assert_eq!(buffer.phase(), BufferPhase::Ready);
        assert!(buffer.store(&transition(1, 1.0, 0.0, 0.0)).is_err());
        assert_eq!(buffer.flatten().unwrap().len(), 1);

        buffer.finish().unwrap();
        assert_eq!(buffer.phase(), BufferPhase::Done);
        assert!(matches!(buffer.flatten(), Err(RLError::InvalidState(_))));
        assert!(buffer.finish().is_err());
        assert!(buffer.store(&transition(1, 1.0, 0.0, 0.0)).is_err());

        buffer.reset();
        assert!(buffer.is_empty());
        assert_eq!(buffer.phase(), BufferPhase::Collecting);
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let mut buffer = RolloutBuffer::new(2, 2, 2, 1);
        assert!(matches!(
            buffer.store(&transition(3, 0.0, 0.0, 0.0)),
            Err(RLError::DimensionMismatch { .. })
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_flatten_row_order_and_minibatch() {
        let mut buffer = RolloutBuffer::new(2, 2, 2, 1);
        for t in 0..2 {
            let mut tr = transition(2, 0.0, 0.0, 0.0);
            for e in 0..2 {
                let id = (t * 2 + e) as f32;
                tr.observations.row_mut(e).fill(id);
                tr.log_probs[e] = id;
            }
            buffer.store(&tr).unwrap();
        }
        buffer.compute_advantages(&arr1(&[0.0, 0.0]), 0.99, 0.95).unwrap();
        let flat = buffer.flatten().unwrap();
        assert_eq!(flat.log_probs, arr1(&[0.0, 1.0, 2.0, 3.0]));
        assert_eq!(flat.observations.row(2).to_vec(), vec![2.0, 2.0]);

        let mb = flat.minibatch(&[3, 0]);
        assert_eq!(mb.old_log_probs, arr1(&[3.0, 0.0]));
        assert_eq!(mb.observations.nrows(), 2);
    }

    #[test]
    fn test_explained_variance() {
        let returns = arr1(&[1.0, 2.0, 3.0]);
        assert_abs_diff_eq!(explained_variance(&returns, &returns), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(explained_variance(&arr1(&[2.0, 2.0, 2.0]), &returns), 0.0, epsilon = 1e-6);
        assert!(explained_variance(&returns, &arr1(&[1.0, 1.0, 1.0])).is_nan());
    }
}
