//! Actor-critic network for continuous actions
//!
//! The actor maps observations to action means, a learned state-independent
//! `log_std` row gives the spread, and a separate critic maps observations to
//! state values. Dimensions are fixed by [`ActorCriticBuilder`]; nothing is
//! inferred from the data at call time.

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Axis};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use rlx_core::{ensure_dim, ActionSpace, Normal, ObservationSpace, PPOConfig, RLError, Result};

use crate::buffer::Minibatch;
use crate::loss::{clipped_surrogate, normalize_advantages, value_loss, LossOutput};
use crate::nn::{LinearGrad, Mlp};

/// Validating builder for [`ActorCritic`]
#[derive(Debug, Clone)]
pub struct ActorCriticBuilder {
    observation_space: ObservationSpace,
    action_space: ActionSpace,
    std_dev: f64,
    nr_hidden_layers: usize,
    nr_hidden_units: usize,
    clip_range: f64,
    ent_coef: f64,
    vf_coef: f64,
    seed: u64,
}

impl ActorCriticBuilder {
    /// Start from the environment's spaces with default hyperparameters
    #[must_use]
    pub fn new(observation_space: ObservationSpace, action_space: ActionSpace) -> Self {
        let defaults = PPOConfig::default();
        Self {
            observation_space,
            action_space,
            std_dev: defaults.std_dev,
            nr_hidden_layers: defaults.nr_hidden_layers,
            nr_hidden_units: defaults.nr_hidden_units,
            clip_range: defaults.clip_range,
            ent_coef: defaults.ent_coef,
            vf_coef: defaults.vf_coef,
            seed: defaults.seed,
        }
    }

    /// Take every network-related setting from a training config
    #[must_use]
    pub fn with_config(self, config: &PPOConfig) -> Self {
        self.std_dev(config.std_dev)
            .hidden_layers(config.nr_hidden_layers)
            .hidden_units(config.nr_hidden_units)
            .clip_range(config.clip_range)
            .ent_coef(config.ent_coef)
            .vf_coef(config.vf_coef)
            .seed(config.seed)
    }

    /// Initial action standard deviation
    #[must_use]
    pub fn std_dev(mut self, std_dev: f64) -> Self {
        self.std_dev = std_dev;
        self
    }

    /// Hidden layers per torso
    #[must_use]
    pub fn hidden_layers(mut self, depth: usize) -> Self {
        self.nr_hidden_layers = depth;
        self
    }

    /// Units per hidden layer
    #[must_use]
    pub fn hidden_units(mut self, width: usize) -> Self {
        self.nr_hidden_units = width;
        self
    }

    /// PPO ratio clip range
    #[must_use]
    pub fn clip_range(mut self, clip_range: f64) -> Self {
        self.clip_range = clip_range;
        self
    }

    /// Entropy coefficient
    #[must_use]
    pub fn ent_coef(mut self, ent_coef: f64) -> Self {
        self.ent_coef = ent_coef;
        self
    }

    /// Value loss coefficient
    #[must_use]
    pub fn vf_coef(mut self, vf_coef: f64) -> Self {
        self.vf_coef = vf_coef;
        self
    }

    /// Initialization seed
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Validate everything, then initialise the network
    #[allow(clippy::cast_possible_truncation)]
    pub fn build(self) -> Result<ActorCritic> {
        let obs_dim = self.observation_space.require_flat()?;
        let act_dim = self.action_space.require_continuous()?;
        if obs_dim == 0 || act_dim == 0 {
            return Err(RLError::Config(format!(
                "observation and action dims must be >= 1, got {obs_dim} and {act_dim}"
            )));
        }
        if self.nr_hidden_units == 0 {
            return Err(RLError::Config("nr_hidden_units must be >= 1".to_string()));
        }
        if !(self.std_dev.is_finite() && self.std_dev > 0.0) {
            return Err(RLError::Config(format!("std_dev must be positive, got {}", self.std_dev)));
        }
        if !(self.clip_range.is_finite() && self.clip_range > 0.0) {
            return Err(RLError::Config(format!(
                "clip_range must be positive, got {}",
                self.clip_range
            )));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let actor = Mlp::new(
            obs_dim,
            self.nr_hidden_units,
            self.nr_hidden_layers,
            act_dim,
            0.01,
            &mut rng,
        );
        let critic = Mlp::new(
            obs_dim,
            self.nr_hidden_units,
            self.nr_hidden_layers,
            1,
            1.0,
            &mut rng,
        );
        let log_std = Array1::from_elem(act_dim, self.std_dev.ln() as f32);

        tracing::debug!(
            obs_dim,
            act_dim,
            depth = self.nr_hidden_layers,
            width = self.nr_hidden_units,
            "built actor-critic"
        );

        Ok(ActorCritic {
            actor,
            critic,
            log_std,
            obs_dim,
            act_dim,
            clip_range: self.clip_range as f32,
            ent_coef: self.ent_coef as f32,
            vf_coef: self.vf_coef as f32,
        })
    }
}

/// Gradient of the total loss w.r.t. every parameter of an [`ActorCritic`]
#[derive(Debug, Clone)]
pub struct Gradients {
    /// Actor layers, input to output
    pub actor: Vec<LinearGrad>,
    /// Critic layers, input to output
    pub critic: Vec<LinearGrad>,
    /// `log_std` row
    pub log_std: Array1<f32>,
}

impl Gradients {
    /// Flatten in the order of [`ActorCritic::parameters`]
    #[must_use]
    pub fn flatten(&self) -> Vec<f32> {
        let mut flat = Vec::new();
        for g in self.actor.iter().chain(&self.critic) {
            flat.extend(g.weight.iter().copied());
            flat.extend(g.bias.iter().copied());
        }
        flat.extend(self.log_std.iter().copied());
        flat
    }
}

/// Serializable copy of the network parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    /// Actor torso and head
    pub actor: Mlp,
    /// Critic torso and head
    pub critic: Mlp,
    /// Log standard deviation row
    pub log_std: Array1<f32>,
    /// Environment steps taken when the snapshot was made
    pub global_step: u64,
    /// Wall-clock creation time
    pub created_at: DateTime<Utc>,
}

/// Gaussian actor with a separate critic
#[derive(Debug, Clone)]
pub struct ActorCritic {
    actor: Mlp,
    critic: Mlp,
    log_std: Array1<f32>,
    obs_dim: usize,
    act_dim: usize,
    clip_range: f32,
    ent_coef: f32,
    vf_coef: f32,
}

impl ActorCritic {
    /// Observation width
    #[must_use]
    pub fn obs_dim(&self) -> usize {
        self.obs_dim
    }

    /// Action width
    #[must_use]
    pub fn act_dim(&self) -> usize {
        self.act_dim
    }

    /// PPO ratio clip range
    #[must_use]
    pub fn clip_range(&self) -> f32 {
        self.clip_range
    }

    /// Learned log standard deviation
    #[must_use]
    pub fn log_std(&self) -> &Array1<f32> {
        &self.log_std
    }

    /// Action distribution for a batch of observations
    pub fn distribution(&self, obs: &Array2<f32>) -> Result<Normal> {
        let mean = self.actor.forward(obs)?;
        Normal::from_log_std(mean, &self.log_std)
    }

    /// Sample an action per row and return it with its joint log-probability
    pub fn get_action_logprob<R: Rng + ?Sized>(
        &self,
        obs: &Array2<f32>,
        rng: &mut R,
    ) -> Result<(Array2<f32>, Array1<f32>)> {
        let dist = self.distribution(obs)?;
        let action = dist.sample(rng);
        let log_prob = dist.log_prob_sum(&action)?;
        Ok((action, log_prob))
    }

    /// Joint log-probability and entropy of the given actions
    pub fn get_logprob_entropy(
        &self,
        obs: &Array2<f32>,
        action: &Array2<f32>,
    ) -> Result<(Array1<f32>, Array1<f32>)> {
        ensure_dim("action rows", obs.nrows(), action.nrows())?;
        let dist = self.distribution(obs)?;
        Ok((dist.log_prob_sum(action)?, dist.entropy_sum()))
    }

    /// Critic estimate per row
    pub fn get_value(&self, obs: &Array2<f32>) -> Result<Array1<f32>> {
        Ok(self.critic.forward(obs)?.column(0).to_owned())
    }

    /// PPO loss of a minibatch under the current parameters
    pub fn loss(
        &self,
        states: &Array2<f32>,
        actions: &Array2<f32>,
        old_log_probs: &Array1<f32>,
        returns: &Array1<f32>,
        advantages: &Array1<f32>,
    ) -> Result<LossOutput> {
        self.check_batch(states, actions, old_log_probs, returns, advantages)?;
        let (new_log_prob, entropy) = self.get_logprob_entropy(states, actions)?;
        let new_value = self.get_value(states)?;

        let adv = normalize_advantages(advantages);
        let surrogate = clipped_surrogate(&new_log_prob, old_log_probs, &adv, self.clip_range)?;
        let (v_loss, _) = value_loss(&new_value, returns)?;
        let entropy_loss = entropy.mean().unwrap_or(0.0);

        Ok(self.combine(surrogate.pg_loss, v_loss, entropy_loss, surrogate.approx_kl, surrogate.clip_fraction))
    }

    /// PPO loss of a minibatch and the gradient of its total
    pub fn loss_and_grad(&self, batch: &Minibatch) -> Result<(LossOutput, Gradients)> {
        let Minibatch {
            observations,
            actions,
            old_log_probs,
            advantages,
            returns,
        } = batch;
        self.check_batch(observations, actions, old_log_probs, returns, advantages)?;
        let n = observations.nrows();

        let (mean, actor_cache) = self.actor.forward_cached(observations)?;
        let (value_out, critic_cache) = self.critic.forward_cached(observations)?;
        let new_value = value_out.column(0).to_owned();

        let dist = Normal::from_log_std(mean.clone(), &self.log_std)?;
        let new_log_prob = dist.log_prob_sum(actions)?;
        let entropy = dist.entropy_sum();

        let adv = normalize_advantages(advantages);
        let surrogate = clipped_surrogate(&new_log_prob, old_log_probs, &adv, self.clip_range)?;
        let (v_loss, grad_value) = value_loss(&new_value, returns)?;
        let entropy_loss = entropy.mean().unwrap_or(0.0);
        let output = self.combine(
            surrogate.pg_loss,
            v_loss,
            entropy_loss,
            surrogate.approx_kl,
            surrogate.clip_fraction,
        );

        // log N(a; mu, sigma) = -z^2/2 - log_std - c with z = (a - mu) / sigma:
        //   d/d mu      = z / sigma
        //   d/d log_std = z^2 - 1
        let std = self.log_std.mapv(f32::exp);
        let mut z = actions - &mean;
        z /= &std;
        let g = surrogate.grad_log_prob.view().insert_axis(Axis(1));

        let mut grad_mean = &z / &std;
        grad_mean *= &g;

        let mut grad_log_std = (z.mapv(|v| v * v - 1.0) * &g).sum_axis(Axis(0));
        // entropy_loss = mean_i sum_j (log_std_j + c)
        grad_log_std -= self.ent_coef;

        let mut grad_value_out = Array2::zeros((n, 1));
        grad_value_out
            .column_mut(0)
            .assign(&(grad_value * self.vf_coef));

        let gradients = Gradients {
            actor: self.actor.backward(&actor_cache, &grad_mean)?,
            critic: self.critic.backward(&critic_cache, &grad_value_out)?,
            log_std: grad_log_std,
        };
        Ok((output, gradients))
    }

    fn combine(&self, pg_loss: f32, v_loss: f32, entropy_loss: f32, approx_kl: f32, clip_fraction: f32) -> LossOutput {
        LossOutput {
            total_loss: pg_loss + self.vf_coef * v_loss - self.ent_coef * entropy_loss,
            pg_loss,
            v_loss,
            entropy_loss,
            approx_kl,
            clip_fraction,
        }
    }

    fn check_batch(
        &self,
        states: &Array2<f32>,
        actions: &Array2<f32>,
        old_log_probs: &Array1<f32>,
        returns: &Array1<f32>,
        advantages: &Array1<f32>,
    ) -> Result<()> {
        let n = states.nrows();
        ensure_dim("minibatch observation width", self.obs_dim, states.ncols())?;
        ensure_dim("minibatch action width", self.act_dim, actions.ncols())?;
        ensure_dim("minibatch action rows", n, actions.nrows())?;
        ensure_dim("minibatch old_log_probs", n, old_log_probs.len())?;
        ensure_dim("minibatch returns", n, returns.len())?;
        ensure_dim("minibatch advantages", n, advantages.len())
    }

    /// Number of trainable scalars
    #[must_use]
    pub fn num_parameters(&self) -> usize {
        self.actor.num_parameters() + self.critic.num_parameters() + self.log_std.len()
    }

    /// All parameters as one flat vector: actor layers, critic layers, `log_std`
    #[must_use]
    pub fn parameters(&self) -> Vec<f32> {
        let mut flat = Vec::with_capacity(self.num_parameters());
        for layer in self.actor.layers().iter().chain(self.critic.layers()) {
            flat.extend(layer.weight.iter().copied());
            flat.extend(layer.bias.iter().copied());
        }
        flat.extend(self.log_std.iter().copied());
        flat
    }

    /// Overwrite every parameter from a flat vector laid out like [`ActorCritic::parameters`]
    pub fn set_parameters(&mut self, params: &[f32]) -> Result<()> {
        ensure_dim("parameter vector", self.num_parameters(), params.len())?;
        let mut source = params.iter().copied();
        for layer in self.actor.layers_mut().iter_mut().chain(self.critic.layers_mut().iter_mut()) {
            for (dst, src) in layer.weight.iter_mut().chain(layer.bias.iter_mut()).zip(&mut source) {
                *dst = src;
            }
        }
        for (dst, src) in self.log_std.iter_mut().zip(&mut source) {
            *dst = src;
        }
        Ok(())
    }

    /// Serializable copy of the parameters
    #[must_use]
    pub fn snapshot(&self, global_step: u64) -> ParameterSnapshot {
        ParameterSnapshot {
            actor: self.actor.clone(),
            critic: self.critic.clone(),
            log_std: self.log_std.clone(),
            global_step,
            created_at: Utc::now(),
        }
    }

    /// Load parameters from a snapshot of an identically shaped network
    pub fn restore(&mut self, snapshot: &ParameterSnapshot) -> Result<()> {
        let same_shape = |a: &Mlp, b: &Mlp| {
            a.layers().len() == b.layers().len()
                && a.layers()
                    .iter()
                    .zip(b.layers())
                    .all(|(x, y)| x.weight.dim() == y.weight.dim())
        };
        if !same_shape(&self.actor, &snapshot.actor) || !same_shape(&self.critic, &snapshot.critic) {
            return Err(RLError::InvalidState("snapshot layout does not match network".to_string()));
        }
        ensure_dim("snapshot log_std", self.act_dim, snapshot.log_std.len())?;
        self.actor = snapshot.actor.clone();
        self.critic = snapshot.critic.clone();
        self.log_std = snapshot.log_std.clone();
        Ok(())
    }

    /// Whether every parameter is finite
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.parameters().iter().all(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;

    fn network(seed: u64) -> ActorCritic {
        ActorCriticBuilder::new(
            ObservationSpace::FlatValues { dim: 3 },
            ActionSpace::symmetric(2, 1.0).unwrap(),
        )
        .hidden_layers(2)
        .hidden_units(8)
        .std_dev(0.5)
        .ent_coef(0.01)
        .seed(seed)
        .build()
        .unwrap()
    }

    fn batch(net: &ActorCritic, rows: usize) -> Minibatch {
        let mut rng = StdRng::seed_from_u64(99);
        let observations = Array2::from_shape_fn((rows, 3), |_| rng.gen_range(-1.0..1.0));
        let (actions, log_probs) = net.get_action_logprob(&observations, &mut rng).unwrap();
        let old_log_probs = log_probs.mapv(|lp| lp + rng.gen_range(-0.05..0.05));
        Minibatch {
            observations,
            actions,
            old_log_probs,
            advantages: Array1::from_shape_fn(rows, |_| rng.gen_range(-2.0..2.0)),
            returns: Array1::from_shape_fn(rows, |_| rng.gen_range(-1.0..1.0)),
        }
    }

    #[test]
    fn test_builder_rejects_unsupported_spaces() {
        let image = ObservationSpace::Image { height: 8, width: 8, channels: 1 };
        let continuous = ActionSpace::symmetric(1, 1.0).unwrap();
        assert!(matches!(
            ActorCriticBuilder::new(image, continuous.clone()).build(),
            Err(RLError::Config(_))
        ));

        let flat = ObservationSpace::FlatValues { dim: 3 };
        assert!(matches!(
            ActorCriticBuilder::new(flat.clone(), ActionSpace::Discrete { n: 2 }).build(),
            Err(RLError::Config(_))
        ));
        assert!(matches!(
            ActorCriticBuilder::new(flat.clone(), continuous.clone()).hidden_units(0).build(),
            Err(RLError::Config(_))
        ));
        assert!(matches!(
            ActorCriticBuilder::new(flat, continuous).std_dev(0.0).build(),
            Err(RLError::Config(_))
        ));
    }

    #[test]
    fn test_initial_log_std() {
        let net = network(0);
        for &v in net.log_std() {
            assert_abs_diff_eq!(v, 0.5_f32.ln(), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_shapes() {
        let net = network(1);
        let obs = Array2::zeros((4, 3));
        let mut rng = StdRng::seed_from_u64(5);
        let (action, log_prob) = net.get_action_logprob(&obs, &mut rng).unwrap();
        assert_eq!(action.dim(), (4, 2));
        assert_eq!(log_prob.len(), 4);
        assert_eq!(net.get_value(&obs).unwrap().len(), 4);
        assert!(net.get_value(&Array2::zeros((4, 2))).is_err());
    }

    #[test]
    fn test_sampled_log_prob_matches_reevaluation() {
        let net = network(2);
        let obs = arr2(&[[0.1, 0.2, 0.3], [-0.5, 0.0, 0.9]]);
        let mut rng = StdRng::seed_from_u64(6);
        let (action, log_prob) = net.get_action_logprob(&obs, &mut rng).unwrap();
        let (again, _) = net.get_logprob_entropy(&obs, &action).unwrap();
        for (a, b) in log_prob.iter().zip(again.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let net = network(3);
        let b = batch(&net, 6);
        let before = net.parameters();

        assert_eq!(net.get_value(&b.observations).unwrap(), net.get_value(&b.observations).unwrap());
        let first = net.get_logprob_entropy(&b.observations, &b.actions).unwrap();
        let second = net.get_logprob_entropy(&b.observations, &b.actions).unwrap();
        assert_eq!(first, second);

        net.loss(&b.observations, &b.actions, &b.old_log_probs, &b.returns, &b.advantages)
            .unwrap();
        assert_eq!(net.parameters(), before);
    }

    #[test]
    fn test_loss_is_finite_and_consistent() {
        let net = network(4);
        let b = batch(&net, 16);
        let out = net
            .loss(&b.observations, &b.actions, &b.old_log_probs, &b.returns, &b.advantages)
            .unwrap();
        assert!(out.is_finite());
        assert_abs_diff_eq!(
            out.total_loss,
            out.pg_loss + 0.5 * out.v_loss - 0.01 * out.entropy_loss,
            epsilon = 1e-6
        );

        let (with_grad, _) = net.loss_and_grad(&b).unwrap();
        assert_abs_diff_eq!(with_grad.total_loss, out.total_loss, epsilon = 1e-6);
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let net = network(5);
        let b = batch(&net, 8);
        let (_, grads) = net.loss_and_grad(&b).unwrap();
        let analytic = grads.flatten();
        let params = net.parameters();
        assert_eq!(analytic.len(), params.len());

        let total = |p: &[f32]| {
            let mut probe = net.clone();
            probe.set_parameters(p).unwrap();
            probe
                .loss(&b.observations, &b.actions, &b.old_log_probs, &b.returns, &b.advantages)
                .unwrap()
                .total_loss
        };

        let eps = 1e-2;
        let stride = (params.len() / 40).max(1);
        let mut checked: Vec<usize> = (0..params.len()).step_by(stride).collect();
        // always include the log_std entries
        checked.extend(params.len() - 2..params.len());
        for i in checked {
            let mut plus = params.clone();
            plus[i] += eps;
            let mut minus = params.clone();
            minus[i] -= eps;
            let numeric = (total(&plus) - total(&minus)) / (2.0 * eps);
            assert_abs_diff_eq!(analytic[i], numeric, epsilon = 5e-3);
        }
    }

    #[test]
    fn test_parameter_round_trip_and_snapshot() {
        let mut net = network(6);
        let other = network(7);
        assert_ne!(net.parameters(), other.parameters());

        net.set_parameters(&other.parameters()).unwrap();
        assert_eq!(net.parameters(), other.parameters());
        assert!(net.set_parameters(&[0.0; 3]).is_err());

        let snapshot = network(8).snapshot(42);
        assert_eq!(snapshot.global_step, 42);
        net.restore(&snapshot).unwrap();
        assert_eq!(net.parameters(), network(8).parameters());
        assert!(net.is_finite());
    }
}
