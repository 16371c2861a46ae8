//! Rollout collection, the PPO epoch loop and the outer training loop

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::Array2;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use rlx_core::{
    ensure_dim, learning_rate_schedule, DiagnosticsAccumulator, EpisodeSummary, PPOConfig, RLError,
    Result, Schedule, Transition, UpdateStats, VecStep, VectorEnv,
};

use crate::buffer::{explained_variance, RolloutBuffer};
use crate::network::{ActorCritic, ActorCriticBuilder, ParameterSnapshot};
use crate::optim::{clip_grad_norm, Adam, AdamConfig};

/// Seed offset separating the sampling/shuffle stream from initialization
const RNG_STREAM_OFFSET: u64 = 0x9e37_79b9;

/// On-policy PPO trainer driving a vectorized environment
pub struct PPOTrainer {
    config: PPOConfig,
    env: Box<dyn VectorEnv>,
    network: ActorCritic,
    buffer: RolloutBuffer,
    optimizer: Adam,
    lr_schedule: Box<dyn Schedule>,
    rng: StdRng,
    observations: Option<Array2<f32>>,
    global_step: u64,
    rollout_start_step: u64,
    finished: Vec<EpisodeSummary>,
    stop: Arc<AtomicBool>,
}

impl std::fmt::Debug for PPOTrainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PPOTrainer")
            .field("config", &self.config)
            .field("nr_envs", &self.env.num_envs())
            .field("global_step", &self.global_step)
            .field("phase", &self.buffer.phase())
            .finish_non_exhaustive()
    }
}

impl PPOTrainer {
    /// Validate the config against the environment and set everything up
    pub fn new(config: PPOConfig, env: Box<dyn VectorEnv>) -> Result<Self> {
        config.validate()?;
        if env.num_envs() != config.nr_envs {
            return Err(RLError::Config(format!(
                "config asks for {} environments, vector env has {}",
                config.nr_envs,
                env.num_envs()
            )));
        }

        let network = ActorCriticBuilder::new(env.observation_space(), env.action_space())
            .with_config(&config)
            .build()?;
        let buffer = RolloutBuffer::new(
            config.nr_steps,
            config.nr_envs,
            network.obs_dim(),
            network.act_dim(),
        );
        let optimizer = Adam::new(network.num_parameters(), AdamConfig::default());
        let lr_schedule = learning_rate_schedule(
            config.learning_rate,
            config.anneal_learning_rate,
            config.total_timesteps,
        );
        let rng = StdRng::seed_from_u64(config.seed.wrapping_add(RNG_STREAM_OFFSET));

        tracing::info!(
            nr_envs = config.nr_envs,
            nr_steps = config.nr_steps,
            parameters = network.num_parameters(),
            "created PPO trainer"
        );

        Ok(Self {
            config,
            env,
            network,
            buffer,
            optimizer,
            lr_schedule,
            rng,
            observations: None,
            global_step: 0,
            rollout_start_step: 0,
            finished: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Training configuration
    #[must_use]
    pub fn config(&self) -> &PPOConfig {
        &self.config
    }

    /// Current network
    #[must_use]
    pub fn network(&self) -> &ActorCritic {
        &self.network
    }

    /// Environment steps taken so far, summed over instances
    #[must_use]
    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    /// Flag that stops [`PPOTrainer::train`] before its next rollout
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Serializable copy of the current parameters
    #[must_use]
    pub fn snapshot(&self) -> ParameterSnapshot {
        self.network.snapshot(self.global_step)
    }

    /// Fill the buffer with `nr_steps` batched transitions and run GAE.
    ///
    /// Returns the episodes that ended during the rollout.
    #[allow(clippy::cast_possible_truncation)]
    pub fn collect_rollout(&mut self) -> Result<&[EpisodeSummary]> {
        let nr_envs = self.config.nr_envs;
        let obs_dim = self.network.obs_dim();

        self.buffer.reset();
        self.finished.clear();
        self.rollout_start_step = self.global_step;

        let mut obs = match self.observations.take() {
            Some(obs) => obs,
            None => self.env.reset()?,
        };
        ensure_dim("reset observation rows", nr_envs, obs.nrows())?;
        ensure_dim("reset observation width", obs_dim, obs.ncols())?;

        for _ in 0..self.config.nr_steps {
            let (actions, log_probs) = self.network.get_action_logprob(&obs, &mut self.rng)?;
            let values = self.network.get_value(&obs)?;

            let step = self.env.step(&actions)?;
            step.validate(nr_envs, obs_dim)?;
            let dones = step.done_mask();
            let VecStep {
                observations: next_obs,
                rewards,
                finished,
                ..
            } = step;

            self.buffer.store(&Transition {
                observations: obs,
                actions,
                log_probs,
                values,
                rewards,
                dones,
            })?;
            self.finished.extend(finished);
            self.global_step += nr_envs as u64;
            obs = next_obs;
        }

        let bootstrap = self.network.get_value(&obs)?;
        self.buffer.compute_advantages(
            &bootstrap,
            self.config.gamma as f32,
            self.config.gae_lambda as f32,
        )?;
        self.observations = Some(obs);

        tracing::debug!(
            global_step = self.global_step,
            episodes = self.finished.len(),
            "collected rollout"
        );
        Ok(&self.finished)
    }

    /// Run up to `max_epochs` passes over the collected rollout.
    ///
    /// The rollout is consumed whatever the outcome; a further update needs a
    /// fresh [`PPOTrainer::collect_rollout`]. A non-finite loss or gradient
    /// aborts the update before that minibatch's optimizer step.
    #[allow(clippy::cast_possible_truncation)]
    pub fn update(&mut self) -> Result<UpdateStats> {
        let flat = self.buffer.flatten()?;
        self.buffer.finish()?;
        let n = flat.len();
        let learning_rate = self.lr_schedule.value(self.rollout_start_step);
        let lr = learning_rate as f32;
        let max_grad_norm = self.config.max_grad_norm as f32;
        let minibatch_size = self.config.minibatch_size;

        let mut indices: Vec<usize> = (0..n).collect();
        let mut params = self.network.parameters();
        let mut diagnostics = DiagnosticsAccumulator::default();
        let mut epochs = 0;
        let mut gradient_steps = 0;
        let mut early_stopped = false;
        let mut last_epoch_kl = 0.0;

        for epoch in 0..self.config.max_epochs {
            indices.shuffle(&mut self.rng);
            let mut epoch_kl = Vec::with_capacity(n.div_ceil(minibatch_size));

            for chunk in indices.chunks(minibatch_size) {
                let batch = flat.minibatch(chunk);
                let (output, gradients) = self.network.loss_and_grad(&batch)?;
                let mut grad = gradients.flatten();

                if !output.is_finite() || grad.iter().any(|g| !g.is_finite()) {
                    tracing::warn!(epoch, gradient_steps, ?output, "non-finite loss, aborting update");
                    return Err(RLError::NonFinite(format!(
                        "loss or gradient at epoch {epoch}, gradient step {gradient_steps}"
                    )));
                }

                let grad_norm = clip_grad_norm(&mut grad, max_grad_norm);
                self.optimizer.step(&mut params, &grad, lr)?;
                self.network.set_parameters(&params)?;

                tracing::debug!(
                    epoch,
                    total_loss = output.total_loss,
                    approx_kl = output.approx_kl,
                    clip_fraction = output.clip_fraction,
                    grad_norm,
                    "minibatch step"
                );
                diagnostics.push(&output.diagnostics());
                epoch_kl.push(f64::from(output.approx_kl));
                gradient_steps += 1;
            }

            epochs += 1;
            last_epoch_kl = self
                .config
                .delta_calc_operator
                .aggregate(&epoch_kl)
                .unwrap_or(0.0);

            if let Some(max_ratio_delta) = self.config.max_ratio_delta {
                if last_epoch_kl > max_ratio_delta {
                    tracing::info!(
                        epoch,
                        approx_kl = last_epoch_kl,
                        max_ratio_delta,
                        "approximate KL above limit, stopping epochs early"
                    );
                    early_stopped = true;
                    break;
                }
            }
        }

        let mean_episode_return = if self.finished.is_empty() {
            None
        } else {
            Some(self.finished.iter().map(|e| e.total_reward).sum::<f64>() / self.finished.len() as f64)
        };

        Ok(UpdateStats {
            diagnostics: diagnostics.mean(),
            epochs,
            gradient_steps,
            early_stopped,
            last_epoch_kl,
            learning_rate,
            explained_variance: explained_variance(&flat.values, &flat.returns),
            global_step: self.global_step,
            mean_episode_return,
        })
    }

    /// Alternate rollouts and updates until the timestep budget is spent or
    /// the stop flag is raised. `on_update` sees every update's stats.
    ///
    /// Returns the number of updates completed.
    pub fn train<F>(&mut self, mut on_update: F) -> Result<u64>
    where
        F: FnMut(&UpdateStats),
    {
        let nr_updates = self.config.nr_updates();
        tracing::info!(
            nr_updates,
            total_timesteps = self.config.total_timesteps,
            batch_size = self.config.batch_size(),
            "starting training"
        );

        let mut completed = 0;
        for update in 1..=nr_updates {
            if self.stop.load(Ordering::Relaxed) {
                tracing::info!(update, global_step = self.global_step, "stop requested");
                break;
            }
            self.collect_rollout()?;
            let stats = self.update()?;
            tracing::info!(
                update,
                nr_updates,
                global_step = stats.global_step,
                pg_loss = stats.diagnostics.pg_loss,
                v_loss = stats.diagnostics.v_loss,
                approx_kl = stats.last_epoch_kl,
                epochs = stats.epochs,
                episode_return = ?stats.mean_episode_return,
                "update complete"
            );
            on_update(&stats);
            completed += 1;
        }
        Ok(completed)
    }
}
