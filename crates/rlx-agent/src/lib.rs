//! PPO agent for the rlx training engine
//!
//! This crate provides the learning side of the engine:
//! - Dense tanh networks with hand-written backpropagation
//! - The Gaussian actor-critic and its PPO loss
//! - Rollout storage with generalized advantage estimation
//! - Adam with global-norm gradient clipping
//! - The rollout/epoch training loop and an algorithm registry

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod buffer;
pub mod loss;
pub mod network;
pub mod nn;
pub mod optim;
pub mod registry;
pub mod trainer;

// Re-export the training pipeline
pub use buffer::{compute_gae, explained_variance, BufferPhase, FlatRollout, Minibatch, RolloutBuffer};
pub use loss::{normalize_advantages, LossOutput};
pub use network::{ActorCritic, ActorCriticBuilder, Gradients, ParameterSnapshot};
pub use optim::{clip_grad_norm, Adam, AdamConfig};
pub use registry::{Algorithm, AlgorithmRegistry};
pub use trainer::PPOTrainer;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{ActorCritic, ActorCriticBuilder, Algorithm, AlgorithmRegistry, PPOTrainer, RolloutBuffer};
    pub use rlx_core::prelude::*;
}
