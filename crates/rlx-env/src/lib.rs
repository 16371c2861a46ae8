//! Environments for the rlx training engine
//!
//! This crate provides:
//! - The single-instance [`Environment`] trait and wrappers
//! - [`SyncVectorEnv`], the synchronous implementation of
//!   [`rlx_core::VectorEnv`]
//! - Continuous-control tasks: [`Pendulum`] and [`TargetSeeking`]
//! - [`EnvRegistry`] for creating vector environments by name

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod environment;
pub mod pendulum;
pub mod registry;
pub mod target;
pub mod vector;
pub mod wrappers;

pub use environment::{Environment, Step};
pub use pendulum::Pendulum;
pub use registry::EnvRegistry;
pub use target::TargetSeeking;
pub use vector::SyncVectorEnv;
pub use wrappers::TimeLimit;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{EnvRegistry, Environment, Pendulum, SyncVectorEnv, TargetSeeking, TimeLimit};
    pub use rlx_core::prelude::*;
}
