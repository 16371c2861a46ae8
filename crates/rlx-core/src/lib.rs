//! Core types for the rlx on-policy training engine
//!
//! This crate provides the pieces shared by the agent and environment crates:
//! - Observation and action spaces
//! - The vectorized environment interface
//! - Training configuration
//! - The diagonal Normal action distribution
//! - Diagnostics records and learning-rate schedules

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod config;
pub mod diagnostics;
pub mod distribution;
pub mod environment;
pub mod error;
pub mod schedule;
pub mod space;
pub mod trajectory;

// Re-export core traits and types
pub use config::{EnvironmentConfig, PPOConfig};
pub use diagnostics::{DeltaCalcOperator, DiagnosticsAccumulator, LossDiagnostics, UpdateStats};
pub use distribution::Normal;
pub use environment::{EpisodeSummary, VecStep, VectorEnv};
pub use error::{ensure_dim, RLError, Result};
pub use schedule::{learning_rate_schedule, ConstantSchedule, LinearSchedule, Schedule};
pub use space::{ActionSpace, ObservationSpace};
pub use trajectory::Transition;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        ActionSpace, EnvironmentConfig, LossDiagnostics, ObservationSpace, PPOConfig, RLError,
        Result, UpdateStats, VecStep, VectorEnv,
    };
}
