//! Single-instance environment interface

use ndarray::{Array1, ArrayView1};

use rlx_core::{ActionSpace, ObservationSpace, Result};

/// Outcome of one environment step
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Observation after the step
    pub observation: Array1<f32>,
    /// Reward for the transition
    pub reward: f32,
    /// Episode reached a terminal state
    pub terminated: bool,
    /// Episode was cut short (time limit)
    pub truncated: bool,
}

impl Step {
    /// Whether the episode is over for any reason
    #[must_use]
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// A single continuous-control environment
pub trait Environment: Send {
    /// Observation space
    fn observation_space(&self) -> ObservationSpace;

    /// Action space
    fn action_space(&self) -> ActionSpace;

    /// Start a new episode
    fn reset(&mut self) -> Result<Array1<f32>>;

    /// Apply one action. Out-of-range actions are clipped to the action space.
    fn step(&mut self, action: ArrayView1<f32>) -> Result<Step>;
}

impl<E: Environment + ?Sized> Environment for Box<E> {
    fn observation_space(&self) -> ObservationSpace {
        (**self).observation_space()
    }

    fn action_space(&self) -> ActionSpace {
        (**self).action_space()
    }

    fn reset(&mut self) -> Result<Array1<f32>> {
        (**self).reset()
    }

    fn step(&mut self, action: ArrayView1<f32>) -> Result<Step> {
        (**self).step(action)
    }
}
