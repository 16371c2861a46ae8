//! Environment wrappers

use ndarray::{Array1, ArrayView1};

use rlx_core::{ActionSpace, ObservationSpace, Result};

use crate::environment::{Environment, Step};

/// Time limit wrapper
#[derive(Debug, Clone)]
pub struct TimeLimit<E> {
    /// Inner environment
    pub env: E,
    /// Maximum steps
    pub max_steps: usize,
    /// Current step count
    pub steps: usize,
}

impl<E> TimeLimit<E> {
    /// Create a new time limit wrapper
    pub fn new(env: E, max_steps: usize) -> Self {
        Self {
            env,
            max_steps,
            steps: 0,
        }
    }
}

impl<E: Environment> Environment for TimeLimit<E> {
    fn observation_space(&self) -> ObservationSpace {
        self.env.observation_space()
    }

    fn action_space(&self) -> ActionSpace {
        self.env.action_space()
    }

    fn reset(&mut self) -> Result<Array1<f32>> {
        self.steps = 0;
        self.env.reset()
    }

    fn step(&mut self, action: ArrayView1<f32>) -> Result<Step> {
        self.steps += 1;
        let mut step = self.env.step(action)?;

        if self.steps >= self.max_steps && !step.terminated {
            step.truncated = true;
        }

        Ok(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pendulum;
    use ndarray::arr1;

    #[test]
    fn test_time_limit_truncates() {
        let mut env = TimeLimit::new(Pendulum::new(0), 3);
        env.reset().unwrap();
        let action = arr1(&[0.0]);
        assert!(!env.step(action.view()).unwrap().done());
        assert!(!env.step(action.view()).unwrap().done());
        let last = env.step(action.view()).unwrap();
        assert!(last.truncated);
        assert!(!last.terminated);

        env.reset().unwrap();
        assert!(!env.step(action.view()).unwrap().done());
    }
}
