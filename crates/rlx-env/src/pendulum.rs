//! Inverted pendulum swing-up

use std::f32::consts::PI;

use ndarray::{arr1, Array1, ArrayView1};
use rand::{rngs::StdRng, Rng, SeedableRng};

use rlx_core::{ensure_dim, ActionSpace, ObservationSpace, Result};

use crate::environment::{Environment, Step};

const MAX_SPEED: f32 = 8.0;
const MAX_TORQUE: f32 = 2.0;
const DT: f32 = 0.05;
const G: f32 = 10.0;
const M: f32 = 1.0;
const L: f32 = 1.0;

/// Episode length used when no limit is configured
pub const DEFAULT_MAX_EPISODE_STEPS: usize = 200;

/// Torque-controlled pendulum that has to be swung up and balanced.
///
/// Observation `[cos θ, sin θ, θ̇]`, action a single torque in
/// `[-2, 2]`, reward `-(θ² + 0.1 θ̇² + 0.001 u²)` with θ measured from
/// upright. The pendulum never terminates; wrap it in
/// [`TimeLimit`](crate::TimeLimit) to get episodes.
#[derive(Debug, Clone)]
pub struct Pendulum {
    theta: f32,
    theta_dot: f32,
    rng: StdRng,
}

impl Pendulum {
    /// Pendulum with its own seeded RNG for initial states
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            theta: 0.0,
            theta_dot: 0.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn observation(&self) -> Array1<f32> {
        arr1(&[self.theta.cos(), self.theta.sin(), self.theta_dot])
    }
}

fn angle_normalize(x: f32) -> f32 {
    (x + PI).rem_euclid(2.0 * PI) - PI
}

impl Environment for Pendulum {
    fn observation_space(&self) -> ObservationSpace {
        ObservationSpace::FlatValues { dim: 3 }
    }

    fn action_space(&self) -> ActionSpace {
        ActionSpace::Continuous {
            low: vec![-MAX_TORQUE],
            high: vec![MAX_TORQUE],
        }
    }

    fn reset(&mut self) -> Result<Array1<f32>> {
        self.theta = self.rng.gen_range(-PI..PI);
        self.theta_dot = self.rng.gen_range(-1.0..1.0);
        Ok(self.observation())
    }

    fn step(&mut self, action: ArrayView1<f32>) -> Result<Step> {
        ensure_dim("pendulum action", 1, action.len())?;
        let torque = action[0].clamp(-MAX_TORQUE, MAX_TORQUE);

        let theta = angle_normalize(self.theta);
        let reward = -(theta.powi(2) + 0.1 * self.theta_dot.powi(2) + 0.001 * torque.powi(2));

        let theta_acc = (3.0 * G / (2.0 * L)) * self.theta.sin() + (3.0 / (M * L * L)) * torque;
        self.theta_dot = (self.theta_dot + theta_acc * DT).clamp(-MAX_SPEED, MAX_SPEED);
        self.theta = angle_normalize(self.theta + self.theta_dot * DT);

        Ok(Step {
            observation: self.observation(),
            reward,
            terminated: false,
            truncated: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_reset_is_seeded() {
        let mut a = Pendulum::new(7);
        let mut b = Pendulum::new(7);
        assert_eq!(a.reset().unwrap(), b.reset().unwrap());
        assert_ne!(a.reset().unwrap(), Pendulum::new(8).reset().unwrap());
    }

    #[test]
    fn test_observation_is_on_unit_circle() {
        let mut env = Pendulum::new(0);
        env.reset().unwrap();
        for _ in 0..50 {
            let step = env.step(arr1(&[1.5]).view()).unwrap();
            let o = &step.observation;
            assert_abs_diff_eq!(o[0] * o[0] + o[1] * o[1], 1.0, epsilon = 1e-5);
            assert!(o[2].abs() <= MAX_SPEED);
            assert!(!step.done());
        }
    }

    #[test]
    fn test_upright_at_rest_is_best() {
        let mut env = Pendulum::new(0);
        env.theta = 0.0;
        env.theta_dot = 0.0;
        let step = env.step(arr1(&[0.0]).view()).unwrap();
        assert_abs_diff_eq!(step.reward, 0.0);

        env.theta = PI / 2.0;
        env.theta_dot = 0.0;
        assert!(env.step(arr1(&[0.0]).view()).unwrap().reward < -2.0);
    }

    #[test]
    fn test_torque_is_clipped() {
        let mut clipped = Pendulum::new(0);
        let mut limit = Pendulum::new(0);
        clipped.reset().unwrap();
        limit.reset().unwrap();
        let a = clipped.step(arr1(&[50.0]).view()).unwrap();
        let b = limit.step(arr1(&[MAX_TORQUE]).view()).unwrap();
        assert_eq!(a, b);
        assert!(clipped.step(arr1(&[0.0, 0.0]).view()).is_err());
    }

    #[test]
    fn test_angle_normalize() {
        assert_abs_diff_eq!(angle_normalize(0.5), 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(angle_normalize(2.0 * PI + 0.5), 0.5, epsilon = 1e-5);
        assert_abs_diff_eq!(angle_normalize(-2.0 * PI - 0.5), -0.5, epsilon = 1e-5);
    }
}
