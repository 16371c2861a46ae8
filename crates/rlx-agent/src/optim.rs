//! Adam optimizer over a flat parameter vector and global-norm clipping

use rlx_core::{ensure_dim, Result};

/// Adam hyperparameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamConfig {
    /// First-moment decay
    pub beta1: f32,
    /// Second-moment decay
    pub beta2: f32,
    /// Denominator fuzz
    pub epsilon: f32,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

/// Adam state for a fixed number of parameters
#[derive(Debug, Clone)]
pub struct Adam {
    config: AdamConfig,
    momentum: Vec<f32>,
    velocity: Vec<f32>,
    t: i32,
}

impl Adam {
    /// Create state for `n_params` parameters
    #[must_use]
    pub fn new(n_params: usize, config: AdamConfig) -> Self {
        Self {
            config,
            momentum: vec![0.0; n_params],
            velocity: vec![0.0; n_params],
            t: 0,
        }
    }

    /// Steps taken so far
    #[must_use]
    pub fn steps(&self) -> i32 {
        self.t
    }

    /// Apply one bias-corrected Adam step in place
    pub fn step(&mut self, params: &mut [f32], gradients: &[f32], lr: f32) -> Result<()> {
        ensure_dim("adam parameters", self.momentum.len(), params.len())?;
        ensure_dim("adam gradients", self.momentum.len(), gradients.len())?;

        let AdamConfig {
            beta1,
            beta2,
            epsilon,
        } = self.config;
        self.t += 1;
        let bias1 = 1.0 - beta1.powi(self.t);
        let bias2 = 1.0 - beta2.powi(self.t);

        for (((p, &g), m), v) in params
            .iter_mut()
            .zip(gradients)
            .zip(self.momentum.iter_mut())
            .zip(self.velocity.iter_mut())
        {
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            let m_hat = *m / bias1;
            let v_hat = *v / bias2;
            *p -= lr * m_hat / (v_hat.sqrt() + epsilon);
        }
        Ok(())
    }
}

/// Scale `gradients` so their global L2 norm is at most `max_norm`.
/// Returns the norm before clipping.
pub fn clip_grad_norm(gradients: &mut [f32], max_norm: f32) -> f32 {
    let norm = gradients.iter().map(|g| g * g).sum::<f32>().sqrt();
    if norm > max_norm {
        let scale = max_norm / (norm + 1e-6);
        for g in gradients.iter_mut() {
            *g *= scale;
        }
    }
    norm
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_first_step_moves_by_lr() {
        let mut adam = Adam::new(2, AdamConfig::default());
        let mut params = vec![1.0, -1.0];
        adam.step(&mut params, &[0.5, -3.0], 0.1).unwrap();
        // bias-corrected first step is lr * sign(g)
        assert_abs_diff_eq!(params[0], 0.9, epsilon = 1e-5);
        assert_abs_diff_eq!(params[1], -0.9, epsilon = 1e-5);
        assert_eq!(adam.steps(), 1);
    }

    #[test]
    fn test_minimizes_quadratic() {
        let mut adam = Adam::new(1, AdamConfig::default());
        let mut params = vec![5.0];
        for _ in 0..2000 {
            let grad = [2.0 * (params[0] - 2.0)];
            adam.step(&mut params, &grad, 0.05).unwrap();
        }
        assert_abs_diff_eq!(params[0], 2.0, epsilon = 1e-2);
    }

    #[test]
    fn test_length_mismatch() {
        let mut adam = Adam::new(2, AdamConfig::default());
        let mut params = vec![0.0; 3];
        assert!(adam.step(&mut params, &[0.0; 3], 0.1).is_err());
    }

    #[test]
    fn test_clip_grad_norm() {
        let mut grads = vec![3.0, 4.0];
        let norm = clip_grad_norm(&mut grads, 1.0);
        assert_abs_diff_eq!(norm, 5.0);
        let clipped = grads.iter().map(|g| g * g).sum::<f32>().sqrt();
        assert_abs_diff_eq!(clipped, 1.0, epsilon = 1e-5);

        let mut small = vec![0.1, 0.1];
        clip_grad_norm(&mut small, 1.0);
        assert_eq!(small, vec![0.1, 0.1]);
    }
}
