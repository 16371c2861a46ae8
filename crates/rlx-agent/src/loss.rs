//! PPO loss terms and their gradients with respect to the network outputs

use ndarray::{Array1, Zip};

use rlx_core::{ensure_dim, LossDiagnostics, Result};

/// Added to the advantage standard deviation before dividing
pub const ADVANTAGE_EPSILON: f32 = 1e-8;

/// The six scalars of one PPO loss evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossOutput {
    /// `pg_loss + vf_coef * v_loss - ent_coef * entropy_loss`
    pub total_loss: f32,
    /// Clipped surrogate loss
    pub pg_loss: f32,
    /// Unclipped value loss
    pub v_loss: f32,
    /// Mean entropy
    pub entropy_loss: f32,
    /// `mean((ratio - 1) - log_ratio)`
    pub approx_kl: f32,
    /// `mean(|ratio - 1| > clip_range)`
    pub clip_fraction: f32,
}

impl LossOutput {
    /// Diagnostics part of the output
    #[must_use]
    pub fn diagnostics(&self) -> LossDiagnostics {
        LossDiagnostics {
            pg_loss: self.pg_loss,
            v_loss: self.v_loss,
            entropy_loss: self.entropy_loss,
            approx_kl: self.approx_kl,
            clip_fraction: self.clip_fraction,
        }
    }

    /// Whether all six scalars are finite
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.total_loss.is_finite() && self.diagnostics().is_finite()
    }
}

/// `(adv - mean) / (std + 1e-8)` with the unbiased sample std.
///
/// A single-row minibatch has std 0, so it normalizes to 0.
#[must_use]
pub fn normalize_advantages(advantages: &Array1<f32>) -> Array1<f32> {
    let n = advantages.len();
    if n == 0 {
        return advantages.clone();
    }
    let mean = advantages.sum() / n as f32;
    let std = if n > 1 {
        (advantages.iter().map(|a| (a - mean).powi(2)).sum::<f32>() / (n - 1) as f32).sqrt()
    } else {
        0.0
    };
    advantages.mapv(|a| (a - mean) / (std + ADVANTAGE_EPSILON))
}

/// Clipped surrogate objective with its diagnostics
#[derive(Debug, Clone)]
pub struct Surrogate {
    /// `mean(max(-adv * ratio, -adv * clamp(ratio, 1 - c, 1 + c)))`
    pub pg_loss: f32,
    /// First-order KL estimate
    pub approx_kl: f32,
    /// Fraction of clipped ratios
    pub clip_fraction: f32,
    /// `d pg_loss / d new_log_prob`, per row
    pub grad_log_prob: Array1<f32>,
}

/// Evaluate the clipped surrogate for already-normalized advantages
pub fn clipped_surrogate(
    new_log_prob: &Array1<f32>,
    old_log_prob: &Array1<f32>,
    advantages: &Array1<f32>,
    clip_range: f32,
) -> Result<Surrogate> {
    let n = new_log_prob.len();
    ensure_dim("surrogate old_log_prob", n, old_log_prob.len())?;
    ensure_dim("surrogate advantages", n, advantages.len())?;
    if n == 0 {
        return Ok(Surrogate {
            pg_loss: 0.0,
            approx_kl: 0.0,
            clip_fraction: 0.0,
            grad_log_prob: Array1::zeros(0),
        });
    }

    let inv_n = 1.0 / n as f32;
    let (lo, hi) = (1.0 - clip_range, 1.0 + clip_range);
    let mut pg_sum = 0.0;
    let mut kl_sum = 0.0;
    let mut clipped = 0usize;
    let mut grad_log_prob = Array1::zeros(n);

    Zip::from(&mut grad_log_prob)
        .and(new_log_prob)
        .and(old_log_prob)
        .and(advantages)
        .for_each(|grad, &new, &old, &adv| {
            let log_ratio = new - old;
            let ratio = log_ratio.exp();

            kl_sum += (ratio - 1.0) - log_ratio;
            if (ratio - 1.0).abs() > clip_range {
                clipped += 1;
            }

            let unclipped_loss = -adv * ratio;
            let clipped_loss = -adv * ratio.clamp(lo, hi);
            pg_sum += unclipped_loss.max(clipped_loss);

            // Only the unclipped branch depends on the ratio once clamping bites
            let d_ratio = if unclipped_loss >= clipped_loss { -adv } else { 0.0 };
            *grad = d_ratio * ratio * inv_n;
        });

    Ok(Surrogate {
        pg_loss: pg_sum * inv_n,
        approx_kl: kl_sum * inv_n,
        clip_fraction: clipped as f32 * inv_n,
        grad_log_prob,
    })
}

/// `mean(0.5 * (value - return)^2)` and its gradient w.r.t. each value
pub fn value_loss(new_value: &Array1<f32>, returns: &Array1<f32>) -> Result<(f32, Array1<f32>)> {
    ensure_dim("value loss returns", new_value.len(), returns.len())?;
    let n = new_value.len().max(1) as f32;
    let diff = new_value - returns;
    let loss = diff.mapv(|d| 0.5 * d * d).sum() / n;
    Ok((loss, diff / n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    #[test]
    fn test_equal_advantages_normalize_to_zero() {
        let norm = normalize_advantages(&arr1(&[3.5, 3.5, 3.5, 3.5]));
        assert!(norm.iter().all(|&a| a == 0.0));
        assert_eq!(normalize_advantages(&arr1(&[7.0])), arr1(&[0.0]));
    }

    #[test]
    fn test_normalization_uses_sample_std() {
        let norm = normalize_advantages(&arr1(&[1.0, 3.0]));
        // mean 2, unbiased std sqrt(2)
        assert_abs_diff_eq!(norm[0], -1.0 / 2.0_f32.sqrt(), epsilon = 1e-5);
        assert_abs_diff_eq!(norm[1], 1.0 / 2.0_f32.sqrt(), epsilon = 1e-5);
    }

    #[test]
    fn test_ratio_is_clamped() {
        // ratio = 2.0 for both rows, clip range 0.2
        let old = arr1(&[0.0, 0.0]);
        let new = arr1(&[2.0_f32.ln(), 2.0_f32.ln()]);
        let adv = arr1(&[1.0, 1.0]);
        let s = clipped_surrogate(&new, &old, &adv, 0.2).unwrap();

        // max(-2.0, -1.2) = -1.2
        assert_abs_diff_eq!(s.pg_loss, -1.2, epsilon = 1e-5);
        assert_abs_diff_eq!(s.clip_fraction, 1.0);
        assert!(s.grad_log_prob.iter().all(|&g| g == 0.0));
        // (2 - 1) - ln 2
        assert_abs_diff_eq!(s.approx_kl, 1.0 - 2.0_f32.ln(), epsilon = 1e-5);
    }

    #[test]
    fn test_negative_advantage_keeps_unclipped_branch() {
        // ratio 2.0 with negative advantage: max(2.0, 1.2) = 2.0, gradient flows
        let s = clipped_surrogate(&arr1(&[2.0_f32.ln()]), &arr1(&[0.0]), &arr1(&[-1.0]), 0.2).unwrap();
        assert_abs_diff_eq!(s.pg_loss, 2.0, epsilon = 1e-5);
        assert_abs_diff_eq!(s.grad_log_prob[0], 2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_identical_policies() {
        let lp = arr1(&[-1.0, -2.0, -0.5]);
        let adv = arr1(&[0.5, -0.5, 1.0]);
        let s = clipped_surrogate(&lp, &lp, &adv, 0.2).unwrap();
        assert_abs_diff_eq!(s.approx_kl, 0.0);
        assert_abs_diff_eq!(s.clip_fraction, 0.0);
        assert_abs_diff_eq!(s.pg_loss, -1.0 / 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(s.grad_log_prob[2], -1.0 / 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_value_loss() {
        let (loss, grad) = value_loss(&arr1(&[1.0, 3.0]), &arr1(&[0.0, 1.0])).unwrap();
        assert_abs_diff_eq!(loss, (0.5 + 2.0) / 2.0);
        assert_eq!(grad, arr1(&[0.5, 1.0]));
        assert!(value_loss(&arr1(&[1.0]), &arr1(&[1.0, 2.0])).is_err());
    }
}
