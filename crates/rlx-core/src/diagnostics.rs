//! Per-minibatch diagnostics and their aggregation

use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median};

/// How per-minibatch approximate KL values are reduced within an epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaCalcOperator {
    /// Arithmetic mean
    #[default]
    Mean,
    /// Median
    Median,
}

impl DeltaCalcOperator {
    /// Reduce `values`; `None` when there is nothing to reduce
    #[must_use]
    pub fn aggregate(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        Some(match self {
            Self::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Self::Median => Data::new(values.to_vec()).median(),
        })
    }
}

/// Scalars produced by one evaluation of the PPO loss
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossDiagnostics {
    /// Clipped surrogate loss
    pub pg_loss: f32,
    /// Value loss
    pub v_loss: f32,
    /// Mean policy entropy
    pub entropy_loss: f32,
    /// First-order approximate KL between old and new policy
    pub approx_kl: f32,
    /// Fraction of rows whose ratio left the clip range
    pub clip_fraction: f32,
}

impl LossDiagnostics {
    /// Whether every field is finite
    #[must_use]
    pub fn is_finite(&self) -> bool {
        [
            self.pg_loss,
            self.v_loss,
            self.entropy_loss,
            self.approx_kl,
            self.clip_fraction,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// Running mean over a sequence of [`LossDiagnostics`]
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsAccumulator {
    sum: [f64; 5],
    count: usize,
}

impl DiagnosticsAccumulator {
    /// Add one record
    pub fn push(&mut self, d: &LossDiagnostics) {
        let values = [d.pg_loss, d.v_loss, d.entropy_loss, d.approx_kl, d.clip_fraction];
        for (acc, v) in self.sum.iter_mut().zip(values) {
            *acc += f64::from(v);
        }
        self.count += 1;
    }

    /// Number of records seen
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether no record was pushed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Field-wise mean, zeros when empty
    #[must_use]
    pub fn mean(&self) -> LossDiagnostics {
        if self.count == 0 {
            return LossDiagnostics::default();
        }
        let n = self.count as f64;
        #[allow(clippy::cast_possible_truncation)]
        let m = |i: usize| (self.sum[i] / n) as f32;
        LossDiagnostics {
            pg_loss: m(0),
            v_loss: m(1),
            entropy_loss: m(2),
            approx_kl: m(3),
            clip_fraction: m(4),
        }
    }
}

/// Summary of one update (all epochs over one rollout)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateStats {
    /// Diagnostics averaged over every minibatch of the update
    pub diagnostics: LossDiagnostics,
    /// Epochs actually run
    pub epochs: usize,
    /// Gradient steps applied
    pub gradient_steps: usize,
    /// Whether the KL safeguard ended the update early
    pub early_stopped: bool,
    /// Aggregated approximate KL of the last epoch run
    pub last_epoch_kl: f64,
    /// Learning rate used for this update
    pub learning_rate: f64,
    /// Explained variance of the critic on the rollout
    pub explained_variance: f32,
    /// Environment steps taken so far
    pub global_step: u64,
    /// Mean return of episodes finished during the rollout
    pub mean_episode_return: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_aggregate() {
        let values = [0.1, 0.5, 0.2, 10.0];
        assert_abs_diff_eq!(DeltaCalcOperator::Mean.aggregate(&values).unwrap(), 2.7, epsilon = 1e-12);
        assert_abs_diff_eq!(DeltaCalcOperator::Median.aggregate(&values).unwrap(), 0.35, epsilon = 1e-12);
        assert_eq!(DeltaCalcOperator::Median.aggregate(&[]), None);
    }

    #[test]
    fn test_accumulator_mean() {
        let mut acc = DiagnosticsAccumulator::default();
        assert!(acc.is_empty());
        acc.push(&LossDiagnostics { pg_loss: 1.0, approx_kl: 0.2, ..Default::default() });
        acc.push(&LossDiagnostics { pg_loss: 3.0, approx_kl: 0.4, ..Default::default() });
        let mean = acc.mean();
        assert_eq!(acc.len(), 2);
        assert_abs_diff_eq!(mean.pg_loss, 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(mean.approx_kl, 0.3, epsilon = 1e-6);
        assert!(mean.is_finite());
    }
}
