//! Diagonal Normal distribution over continuous actions

use ndarray::{Array1, Array2, Axis, Zip};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::{ensure_dim, Result};

/// `0.5 * ln(2π)`
pub const HALF_LN_2PI: f32 = 0.918_938_5;

/// `0.5 * ln(2πe)`, the entropy of a unit Normal
pub const HALF_LN_2PI_E: f32 = 1.418_938_5;

/// Independent Normal law per element, batch rows by action columns
#[derive(Debug, Clone)]
pub struct Normal {
    mean: Array2<f32>,
    std: Array2<f32>,
}

impl Normal {
    /// Build from `mean` and `std` of identical shape.
    ///
    /// `std` must be strictly positive; debug builds assert it.
    pub fn new(mean: Array2<f32>, std: Array2<f32>) -> Result<Self> {
        ensure_dim("normal std rows", mean.nrows(), std.nrows())?;
        ensure_dim("normal std columns", mean.ncols(), std.ncols())?;
        debug_assert!(
            std.iter().all(|&s| s > 0.0),
            "Normal std must be strictly positive"
        );
        Ok(Self { mean, std })
    }

    /// Build from a batch of means and one log-std row broadcast over the batch
    pub fn from_log_std(mean: Array2<f32>, log_std: &Array1<f32>) -> Result<Self> {
        ensure_dim("log_std width", mean.ncols(), log_std.len())?;
        let std_row = log_std.mapv(f32::exp);
        let std = std_row
            .broadcast(mean.raw_dim())
            .map(|view| view.to_owned())
            .ok_or_else(|| crate::RLError::dim("log_std broadcast", mean.ncols(), log_std.len()))?;
        Self::new(mean, std)
    }

    /// Distribution means
    #[must_use]
    pub fn mean(&self) -> &Array2<f32> {
        &self.mean
    }

    /// Distribution standard deviations
    #[must_use]
    pub fn std(&self) -> &Array2<f32> {
        &self.std
    }

    /// Reparameterized draw: `mean + std * eps`, `eps ~ N(0, 1)`
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Array2<f32> {
        let mut out = Array2::zeros(self.mean.raw_dim());
        Zip::from(&mut out)
            .and(&self.mean)
            .and(&self.std)
            .for_each(|o, &m, &s| {
                let eps: f32 = rng.sample(StandardNormal);
                *o = m + s * eps;
            });
        out
    }

    /// Elementwise log-density of `x`
    pub fn log_prob(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        ensure_dim("log_prob rows", self.mean.nrows(), x.nrows())?;
        ensure_dim("log_prob columns", self.mean.ncols(), x.ncols())?;
        let mut out = Array2::zeros(self.mean.raw_dim());
        Zip::from(&mut out)
            .and(x)
            .and(&self.mean)
            .and(&self.std)
            .for_each(|o, &x, &m, &s| {
                let z = (x - m) / s;
                *o = -0.5 * z * z - s.ln() - HALF_LN_2PI;
            });
        Ok(out)
    }

    /// Joint log-density of each row, summed over the action axis
    pub fn log_prob_sum(&self, x: &Array2<f32>) -> Result<Array1<f32>> {
        Ok(self.log_prob(x)?.sum_axis(Axis(1)))
    }

    /// Elementwise entropy, `ln(std) + 0.5 * ln(2πe)`
    #[must_use]
    pub fn entropy(&self) -> Array2<f32> {
        self.std.mapv(|s| s.ln() + HALF_LN_2PI_E)
    }

    /// Joint entropy of each row
    #[must_use]
    pub fn entropy_sum(&self) -> Array1<f32> {
        self.entropy().sum_axis(Axis(1))
    }
}
