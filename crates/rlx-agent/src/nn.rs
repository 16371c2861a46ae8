//! Dense layers and tanh MLPs with explicit backpropagation
//!
//! The graph is fixed at construction: `depth` hidden layers of `width`
//! tanh units followed by a linear output layer. Forward passes that will be
//! differentiated keep an [`MlpCache`]; [`Mlp::backward`] turns an output
//! gradient into per-layer weight and bias gradients.

use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use rlx_core::{ensure_dim, Result};

/// Fully connected layer, `y = x W + b` with `W: (in, out)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linear {
    /// Weights, `(in_dim, out_dim)`
    pub weight: Array2<f32>,
    /// Bias, `(out_dim,)`
    pub bias: Array1<f32>,
}

impl Linear {
    /// Orthogonally initialised layer scaled by `gain`, bias set to `bias_const`
    pub fn orthogonal<R: Rng + ?Sized>(
        in_dim: usize,
        out_dim: usize,
        gain: f32,
        bias_const: f32,
        rng: &mut R,
    ) -> Self {
        Self {
            weight: orthogonal(in_dim, out_dim, rng) * gain,
            bias: Array1::from_elem(out_dim, bias_const),
        }
    }

    /// Input width
    #[must_use]
    pub fn in_dim(&self) -> usize {
        self.weight.nrows()
    }

    /// Output width
    #[must_use]
    pub fn out_dim(&self) -> usize {
        self.weight.ncols()
    }

    /// Number of trainable scalars
    #[must_use]
    pub fn num_parameters(&self) -> usize {
        self.weight.len() + self.bias.len()
    }

    /// Batched forward pass
    #[must_use]
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        x.dot(&self.weight) + &self.bias
    }
}

/// Gradient of a [`Linear`] layer
#[derive(Debug, Clone, PartialEq)]
pub struct LinearGrad {
    /// Weight gradient, same shape as the weights
    pub weight: Array2<f32>,
    /// Bias gradient
    pub bias: Array1<f32>,
}

/// Matrix of shape `(rows, cols)` with orthonormal columns (or rows, when
/// `rows < cols`), drawn from the Haar measure via Gram-Schmidt on a
/// Gaussian matrix.
fn orthogonal<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Array2<f32> {
    let tall = rows >= cols;
    let (n, m) = if tall { (rows, cols) } else { (cols, rows) };

    let mut q = Array2::<f32>::zeros((n, m));
    for j in 0..m {
        loop {
            let mut v: Array1<f32> = (0..n).map(|_| rng.sample::<f32, _>(StandardNormal)).collect();
            for k in 0..j {
                let basis = q.column(k);
                let proj = basis.dot(&v);
                v.scaled_add(-proj, &basis);
            }
            let norm = v.dot(&v).sqrt();
            if norm > 1e-6 {
                q.column_mut(j).assign(&(v / norm));
                break;
            }
        }
    }

    if tall {
        q
    } else {
        q.reversed_axes()
    }
}

/// Hidden-layer activations kept for the backward pass
#[derive(Debug, Clone)]
pub struct MlpCache {
    /// Input of every layer, first entry is the network input
    inputs: Vec<Array2<f32>>,
}

/// Tanh MLP with a linear head
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mlp {
    layers: Vec<Linear>,
}

impl Mlp {
    /// Build `depth` hidden layers of `width` units (gain √2, zero bias)
    /// and an output layer with `output_gain`.
    pub fn new<R: Rng + ?Sized>(
        in_dim: usize,
        width: usize,
        depth: usize,
        out_dim: usize,
        output_gain: f32,
        rng: &mut R,
    ) -> Self {
        let hidden_gain = std::f32::consts::SQRT_2;
        let mut layers = Vec::with_capacity(depth + 1);
        let mut prev = in_dim;
        for _ in 0..depth {
            layers.push(Linear::orthogonal(prev, width, hidden_gain, 0.0, rng));
            prev = width;
        }
        layers.push(Linear::orthogonal(prev, out_dim, output_gain, 0.0, rng));
        Self { layers }
    }

    /// Layers, input to output
    #[must_use]
    pub fn layers(&self) -> &[Linear] {
        &self.layers
    }

    /// Mutable layers, input to output
    pub fn layers_mut(&mut self) -> &mut [Linear] {
        &mut self.layers
    }

    /// Input width
    #[must_use]
    pub fn in_dim(&self) -> usize {
        self.layers[0].in_dim()
    }

    /// Output width
    #[must_use]
    pub fn out_dim(&self) -> usize {
        self.layers[self.layers.len() - 1].out_dim()
    }

    /// Number of trainable scalars
    #[must_use]
    pub fn num_parameters(&self) -> usize {
        self.layers.iter().map(Linear::num_parameters).sum()
    }

    /// Forward pass without caching
    pub fn forward(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        ensure_dim("mlp input width", self.in_dim(), x.ncols())?;
        let last = self.layers.len() - 1;
        let mut h = x.to_owned();
        for (i, layer) in self.layers.iter().enumerate() {
            h = layer.forward(&h);
            if i < last {
                h.mapv_inplace(f32::tanh);
            }
        }
        Ok(h)
    }

    /// Forward pass keeping what [`Mlp::backward`] needs
    pub fn forward_cached(&self, x: &Array2<f32>) -> Result<(Array2<f32>, MlpCache)> {
        ensure_dim("mlp input width", self.in_dim(), x.ncols())?;
        let last = self.layers.len() - 1;
        let mut inputs = Vec::with_capacity(self.layers.len());
        let mut h = x.to_owned();
        for (i, layer) in self.layers.iter().enumerate() {
            let mut out = layer.forward(&h);
            if i < last {
                out.mapv_inplace(f32::tanh);
            }
            inputs.push(h);
            h = out;
        }
        Ok((h, MlpCache { inputs }))
    }

    /// Gradients of every layer given the gradient w.r.t. the output
    pub fn backward(&self, cache: &MlpCache, grad_output: &Array2<f32>) -> Result<Vec<LinearGrad>> {
        ensure_dim("mlp cache depth", self.layers.len(), cache.inputs.len())?;
        ensure_dim("mlp grad width", self.out_dim(), grad_output.ncols())?;

        let mut grads = Vec::with_capacity(self.layers.len());
        let mut grad = grad_output.to_owned();
        for (i, layer) in self.layers.iter().enumerate().rev() {
            let input = &cache.inputs[i];
            grads.push(LinearGrad {
                weight: input.t().dot(&grad),
                bias: grad.sum_axis(Axis(0)),
            });
            if i > 0 {
                // `input` is the tanh output of the previous layer
                let mut upstream = grad.dot(&layer.weight.t());
                upstream.zip_mut_with(input, |g, &h| *g *= 1.0 - h * h);
                grad = upstream;
            }
        }
        grads.reverse();
        Ok(grads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_orthogonal_columns() {
        let mut rng = StdRng::seed_from_u64(0);
        let w = orthogonal(8, 3, &mut rng);
        let gram = w.t().dot(&w);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(gram[[i, j]], expected, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_orthogonal_rows_when_wide() {
        let mut rng = StdRng::seed_from_u64(1);
        let w = orthogonal(2, 5, &mut rng);
        assert_eq!(w.dim(), (2, 5));
        let gram = w.dot(&w.t());
        assert_abs_diff_eq!(gram[[0, 0]], 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(gram[[0, 1]], 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_mlp_shapes() {
        let mut rng = StdRng::seed_from_u64(2);
        let mlp = Mlp::new(4, 16, 2, 3, 1.0, &mut rng);
        assert_eq!(mlp.layers().len(), 3);
        assert_eq!(mlp.num_parameters(), 4 * 16 + 16 + 16 * 16 + 16 + 16 * 3 + 3);

        let out = mlp.forward(&Array2::zeros((5, 4))).unwrap();
        assert_eq!(out.dim(), (5, 3));
        assert!(mlp.forward(&Array2::zeros((5, 3))).is_err());
    }

    #[test]
    fn test_zero_depth_is_linear() {
        let mut rng = StdRng::seed_from_u64(3);
        let mlp = Mlp::new(2, 8, 0, 1, 1.0, &mut rng);
        assert_eq!(mlp.layers().len(), 1);
        let x = arr2(&[[1.0, -2.0]]);
        let expected = mlp.layers()[0].forward(&x);
        assert_eq!(mlp.forward(&x).unwrap(), expected);
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(4);
        let mlp = Mlp::new(3, 5, 2, 2, 1.0, &mut rng);
        let x = arr2(&[[0.3, -0.2, 0.5], [-0.7, 0.1, 0.9]]);

        // L = sum(output * c) has output gradient c
        let c = arr2(&[[1.0, -0.5], [0.25, 2.0]]);
        let loss = |m: &Mlp| (m.forward(&x).unwrap() * &c).sum();

        let (_, cache) = mlp.forward_cached(&x).unwrap();
        let grads = mlp.backward(&cache, &c).unwrap();

        let eps = 1e-2;
        for (l, grad) in grads.iter().enumerate() {
            for ((r, k), &analytic) in grad.weight.indexed_iter().take(4) {
                let mut plus = mlp.clone();
                plus.layers_mut()[l].weight[[r, k]] += eps;
                let mut minus = mlp.clone();
                minus.layers_mut()[l].weight[[r, k]] -= eps;
                let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
                assert_abs_diff_eq!(analytic, numeric, epsilon = 2e-3);
            }
            let mut plus = mlp.clone();
            plus.layers_mut()[l].bias[0] += eps;
            let mut minus = mlp.clone();
            minus.layers_mut()[l].bias[0] -= eps;
            let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
            assert_abs_diff_eq!(grad.bias[0], numeric, epsilon = 2e-3);
        }
    }
}
