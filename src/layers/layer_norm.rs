//! Layer Normalization
//!
//! Layer normalization normalizes each sample across its features, then
//! applies learnable scale (gamma) and shift (beta) parameters. Unlike batch
//! norm it keeps no running statistics and behaves identically in training
//! and inference.
//!
//! ## Forward Pass
//!
//! ```text
//! 1. mean = E[x] = sum(x) / D
//! 2. var = E[(x - mean)²] = sum((x - mean)²) / D
//! 3. x_norm = (x - mean) / √(var + ε)
//! 4. y = γ * x_norm + β
//! ```
//!
//! ## Backward Pass
//!
//! ```text
//! grad_γ = sum(grad_y * x_norm)   over the batch
//! grad_β = sum(grad_y)            over the batch
//! grad_x_norm = grad_y * γ
//! grad_x = (grad_x_norm - E[grad_x_norm] - x_norm * E[grad_x_norm * x_norm]) / √(var + ε)
//! ```
//!
//! Here the expectations run over each sample's features. Both passes reuse
//! the batch-norm kernels on the transposed input, since per-sample statistics
//! of `x` are per-column statistics of `xᵀ`.

use super::batch_norm::normalized_input_grad;
use super::{NormGradients, NORM_EPS};
use crate::tensor::{Scalar, Tensor};

/// Layer normalization layer
#[derive(Clone, Debug)]
pub struct LayerNorm<T: Scalar> {
    pub gamma: Tensor<T>, // Scale parameter [features]
    pub beta: Tensor<T>,  // Shift parameter [features]
    pub eps: T,           // Small constant for numerical stability
}

impl<T: Scalar> LayerNorm<T> {
    /// Create a new layer normalization layer
    ///
    /// - gamma initialized to 1.0 (no scaling initially)
    /// - beta initialized to 0.0 (no shift initially)
    /// - eps = 1e-5
    pub fn new(features: usize) -> Self {
        Self {
            gamma: Tensor::ones(vec![features]),
            beta: Tensor::zeros(vec![features]),
            eps: T::from_f64(NORM_EPS),
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor [batch, features]
    ///
    /// # Returns
    ///
    /// Tuple of (output, cache)
    pub fn forward(&self, x: &Tensor<T>) -> (Tensor<T>, LayerNormCache<T>) {
        let x_t = x.transpose();
        let mean = x_t.mean_rows();
        let variance = x_t.var_rows(&mean);
        let std = variance.add_scalar(self.eps).sqrt();

        let x_norm = x_t.sub(&mean).div(&std).transpose();
        let y = x_norm.mul(&self.gamma).add(&self.beta);

        (y, LayerNormCache { x_norm, std })
    }

    /// Backward pass
    ///
    /// Computes gradients for gamma, beta, and input.
    pub fn backward(&self, grad_out: &Tensor<T>, cache: &LayerNormCache<T>) -> NormGradients<T> {
        let gamma = grad_out.mul(&cache.x_norm).sum_rows();
        let beta = grad_out.sum_rows();

        let grad_x_norm = grad_out.mul(&self.gamma);
        let x = normalized_input_grad(
            &grad_x_norm.transpose(),
            &cache.x_norm.transpose(),
            &cache.std,
        )
        .transpose();

        NormGradients { gamma, beta, x }
    }
}

/// Cache for layer norm backward pass
pub struct LayerNormCache<T: Scalar> {
    pub x_norm: Tensor<T>,
    /// One standard deviation per sample
    pub std: Tensor<T>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rows_are_standardized() {
        let ln = LayerNorm::<f64>::new(4);
        let x = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, -5.0, 0.0, 5.0, 10.0], vec![2, 4]);
        let (y, cache) = ln.forward(&x);

        for row in y.data.chunks(4) {
            let mean: f64 = row.iter().sum::<f64>() / 4.0;
            let var: f64 = row.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 4.0;
            assert_relative_eq!(mean, 0.0, epsilon = 1e-12);
            assert_relative_eq!(var, 1.0, epsilon = 1e-4);
        }
        assert_eq!(cache.std.shape, vec![2]);
    }

    #[test]
    fn test_single_sample_batch() {
        // Layer norm does not depend on the batch size
        let ln = LayerNorm::<f64>::new(3);
        let x = Tensor::new(vec![3.0, 6.0, 9.0], vec![1, 3]);
        let (y, _) = ln.forward(&x);
        let expected = 3.0 / (6.0f64 + 1e-5).sqrt();
        assert_relative_eq!(y.data[0], -expected, epsilon = 1e-12);
        assert_relative_eq!(y.data[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(y.data[2], expected, epsilon = 1e-12);
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let mut ln = LayerNorm::<f64>::new(3);
        ln.gamma = Tensor::new(vec![0.5, 2.0, -1.0], vec![3]);
        ln.beta = Tensor::new(vec![0.0, 0.3, 0.1], vec![3]);
        let x = Tensor::new(vec![0.2, -1.3, 2.1, 4.0, 0.5, -0.7], vec![2, 3]);
        let dout = Tensor::new(vec![1.0, -0.5, 0.25, 0.8, 0.1, -1.2], vec![2, 3]);

        let (_, cache) = ln.forward(&x);
        let grads = ln.backward(&dout, &cache);

        let f = |input: &Tensor<f64>, layer: &LayerNorm<f64>| {
            let (y, _) = layer.forward(input);
            y.data.iter().zip(&dout.data).map(|(a, b)| a * b).sum::<f64>()
        };

        let h = 1e-5;
        for i in 0..x.len() {
            let mut plus = x.clone();
            plus.data[i] += h;
            let mut minus = x.clone();
            minus.data[i] -= h;
            let numeric = (f(&plus, &ln) - f(&minus, &ln)) / (2.0 * h);
            assert_relative_eq!(grads.x.data[i], numeric, epsilon = 1e-7, max_relative = 1e-5);
        }

        for j in 0..3 {
            let mut plus = ln.clone();
            plus.gamma.data[j] += h;
            let mut minus = ln.clone();
            minus.gamma.data[j] -= h;
            let numeric = (f(&x, &plus) - f(&x, &minus)) / (2.0 * h);
            assert_relative_eq!(grads.gamma.data[j], numeric, epsilon = 1e-7, max_relative = 1e-5);
        }
    }
}
