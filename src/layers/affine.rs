//! Affine Layer (Fully Connected)
//!
//! The affine layer performs `y = x · W + b`.
//!
//! ## Forward Pass
//!
//! ```text
//! Input:  x [batch, in_features]
//! Weight: W [in_features, out_features]
//! Bias:   b [out_features]
//! Output: y = x · W + b [batch, out_features]
//! ```
//!
//! ## Backward Pass
//!
//! Using the chain rule:
//! ```text
//! grad_W = xᵀ · grad_y
//! grad_b = sum(grad_y, axis=0)
//! grad_x = grad_y · Wᵀ
//! ```
//!
//! ## Initialization
//!
//! Weights are drawn from `N(0, weight_scale²)`, biases start at zero.

use crate::tensor::{Scalar, Tensor};
use rand::Rng;
use rand_distr::StandardNormal;

/// Affine layer
///
/// Performs y = x · W + b where:
/// - W: weight matrix [in_features, out_features]
/// - b: bias vector [out_features]
#[derive(Clone, Debug)]
pub struct Affine<T: Scalar> {
    pub weight: Tensor<T>,
    pub bias: Tensor<T>,
}

impl<T: Scalar> Affine<T> {
    /// Create a new affine layer with normally distributed weights
    ///
    /// # Arguments
    ///
    /// * `in_features` - Input dimension
    /// * `out_features` - Output dimension
    /// * `weight_scale` - Standard deviation of the initial weights
    /// * `rng` - Source of randomness
    pub fn new<R: Rng>(
        in_features: usize,
        out_features: usize,
        weight_scale: f64,
        rng: &mut R,
    ) -> Self {
        let weight: Vec<T> = (0..in_features * out_features)
            .map(|_| {
                let z: f64 = rng.sample(StandardNormal);
                T::from_f64(z * weight_scale)
            })
            .collect();
        Self {
            weight: Tensor::new(weight, vec![in_features, out_features]),
            bias: Tensor::zeros(vec![out_features]),
        }
    }

    /// Forward pass
    ///
    /// Computes y = x · W + b and caches x for the backward pass.
    pub fn forward(&self, x: &Tensor<T>) -> (Tensor<T>, AffineCache<T>) {
        let y = x.matmul(&self.weight).add(&self.bias);
        let cache = AffineCache { x: x.clone() };
        (y, cache)
    }

    /// Backward pass
    ///
    /// # Arguments
    ///
    /// * `grad_out` - Gradient from next layer [batch, out_features]
    /// * `cache` - Cached values from forward pass
    pub fn backward(&self, grad_out: &Tensor<T>, cache: &AffineCache<T>) -> AffineGradients<T> {
        // grad_W = x^T @ grad_out
        let weight = cache.x.transpose().matmul(grad_out);

        // grad_b = sum over the batch
        let bias = grad_out.sum_rows();

        // grad_x = grad_out @ W^T
        let x = grad_out.matmul(&self.weight.transpose());

        AffineGradients { weight, bias, x }
    }
}

/// Cache for affine layer backward pass
pub struct AffineCache<T: Scalar> {
    pub x: Tensor<T>,
}

/// Gradients for affine layer
pub struct AffineGradients<T: Scalar> {
    pub weight: Tensor<T>,
    pub bias: Tensor<T>,
    pub x: Tensor<T>, // Gradient to pass to previous layer
}
