//! Batch Normalization
//!
//! Batch normalization normalizes each feature to zero mean and unit variance
//! across the batch, then applies learnable scale (gamma) and shift (beta).
//!
//! ## Forward Pass
//!
//! ```text
//! Training:
//!   mean = Σ_batch x / N
//!   var  = Σ_batch (x - mean)² / N
//!   x_norm = (x - mean) / √(var + ε)
//!   y = γ * x_norm + β
//!   running_mean = m * running_mean + (1 - m) * mean
//!   running_var  = m * running_var  + (1 - m) * var
//!
//! Inference:
//!   x_norm = (x - running_mean) / √(running_var + ε)
//!   y = γ * x_norm + β
//! ```
//!
//! ## Backward Pass
//!
//! ```text
//! grad_γ = Σ_batch grad_y * x_norm
//! grad_β = Σ_batch grad_y
//! grad_x_norm = grad_y * γ
//! grad_x = (grad_x_norm - E[grad_x_norm] - x_norm * E[grad_x_norm * x_norm]) / √(var + ε)
//! ```
//!
//! The expectations run over the batch for each feature. The same formula,
//! applied across features instead, gives the layer-norm backward pass.

use super::{Mode, NormGradients, NORM_EPS};
use crate::tensor::{Scalar, Tensor};

/// Momentum of the running-statistics moving average
pub const BATCH_NORM_MOMENTUM: f64 = 0.9;

/// Running mean and variance of one batch-normalized layer
///
/// Updated once per training-mode forward pass, read during inference.
#[derive(Clone, Debug)]
pub struct RunningStats<T: Scalar> {
    mean: Tensor<T>,
    var: Tensor<T>,
}

impl<T: Scalar> RunningStats<T> {
    /// Zero-initialized statistics for `features` units
    pub fn new(features: usize) -> Self {
        Self {
            mean: Tensor::zeros(vec![features]),
            var: Tensor::zeros(vec![features]),
        }
    }

    pub fn mean(&self) -> &Tensor<T> {
        &self.mean
    }

    pub fn var(&self) -> &Tensor<T> {
        &self.var
    }

    /// Fold one batch's statistics into the moving average
    pub fn update(&mut self, batch_mean: &Tensor<T>, batch_var: &Tensor<T>, momentum: T) {
        let keep = momentum;
        let take = T::one() - momentum;
        self.mean = self.mean.mul_scalar(keep).add(&batch_mean.mul_scalar(take));
        self.var = self.var.mul_scalar(keep).add(&batch_var.mul_scalar(take));
    }
}

/// Batch normalization layer
#[derive(Clone, Debug)]
pub struct BatchNorm<T: Scalar> {
    pub gamma: Tensor<T>, // Scale parameter [features]
    pub beta: Tensor<T>,  // Shift parameter [features]
    pub eps: T,
    pub momentum: T,
    running: RunningStats<T>,
}

impl<T: Scalar> BatchNorm<T> {
    /// Create a batch norm layer with gamma = 1, beta = 0 and zeroed running statistics
    pub fn new(features: usize) -> Self {
        Self {
            gamma: Tensor::ones(vec![features]),
            beta: Tensor::zeros(vec![features]),
            eps: T::from_f64(NORM_EPS),
            momentum: T::from_f64(BATCH_NORM_MOMENTUM),
            running: RunningStats::new(features),
        }
    }

    pub fn running(&self) -> &RunningStats<T> {
        &self.running
    }

    /// Forward pass
    ///
    /// Training mode normalizes with the batch statistics and folds them into
    /// the running statistics. Test mode normalizes with the running
    /// statistics and leaves them untouched.
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor [batch, features]
    pub fn forward(&mut self, x: &Tensor<T>, mode: Mode) -> (Tensor<T>, BatchNormCache<T>) {
        match mode {
            Mode::Train => {
                let mean = x.mean_rows();
                let var = x.var_rows(&mean);
                self.running.update(&mean, &var, self.momentum);
                self.normalize(x, &mean, &var)
            }
            Mode::Test => self.normalize(x, &self.running.mean, &self.running.var),
        }
    }

    /// Test-mode forward pass through a shared reference
    pub fn infer(&self, x: &Tensor<T>) -> Tensor<T> {
        self.normalize(x, &self.running.mean, &self.running.var).0
    }

    fn normalize(&self, x: &Tensor<T>, mean: &Tensor<T>, var: &Tensor<T>) -> (Tensor<T>, BatchNormCache<T>) {
        let std = var.add_scalar(self.eps).sqrt();
        let x_norm = x.sub(mean).div(&std);
        let y = x_norm.mul(&self.gamma).add(&self.beta);

        (y, BatchNormCache { x_norm, std })
    }

    /// Backward pass
    ///
    /// Only valid for a cache produced in training mode.
    pub fn backward(&self, grad_out: &Tensor<T>, cache: &BatchNormCache<T>) -> NormGradients<T> {
        let gamma = grad_out.mul(&cache.x_norm).sum_rows();
        let beta = grad_out.sum_rows();

        let grad_x_norm = grad_out.mul(&self.gamma);
        let x = normalized_input_grad(&grad_x_norm, &cache.x_norm, &cache.std);

        NormGradients { gamma, beta, x }
    }
}

/// Backprop through `x_norm = (x - mean) / std` where the statistics are taken
/// over the rows (axis 0) of `x`.
///
/// `std` holds one value per column.
pub(crate) fn normalized_input_grad<T: Scalar>(
    grad_x_norm: &Tensor<T>,
    x_norm: &Tensor<T>,
    std: &Tensor<T>,
) -> Tensor<T> {
    // Accounts for each element's effect on the mean
    let mean_grad = grad_x_norm.mean_rows();
    // Accounts for each element's effect on the variance
    let mean_grad_x = grad_x_norm.mul(x_norm).mean_rows();

    grad_x_norm
        .sub(&mean_grad)
        .sub(&x_norm.mul(&mean_grad_x))
        .div(std)
}

/// Cache for batch norm backward pass
pub struct BatchNormCache<T: Scalar> {
    pub x_norm: Tensor<T>,
    pub std: Tensor<T>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn batch() -> Tensor<f64> {
        Tensor::new(vec![1.0, 10.0, 2.0, 20.0, 3.0, 60.0, 6.0, 30.0], vec![4, 2])
    }

    #[test]
    fn test_train_output_is_standardized() {
        let mut bn = BatchNorm::<f64>::new(2);
        let (y, _) = bn.forward(&batch(), Mode::Train);

        let mean = y.mean_rows();
        let var = y.var_rows(&mean);
        for j in 0..2 {
            assert_relative_eq!(mean.data[j], 0.0, epsilon = 1e-12);
            assert_relative_eq!(var.data[j], 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_gamma_beta_applied() {
        let mut bn = BatchNorm::<f64>::new(2);
        bn.gamma = Tensor::new(vec![2.0, 3.0], vec![2]);
        bn.beta = Tensor::new(vec![-1.0, 5.0], vec![2]);
        let (y, _) = bn.forward(&batch(), Mode::Train);

        let mean = y.mean_rows();
        assert_relative_eq!(mean.data[0], -1.0, epsilon = 1e-12);
        assert_relative_eq!(mean.data[1], 5.0, epsilon = 1e-12);
        let var = y.var_rows(&mean);
        assert_relative_eq!(var.data[0], 4.0, epsilon = 1e-3);
        assert_relative_eq!(var.data[1], 9.0, epsilon = 1e-3);
    }

    #[test]
    fn test_running_stats_follow_moving_average() {
        let mut bn = BatchNorm::<f64>::new(2);
        let x = batch();
        bn.forward(&x, Mode::Train);
        bn.forward(&x, Mode::Train);

        // mean of column 0 is 3, biased variance 3.5
        let expected_mean = 3.0 * (1.0 - 0.9 * 0.9);
        let expected_var = 3.5 * (1.0 - 0.9 * 0.9);
        assert_relative_eq!(bn.running().mean().data[0], expected_mean, epsilon = 1e-12);
        assert_relative_eq!(bn.running().var().data[0], expected_var, epsilon = 1e-12);
    }

    #[test]
    fn test_inference_uses_running_stats_without_updating() {
        let mut bn = BatchNorm::<f64>::new(2);
        bn.forward(&batch(), Mode::Train);
        let before = bn.running().clone();

        let x = Tensor::new(vec![0.5, 1.0], vec![1, 2]);
        let (y, _) = bn.forward(&x, Mode::Test);

        assert_eq!(bn.running().mean(), before.mean());
        assert_eq!(bn.running().var(), before.var());
        let expected = (0.5 - before.mean().data[0]) / (before.var().data[0] + 1e-5).sqrt();
        assert_relative_eq!(y.data[0], expected, epsilon = 1e-12);
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let mut bn = BatchNorm::<f64>::new(2);
        bn.gamma = Tensor::new(vec![1.5, 0.5], vec![2]);
        bn.beta = Tensor::new(vec![0.1, -0.2], vec![2]);
        let x = batch();
        let dout = Tensor::new(vec![0.3, -1.0, 0.7, 0.2, -0.4, 0.9, 1.1, -0.6], vec![4, 2]);

        let (_, cache) = bn.forward(&x, Mode::Train);
        let grads = bn.backward(&dout, &cache);

        let h = 1e-5;
        for i in 0..x.len() {
            let mut plus = x.clone();
            plus.data[i] += h;
            let mut minus = x.clone();
            minus.data[i] -= h;
            let f = |input: &Tensor<f64>| {
                let mut probe = bn.clone();
                let (y, _) = probe.forward(input, Mode::Train);
                y.data.iter().zip(&dout.data).map(|(a, b)| a * b).sum::<f64>()
            };
            let numeric = (f(&plus) - f(&minus)) / (2.0 * h);
            assert_relative_eq!(grads.x.data[i], numeric, epsilon = 1e-6, max_relative = 1e-5);
        }
    }
}
