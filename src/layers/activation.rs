//! Activation Functions
//!
//! ReLU and its derivative for backpropagation.
//!
//! ### Formula
//!
//! ```text
//! ReLU(x)  = max(0, x)
//! ReLU'(x) = 1 if x > 0 else 0
//! ```
//!
//! The backward pass only needs the sign pattern of the pre-activation, so the
//! forward input is what gets cached.

use crate::tensor::{Scalar, Tensor};
use rayon::prelude::*;

/// ReLU activation (forward pass)
///
/// Returns `max(0, x)` elementwise.
pub fn relu_forward<T: Scalar>(x: &Tensor<T>) -> Tensor<T> {
    x.map(|v| if v > T::zero() { v } else { T::zero() })
}

/// ReLU activation derivative (backward pass)
///
/// # Arguments
///
/// * `grad_out` - Gradient from next layer
/// * `x` - Original input to ReLU (from forward pass)
///
/// # Returns
///
/// `grad_out` where `x > 0`, zero elsewhere
pub fn relu_backward<T: Scalar>(grad_out: &Tensor<T>, x: &Tensor<T>) -> Tensor<T> {
    assert_eq!(grad_out.shape, x.shape, "ReLU gradient shape mismatch");
    let grad_data: Vec<T> = x
        .data
        .par_iter()
        .zip(&grad_out.data)
        .map(|(&x_val, &grad_val)| if x_val > T::zero() { grad_val } else { T::zero() })
        .collect();

    Tensor::new(grad_data, x.shape.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relu_forward() {
        let x: Tensor<f32> = Tensor::new(vec![-1.0, 0.0, 2.5, -0.1], vec![2, 2]);
        assert_eq!(relu_forward(&x).data, vec![0.0, 0.0, 2.5, 0.0]);
    }

    #[test]
    fn test_relu_backward_masks_inactive_units() {
        let x: Tensor<f32> = Tensor::new(vec![-1.0, 0.0, 2.5, 3.0], vec![2, 2]);
        let grad = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        // Zero input counts as inactive
        assert_eq!(relu_backward(&grad, &x).data, vec![0.0, 0.0, 3.0, 4.0]);
    }
}
