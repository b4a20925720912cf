//! Neural Network Layers
//!
//! This module contains the layer primitives the fully-connected network is
//! built from. Each provides both forward and backward passes.
//!
//! ## Layers
//!
//! - **affine**: Fully connected transform `x · W + b`
//! - **activation**: ReLU (forward and backward)
//! - **batch_norm**: Batch normalization with running statistics
//! - **layer_norm**: Layer normalization
//! - **dropout**: Inverted dropout
//! - **softmax**: Softmax cross-entropy loss
//!
//! ## Design Pattern
//!
//! Each trainable layer follows a consistent pattern:
//!
//! ```rust,ignore
//! impl Layer {
//!     pub fn forward(&self, x: &Tensor<T>) -> (Tensor<T>, Cache<T>) { }
//!     pub fn backward(&self, grad: &Tensor<T>, cache: &Cache<T>) -> Gradients<T> { }
//! }
//! ```
//!
//! The cache carries exactly what the backward pass needs and nothing outlives
//! a single forward/backward pair. The only state a forward pass may mutate is
//! the batch-norm running statistics.

pub mod activation;
pub mod affine;
pub mod batch_norm;
pub mod dropout;
pub mod layer_norm;
pub mod softmax;

use crate::tensor::{Scalar, Tensor};

pub use activation::{relu_backward, relu_forward};
pub use affine::{Affine, AffineCache, AffineGradients};
pub use batch_norm::{BatchNorm, BatchNormCache, RunningStats, BATCH_NORM_MOMENTUM};
pub use dropout::{Dropout, DropoutCache};
pub use layer_norm::{LayerNorm, LayerNormCache};
pub use softmax::softmax_loss;

/// Epsilon added to the variance by both normalization layers
pub const NORM_EPS: f64 = 1e-5;

/// Whether a forward pass is part of training or inference
///
/// Dropout and batch normalization behave differently in the two modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Train,
    Test,
}

/// Gradients produced by a normalization layer
pub struct NormGradients<T: Scalar> {
    pub gamma: Tensor<T>,
    pub beta: Tensor<T>,
    pub x: Tensor<T>,
}
