//! fcnet: Fully-Connected Neural Network Classifier
//!
//! A multi-layer fully-connected classifier with hand-written forward and
//! backward passes, optional batch/layer normalization, inverted dropout,
//! L2 regularization, and a softmax cross-entropy loss.
//!
//! The crate computes scores, losses and gradients. Training loops,
//! optimizers and data loading belong to the caller, which updates
//! parameters through [`FullyConnectedNet::param_mut`].
//!
//! # Modules
//!
//! - [`tensor`] - Minimal row-major tensor, generic over `f32`/`f64`
//! - [`layers`] - Affine, ReLU, normalization, dropout and softmax primitives
//! - [`network`] - The configurable network and its gradients
//! - [`config`] - Serializable network configuration
//! - [`gradcheck`] - Finite-difference gradient checking
//!
//! # Example
//!
//! ```rust
//! use fcnet::{FullyConnectedNet, NetConfig, Normalization, Tensor};
//!
//! let config = NetConfig::new(vec![32, 16])
//!     .with_input_dim(8)
//!     .with_num_classes(4)
//!     .with_normalization(Normalization::BatchNorm)
//!     .with_dropout(0.5)
//!     .with_reg(1e-3);
//! let mut net: FullyConnectedNet = FullyConnectedNet::new(config).unwrap();
//!
//! let x = Tensor::zeros(vec![5, 8]);
//! let (loss, grads) = net.loss_and_grads(&x, &[0, 1, 2, 3, 0]).unwrap();
//! assert!(loss.is_finite());
//! assert_eq!(grads.layers.len(), 3);
//!
//! let scores = net.scores(&x).unwrap();
//! assert_eq!(scores.shape, vec![5, 4]);
//! ```

pub mod config;
pub mod error;
pub mod gradcheck;
pub mod layers;
pub mod network;
pub mod tensor;

// Re-export main types for convenience
pub use config::{NetConfig, Normalization};
pub use error::NetError;
pub use network::{
    FullyConnectedNet, Gradients, HiddenLayer, LayerGradients, Norm, Output, ParamId, ParamKind,
};
pub use tensor::{Scalar, Tensor};
