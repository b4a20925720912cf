//! Network Configuration
//!
//! [`NetConfig`] describes the shape and training behaviour of a
//! [`FullyConnectedNet`](crate::FullyConnectedNet). It is plain data: it
//! derives serde so that a (possibly partial) JSON document can be loaded,
//! with every missing field falling back to its default.
//!
//! ## Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `input_dim` | 3072 (a 32×32 RGB image) |
//! | `num_classes` | 10 |
//! | `dropout_keep_ratio` | 1.0 (dropout disabled) |
//! | `normalization` | none |
//! | `reg` | 0.0 |
//! | `weight_scale` | 0.01 |
//! | `seed` | none |
//!
//! ## Example
//!
//! ```rust
//! use fcnet::{NetConfig, Normalization};
//!
//! let config = NetConfig::new(vec![100, 50])
//!     .with_normalization(Normalization::BatchNorm)
//!     .with_dropout(0.5)
//!     .with_reg(1e-3);
//! assert_eq!(config.num_layers(), 3);
//!
//! let json = r#"{ "hidden_dims": [64], "normalization": "layernorm" }"#;
//! let config = NetConfig::from_json_str(json).unwrap();
//! assert_eq!(config.input_dim, 3072);
//! assert_eq!(config.normalization, Some(Normalization::LayerNorm));
//! ```

use crate::error::NetError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Normalization inserted between each hidden affine layer and its ReLU
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Normalization {
    /// Normalize each feature over the batch, tracking running statistics
    #[serde(rename = "batchnorm")]
    BatchNorm,
    /// Normalize each sample over its features
    #[serde(rename = "layernorm")]
    LayerNorm,
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Normalization::BatchNorm => write!(f, "batchnorm"),
            Normalization::LayerNorm => write!(f, "layernorm"),
        }
    }
}

/// Fully-connected network configuration
///
/// Immutable once a network has been built from it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Width of each hidden layer (at least one)
    pub hidden_dims: Vec<usize>,
    /// Number of input features after flattening
    pub input_dim: usize,
    /// Number of output classes
    pub num_classes: usize,
    /// Probability of keeping a unit; 1.0 disables dropout
    pub dropout_keep_ratio: f64,
    /// Optional normalization for hidden layers
    pub normalization: Option<Normalization>,
    /// L2 regularization strength
    pub reg: f64,
    /// Standard deviation of the initial weights
    pub weight_scale: f64,
    /// Seed making dropout masks deterministic
    pub seed: Option<u64>,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            hidden_dims: vec![100],
            input_dim: 3 * 32 * 32,
            num_classes: 10,
            dropout_keep_ratio: 1.0,
            normalization: None,
            reg: 0.0,
            weight_scale: 1e-2,
            seed: None,
        }
    }
}

impl NetConfig {
    /// Default configuration with the given hidden layer widths
    pub fn new(hidden_dims: Vec<usize>) -> Self {
        Self {
            hidden_dims,
            ..Self::default()
        }
    }

    pub fn with_input_dim(mut self, input_dim: usize) -> Self {
        self.input_dim = input_dim;
        self
    }

    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes;
        self
    }

    pub fn with_dropout(mut self, keep_ratio: f64) -> Self {
        self.dropout_keep_ratio = keep_ratio;
        self
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = Some(normalization);
        self
    }

    pub fn with_reg(mut self, reg: f64) -> Self {
        self.reg = reg;
        self
    }

    pub fn with_weight_scale(mut self, weight_scale: f64) -> Self {
        self.weight_scale = weight_scale;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Number of affine layers, hidden plus output
    pub fn num_layers(&self) -> usize {
        self.hidden_dims.len() + 1
    }

    /// Whether dropout layers are inserted after each hidden ReLU
    pub fn use_dropout(&self) -> bool {
        self.dropout_keep_ratio != 1.0
    }

    /// `(fan_in, fan_out)` of every affine layer, output layer last
    pub fn layer_dims(&self) -> Vec<(usize, usize)> {
        let mut dims = Vec::with_capacity(self.num_layers());
        let mut fan_in = self.input_dim;
        for &width in &self.hidden_dims {
            dims.push((fan_in, width));
            fan_in = width;
        }
        dims.push((fan_in, self.num_classes));
        dims
    }

    /// Check every field is usable for building a network
    pub fn validate(&self) -> Result<(), NetError> {
        if self.hidden_dims.is_empty() {
            return Err(NetError::invalid_config("at least one hidden layer is required"));
        }
        if let Some(pos) = self.hidden_dims.iter().position(|&w| w == 0) {
            return Err(NetError::invalid_config(format!(
                "hidden layer {} has zero width",
                pos + 1
            )));
        }
        if self.input_dim == 0 {
            return Err(NetError::invalid_config("input_dim must be positive"));
        }
        if self.num_classes == 0 {
            return Err(NetError::invalid_config("num_classes must be positive"));
        }
        if !(self.dropout_keep_ratio > 0.0 && self.dropout_keep_ratio <= 1.0) {
            return Err(NetError::invalid_config(format!(
                "dropout_keep_ratio must be in (0, 1], got {}",
                self.dropout_keep_ratio
            )));
        }
        if !(self.reg >= 0.0 && self.reg.is_finite()) {
            return Err(NetError::invalid_config(format!(
                "reg must be a finite non-negative number, got {}",
                self.reg
            )));
        }
        if !(self.weight_scale >= 0.0 && self.weight_scale.is_finite()) {
            return Err(NetError::invalid_config(format!(
                "weight_scale must be a finite non-negative number, got {}",
                self.weight_scale
            )));
        }
        Ok(())
    }

    /// Parse a JSON document; absent fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, NetError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, NetError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
