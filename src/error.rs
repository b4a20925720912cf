//! Error types for network construction and loss computation.

use thiserror::Error;

/// Errors returned by the network and its configuration loaders.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Label {label} at position {index} is out of range for {num_classes} classes")]
    LabelOutOfRange {
        index: usize,
        label: usize,
        num_classes: usize,
    },

    #[error("Unknown parameter: {0}")]
    UnknownParam(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NetError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
