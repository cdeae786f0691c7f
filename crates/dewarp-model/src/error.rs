//! Error types for model construction and forward evaluation.
//!
//! Construction-time configuration errors (mismatched channel wiring, an
//! inconsistent constraint table, a missing weight file) and runtime shape
//! errors are both fatal: no partial recovery is attempted.

use std::path::PathBuf;

use burn::record::RecorderError;
use thiserror::Error;

/// Main error type for dewarping model operations.
#[derive(Error, Debug)]
pub enum ModelError {
    /// Invalid configuration detected before any forward pass.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A tensor does not carry the channel count its wiring contract requires.
    #[error("channel mismatch in {context}: expected {expected}, got {actual}")]
    ChannelMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Shape mismatch between tensors that must agree.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// An input tensor is unusable for this network.
    #[error("invalid input: {0}")]
    Input(String),

    /// A pretrained weight record could not be loaded.
    #[error("failed to load pretrained weights from {path:?}")]
    WeightLoad {
        path: PathBuf,
        #[source]
        source: RecorderError,
    },
}

impl From<dewarp_core::CoreError> for ModelError {
    fn from(err: dewarp_core::CoreError) -> Self {
        match err {
            dewarp_core::CoreError::ChannelMismatch {
                kind,
                expected,
                actual,
            } => ModelError::ChannelMismatch {
                context: kind,
                expected,
                actual,
            },
            dewarp_core::CoreError::ShapeMismatch { expected, actual } => {
                ModelError::ShapeMismatch { expected, actual }
            }
        }
    }
}

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;
