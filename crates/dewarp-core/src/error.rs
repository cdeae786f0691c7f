//! Error types for geometric map handling.

use thiserror::Error;

/// Main error type for map validation and warping operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A tensor does not carry the channel count its map kind requires.
    #[error("channel mismatch for {kind}: expected {expected}, got {actual}")]
    ChannelMismatch {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Shape mismatch between two tensors that must agree.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
