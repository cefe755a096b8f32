//! Error taxonomy for model construction, training and persistence.
//!
//! Configuration problems are surfaced when the model is compiled, never as
//! silent reshapes during forward. Numeric instability is detected by the
//! training loop (layers propagate raw values) and aborts the run. Persistence
//! failures leave the live model untouched so the caller can recover.

use crate::shape::Shape;
use thiserror::Error;

/// Errors produced by the network engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid layer or training configuration (zero kernel size, bad
    /// hyperparameter range, pool window not dividing the input, ...).
    /// Fatal and detected at construction/compile time.
    #[error("configuration error: {0}")]
    Config(String),

    /// The declared input shape of a layer does not match the output shape
    /// of the layer that feeds it.
    #[error("shape mismatch at layer {index} ({kind}): expected {expected}, got {found}")]
    ShapeMismatch {
        /// Position of the offending layer in the model sequence.
        index: usize,
        /// Layer type tag.
        kind: &'static str,
        /// Shape the layer was declared with.
        expected: Shape,
        /// Shape actually produced by the previous layer.
        found: Shape,
    },

    /// A non-finite value (NaN or infinity) appeared in the loss during
    /// training. The run is aborted rather than silently corrupting
    /// parameters.
    #[error("non-finite loss at epoch {epoch}, batch {batch}")]
    NonFinite { epoch: usize, batch: usize },

    /// Failure reading or writing a persisted model file.
    #[error("model file error: {0}")]
    Io(#[from] std::io::Error),

    /// The persisted model document could not be parsed.
    #[error("model document error: {0}")]
    Json(#[from] serde_json::Error),

    /// The persisted document does not match the live architecture
    /// (layer-type sequence or parameter shapes differ). No parameter is
    /// mutated when this is returned.
    #[error("persisted model does not match architecture: {0}")]
    ArchitectureMismatch(String),

    /// The provided dataset violates the training-data contract
    /// (batch size beyond available examples, empty split, length mismatch).
    #[error("data error: {0}")]
    Data(String),
}
