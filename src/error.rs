//! Error types for bl3d-eval operations.

use thiserror::Error;

/// Result type alias for bl3d-eval operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during inference or evaluation.
///
/// Every variant is fail-fast: the caller is expected to fix the
/// configuration or the inputs and retry the whole call.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid chunk/halo geometry, threshold grid or other setting.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Two arrays that must agree in shape do not.
    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Where the comparison happened.
        context: &'static str,
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        actual: Vec<usize>,
    },

    /// An evaluation was started without any data.
    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    /// The predictor callback failed.
    #[error("Predictor error: {0}")]
    Predictor(String),

    /// I/O error wrapper.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Build a [`Error::ShapeMismatch`] from two array shapes.
    pub(crate) fn shape_mismatch(context: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            context,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
