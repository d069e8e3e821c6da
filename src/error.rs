//! Error types for estimar operations.

use std::path::PathBuf;

/// Main error type for estimar operations.
///
/// Configuration problems are surfaced eagerly, at estimator
/// construction, never at training time.
#[derive(Debug, thiserror::Error)]
pub enum EstimarError {
    /// Configuration is internally inconsistent (shape arithmetic,
    /// invalid hyperparameter values).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Underlying I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode/encode failure.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// A kernel file could not be parsed as a numeric matrix.
    #[error("malformed kernel file {path}: {reason}")]
    Kernel {
        /// File that failed to parse
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// A loss became NaN or infinite. Training cannot continue.
    #[error("non-finite loss at iteration {iteration}")]
    Numeric {
        /// Iteration at which the instability was detected
        iteration: u64,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EstimarError>;
