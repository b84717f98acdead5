//! Custom error types for synthscan.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the synthscan library.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to load an image file.
    #[error("failed to load image from {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Failed to fetch an image over HTTP.
    #[error("failed to fetch image from {url}: {source}")]
    ImageFetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Fetched or in-memory bytes could not be decoded as an image.
    #[error("failed to decode image: {source}")]
    ImageDecode {
        #[source]
        source: image::ImageError,
    },

    /// Failed to save an image file.
    #[error("failed to save image to {path}: {source}")]
    ImageSave {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Failed to load the model manifest or weights.
    #[error("failed to load model {name}: {reason}")]
    ModelLoad { name: String, reason: String },

    /// Model inference failed.
    #[error("model inference failed: {reason}")]
    Inference { reason: String },

    /// Shape mismatch in tensor operations.
    #[error("tensor shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// Invalid parameter value.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for synthscan operations.
pub type Result<T> = std::result::Result<T, Error>;
