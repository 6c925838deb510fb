use std::path::PathBuf;
use thiserror::Error;

use crate::projector::MaskLayout;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the segmentation pipeline.
///
/// The first three variants are the per-image contract failures: they are raised at the
/// boundary of a single image's processing and the directory loop decides whether to skip
/// the image or abort the run. The remaining variants carry context for the surrounding
/// plumbing (filesystem, decoding, model runtime, configuration).
#[derive(Error, Debug)]
pub enum ReasonSegError {
    #[error("Invalid image: {reason} (file: {path})")]
    InvalidImage { path: String, reason: String },

    #[error(
        "Geometry mismatch: predicted mask {}x{} does not fit the {layout:?} layout (expected {expected})",
        .mask.0,
        .mask.1
    )]
    GeometryMismatch {
        layout: MaskLayout,
        /// (height, width) of the predicted mask
        mask: (u32, u32),
        expected: String,
    },

    #[error("Model returned {count} masks for a single-region prompt")]
    MultipleMask { count: usize },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: BoxedSource,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: BoxedSource,
    },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ReasonSegError>;

impl ReasonSegError {
    pub(crate) fn invalid_image(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidImage {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error breaks the per-image contract rather than the surrounding plumbing.
    pub const fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidImage { .. } | Self::GeometryMismatch { .. } | Self::MultipleMask { .. }
        )
    }
}

/// Fallback for I/O errors raised without path context. Callsites that know the path
/// construct `FileSystem` directly.
impl From<std::io::Error> for ReasonSegError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<image::ImageError> for ReasonSegError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ort::Error> for ReasonSegError {
    fn from(err: ort::Error) -> Self {
        Self::Model {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

/// Shape errors occur while packing or unpacking model tensors, so they are reported as
/// model errors.
impl From<ndarray::ShapeError> for ReasonSegError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<serde_json::Error> for ReasonSegError {
    fn from(err: serde_json::Error) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}
