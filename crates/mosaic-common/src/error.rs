//! Error types for the mosaic tiling pipeline.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias using MapperError.
pub type MapperResult<T> = Result<T, MapperError>;

/// Primary error type for pipeline operations.
#[derive(Debug, Error)]
pub enum MapperError {
    // === Input Errors ===
    #[error("unsupported raster format in {path}: {reason}")]
    UnsupportedFormat { path: PathBuf, reason: String },

    #[error("raster {path} has no usable georeference: {reason}")]
    MissingGeoreference { path: PathBuf, reason: String },

    #[error("raster '{id}' is incompatible with the mosaic: {reason}")]
    IncompatibleRaster { id: String, reason: String },

    #[error("no input rasters to process")]
    EmptyInputSet,

    // === Pyramid Errors ===
    #[error("zoom out of range: {0}")]
    ZoomOutOfRange(String),

    // === Storage Errors ===
    #[error("storage I/O error on {path}: {source}")]
    StorageIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // === Setup Errors ===
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("projection error: {0}")]
    Projection(String),
}

impl MapperError {
    /// Stable name of the error class, used in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            MapperError::UnsupportedFormat { .. } => "UnsupportedFormat",
            MapperError::MissingGeoreference { .. } => "MissingGeoreference",
            MapperError::IncompatibleRaster { .. } => "IncompatibleRaster",
            MapperError::EmptyInputSet => "EmptyInputSet",
            MapperError::ZoomOutOfRange(_) => "ZoomOutOfRange",
            MapperError::StorageIo { .. } => "StorageIOError",
            MapperError::InvalidConfig(_) => "InvalidConfig",
            MapperError::Projection(_) => "ProjectionError",
        }
    }

    /// Whether this error concerns a single input and may be skipped.
    pub fn is_per_input(&self) -> bool {
        matches!(
            self,
            MapperError::UnsupportedFormat { .. } | MapperError::MissingGeoreference { .. }
        )
    }

    /// Create an UnsupportedFormat error.
    pub fn unsupported(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Create a MissingGeoreference error.
    pub fn missing_georeference(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::MissingGeoreference {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Create an IncompatibleRaster error.
    pub fn incompatible(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IncompatibleRaster {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a StorageIo error for the given path.
    pub fn storage(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::StorageIo {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for MapperError {
    fn from(err: serde_json::Error) -> Self {
        MapperError::StorageIo {
            path: PathBuf::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, err),
        }
    }
}
