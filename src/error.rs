//! Error types for the habitat finder.
//!
//! Every fallible operation in the crate returns [`FinderError`] so callers
//! can distinguish bad input (coordinates, regions), missing tile coverage,
//! and degenerate training data without string matching.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, FinderError>;

/// Error kinds surfaced by the scoring pipeline.
#[derive(Debug, Error)]
pub enum FinderError {
    /// Longitude or latitude outside the valid WGS84 range.
    #[error("invalid coordinate: lon={lon}, lat={lat}")]
    InvalidCoordinate { lon: f64, lat: f64 },

    /// Malformed bounding box (e.g. min >= max).
    #[error("invalid region: {0}")]
    InvalidRegion(String),

    /// No tile coverage anywhere in the requested region.
    #[error("no embedding coverage: {0}")]
    NoData(String),

    /// Too few usable occurrence vectors for the requested method.
    /// Similarity needs 1, the classifier needs 2.
    #[error("insufficient samples: need at least {needed}, got {got}")]
    InsufficientSamples { needed: usize, got: usize },

    /// Degenerate background sample or singular classifier fit.
    #[error("classifier training failed: {0}")]
    ClassifierTraining(String),

    /// Tile storage read failure.
    #[error("tile storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// GeoTIFF encoding failure.
    #[error("GeoTIFF encoding error: {0}")]
    TiffEncode(String),

    /// GeoJSON or report serialization failure.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<tiff::TiffError> for FinderError {
    fn from(e: tiff::TiffError) -> Self {
        Self::TiffEncode(e.to_string())
    }
}
