#![doc = include_str!("../README.md")]
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`grid`]: Tile lattice indexing ([`TileGrid`], [`TileId`])
//! - [`geometry`]: Bounding boxes and great-circle distances
//! - [`store`]: Tile storage ([`TileStore`] trait) and mosaic stitching
//! - [`mosaic`]: Dense per-region embedding array
//! - [`extract`]: Embedding lookup at occurrence points
//! - [`score`]: Scoring strategies ([`Scorer`] trait), method selection,
//!   background sampling, and hold-out validation
//! - [`raster`]: Per-pixel score raster
//! - [`geotiff`]: GeoTIFF output with WGS84 georeferencing
//! - [`candidates`]: Ranked, spread-out candidate sites and GeoJSON output
//! - [`pipeline`]: End-to-end search entry points

// ============================================================================
// Public modules
// ============================================================================

pub mod candidates;
pub mod error;
pub mod extract;
pub mod geometry;
pub mod geotiff;
pub mod grid;
pub mod mosaic;
pub mod pipeline;
pub mod raster;
pub mod score;
pub mod store;

// ============================================================================
// Errors
// ============================================================================

pub use error::{FinderError, Result};

// ============================================================================
// Grid & Geometry
// ============================================================================

pub use geometry::{haversine_m, BoundingBox};
pub use grid::{TileGrid, TileId};

// ============================================================================
// Storage & Mosaics
// ============================================================================

pub use mosaic::{Mosaic, EMBEDDING_DIM};
pub use store::{LocalTileStore, MosaicStore, TileStore};

// ============================================================================
// Extraction & Scoring
// ============================================================================

pub use extract::{extract_at_points, Extraction};
pub use score::{
    run_validation,
    sample_background,
    select_method,
    CentroidScorer,
    ClassifierModel,
    ClassifierScorer,
    Method,
    MethodKind,
    ModelKind,
    Scorer,
    TrialMetrics,
    ValidationReport,
    DEFAULT_CLASSIFIER_THRESHOLD,
};

// ============================================================================
// Rasters & Candidates
// ============================================================================

pub use candidates::{extract_candidates, Candidate, Threshold};
pub use geotiff::{GeoTiffCompression, GeoTiffWriter};
pub use raster::ScoreRaster;

// ============================================================================
// Pipelines
// ============================================================================
// Primary API: pipeline::find_candidates(&store, &bbox, &points, &options)

pub use pipeline::{
    find_candidates,
    named_region,
    predict_local_grid,
    save_outputs,
    FinderOptions,
    FinderOutput,
    LocalGridPrediction,
};
