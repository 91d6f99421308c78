//! Per-pixel score raster.
//!
//! Applies a fitted [`Scorer`] to every pixel of a mosaic, producing a
//! single-band f32 grid aligned with the mosaic (row 0 north). Uncovered
//! pixels stay NaN. Rows are scored in parallel.

use rayon::prelude::*;
use tracing::debug;

use crate::geometry::BoundingBox;
use crate::mosaic::{Mosaic, EMBEDDING_DIM};
use crate::score::Scorer;

/// Single-band habitat-score grid over a region.
#[derive(Debug, Clone)]
pub struct ScoreRaster {
    rows: usize,
    cols: usize,
    bbox: BoundingBox,
    /// Western edge of column 0.
    origin_west: f64,
    /// Northern edge of row 0.
    origin_north: f64,
    pixel_deg: f64,
    /// Row-major scores, NaN where coverage is missing.
    scores: Vec<f32>,
}

impl ScoreRaster {
    /// Score every mosaic pixel with a fitted scorer.
    #[must_use]
    pub fn build(mosaic: &Mosaic, scorer: &dyn Scorer) -> Self {
        let (rows, cols, dim) = mosaic.shape();
        debug_assert_eq!(dim, EMBEDDING_DIM);

        // One batch per row keeps the parallel chunks contiguous.
        let scores: Vec<f32> = mosaic
            .embeddings()
            .par_chunks(cols * dim)
            .flat_map_iter(|row| scorer.score_batch(row, dim))
            .collect();
        debug!(rows, cols, "score raster built");

        let pix = mosaic.pixel_deg();
        let (center_lon, center_lat) = mosaic.lonlat_for(0, 0);
        Self {
            rows,
            cols,
            bbox: mosaic.bbox(),
            origin_west: center_lon - pix / 2.0,
            origin_north: center_lat + pix / 2.0,
            pixel_deg: pix,
            scores,
        }
    }

    /// (rows, cols).
    #[inline]
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    #[inline]
    #[must_use]
    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// Pixel edge length in degrees.
    #[inline]
    #[must_use]
    pub fn pixel_deg(&self) -> f64 {
        self.pixel_deg
    }

    /// Western edge of column 0 and northern edge of row 0.
    #[inline]
    #[must_use]
    pub fn origin(&self) -> (f64, f64) {
        (self.origin_west, self.origin_north)
    }

    /// The flat score array, row-major from the northern edge.
    #[inline]
    #[must_use]
    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    /// Score at a pixel, or `None` for out-of-range indices.
    #[must_use]
    pub fn score(&self, row: usize, col: usize) -> Option<f32> {
        (row < self.rows && col < self.cols).then(|| self.scores[row * self.cols + col])
    }

    /// Center coordinate of a pixel.
    #[must_use]
    pub fn lonlat_for(&self, row: usize, col: usize) -> (f64, f64) {
        let lon = self.origin_west + (col as f64 + 0.5) * self.pixel_deg;
        let lat = self.origin_north - (row as f64 + 0.5) * self.pixel_deg;
        (lon, lat)
    }

    /// Number of pixels with a finite score.
    #[must_use]
    pub fn finite_count(&self) -> usize {
        self.scores.iter().filter(|s| s.is_finite()).count()
    }

    /// Nearest-rank percentile (`p` in `[0, 100]`) over finite scores, or
    /// `None` when every pixel is NaN.
    #[must_use]
    pub fn percentile(&self, p: f64) -> Option<f32> {
        let mut finite: Vec<f32> = self.scores.iter().copied().filter(|s| s.is_finite()).collect();
        if finite.is_empty() {
            return None;
        }
        finite.sort_by(f32::total_cmp);
        // Allow truncation: the index is clamped into range.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let idx = ((p.clamp(0.0, 100.0) / 100.0) * (finite.len() as f64 - 1.0)).round() as usize;
        Some(finite[idx])
    }
}
