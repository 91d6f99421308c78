//! Stitched embedding mosaic for a requested region.
//!
//! A [`Mosaic`] is the per-request, in-memory join of all embedding tiles
//! intersecting a bounding box: one contiguous `rows x cols x 128` f32 array
//! addressed by global pixel coordinates, with row 0 at the northern edge.
//! Pixels with no tile coverage hold NaN in every channel so downstream
//! scoring degrades gracefully instead of crashing on missing entries.

use crate::geometry::BoundingBox;
use crate::grid::TileGrid;

/// Channels per embedding pixel, fixed by the upstream foundation model.
pub const EMBEDDING_DIM: usize = 128;

/// Dense, lattice-aligned embedding array covering one region.
///
/// Built by [`MosaicStore::load`](crate::store::MosaicStore::load); immutable
/// afterwards.
#[derive(Debug)]
pub struct Mosaic {
    grid: TileGrid,
    bbox: BoundingBox,
    rows: usize,
    cols: usize,
    /// Longitude of the western edge of column 0 (lattice-aligned).
    origin_west: f64,
    /// Latitude of the northern edge of row 0 (lattice-aligned).
    origin_north: f64,
    /// Row-major, channel-interleaved embeddings; NaN where uncovered.
    data: Vec<f32>,
    tiles_total: usize,
    tiles_missing: usize,
}

impl Mosaic {
    /// Allocate an all-NaN mosaic for a bounding box.
    ///
    /// Dimensions follow the pixel lattice: `rows = round(height / pixel)`,
    /// `cols = round(width / pixel)`, with the origin snapped to the lattice
    /// so mosaic pixels coincide exactly with tile pixels.
    pub(crate) fn allocate(grid: TileGrid, bbox: BoundingBox, tiles_total: usize) -> Self {
        let pix = grid.pixel_deg();
        // Allow truncation: pixel counts for valid bboxes are small integers.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let rows = (bbox.height() / pix).round() as usize;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let cols = (bbox.width() / pix).round() as usize;
        let origin_west = (bbox.minx / pix).round() * pix;
        let origin_north = (bbox.maxy / pix).round() * pix;

        Self {
            grid,
            bbox,
            rows,
            cols,
            origin_west,
            origin_north,
            data: vec![f32::NAN; rows * cols * EMBEDDING_DIM],
            tiles_total,
            tiles_missing: 0,
        }
    }

    pub(crate) fn record_missing_tile(&mut self) {
        self.tiles_missing += 1;
    }

    /// Copy one tile's pixels into the mosaic, clipping to the mosaic window.
    ///
    /// `tile_west`/`tile_north` are the tile's edge coordinates; `tile_px` its
    /// pixel count per side. Tile data is row-major north-to-south,
    /// channel-interleaved, matching the mosaic layout.
    pub(crate) fn blit_tile(&mut self, tile_west: f64, tile_north: f64, tile_px: usize, data: &[f32]) {
        let pix = self.grid.pixel_deg();
        // Allow truncation: offsets are bounded by mosaic/tile extents.
        #[allow(clippy::cast_possible_truncation)]
        let col_off = ((tile_west - self.origin_west) / pix).round() as i64;
        #[allow(clippy::cast_possible_truncation)]
        let row_off = ((self.origin_north - tile_north) / pix).round() as i64;

        for tr in 0..tile_px {
            let mr = row_off + tr as i64;
            if mr < 0 || mr >= self.rows as i64 {
                continue;
            }
            // Clip the tile row to the mosaic's column window.
            let tc_start = (-col_off).max(0).min(tile_px as i64) as usize;
            let tc_end = (self.cols as i64 - col_off).clamp(0, tile_px as i64) as usize;
            if tc_start >= tc_end {
                continue;
            }
            let mc_start = (col_off + tc_start as i64) as usize;

            let src = (tr * tile_px + tc_start) * EMBEDDING_DIM
                ..(tr * tile_px + tc_end) * EMBEDDING_DIM;
            let dst_start = (mr as usize * self.cols + mc_start) * EMBEDDING_DIM;
            let dst = dst_start..dst_start + (tc_end - tc_start) * EMBEDDING_DIM;
            self.data[dst].copy_from_slice(&data[src]);
        }
    }

    /// (rows, cols, channels).
    #[inline]
    #[must_use]
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.rows, self.cols, EMBEDDING_DIM)
    }

    /// Requested bounding box.
    #[inline]
    #[must_use]
    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// Tile lattice this mosaic was stitched on.
    #[inline]
    #[must_use]
    pub fn grid(&self) -> TileGrid {
        self.grid
    }

    /// Pixel edge length in degrees.
    #[inline]
    #[must_use]
    pub fn pixel_deg(&self) -> f64 {
        self.grid.pixel_deg()
    }

    /// Fraction of tiles in the region that were present in storage.
    #[must_use]
    pub fn coverage(&self) -> f64 {
        if self.tiles_total == 0 {
            return 0.0;
        }
        1.0 - self.tiles_missing as f64 / self.tiles_total as f64
    }

    /// Number of tiles absent from storage (rendered as NaN).
    #[inline]
    #[must_use]
    pub fn missing_tiles(&self) -> usize {
        self.tiles_missing
    }

    /// The full flat embedding array, row-major and channel-interleaved.
    /// Used by the raster builder for batched scoring.
    #[inline]
    #[must_use]
    pub fn embeddings(&self) -> &[f32] {
        &self.data
    }

    /// Embedding vector at a pixel, or `None` for out-of-range indices.
    /// The slice may be all-NaN where coverage is missing.
    #[must_use]
    pub fn embedding(&self, row: usize, col: usize) -> Option<&[f32]> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        let start = (row * self.cols + col) * EMBEDDING_DIM;
        Some(&self.data[start..start + EMBEDDING_DIM])
    }

    /// Whether a pixel holds a real (non-NaN) embedding.
    #[must_use]
    pub fn has_embedding(&self, row: usize, col: usize) -> bool {
        self.embedding(row, col)
            .is_some_and(|v| v.iter().all(|x| x.is_finite()))
    }

    /// Mosaic pixel containing a lon/lat coordinate, or `None` if outside.
    #[must_use]
    pub fn pixel_for(&self, lon: f64, lat: f64) -> Option<(usize, usize)> {
        let pix = self.grid.pixel_deg();
        let col = (lon - self.origin_west) / pix;
        let row = (self.origin_north - lat) / pix;
        if col < 0.0 || row < 0.0 {
            return None;
        }
        // Allow truncation: bounds-checked below.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let (row, col) = (row as usize, col as usize);
        (row < self.rows && col < self.cols).then_some((row, col))
    }

    /// Center coordinate of a mosaic pixel.
    #[must_use]
    pub fn lonlat_for(&self, row: usize, col: usize) -> (f64, f64) {
        let pix = self.grid.pixel_deg();
        let lon = self.origin_west + (col as f64 + 0.5) * pix;
        let lat = self.origin_north - (row as f64 + 0.5) * pix;
        (lon, lat)
    }
}
