//! Tile grid indexing: lon/lat to tile identifier and pixel offset, and back.
//!
//! Embedding tiles live on a fixed geographic lattice (0.1 degree cells by
//! default), each holding a square pixel grid. [`TileGrid`] is the single
//! authority for that lattice: every module converts coordinates through it
//! so the row/col convention (row 0 = northernmost, col 0 = westernmost)
//! stays consistent across the whole pipeline.
//!
//! # Example
//!
//! ```rust
//! use habscan::grid::TileGrid;
//!
//! let grid = TileGrid::default();
//! let (tile, row, col) = grid.pixel_for(0.05, 52.05).unwrap();
//! let (lon, lat) = grid.center_of(tile, row, col);
//! let (tile2, row2, col2) = grid.pixel_for(lon, lat).unwrap();
//! assert_eq!((tile, row, col), (tile2, row2, col2));
//! ```

use crate::error::Result;
use crate::geometry::{check_lonlat, BoundingBox};

/// Guard against f64 noise when snapping coordinates to the lattice.
/// Well below one millionth of a pixel at default resolution.
const SNAP_EPS: f64 = 1e-9;

/// Identifier of one embedding tile: integer lattice indices of its
/// lower-left corner (`x = floor(lon / tile_deg)`, `y = floor(lat / tile_deg)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId {
    pub x: i32,
    pub y: i32,
}

/// Fixed tile lattice: tile size in degrees and pixels per tile side.
#[derive(Debug, Clone, Copy)]
pub struct TileGrid {
    /// Tile edge length in degrees.
    pub tile_deg: f64,
    /// Pixels per tile side.
    pub tile_px: usize,
}

impl Default for TileGrid {
    fn default() -> Self {
        Self { tile_deg: 0.1, tile_px: 100 }
    }
}

impl TileGrid {
    #[must_use]
    pub fn new(tile_deg: f64, tile_px: usize) -> Self {
        Self { tile_deg, tile_px }
    }

    /// Pixel edge length in degrees.
    #[inline]
    #[must_use]
    pub fn pixel_deg(&self) -> f64 {
        self.tile_deg / self.tile_px as f64
    }

    /// Floor a coordinate to a lattice index.
    #[inline]
    fn lattice_index(&self, v: f64) -> i32 {
        // Allow truncation: lattice indices for valid coordinates fit in i32.
        #[allow(clippy::cast_possible_truncation)]
        let idx = (v / self.tile_deg + SNAP_EPS).floor() as i32;
        idx
    }

    /// Tile containing a lon/lat coordinate.
    pub fn tile_for(&self, lon: f64, lat: f64) -> Result<TileId> {
        check_lonlat(lon, lat)?;
        Ok(TileId {
            x: self.lattice_index(lon),
            y: self.lattice_index(lat),
        })
    }

    /// Lower-left corner of a tile, in degrees.
    #[inline]
    #[must_use]
    pub fn tile_origin(&self, tile: TileId) -> (f64, f64) {
        (f64::from(tile.x) * self.tile_deg, f64::from(tile.y) * self.tile_deg)
    }

    /// Tile plus sub-tile pixel offset for a lon/lat coordinate.
    /// Row 0 is the northernmost row, col 0 the westernmost column.
    pub fn pixel_for(&self, lon: f64, lat: f64) -> Result<(TileId, usize, usize)> {
        let tile = self.tile_for(lon, lat)?;
        let (west, south) = self.tile_origin(tile);
        let north = south + self.tile_deg;
        let pix = self.pixel_deg();

        let col = clamp_index((lon - west) / pix + SNAP_EPS, self.tile_px);
        let row = clamp_index((north - lat) / pix + SNAP_EPS, self.tile_px);
        Ok((tile, row, col))
    }

    /// Center coordinate of a pixel; exact inverse of [`Self::pixel_for`]
    /// for in-range indices.
    #[must_use]
    pub fn center_of(&self, tile: TileId, row: usize, col: usize) -> (f64, f64) {
        let (west, south) = self.tile_origin(tile);
        let north = south + self.tile_deg;
        let pix = self.pixel_deg();
        let lon = west + (col as f64 + 0.5) * pix;
        let lat = north - (row as f64 + 0.5) * pix;
        (lon, lat)
    }

    /// All tiles intersecting a bounding box, inclusive of partial overlap,
    /// in row-major order (south to north, west to east).
    #[must_use]
    pub fn tiles_covering(&self, bbox: &BoundingBox) -> Vec<TileId> {
        let x0 = self.lattice_index(bbox.minx);
        let y0 = self.lattice_index(bbox.miny);
        // Upper edges: a bbox ending exactly on a tile boundary does not
        // reach into the next tile.
        let x1 = self.lattice_index(bbox.maxx - SNAP_EPS);
        let y1 = self.lattice_index(bbox.maxy - SNAP_EPS);

        let mut tiles = Vec::new();
        for y in y0..=y1 {
            for x in x0..=x1 {
                tiles.push(TileId { x, y });
            }
        }
        tiles
    }
}

/// Floor a fractional pixel offset into `[0, max)`.
#[inline]
fn clamp_index(v: f64, max: usize) -> usize {
    if v <= 0.0 {
        return 0;
    }
    // Allow truncation: v is non-negative and clamped below.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let idx = v as usize;
    idx.min(max - 1)
}
