//! Local filesystem tile storage.
//!
//! Scans a directory tree for embedding tile files and serves them by tile
//! identifier. Tile files carry their lower-left corner in the filename
//! (`{lat}_{lon}.emb`) and hold raw little-endian f32 data: `tile_px *
//! tile_px * 128` values, row-major north-to-south, channel-interleaved.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{FinderError, Result};
use crate::grid::{TileGrid, TileId};

use super::TileStore;

/// File extension for embedding tiles.
const TILE_EXT: &str = "emb";

/// Canonical filename for a tile: lower-left corner, four decimals.
#[must_use]
pub fn tile_filename(grid: &TileGrid, id: TileId) -> String {
    let (west, south) = grid.tile_origin(id);
    format!("{south:.4}_{west:.4}.{TILE_EXT}")
}

/// Tile store backed by a local directory of `.emb` files.
///
/// The directory is scanned once at construction; reads happen lazily on
/// [`TileStore::fetch`].
pub struct LocalTileStore {
    grid: TileGrid,
    paths: HashMap<TileId, PathBuf>,
}

impl LocalTileStore {
    /// Scan a directory tree for tile files.
    ///
    /// Files whose names do not parse as `{lat}_{lon}.emb` are skipped with
    /// a warning.
    pub fn scan<P: AsRef<Path>>(root: P, grid: TileGrid) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(FinderError::Storage(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("tile directory does not exist: {}", root.display()),
            )));
        }

        let mut paths = HashMap::new();
        for entry in WalkDir::new(root).into_iter().filter_map(std::result::Result::ok) {
            let path = entry.path();
            let is_tile = path
                .extension()
                .and_then(|s| s.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(TILE_EXT));
            if !is_tile {
                continue;
            }

            match parse_tile_stem(path, &grid) {
                Some(id) => {
                    debug!(path = %path.display(), tile_x = id.x, tile_y = id.y, "discovered tile");
                    paths.insert(id, path.to_path_buf());
                }
                None => {
                    warn!(path = %path.display(), "tile filename does not parse; skipping");
                }
            }
        }

        Ok(Self { grid, paths })
    }

    /// Number of tiles discovered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether no tiles were discovered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Parse `{lat}_{lon}` from a file stem into a tile identifier.
fn parse_tile_stem(path: &Path, grid: &TileGrid) -> Option<TileId> {
    let stem = path.file_stem()?.to_str()?;
    let (lat_s, lon_s) = stem.split_once('_')?;
    let lat: f64 = lat_s.parse().ok()?;
    let lon: f64 = lon_s.parse().ok()?;
    // Snap from the tile midpoint so float noise in the printed corner
    // cannot flip the lattice index.
    let half = grid.tile_deg / 2.0;
    grid.tile_for(lon + half, lat + half).ok()
}

impl TileStore for LocalTileStore {
    fn fetch(&self, id: TileId) -> Result<Option<Vec<f32>>> {
        let Some(path) = self.paths.get(&id) else {
            return Ok(None);
        };

        let bytes = std::fs::read(path)?;
        if bytes.len() % 4 != 0 {
            return Err(FinderError::Storage(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("tile file is not a whole number of f32s: {}", path.display()),
            )));
        }

        let data = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Some(data))
    }
}
