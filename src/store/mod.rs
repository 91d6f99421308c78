//! Embedding tile storage and the mosaic store.
//!
//! [`TileStore`] abstracts the read-only key-value storage holding 0.1
//! degree embedding tiles keyed by their lower-left corner. [`MosaicStore`]
//! sits on top: it resolves a bounding box to the set of intersecting tiles,
//! loads them in parallel with an at-most-once guarantee per tile, and
//! stitches the result into a [`Mosaic`].
//!
//! # Example
//!
//! ```rust,no_run
//! use habscan::store::{LocalTileStore, MosaicStore};
//! use habscan::geometry::BoundingBox;
//! use habscan::grid::TileGrid;
//!
//! fn main() -> habscan::Result<()> {
//!     let grid = TileGrid::default();
//!     let store = MosaicStore::new(LocalTileStore::scan("cache/", grid)?, grid);
//!     let mosaic = store.load(&BoundingBox::new(0.0, 52.0, 1.0, 53.0))?;
//!     let (rows, cols, channels) = mosaic.shape();
//!     println!("mosaic: {rows} x {cols} x {channels}");
//!     Ok(())
//! }
//! ```

pub mod local;

pub use local::{tile_filename, LocalTileStore};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{FinderError, Result};
use crate::geometry::BoundingBox;
use crate::grid::{TileGrid, TileId};
use crate::mosaic::{Mosaic, EMBEDDING_DIM};

/// Read-only key-value storage of embedding tiles.
///
/// `Ok(None)` means the tile is absent from storage; that is normal partial
/// coverage, not an error.
pub trait TileStore: Send + Sync {
    /// Fetch the raw embedding payload for one tile:
    /// `tile_px * tile_px * 128` f32 values, row-major north-to-south,
    /// channel-interleaved.
    fn fetch(&self, id: TileId) -> Result<Option<Vec<f32>>>;
}

/// Cached load result for one tile. `Missing` is cached too, so a tile
/// absent from storage is probed at most once per store instance.
#[derive(Clone)]
enum CacheEntry {
    Present(Arc<Vec<f32>>),
    Missing,
}

/// Per-tile load-once slot; holding the inner lock serializes the fetch.
type Slot = Arc<Mutex<Option<CacheEntry>>>;

/// Loads, caches, and stitches embedding tiles covering a bounding box.
///
/// The tile cache is owned by the store instance and is append-only: entries
/// are added on first load and never mutated or evicted. Eviction across
/// requests is deliberately left to whoever owns the store.
pub struct MosaicStore<S: TileStore> {
    store: S,
    grid: TileGrid,
    cache: Mutex<HashMap<TileId, Slot>>,
}

impl<S: TileStore> MosaicStore<S> {
    #[must_use]
    pub fn new(store: S, grid: TileGrid) -> Self {
        Self {
            store,
            grid,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The tile lattice this store operates on.
    #[inline]
    #[must_use]
    pub fn grid(&self) -> TileGrid {
        self.grid
    }

    /// Load every tile intersecting `bbox` and stitch them into a [`Mosaic`].
    ///
    /// Tiles absent from storage become all-NaN regions. Fails with
    /// [`FinderError::NoData`] only when *every* tile in the bbox is missing,
    /// and with [`FinderError::InvalidRegion`] for a malformed bbox.
    pub fn load(&self, bbox: &BoundingBox) -> Result<Mosaic> {
        bbox.validate()?;
        let tiles = self.grid.tiles_covering(bbox);
        let total = tiles.len();

        // Tile loads are independent I/O; fan out across the rayon pool.
        let loaded: Vec<(TileId, Option<Arc<Vec<f32>>>)> = tiles
            .par_iter()
            .map(|&id| self.tile(id).map(|data| (id, data)))
            .collect::<Result<_>>()?;

        let missing = loaded.iter().filter(|(_, d)| d.is_none()).count();
        if missing == total {
            return Err(FinderError::NoData(format!(
                "no tiles in storage for bbox ({}, {}, {}, {})",
                bbox.minx, bbox.miny, bbox.maxx, bbox.maxy
            )));
        }

        let mut mosaic = Mosaic::allocate(self.grid, *bbox, total);
        for (id, data) in loaded {
            match data {
                Some(data) => {
                    let (west, south) = self.grid.tile_origin(id);
                    mosaic.blit_tile(west, south + self.grid.tile_deg, self.grid.tile_px, &data);
                }
                None => mosaic.record_missing_tile(),
            }
        }

        let (rows, cols, channels) = mosaic.shape();
        info!(rows, cols, channels, coverage = mosaic.coverage(), "stitched mosaic");
        if missing > 0 {
            warn!(missing, total, "partial tile coverage; gaps rendered as NaN");
        }
        Ok(mosaic)
    }

    /// Get one tile through the cache, fetching from storage at most once
    /// per identifier even under concurrent callers.
    fn tile(&self, id: TileId) -> Result<Option<Arc<Vec<f32>>>> {
        let slot = {
            let mut cache = self.cache.lock().unwrap();
            Arc::clone(cache.entry(id).or_default())
        };

        // The slot lock is held across the fetch, so two callers racing on
        // the same tile perform a single storage read.
        let mut guard = slot.lock().unwrap();
        if let Some(entry) = guard.as_ref() {
            return Ok(match entry {
                CacheEntry::Present(data) => Some(Arc::clone(data)),
                CacheEntry::Missing => None,
            });
        }

        let expected = self.grid.tile_px * self.grid.tile_px * EMBEDDING_DIM;
        let fetched = match self.store.fetch(id)? {
            Some(data) if data.len() == expected => Some(Arc::new(data)),
            Some(data) => {
                warn!(
                    tile_x = id.x,
                    tile_y = id.y,
                    got = data.len(),
                    expected,
                    "tile payload has wrong length; treating as missing"
                );
                None
            }
            None => {
                debug!(tile_x = id.x, tile_y = id.y, "tile absent from storage");
                None
            }
        };

        *guard = Some(match &fetched {
            Some(data) => CacheEntry::Present(Arc::clone(data)),
            None => CacheEntry::Missing,
        });
        Ok(fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory store counting fetches, for cache behavior tests.
    struct CountingStore {
        tiles: HashMap<TileId, Vec<f32>>,
        fetches: AtomicUsize,
    }

    impl CountingStore {
        fn new(grid: TileGrid, ids: &[TileId], value: f32) -> Self {
            let len = grid.tile_px * grid.tile_px * EMBEDDING_DIM;
            let tiles = ids.iter().map(|&id| (id, vec![value; len])).collect();
            Self { tiles, fetches: AtomicUsize::new(0) }
        }
    }

    impl TileStore for CountingStore {
        fn fetch(&self, id: TileId) -> Result<Option<Vec<f32>>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.tiles.get(&id).cloned())
        }
    }

    fn grid() -> TileGrid {
        TileGrid::new(0.1, 4)
    }

    #[test]
    fn test_load_all_tiles_present() {
        let g = grid();
        let ids: Vec<TileId> = g.tiles_covering(&BoundingBox::new(0.0, 52.0, 0.2, 52.1));
        let store = MosaicStore::new(CountingStore::new(g, &ids, 1.0), g);

        let mosaic = store.load(&BoundingBox::new(0.0, 52.0, 0.2, 52.1)).unwrap();
        let (rows, cols, _) = mosaic.shape();
        assert_eq!((rows, cols), (4, 8));
        assert!((mosaic.coverage() - 1.0).abs() < 1e-12);
        assert!(mosaic.has_embedding(0, 0));
        assert!(mosaic.has_embedding(3, 7));
    }

    #[test]
    fn test_load_partial_coverage_degrades_to_nan() {
        let g = grid();
        // Only the western of two tiles exists.
        let present = vec![g.tile_for(0.05, 52.05).unwrap()];
        let store = MosaicStore::new(CountingStore::new(g, &present, 1.0), g);

        let mosaic = store.load(&BoundingBox::new(0.0, 52.0, 0.2, 52.1)).unwrap();
        assert!(mosaic.has_embedding(0, 0));
        assert!(!mosaic.has_embedding(0, 4));
        assert_eq!(mosaic.missing_tiles(), 1);
        assert!((mosaic.coverage() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_load_no_coverage_is_error() {
        let g = grid();
        let store = MosaicStore::new(CountingStore::new(g, &[], 0.0), g);
        let err = store.load(&BoundingBox::new(0.0, 52.0, 0.2, 52.1)).unwrap_err();
        assert!(matches!(err, FinderError::NoData(_)));
    }

    #[test]
    fn test_load_rejects_bad_bbox() {
        let g = grid();
        let store = MosaicStore::new(CountingStore::new(g, &[], 0.0), g);
        let err = store.load(&BoundingBox::new(1.0, 52.0, 0.0, 53.0)).unwrap_err();
        assert!(matches!(err, FinderError::InvalidRegion(_)));
    }

    #[test]
    fn test_tiles_fetched_at_most_once() {
        let g = grid();
        let bbox = BoundingBox::new(0.0, 52.0, 0.2, 52.1);
        let ids = g.tiles_covering(&bbox);
        let n_tiles = ids.len();
        let store = MosaicStore::new(CountingStore::new(g, &ids, 1.0), g);

        store.load(&bbox).unwrap();
        store.load(&bbox).unwrap();
        // Second load is served entirely from the cache.
        assert_eq!(store.store.fetches.load(Ordering::SeqCst), n_tiles);
    }

    #[test]
    fn test_missing_tiles_cached_too() {
        let g = grid();
        let bbox = BoundingBox::new(0.0, 52.0, 0.2, 52.1);
        let present = vec![g.tile_for(0.05, 52.05).unwrap()];
        let store = MosaicStore::new(CountingStore::new(g, &present, 1.0), g);

        store.load(&bbox).unwrap();
        store.load(&bbox).unwrap();
        assert_eq!(store.store.fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_wrong_length_payload_treated_as_missing() {
        struct ShortStore;
        impl TileStore for ShortStore {
            fn fetch(&self, _id: TileId) -> Result<Option<Vec<f32>>> {
                Ok(Some(vec![0.0; 7]))
            }
        }

        let g = grid();
        let store = MosaicStore::new(ShortStore, g);
        let err = store.load(&BoundingBox::new(0.0, 52.0, 0.1, 52.1)).unwrap_err();
        assert!(matches!(err, FinderError::NoData(_)));
    }
}
