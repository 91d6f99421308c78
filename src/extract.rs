//! Embedding extraction at point locations.
//!
//! Resolves occurrence coordinates to embedding vectors through a stitched
//! [`Mosaic`]. Points that fall outside mosaic coverage, or on a pixel with
//! no embedding data, are flagged invalid and excluded from downstream
//! fitting; the caller gets a per-point validity mask and a dropped count
//! rather than a hard failure, unless *every* point is unusable.

use tracing::{debug, warn};

use crate::error::{FinderError, Result};
use crate::mosaic::Mosaic;

/// Result of sampling a batch of points against a mosaic.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// One embedding vector per *valid* point, in input order.
    pub vectors: Vec<Vec<f32>>,
    /// Lon/lat of each valid point, parallel to `vectors`.
    pub coords: Vec<(f64, f64)>,
    /// Per input point: was an embedding found there.
    pub valid: Vec<bool>,
    /// Number of input points dropped (outside coverage or NaN pixel).
    pub dropped: usize,
}

impl Extraction {
    /// Number of usable vectors.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// Sample embedding vectors at a list of lon/lat points.
///
/// Fails with [`FinderError::InsufficientSamples`] only when no point yields
/// a usable vector (including the zero-point input).
pub fn extract_at_points(mosaic: &Mosaic, points: &[(f64, f64)]) -> Result<Extraction> {
    let mut vectors = Vec::with_capacity(points.len());
    let mut coords = Vec::with_capacity(points.len());
    let mut valid = Vec::with_capacity(points.len());

    for &(lon, lat) in points {
        let vector = mosaic
            .pixel_for(lon, lat)
            .and_then(|(row, col)| mosaic.embedding(row, col))
            .filter(|v| v.iter().all(|x| x.is_finite()));

        match vector {
            Some(v) => {
                vectors.push(v.to_vec());
                coords.push((lon, lat));
                valid.push(true);
            }
            None => {
                debug!(lon, lat, "point has no embedding; dropping");
                valid.push(false);
            }
        }
    }

    let dropped = points.len() - vectors.len();
    if vectors.is_empty() {
        return Err(FinderError::InsufficientSamples {
            needed: 1,
            got: 0,
        });
    }
    if dropped > 0 {
        warn!(dropped, total = points.len(), "some points lacked embedding coverage");
    }

    Ok(Extraction { vectors, coords, valid, dropped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;
    use crate::grid::TileGrid;
    use crate::mosaic::{Mosaic, EMBEDDING_DIM};

    /// Mosaic with one covered tile (west) and one missing tile (east).
    fn half_covered_mosaic() -> Mosaic {
        let grid = TileGrid::new(0.1, 5);
        let bbox = BoundingBox::new(0.0, 52.0, 0.2, 52.1);
        let mut mosaic = Mosaic::allocate(grid, bbox, 2);
        mosaic.blit_tile(0.0, 52.1, 5, &vec![0.5; 5 * 5 * EMBEDDING_DIM]);
        mosaic.record_missing_tile();
        mosaic
    }

    #[test]
    fn test_extract_valid_points() {
        let mosaic = half_covered_mosaic();
        let out = extract_at_points(&mosaic, &[(0.05, 52.05), (0.01, 52.09)]).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out.dropped, 0);
        assert_eq!(out.valid, vec![true, true]);
        assert_eq!(out.vectors[0].len(), EMBEDDING_DIM);
        assert_eq!(out.coords[0], (0.05, 52.05));
    }

    #[test]
    fn test_extract_flags_uncovered_points() {
        let mosaic = half_covered_mosaic();
        // Second point is in the NaN (missing) tile, third outside the mosaic.
        let out =
            extract_at_points(&mosaic, &[(0.05, 52.05), (0.15, 52.05), (3.0, 52.05)]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.dropped, 2);
        assert_eq!(out.valid, vec![true, false, false]);
    }

    #[test]
    fn test_extract_all_invalid_is_error() {
        let mosaic = half_covered_mosaic();
        let err = extract_at_points(&mosaic, &[(0.15, 52.05), (0.19, 52.01)]).unwrap_err();
        assert!(matches!(err, FinderError::InsufficientSamples { got: 0, .. }));
    }

    #[test]
    fn test_extract_empty_input_is_error() {
        let mosaic = half_covered_mosaic();
        let err = extract_at_points(&mosaic, &[]).unwrap_err();
        assert!(matches!(err, FinderError::InsufficientSamples { .. }));
    }
}
