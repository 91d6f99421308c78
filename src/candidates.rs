//! Candidate site extraction from a score raster.
//!
//! Picks the highest-scoring pixels above a threshold, greedily enforcing a
//! minimum great-circle separation so the output is a spread of distinct
//! sites rather than one bright cluster. Results serialize to GeoJSON.

use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::geometry::haversine_m;
use crate::raster::ScoreRaster;

/// Default percentile cutoff for candidate selection.
pub const DEFAULT_PERCENTILE: f64 = 95.0;

/// Default minimum separation between candidates, meters.
pub const DEFAULT_MIN_SEPARATION_M: f64 = 500.0;

/// Default cap on the number of candidates returned.
pub const DEFAULT_MAX_CANDIDATES: usize = 10;

/// Score cutoff for candidate pixels.
#[derive(Debug, Clone, Copy)]
pub enum Threshold {
    /// Fixed score value.
    Absolute(f32),
    /// Percentile of the finite scores in the raster.
    Percentile(f64),
}

impl Default for Threshold {
    fn default() -> Self {
        Self::Percentile(DEFAULT_PERCENTILE)
    }
}

impl Threshold {
    /// Resolve to a concrete cutoff; `None` when the raster has no finite
    /// scores to take a percentile of.
    #[must_use]
    pub fn resolve(self, raster: &ScoreRaster) -> Option<f32> {
        match self {
            Self::Absolute(v) => Some(v),
            Self::Percentile(p) => raster.percentile(p),
        }
    }
}

/// One proposed site: a pixel center and its habitat score.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Candidate {
    pub lon: f64,
    pub lat: f64,
    pub score: f32,
}

/// Extract up to `max_candidates` candidate sites from a raster.
///
/// Pixels at or above the threshold are visited in descending score order;
/// a pixel becomes a candidate only if it lies at least `min_separation_m`
/// meters from every already-accepted candidate. Returns an empty vector
/// when no pixel clears the threshold (including the all-NaN raster).
#[must_use]
pub fn extract_candidates(
    raster: &ScoreRaster,
    threshold: Threshold,
    max_candidates: usize,
    min_separation_m: f64,
) -> Vec<Candidate> {
    let Some(cutoff) = threshold.resolve(raster) else {
        return Vec::new();
    };

    let (rows, cols) = raster.shape();
    let mut above: Vec<(f32, usize, usize)> = Vec::new();
    for row in 0..rows {
        for col in 0..cols {
            // score() is in range by construction of the loop
            let s = raster.score(row, col).unwrap_or(f32::NAN);
            if s.is_finite() && s >= cutoff {
                above.push((s, row, col));
            }
        }
    }
    // Descending score; ties broken by pixel order for determinism.
    above.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    let mut picked: Vec<Candidate> = Vec::new();
    for (score, row, col) in above {
        if picked.len() >= max_candidates {
            break;
        }
        let (lon, lat) = raster.lonlat_for(row, col);
        let far_enough = picked
            .iter()
            .all(|c| haversine_m(lon, lat, c.lon, c.lat) >= min_separation_m);
        if far_enough {
            picked.push(Candidate { lon, lat, score });
        }
    }

    debug!(cutoff, n = picked.len(), "candidates extracted");
    picked
}

/// Candidates as a GeoJSON `FeatureCollection` of points, ranked by score.
#[must_use]
pub fn candidates_geojson(candidates: &[Candidate]) -> Value {
    let features: Vec<Value> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            json!({
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [c.lon, c.lat] },
                "properties": { "rank": i + 1, "score": c.score },
            })
        })
        .collect();
    json!({ "type": "FeatureCollection", "features": features })
}

/// Occurrence points echoed back as a GeoJSON `FeatureCollection`.
#[must_use]
pub fn occurrences_geojson(points: &[(f64, f64)]) -> Value {
    let features: Vec<Value> = points
        .iter()
        .map(|&(lon, lat)| {
            json!({
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [lon, lat] },
                "properties": {},
            })
        })
        .collect();
    json!({ "type": "FeatureCollection", "features": features })
}
