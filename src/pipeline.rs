//! End-to-end habitat search pipelines.
//!
//! Two entry points tie the modules together:
//!
//! - [`find_candidates`]: region-scale search. Stitch a mosaic, extract
//!   occurrence embeddings, pick a scoring method, build the score raster,
//!   and return ranked candidate sites (plus an optional hold-out validation
//!   report for the classifier path).
//! - [`predict_local_grid`]: fine-grained probability grid around a single
//!   center point, always classifier-based, with optional stochastic
//!   confidence from repeated dropout passes.
//!
//! [`save_outputs`] writes the standard artifact set: `probability.tif`,
//! `candidates.geojson`, `occurrences.geojson`, and `validation.json` when
//! a report was produced.

use std::path::Path;

use tracing::{info, warn};

use crate::candidates::{
    candidates_geojson, extract_candidates, occurrences_geojson, Candidate, Threshold,
    DEFAULT_MAX_CANDIDATES, DEFAULT_MIN_SEPARATION_M,
};
use crate::error::{FinderError, Result};
use crate::extract::extract_at_points;
use crate::geometry::{check_lonlat, meters_to_lat_degrees, meters_to_lon_degrees, BoundingBox};
use crate::mosaic::Mosaic;
use crate::raster::ScoreRaster;
use crate::score::classifier::DEFAULT_BACKGROUND_RATIO;
use crate::score::validate::DEFAULT_BASE_SEED;
use crate::score::{
    run_validation, sample_background, select_method, CentroidScorer, ClassifierScorer, Method,
    MethodKind, ModelKind, Scorer, ValidationReport, DEFAULT_CLASSIFIER_THRESHOLD,
};
use crate::store::{MosaicStore, TileStore};

/// Built-in named study regions, lon/lat WGS84.
#[must_use]
pub fn named_region(name: &str) -> Option<BoundingBox> {
    match name.to_ascii_lowercase().as_str() {
        "cambridge" => Some(BoundingBox::new(0.03, 52.13, 0.22, 52.29)),
        _ => None,
    }
}

/// Tuning knobs for [`find_candidates`].
#[derive(Debug, Clone)]
pub struct FinderOptions {
    /// Requested scoring method; `Auto` selects by sample count.
    pub method: Method,
    /// Classifier family when the classifier path is taken.
    pub model: ModelKind,
    /// Sample count at which auto-selection switches to the classifier.
    pub classifier_threshold: usize,
    /// Background samples per occurrence sample.
    pub background_ratio: f64,
    /// Seed for background sampling, model init, and validation splits.
    pub seed: u64,
    /// Candidate score cutoff.
    pub threshold: Threshold,
    /// Maximum number of candidates returned.
    pub max_candidates: usize,
    /// Minimum great-circle separation between candidates, meters.
    pub min_separation_m: f64,
    /// Hold-out validation trials for the classifier path; 0 disables.
    pub validation_trials: usize,
}

impl Default for FinderOptions {
    fn default() -> Self {
        Self {
            method: Method::Auto,
            model: ModelKind::default(),
            classifier_threshold: DEFAULT_CLASSIFIER_THRESHOLD,
            background_ratio: DEFAULT_BACKGROUND_RATIO,
            seed: DEFAULT_BASE_SEED,
            threshold: Threshold::default(),
            max_candidates: DEFAULT_MAX_CANDIDATES,
            min_separation_m: DEFAULT_MIN_SEPARATION_M,
            validation_trials: 0,
        }
    }
}

/// Everything [`find_candidates`] produces.
#[derive(Debug)]
pub struct FinderOutput {
    /// Method actually used after auto-selection and any fallback.
    pub method: MethodKind,
    pub raster: ScoreRaster,
    pub candidates: Vec<Candidate>,
    /// Occurrence points that had embedding coverage, in input order.
    pub occurrences: Vec<(f64, f64)>,
    /// Input points dropped for lacking coverage.
    pub dropped: usize,
    /// Fraction of tiles in the region present in storage.
    pub coverage: f64,
    /// Hold-out validation report, classifier path only.
    pub validation: Option<ValidationReport>,
}

/// Region-scale habitat search.
///
/// Loads every embedding tile intersecting `bbox`, fits a scorer to the
/// occurrence points, scores every pixel, and extracts spread-out candidate
/// sites. With `Method::Auto`, a classifier path that turns out to have too
/// few usable samples falls back to similarity scoring instead of failing.
pub fn find_candidates<S: TileStore>(
    store: &MosaicStore<S>,
    bbox: &BoundingBox,
    occurrences: &[(f64, f64)],
    options: &FinderOptions,
) -> Result<FinderOutput> {
    let mosaic = store.load(bbox)?;
    let extraction = extract_at_points(&mosaic, occurrences)?;
    info!(
        usable = extraction.len(),
        dropped = extraction.dropped,
        coverage = mosaic.coverage(),
        "occurrence embeddings extracted"
    );

    let mut kind = select_method(options.method, extraction.len(), options.classifier_threshold);
    let mut validation = None;

    let scorer: Box<dyn Scorer> = match kind {
        MethodKind::Classifier => {
            match fit_classifier(&mosaic, &extraction.vectors, &extraction.coords, options) {
                Ok((scorer, negatives)) => {
                    if options.validation_trials > 0 {
                        match run_validation(
                            &extraction.vectors,
                            &negatives,
                            options.validation_trials,
                            options.seed,
                        ) {
                            Ok(report) => validation = Some(report),
                            Err(e @ FinderError::InsufficientSamples { .. }) => {
                                warn!(error = %e, "too few samples to validate; skipping");
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    scorer
                }
                Err(e @ FinderError::InsufficientSamples { .. })
                    if options.method == Method::Auto =>
                {
                    warn!(error = %e, "classifier unusable; falling back to similarity");
                    kind = MethodKind::Similarity;
                    fit_similarity(&extraction.vectors)?
                }
                Err(e) => return Err(e),
            }
        }
        MethodKind::Similarity => fit_similarity(&extraction.vectors)?,
    };
    info!(method = kind.as_str(), "scorer fitted");

    let raster = ScoreRaster::build(&mosaic, scorer.as_ref());
    let candidates = extract_candidates(
        &raster,
        options.threshold,
        options.max_candidates,
        options.min_separation_m,
    );
    info!(n_candidates = candidates.len(), "search complete");

    Ok(FinderOutput {
        method: kind,
        raster,
        candidates,
        occurrences: extraction.coords,
        dropped: extraction.dropped,
        coverage: mosaic.coverage(),
        validation,
    })
}

fn fit_similarity(positives: &[Vec<f32>]) -> Result<Box<dyn Scorer>> {
    let mut scorer = CentroidScorer::new();
    scorer.fit(positives, &[])?;
    Ok(Box::new(scorer))
}

/// Fit the classifier path: draw background, train, return the scorer and
/// the background vectors (kept for validation).
fn fit_classifier(
    mosaic: &Mosaic,
    positives: &[Vec<f32>],
    coords: &[(f64, f64)],
    options: &FinderOptions,
) -> Result<(Box<dyn Scorer>, Vec<Vec<f32>>)> {
    if positives.len() < 2 {
        return Err(FinderError::InsufficientSamples {
            needed: 2,
            got: positives.len(),
        });
    }
    // Allow truncation: ratios and sample counts are small.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let n_background = ((positives.len() as f64 * options.background_ratio).round() as usize).max(1);
    let (negatives, _) = sample_background(mosaic, n_background, coords, options.seed)?;

    let mut scorer = ClassifierScorer::with_kind(options.model, options.seed);
    scorer.fit(positives, &negatives)?;
    Ok((Box::new(scorer), negatives))
}

/// Fine-grained probability grid around one center point.
pub struct LocalGridPrediction {
    /// Grid extent, lon/lat WGS84.
    pub bbox: BoundingBox,
    pub rows: usize,
    pub cols: usize,
    /// Western edge of column 0 and northern edge of row 0
    /// (lattice-aligned, may overhang `bbox` slightly).
    pub origin: (f64, f64),
    /// Pixel edge length in degrees.
    pub pixel_deg: f64,
    /// Row-major scores from the northern edge, NaN where uncovered.
    pub scores: Vec<f32>,
    /// Per-pixel confidence from stochastic passes, when the model
    /// supports it and more than one sample was requested.
    pub confidence: Option<Vec<f32>>,
    /// Classifier family used.
    pub model: ModelKind,
}

impl LocalGridPrediction {
    /// Center coordinate of a grid pixel.
    #[must_use]
    pub fn lonlat_for(&self, row: usize, col: usize) -> (f64, f64) {
        let (west, north) = self.origin;
        let lon = west + (col as f64 + 0.5) * self.pixel_deg;
        let lat = north - (row as f64 + 0.5) * self.pixel_deg;
        (lon, lat)
    }

    /// Flatten to per-point predictions: `(lon, lat, score, confidence)`.
    #[must_use]
    pub fn points(&self) -> Vec<(f64, f64, f32, Option<f32>)> {
        (0..self.rows * self.cols)
            .map(|i| {
                let (lon, lat) = self.lonlat_for(i / self.cols, i % self.cols);
                let confidence = self.confidence.as_ref().map(|c| c[i]);
                (lon, lat, self.scores[i], confidence)
            })
            .collect()
    }
}

/// Predict a square probability grid of roughly `grid_size_m` meters per
/// side centered on `center`, training a classifier on the given
/// occurrence points.
///
/// With `num_samples > 1` and a stochastic model (the network), each pixel
/// also gets a confidence value from repeated dropout passes.
pub fn predict_local_grid<S: TileStore>(
    store: &MosaicStore<S>,
    center: (f64, f64),
    occurrences: &[(f64, f64)],
    grid_size_m: f64,
    model: ModelKind,
    num_samples: usize,
    seed: u64,
) -> Result<LocalGridPrediction> {
    let (lon, lat) = center;
    check_lonlat(lon, lat)?;

    let half_lon = meters_to_lon_degrees(grid_size_m / 2.0, lat);
    let half_lat = meters_to_lat_degrees(grid_size_m / 2.0);
    let local_bbox = BoundingBox::new(lon - half_lon, lat - half_lat, lon + half_lon, lat + half_lat);
    local_bbox.validate()?;

    // Train on a mosaic spanning the occurrences and the target grid; the
    // shared tile cache makes the second load cheap.
    let train_bbox = expand_to_points(local_bbox, occurrences);
    let train_mosaic = store.load(&train_bbox)?;
    let extraction = extract_at_points(&train_mosaic, occurrences)?;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let n_background =
        ((extraction.len() as f64 * DEFAULT_BACKGROUND_RATIO).round() as usize).max(1);
    let (negatives, _) =
        sample_background(&train_mosaic, n_background, &extraction.coords, seed)?;

    let mut scorer = ClassifierScorer::with_kind(model, seed);
    scorer.fit(&extraction.vectors, &negatives)?;

    let local_mosaic = store.load(&local_bbox)?;
    let (rows, cols, dim) = local_mosaic.shape();

    let (scores, confidence) = if num_samples > 1 && scorer.supports_stochastic() {
        let pairs = scorer.score_batch_sampled(local_mosaic.embeddings(), dim, num_samples, seed);
        let (scores, confidence): (Vec<f32>, Vec<f32>) = pairs.into_iter().unzip();
        (scores, Some(confidence))
    } else {
        (scorer.score_batch(local_mosaic.embeddings(), dim), None)
    };

    info!(rows, cols, model = ?model, stochastic = confidence.is_some(), "local grid predicted");
    let pix = local_mosaic.pixel_deg();
    let (lon0, lat0) = local_mosaic.lonlat_for(0, 0);
    Ok(LocalGridPrediction {
        bbox: local_bbox,
        rows,
        cols,
        origin: (lon0 - pix / 2.0, lat0 + pix / 2.0),
        pixel_deg: pix,
        scores,
        confidence,
        model,
    })
}

/// Smallest bbox containing `bbox` and every listed point, padded by a
/// sliver so edge points land strictly inside.
fn expand_to_points(bbox: BoundingBox, points: &[(f64, f64)]) -> BoundingBox {
    let mut out = bbox;
    for &(lon, lat) in points {
        out.minx = out.minx.min(lon);
        out.miny = out.miny.min(lat);
        out.maxx = out.maxx.max(lon);
        out.maxy = out.maxy.max(lat);
    }
    let pad = 1e-4;
    BoundingBox::new(
        (out.minx - pad).max(-180.0),
        (out.miny - pad).max(-90.0),
        (out.maxx + pad).min(180.0),
        (out.maxy + pad).min(90.0),
    )
}

/// Write the standard artifact set into `dir`, creating it if needed.
pub fn save_outputs<P: AsRef<Path>>(dir: P, output: &FinderOutput) -> Result<()> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;

    output.raster.write_geotiff(dir.join("probability.tif"))?;
    std::fs::write(
        dir.join("candidates.geojson"),
        serde_json::to_string_pretty(&candidates_geojson(&output.candidates))?,
    )?;
    std::fs::write(
        dir.join("occurrences.geojson"),
        serde_json::to_string_pretty(&occurrences_geojson(&output.occurrences))?,
    )?;
    if let Some(report) = &output.validation {
        std::fs::write(
            dir.join("validation.json"),
            serde_json::to_string_pretty(report)?,
        )?;
    }
    info!(dir = %dir.display(), "outputs saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::grid::{TileGrid, TileId};
    use crate::mosaic::EMBEDDING_DIM;

    /// In-memory store where channel 0 varies by pixel and the rest is flat.
    struct MapStore {
        tiles: HashMap<TileId, Vec<f32>>,
    }

    impl TileStore for MapStore {
        fn fetch(&self, id: TileId) -> Result<Option<Vec<f32>>> {
            Ok(self.tiles.get(&id).cloned())
        }
    }

    fn test_store(grid: TileGrid, bbox: &BoundingBox) -> MosaicStore<MapStore> {
        let mut tiles = HashMap::new();
        for id in grid.tiles_covering(bbox) {
            let px = grid.tile_px;
            let mut data = vec![0.1f32; px * px * EMBEDDING_DIM];
            for p in 0..px * px {
                // Distinct but correlated embeddings per pixel.
                data[p * EMBEDDING_DIM] = 1.0 + (p as f32 * 0.37).sin() * 0.3;
                data[p * EMBEDDING_DIM + 1] = 0.5 + (p as f32 * 0.11).cos() * 0.2;
            }
            tiles.insert(id, data);
        }
        MosaicStore::new(MapStore { tiles }, grid)
    }

    fn region() -> BoundingBox {
        BoundingBox::new(0.0, 52.0, 0.2, 52.1)
    }

    #[test]
    fn test_named_region_cambridge() {
        let bbox = named_region("Cambridge").unwrap();
        assert!((bbox.minx - 0.03).abs() < 1e-12);
        assert!((bbox.maxy - 52.29).abs() < 1e-12);
        assert!(named_region("atlantis").is_none());
    }

    #[test]
    fn test_auto_selects_similarity_for_few_points() {
        let grid = TileGrid::new(0.1, 10);
        let store = test_store(grid, &region());
        let out = find_candidates(
            &store,
            &region(),
            &[(0.05, 52.05), (0.15, 52.05)],
            &FinderOptions::default(),
        )
        .unwrap();

        assert_eq!(out.method, MethodKind::Similarity);
        assert_eq!(out.occurrences.len(), 2);
        assert_eq!(out.dropped, 0);
        assert!(out.validation.is_none());
        assert!(!out.candidates.is_empty());
    }

    #[test]
    fn test_auto_selects_classifier_for_many_points() {
        let grid = TileGrid::new(0.1, 10);
        let store = test_store(grid, &region());
        // 12 distinct pixels in the western tile.
        let points: Vec<(f64, f64)> = (0..12)
            .map(|i| (0.005 + 0.008 * f64::from(i), 52.055))
            .collect();

        let out = find_candidates(&store, &region(), &points, &FinderOptions::default()).unwrap();
        assert_eq!(out.method, MethodKind::Classifier);
        for c in &out.candidates {
            assert!((0.0..=1.0).contains(&c.score));
        }
    }

    #[test]
    fn test_explicit_classifier_with_too_few_points_fails() {
        let grid = TileGrid::new(0.1, 10);
        let store = test_store(grid, &region());
        let options = FinderOptions {
            method: Method::Classifier,
            ..FinderOptions::default()
        };

        let err = find_candidates(&store, &region(), &[(0.05, 52.05)], &options).unwrap_err();
        assert!(matches!(err, FinderError::InsufficientSamples { .. }));
    }

    #[test]
    fn test_validation_report_produced_on_classifier_path() {
        let grid = TileGrid::new(0.1, 10);
        let store = test_store(grid, &region());
        let points: Vec<(f64, f64)> = (0..14)
            .map(|i| (0.005 + 0.007 * f64::from(i), 52.035))
            .collect();
        let options = FinderOptions {
            validation_trials: 2,
            ..FinderOptions::default()
        };

        let out = find_candidates(&store, &region(), &points, &options).unwrap();
        let report = out.validation.unwrap();
        assert_eq!(report.n_trials, 2);
        assert!((0.0..=1.0).contains(&report.auc.mean));
    }

    #[test]
    fn test_predict_local_grid_shapes() {
        let grid = TileGrid::new(0.1, 10);
        let store = test_store(grid, &region());
        let points: Vec<(f64, f64)> = (0..6)
            .map(|i| (0.005 + 0.01 * f64::from(i), 52.045))
            .collect();

        let pred = predict_local_grid(
            &store,
            (0.1, 52.05),
            &points,
            2000.0,
            ModelKind::Knn,
            1,
            42,
        )
        .unwrap();

        assert_eq!(pred.scores.len(), pred.rows * pred.cols);
        assert!(pred.confidence.is_none());
        assert!(pred.rows > 0 && pred.cols > 0);
    }

    #[test]
    fn test_predict_local_grid_stochastic_confidence() {
        let grid = TileGrid::new(0.1, 10);
        let store = test_store(grid, &region());
        let points: Vec<(f64, f64)> = (0..8)
            .map(|i| (0.005 + 0.009 * f64::from(i), 52.065))
            .collect();

        let pred = predict_local_grid(
            &store,
            (0.1, 52.05),
            &points,
            2000.0,
            ModelKind::Mlp,
            10,
            42,
        )
        .unwrap();

        let confidence = pred.confidence.unwrap();
        assert_eq!(confidence.len(), pred.scores.len());
        for (&s, &c) in pred.scores.iter().zip(&confidence) {
            if s.is_finite() {
                assert!((0.0..=1.0).contains(&c));
            }
        }
    }

    #[test]
    fn test_save_outputs_writes_artifacts() {
        let grid = TileGrid::new(0.1, 10);
        let store = test_store(grid, &region());
        let out = find_candidates(
            &store,
            &region(),
            &[(0.05, 52.05), (0.15, 52.05)],
            &FinderOptions::default(),
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        save_outputs(dir.path(), &out).unwrap();
        assert!(dir.path().join("probability.tif").exists());
        assert!(dir.path().join("candidates.geojson").exists());
        assert!(dir.path().join("occurrences.geojson").exists());
        assert!(!dir.path().join("validation.json").exists());
    }
}
