//! End-to-end tests against real tile files on disk.

use std::path::Path;

use habscan::candidates::Threshold;
use habscan::pipeline::{find_candidates, predict_local_grid, save_outputs, FinderOptions};
use habscan::score::{Method, MethodKind, ModelKind};
use habscan::store::{tile_filename, LocalTileStore, MosaicStore};
use habscan::{BoundingBox, FinderError, TileGrid, EMBEDDING_DIM};

/// 5x5-pixel tiles on the default 0.1 degree lattice.
fn grid() -> TileGrid {
    TileGrid::new(0.1, 5)
}

/// Tile payload where each pixel's embedding points in a distinct
/// direction in the (ch0, ch1) plane, so cosine scores vary per pixel.
fn directional_tile(px: usize, phase: f32) -> Vec<f32> {
    let mut data = vec![0.0f32; px * px * EMBEDDING_DIM];
    for p in 0..px * px {
        let theta = phase + p as f32 * 0.05;
        data[p * EMBEDDING_DIM] = theta.cos();
        data[p * EMBEDDING_DIM + 1] = theta.sin();
        data[p * EMBEDDING_DIM + 2] = 0.3;
    }
    data
}

fn write_tiles(dir: &Path, grid: TileGrid, bbox: &BoundingBox) {
    for (i, id) in grid.tiles_covering(bbox).iter().enumerate() {
        let data = directional_tile(grid.tile_px, i as f32 * 0.37);
        let bytes: Vec<u8> = data.iter().flat_map(|f| f.to_le_bytes()).collect();
        std::fs::write(dir.join(tile_filename(&grid, *id)), bytes).unwrap();
    }
}

fn store_for(dir: &Path) -> MosaicStore<LocalTileStore> {
    let grid = grid();
    MosaicStore::new(LocalTileStore::scan(dir, grid).unwrap(), grid)
}

#[test]
fn single_occurrence_scores_own_pixel_highest() {
    let dir = tempfile::tempdir().unwrap();
    let bbox = BoundingBox::new(0.0, 52.0, 0.2, 52.1);
    write_tiles(dir.path(), grid(), &bbox);
    let store = store_for(dir.path());

    let occurrence = (0.05, 52.05);
    let out = find_candidates(
        &store,
        &bbox,
        &[occurrence],
        &FinderOptions {
            threshold: Threshold::Absolute(0.0),
            max_candidates: 100,
            min_separation_m: 0.0,
            ..FinderOptions::default()
        },
    )
    .unwrap();

    assert_eq!(out.method, MethodKind::Similarity);
    assert_eq!(out.occurrences, vec![occurrence]);

    // The occurrence's own pixel scores exactly 1.0 and tops the ranking.
    let best = &out.candidates[0];
    assert!((best.score - 1.0).abs() < 1e-6);
    let d = habscan::haversine_m(best.lon, best.lat, occurrence.0, occurrence.1);
    assert!(d < 2500.0, "best candidate {d:.0} m from the occurrence pixel");

    // Every other pixel scores strictly below 1.0 but stays finite.
    for c in &out.candidates[1..] {
        assert!(c.score < 1.0 && c.score.is_finite());
    }
}

#[test]
fn many_occurrences_take_classifier_path() {
    let dir = tempfile::tempdir().unwrap();
    let bbox = BoundingBox::new(0.0, 52.0, 0.2, 52.1);
    write_tiles(dir.path(), grid(), &bbox);
    let store = store_for(dir.path());

    // 12 usable points clears the auto-selection threshold of 10.
    let points: Vec<(f64, f64)> = (0..12)
        .map(|i| (0.01 + 0.015 * f64::from(i), 52.03))
        .collect();
    let out = find_candidates(
        &store,
        &bbox,
        &points,
        &FinderOptions {
            validation_trials: 3,
            ..FinderOptions::default()
        },
    )
    .unwrap();

    assert_eq!(out.method, MethodKind::Classifier);
    for c in &out.candidates {
        assert!((0.0..=1.0).contains(&c.score));
        assert!(bbox.contains(c.lon, c.lat));
    }

    let report = out.validation.expect("classifier path should validate");
    assert_eq!(report.n_trials, 3);
    for m in [report.auc, report.precision, report.recall, report.f1, report.accuracy] {
        assert!((0.0..=1.0).contains(&m.mean));
        assert!(m.std >= 0.0);
    }
}

#[test]
fn region_without_tiles_is_no_data() {
    let dir = tempfile::tempdir().unwrap();
    let covered = BoundingBox::new(0.0, 52.0, 0.1, 52.1);
    write_tiles(dir.path(), grid(), &covered);
    let store = store_for(dir.path());

    let elsewhere = BoundingBox::new(5.0, 40.0, 5.2, 40.1);
    let err = find_candidates(&store, &elsewhere, &[(5.05, 40.05)], &FinderOptions::default())
        .unwrap_err();
    assert!(matches!(err, FinderError::NoData(_)));
}

#[test]
fn no_usable_occurrences_is_insufficient() {
    let dir = tempfile::tempdir().unwrap();
    let bbox = BoundingBox::new(0.0, 52.0, 0.2, 52.1);
    write_tiles(dir.path(), grid(), &bbox);
    let store = store_for(dir.path());

    // Zero points.
    let err = find_candidates(&store, &bbox, &[], &FinderOptions::default()).unwrap_err();
    assert!(matches!(err, FinderError::InsufficientSamples { .. }));
}

#[test]
fn partial_coverage_degrades_not_fails() {
    let dir = tempfile::tempdir().unwrap();
    let g = grid();
    // Only the western tile of a two-tile region exists on disk.
    let west = BoundingBox::new(0.0, 52.0, 0.1, 52.1);
    write_tiles(dir.path(), g, &west);
    let store = store_for(dir.path());

    let bbox = BoundingBox::new(0.0, 52.0, 0.2, 52.1);
    let out = find_candidates(&store, &bbox, &[(0.05, 52.05)], &FinderOptions::default()).unwrap();

    assert!((out.coverage - 0.5).abs() < 1e-12);
    // Candidates only come from the covered half.
    for c in &out.candidates {
        assert!(c.lon < 0.1, "candidate in uncovered area at lon {}", c.lon);
    }
}

#[test]
fn explicit_similarity_overrides_sample_count() {
    let dir = tempfile::tempdir().unwrap();
    let bbox = BoundingBox::new(0.0, 52.0, 0.1, 52.1);
    write_tiles(dir.path(), grid(), &bbox);
    let store = store_for(dir.path());

    let points: Vec<(f64, f64)> = (0..15)
        .map(|i| (0.005 + 0.006 * f64::from(i), 52.05))
        .collect();
    let out = find_candidates(
        &store,
        &bbox,
        &points,
        &FinderOptions {
            method: Method::Similarity,
            ..FinderOptions::default()
        },
    )
    .unwrap();
    assert_eq!(out.method, MethodKind::Similarity);
}

#[test]
fn save_outputs_writes_full_artifact_set() {
    let dir = tempfile::tempdir().unwrap();
    let bbox = BoundingBox::new(0.0, 52.0, 0.2, 52.1);
    write_tiles(dir.path(), grid(), &bbox);
    let store = store_for(dir.path());

    let points: Vec<(f64, f64)> = (0..12)
        .map(|i| (0.01 + 0.015 * f64::from(i), 52.07))
        .collect();
    let out = find_candidates(
        &store,
        &bbox,
        &points,
        &FinderOptions {
            validation_trials: 2,
            ..FinderOptions::default()
        },
    )
    .unwrap();

    let out_dir = tempfile::tempdir().unwrap();
    save_outputs(out_dir.path(), &out).unwrap();

    for name in ["probability.tif", "candidates.geojson", "occurrences.geojson", "validation.json"] {
        assert!(out_dir.path().join(name).exists(), "missing {name}");
    }

    // GeoJSON layers parse and carry the expected feature counts.
    let gj: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(out_dir.path().join("occurrences.geojson")).unwrap(),
    )
    .unwrap();
    assert_eq!(gj["features"].as_array().unwrap().len(), points.len());
}

#[test]
fn local_grid_prediction_over_tiles() {
    let dir = tempfile::tempdir().unwrap();
    let bbox = BoundingBox::new(0.0, 52.0, 0.2, 52.1);
    write_tiles(dir.path(), grid(), &bbox);
    let store = store_for(dir.path());

    let points: Vec<(f64, f64)> = (0..8)
        .map(|i| (0.01 + 0.02 * f64::from(i), 52.05))
        .collect();

    let pred = predict_local_grid(
        &store,
        (0.1, 52.05),
        &points,
        3000.0,
        ModelKind::Mlp,
        8,
        42,
    )
    .unwrap();

    assert_eq!(pred.scores.len(), pred.rows * pred.cols);
    assert!(pred.scores.iter().any(|s| s.is_finite()));

    // Per-point view carries coordinates near the requested grid and a
    // confidence for every pixel.
    let pts = pred.points();
    assert_eq!(pts.len(), pred.scores.len());
    for &(lon, lat, _, conf) in &pts {
        assert!((lon - 0.1).abs() < 0.1 && (lat - 52.05).abs() < 0.1);
        assert!(conf.is_some(), "mlp with samples > 1 is stochastic");
    }
}
