//! Command-line interface for the habitat scanner.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::error;
use tracing_subscriber::EnvFilter;

use habscan::candidates::Threshold;
use habscan::pipeline::{
    find_candidates, named_region, predict_local_grid, save_outputs, FinderOptions,
};
use habscan::score::{Method, ModelKind};
use habscan::store::{LocalTileStore, MosaicStore};
use habscan::{BoundingBox, FinderError, Result, TileGrid};

#[derive(Parser)]
#[command(name = "habscan", version, about = "Find candidate habitat locations from embedding tiles")]
struct Cli {
    /// Directory holding .emb embedding tiles
    #[arg(long, global = true, default_value = "tiles")]
    tiles: PathBuf,

    /// Random seed for background sampling, model init, and validation
    #[arg(long, global = true, default_value_t = 42)]
    seed: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Region-scale search for candidate sites
    Find {
        /// CSV file of occurrence points, one `lon,lat` per line
        #[arg(long)]
        occurrences: PathBuf,

        /// Named study region (e.g. "cambridge")
        #[arg(long, conflicts_with = "bbox")]
        region: Option<String>,

        /// Explicit region as `min_lon,min_lat,max_lon,max_lat`
        #[arg(long)]
        bbox: Option<String>,

        /// Scoring method: auto, similarity, or classifier
        #[arg(long, default_value = "auto")]
        method: Method,

        /// Classifier family: knn, linear, or mlp
        #[arg(long, default_value = "knn")]
        model: ModelKind,

        /// Candidate cutoff as a percentile of finite scores
        #[arg(long, default_value_t = 95.0)]
        percentile: f64,

        /// Maximum number of candidates
        #[arg(long, default_value_t = 10)]
        max_candidates: usize,

        /// Minimum separation between candidates, meters
        #[arg(long, default_value_t = 500.0)]
        min_separation: f64,

        /// Hold-out validation trials (0 disables)
        #[arg(long, default_value_t = 0)]
        validate: usize,

        /// Output directory for probability.tif and GeoJSON layers
        #[arg(long, default_value = "out")]
        output: PathBuf,
    },

    /// Fine probability grid around one center point
    Grid {
        /// CSV file of occurrence points, one `lon,lat` per line
        #[arg(long)]
        occurrences: PathBuf,

        /// Grid center as `lon,lat`
        #[arg(long)]
        center: String,

        /// Grid edge length in meters
        #[arg(long, default_value_t = 1000.0)]
        size: f64,

        /// Classifier family: knn, linear, or mlp
        #[arg(long, default_value = "mlp")]
        model: ModelKind,

        /// Stochastic forward passes per pixel (>1 adds confidence)
        #[arg(long, default_value_t = 10)]
        samples: usize,

        /// Output JSON file
        #[arg(long, default_value = "local_grid.json")]
        output: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let grid = TileGrid::default();
    let store = MosaicStore::new(LocalTileStore::scan(&cli.tiles, grid)?, grid);

    match cli.command {
        Command::Find {
            occurrences,
            region,
            bbox,
            method,
            model,
            percentile,
            max_candidates,
            min_separation,
            validate,
            output,
        } => {
            let bbox = resolve_region(region.as_deref(), bbox.as_deref())?;
            let points = read_occurrences(&occurrences)?;
            let options = FinderOptions {
                method,
                model,
                seed: cli.seed,
                threshold: Threshold::Percentile(percentile),
                max_candidates,
                min_separation_m: min_separation,
                validation_trials: validate,
                ..FinderOptions::default()
            };

            let result = find_candidates(&store, &bbox, &points, &options)?;
            println!(
                "method: {}; coverage: {:.0}%; {} candidate(s)",
                result.method.as_str(),
                result.coverage * 100.0,
                result.candidates.len()
            );
            for (i, c) in result.candidates.iter().enumerate() {
                println!("  {:>2}. {:.5}, {:.5}  score {:.3}", i + 1, c.lon, c.lat, c.score);
            }
            save_outputs(&output, &result)
        }

        Command::Grid { occurrences, center, size, model, samples, output } => {
            let center = parse_lonlat(&center)?;
            let points = read_occurrences(&occurrences)?;

            let pred =
                predict_local_grid(&store, center, &points, size, model, samples, cli.seed)?;
            let doc = json!({
                "bbox": [pred.bbox.minx, pred.bbox.miny, pred.bbox.maxx, pred.bbox.maxy],
                "rows": pred.rows,
                "cols": pred.cols,
                "scores": pred.scores,
                "confidence": pred.confidence,
            });
            std::fs::write(&output, serde_json::to_string_pretty(&doc)?)?;
            println!(
                "{}x{} grid written to {}",
                pred.rows,
                pred.cols,
                output.display()
            );
            Ok(())
        }
    }
}

fn resolve_region(region: Option<&str>, bbox: Option<&str>) -> Result<BoundingBox> {
    match (region, bbox) {
        (Some(name), _) => named_region(name)
            .ok_or_else(|| FinderError::InvalidRegion(format!("unknown region '{name}'"))),
        (None, Some(s)) => BoundingBox::parse(s),
        (None, None) => Err(FinderError::InvalidRegion(
            "either --region or --bbox is required".to_string(),
        )),
    }
}

fn parse_lonlat(s: &str) -> Result<(f64, f64)> {
    let invalid = || FinderError::InvalidRegion(format!("cannot parse 'lon,lat' from '{s}'"));
    let (lon_s, lat_s) = s.split_once(',').ok_or_else(invalid)?;
    let lon: f64 = lon_s.trim().parse().map_err(|_| invalid())?;
    let lat: f64 = lat_s.trim().parse().map_err(|_| invalid())?;
    Ok((lon, lat))
}

/// Read `lon,lat` pairs, one per line. Blank lines, `#` comments, and a
/// non-numeric header row are skipped.
fn read_occurrences(path: &Path) -> Result<Vec<(f64, f64)>> {
    let text = std::fs::read_to_string(path)?;
    let mut points = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_lonlat(line) {
            Ok(p) => points.push(p),
            Err(_) if i == 0 => {} // header row
            Err(e) => return Err(e),
        }
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lonlat() {
        assert_eq!(parse_lonlat("0.12, 52.2").unwrap(), (0.12, 52.2));
        assert!(parse_lonlat("0.12").is_err());
        assert!(parse_lonlat("a,b").is_err());
    }

    #[test]
    fn test_read_occurrences_skips_header_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("occ.csv");
        std::fs::write(&path, "lon,lat\n# survey 2024\n0.1,52.2\n0.11,52.21\n").unwrap();

        let points = read_occurrences(&path).unwrap();
        assert_eq!(points, vec![(0.1, 52.2), (0.11, 52.21)]);
    }

    #[test]
    fn test_read_occurrences_rejects_garbage_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("occ.csv");
        std::fs::write(&path, "0.1,52.2\nnot,numbers\n").unwrap();
        assert!(read_occurrences(&path).is_err());
    }

    #[test]
    fn test_resolve_region() {
        assert!(resolve_region(Some("cambridge"), None).is_ok());
        assert!(resolve_region(Some("nowhere"), None).is_err());
        assert!(resolve_region(None, Some("0,52,1,53")).is_ok());
        assert!(resolve_region(None, None).is_err());
    }
}
