//! Hold-out validation of classifier separability.
//!
//! Runs repeated randomized train/test splits over the occurrence and
//! background embeddings, fitting a logistic regression on each training
//! split and measuring it on the held-out pairs. The report summarizes
//! pairwise AUC plus threshold-0.5 precision, recall, F1, and accuracy as
//! mean and standard deviation across trials.
//!
//! Trials are seeded from a base seed (trial `t` uses `base_seed + t`), so
//! the whole report is reproducible; trials run in parallel.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::error::{FinderError, Result};

use super::{ClassifierScorer, ModelKind, Scorer};

/// Default number of validation trials.
pub const DEFAULT_TRIALS: usize = 5;

/// Default base seed for validation splits.
pub const DEFAULT_BASE_SEED: u64 = 42;

/// Fraction of each class held out for testing.
const TEST_FRACTION: f64 = 0.3;

/// Metrics from a single train/test split.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TrialMetrics {
    /// Pairwise AUC: probability a held-out positive outscores a held-out
    /// background sample (ties count half).
    pub auc: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
}

/// Mean and standard deviation of one metric across trials.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricSummary {
    pub mean: f64,
    pub std: f64,
}

impl MetricSummary {
    fn over(values: impl Iterator<Item = f64> + Clone) -> Self {
        let n = values.clone().count() as f64;
        let mean = values.clone().sum::<f64>() / n;
        let var = values.map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        Self { mean, std: var.sqrt() }
    }
}

/// Cross-trial validation summary.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub n_trials: usize,
    pub auc: MetricSummary,
    pub precision: MetricSummary,
    pub recall: MetricSummary,
    pub f1: MetricSummary,
    pub accuracy: MetricSummary,
    pub trials: Vec<TrialMetrics>,
}

/// Run `n_trials` randomized hold-out trials with a logistic-regression
/// probe and summarize the metrics.
///
/// Needs enough samples that every split keeps at least two training and
/// one test positive, and one training and one test background sample;
/// fails with [`FinderError::InsufficientSamples`] otherwise.
pub fn run_validation(
    positives: &[Vec<f32>],
    negatives: &[Vec<f32>],
    n_trials: usize,
    base_seed: u64,
) -> Result<ValidationReport> {
    let pos_test = test_count(positives.len());
    let neg_test = test_count(negatives.len());
    if positives.len() - pos_test < 2 || pos_test < 1 {
        return Err(FinderError::InsufficientSamples {
            needed: 4,
            got: positives.len(),
        });
    }
    if negatives.len() - neg_test < 1 || neg_test < 1 {
        return Err(FinderError::InsufficientSamples {
            needed: 2,
            got: negatives.len(),
        });
    }

    let trials: Vec<TrialMetrics> = (0..n_trials)
        .into_par_iter()
        .map(|t| run_trial(positives, negatives, base_seed + t as u64))
        .collect::<Result<_>>()?;

    let report = ValidationReport {
        n_trials,
        auc: MetricSummary::over(trials.iter().map(|m| m.auc)),
        precision: MetricSummary::over(trials.iter().map(|m| m.precision)),
        recall: MetricSummary::over(trials.iter().map(|m| m.recall)),
        f1: MetricSummary::over(trials.iter().map(|m| m.f1)),
        accuracy: MetricSummary::over(trials.iter().map(|m| m.accuracy)),
        trials,
    };
    info!(
        n_trials,
        auc_mean = report.auc.mean,
        auc_std = report.auc.std,
        f1_mean = report.f1.mean,
        "validation complete"
    );
    Ok(report)
}

fn test_count(n: usize) -> usize {
    ((n as f64 * TEST_FRACTION).round() as usize).max(1).min(n.saturating_sub(1))
}

fn run_trial(positives: &[Vec<f32>], negatives: &[Vec<f32>], seed: u64) -> Result<TrialMetrics> {
    let mut rng = StdRng::seed_from_u64(seed);

    let (pos_train, pos_test) = split_class(positives, &mut rng);
    let (neg_train, neg_test) = split_class(negatives, &mut rng);

    let mut scorer = ClassifierScorer::with_kind(ModelKind::Linear, seed);
    scorer.fit(&pos_train, &neg_train)?;

    let dim = positives[0].len();
    let pos_scores = score_set(&scorer, &pos_test, dim);
    let neg_scores = score_set(&scorer, &neg_test, dim);

    Ok(metrics(&pos_scores, &neg_scores))
}

fn split_class(class: &[Vec<f32>], rng: &mut StdRng) -> (Vec<Vec<f32>>, Vec<Vec<f32>>) {
    let mut order: Vec<usize> = (0..class.len()).collect();
    order.shuffle(rng);
    let n_test = test_count(class.len());

    let test = order[..n_test].iter().map(|&i| class[i].clone()).collect();
    let train = order[n_test..].iter().map(|&i| class[i].clone()).collect();
    (train, test)
}

fn score_set(scorer: &ClassifierScorer, set: &[Vec<f32>], dim: usize) -> Vec<f64> {
    let flat: Vec<f32> = set.iter().flatten().copied().collect();
    scorer
        .score_batch(&flat, dim)
        .into_iter()
        .map(f64::from)
        .collect()
}

fn metrics(pos_scores: &[f64], neg_scores: &[f64]) -> TrialMetrics {
    // Pairwise AUC over held-out samples.
    let mut wins = 0.0f64;
    for &p in pos_scores {
        for &n in neg_scores {
            if p > n {
                wins += 1.0;
            } else if (p - n).abs() < f64::EPSILON {
                wins += 0.5;
            }
        }
    }
    let auc = wins / (pos_scores.len() * neg_scores.len()) as f64;

    let tp = pos_scores.iter().filter(|&&s| s >= 0.5).count() as f64;
    let fn_ = pos_scores.len() as f64 - tp;
    let fp = neg_scores.iter().filter(|&&s| s >= 0.5).count() as f64;
    let tn = neg_scores.len() as f64 - fp;

    let precision = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
    let recall = if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 0.0 };
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    let accuracy = (tp + tn) / (pos_scores.len() + neg_scores.len()) as f64;

    TrialMetrics { auc, precision, recall, f1, accuracy }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(n: usize, dim: usize, center: f32) -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| {
                (0..dim)
                    .map(|j| center + ((i * 7 + j * 3) as f32 * 0.41).sin() * 0.2)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_separable_clusters_score_perfectly() {
        let pos = cluster(12, 8, 3.0);
        let neg = cluster(12, 8, -3.0);
        let report = run_validation(&pos, &neg, 5, 42).unwrap();

        assert_eq!(report.n_trials, 5);
        assert_eq!(report.trials.len(), 5);
        assert!(report.auc.mean > 0.95, "auc mean {}", report.auc.mean);
        assert!(report.f1.mean > 0.9, "f1 mean {}", report.f1.mean);
        assert!(report.accuracy.mean > 0.9);
    }

    #[test]
    fn test_null_signal_auc_near_half() {
        // Both classes drawn from the same deterministic pseudo-noise.
        let all = cluster(40, 6, 0.0);
        let pos = all[..20].to_vec();
        let neg = all[20..].to_vec();
        let report = run_validation(&pos, &neg, 5, 42).unwrap();

        assert!(
            (0.15..=0.85).contains(&report.auc.mean),
            "auc mean {} not near chance",
            report.auc.mean
        );
    }

    #[test]
    fn test_report_deterministic_for_seed() {
        let pos = cluster(10, 6, 2.0);
        let neg = cluster(10, 6, -2.0);
        let a = run_validation(&pos, &neg, 3, 7).unwrap();
        let b = run_validation(&pos, &neg, 3, 7).unwrap();
        for (ta, tb) in a.trials.iter().zip(&b.trials) {
            assert_eq!(ta.auc, tb.auc);
            assert_eq!(ta.f1, tb.f1);
        }
    }

    #[test]
    fn test_too_few_samples_is_error() {
        let pos = cluster(2, 4, 2.0);
        let neg = cluster(10, 4, -2.0);
        let err = run_validation(&pos, &neg, 5, 42).unwrap_err();
        assert!(matches!(err, FinderError::InsufficientSamples { .. }));
    }

    #[test]
    fn test_metrics_pairwise_auc() {
        let m = metrics(&[0.9, 0.8], &[0.1, 0.2]);
        assert!((m.auc - 1.0).abs() < f64::EPSILON);
        assert!((m.accuracy - 1.0).abs() < f64::EPSILON);

        let m = metrics(&[0.1], &[0.9]);
        assert!(m.auc.abs() < f64::EPSILON);

        let m = metrics(&[0.5], &[0.5]);
        assert!((m.auc - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_report_serializes() {
        let pos = cluster(8, 4, 2.0);
        let neg = cluster(8, 4, -2.0);
        let report = run_validation(&pos, &neg, 2, 1).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["n_trials"], 2);
        assert!(json["auc"]["mean"].is_number());
        assert_eq!(json["trials"].as_array().unwrap().len(), 2);
    }
}
