//! Discriminative scoring against a random background sample.
//!
//! The classifier strategy draws pseudo-negative locations uniformly from
//! the region (excluding occurrence pixels), fits a binary classifier to
//! separate occurrence embeddings from background embeddings, and scores
//! each pixel by the positive-class probability. Three model families sit
//! behind the [`ClassifierModel`] trait: distance-weighted k-nearest
//! neighbors, logistic regression, and a small feed-forward network whose
//! inference-time dropout enables stochastic uncertainty estimates.
//!
//! All randomness is seeded explicitly; the same inputs and seed always
//! produce the same scores.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

use crate::error::{FinderError, Result};
use crate::mosaic::Mosaic;

use super::{dot, Scorer};

/// Default ratio of background samples to positives.
pub const DEFAULT_BACKGROUND_RATIO: f64 = 1.0;

/// Per-feature standardization fitted on the training set.
#[derive(Debug, Clone)]
struct Standardizer {
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl Standardizer {
    fn fit(vectors: &[Vec<f32>]) -> Self {
        let dim = vectors[0].len();
        let n = vectors.len() as f32;

        let mut mean = vec![0.0f32; dim];
        for v in vectors {
            for (m, x) in mean.iter_mut().zip(v) {
                *m += x / n;
            }
        }
        let mut std = vec![0.0f32; dim];
        for v in vectors {
            for ((s, x), m) in std.iter_mut().zip(v).zip(&mean) {
                *s += (x - m) * (x - m) / n;
            }
        }
        for s in &mut std {
            *s = s.sqrt();
            if *s < 1e-8 {
                *s = 1.0; // constant feature: leave centered, unscaled
            }
        }
        Self { mean, std }
    }

    fn transform(&self, v: &[f32]) -> Vec<f32> {
        v.iter()
            .zip(&self.mean)
            .zip(&self.std)
            .map(|((x, m), s)| (x - m) / s)
            .collect()
    }
}

/// Binary classifier over embedding vectors.
///
/// `fit` receives standardized vectors with labels 1 (occurrence) and 0
/// (background); `score_prob` returns the positive-class probability.
pub trait ClassifierModel: Send + Sync {
    fn fit(&mut self, x: &[Vec<f32>], y: &[u8]) -> Result<()>;

    fn score_prob(&self, v: &[f32]) -> f32;

    /// Whether the model supports stochastic inference (repeated forward
    /// passes yielding different scores).
    fn supports_stochastic(&self) -> bool {
        false
    }

    /// Mean score and confidence (`1 - normalized variance`) over
    /// `num_samples` stochastic passes. Deterministic given `seed`.
    /// Models without stochastic support fall back to a single pass with
    /// full confidence.
    fn score_prob_sampled(&self, v: &[f32], num_samples: usize, seed: u64) -> (f32, f32) {
        let _ = (num_samples, seed);
        (self.score_prob(v), 1.0)
    }
}

/// Classifier family to instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelKind {
    /// Distance-weighted k-nearest neighbors.
    #[default]
    Knn,
    /// Logistic regression via gradient descent.
    Linear,
    /// Small feed-forward network with inference-time dropout.
    Mlp,
}

impl ModelKind {
    /// Build a fresh, unfitted model. `seed` feeds weight initialization
    /// where the model has any.
    #[must_use]
    pub fn build(self, seed: u64) -> Box<dyn ClassifierModel> {
        match self {
            Self::Knn => Box::new(KnnModel::new(10)),
            Self::Linear => Box::new(LinearModel::new()),
            Self::Mlp => Box::new(MlpModel::new(16, 0.5, seed)),
        }
    }
}

impl std::str::FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "knn" => Ok(Self::Knn),
            "linear" => Ok(Self::Linear),
            "mlp" => Ok(Self::Mlp),
            other => Err(format!("unknown model '{other}' (knn|linear|mlp)")),
        }
    }
}

// ---------------------------------------------------------------------------
// K-nearest neighbors
// ---------------------------------------------------------------------------

/// Distance-weighted KNN. Stores the training set; probability is the
/// weight share of positive neighbors among the k nearest.
pub struct KnnModel {
    n_neighbors: usize,
    k: usize,
    x: Vec<Vec<f32>>,
    y: Vec<u8>,
}

impl KnnModel {
    #[must_use]
    pub fn new(n_neighbors: usize) -> Self {
        Self { n_neighbors, k: 0, x: Vec::new(), y: Vec::new() }
    }
}

impl ClassifierModel for KnnModel {
    fn fit(&mut self, x: &[Vec<f32>], y: &[u8]) -> Result<()> {
        // Cap k at half the training set, like the reference pipeline.
        self.k = self.n_neighbors.min(x.len() / 2).max(1);
        self.x = x.to_vec();
        self.y = y.to_vec();
        Ok(())
    }

    fn score_prob(&self, v: &[f32]) -> f32 {
        let mut dists: Vec<(f32, u8)> = self
            .x
            .iter()
            .zip(&self.y)
            .map(|(t, &label)| {
                let d2: f32 = t.iter().zip(v).map(|(a, b)| (a - b) * (a - b)).sum();
                (d2.sqrt(), label)
            })
            .collect();
        dists.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut pos_weight = 0.0f32;
        let mut total_weight = 0.0f32;
        for &(d, label) in dists.iter().take(self.k) {
            let w = 1.0 / (d + 1e-12);
            total_weight += w;
            if label == 1 {
                pos_weight += w;
            }
        }
        if total_weight == 0.0 {
            return 0.5;
        }
        pos_weight / total_weight
    }
}

// ---------------------------------------------------------------------------
// Logistic regression
// ---------------------------------------------------------------------------

const LOGISTIC_EPOCHS: usize = 200;
const LOGISTIC_LR: f32 = 0.1;
const LOGISTIC_L2: f32 = 1e-4;

#[inline]
fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

/// Logistic regression trained by full-batch gradient descent on
/// standardized features.
pub struct LinearModel {
    weights: Vec<f32>,
    bias: f32,
}

impl LinearModel {
    #[must_use]
    pub fn new() -> Self {
        Self { weights: Vec::new(), bias: 0.0 }
    }
}

impl Default for LinearModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassifierModel for LinearModel {
    fn fit(&mut self, x: &[Vec<f32>], y: &[u8]) -> Result<()> {
        let dim = x[0].len();
        let n = x.len() as f32;
        self.weights = vec![0.0; dim];
        self.bias = 0.0;

        let mut grad_w = vec![0.0f32; dim];
        for _ in 0..LOGISTIC_EPOCHS {
            grad_w.iter_mut().for_each(|g| *g = 0.0);
            let mut grad_b = 0.0f32;

            for (v, &label) in x.iter().zip(y) {
                let err = sigmoid(dot(&self.weights, v) + self.bias) - f32::from(label);
                for (g, xi) in grad_w.iter_mut().zip(v) {
                    *g += err * xi / n;
                }
                grad_b += err / n;
            }
            for (w, g) in self.weights.iter_mut().zip(&grad_w) {
                *w -= LOGISTIC_LR * (g + LOGISTIC_L2 * *w);
            }
            self.bias -= LOGISTIC_LR * grad_b;
        }

        if self.weights.iter().any(|w| !w.is_finite()) || !self.bias.is_finite() {
            return Err(FinderError::ClassifierTraining(
                "logistic regression diverged (non-finite weights)".to_string(),
            ));
        }
        Ok(())
    }

    fn score_prob(&self, v: &[f32]) -> f32 {
        sigmoid(dot(&self.weights, v) + self.bias)
    }
}

// ---------------------------------------------------------------------------
// Small feed-forward network
// ---------------------------------------------------------------------------

const MLP_EPOCHS: usize = 200;
const MLP_LR: f32 = 0.05;

/// One-hidden-layer ReLU network with a sigmoid output.
///
/// Dropout is applied only at inference time (for stochastic uncertainty
/// sampling), so the deterministic forward pass uses the full network.
pub struct MlpModel {
    hidden: usize,
    dropout: f32,
    seed: u64,
    dim: usize,
    w1: Vec<f32>, // hidden x dim, row-major
    b1: Vec<f32>,
    w2: Vec<f32>,
    b2: f32,
}

impl MlpModel {
    #[must_use]
    pub fn new(hidden: usize, dropout: f32, seed: u64) -> Self {
        Self {
            hidden,
            dropout,
            seed,
            dim: 0,
            w1: Vec::new(),
            b1: Vec::new(),
            w2: Vec::new(),
            b2: 0.0,
        }
    }

    /// Hidden activations for one input.
    fn hidden_layer(&self, v: &[f32]) -> Vec<f32> {
        (0..self.hidden)
            .map(|h| {
                let z = dot(&self.w1[h * self.dim..(h + 1) * self.dim], v) + self.b1[h];
                z.max(0.0)
            })
            .collect()
    }

    fn output(&self, a1: &[f32]) -> f32 {
        sigmoid(dot(&self.w2, a1) + self.b2)
    }
}

impl ClassifierModel for MlpModel {
    fn fit(&mut self, x: &[Vec<f32>], y: &[u8]) -> Result<()> {
        self.dim = x[0].len();
        let n = x.len() as f32;
        let mut rng = StdRng::seed_from_u64(self.seed);

        // Small symmetric init keeps early gradients sane.
        let scale = (2.0 / self.dim as f32).sqrt() * 0.5;
        self.w1 = (0..self.hidden * self.dim)
            .map(|_| (rng.gen::<f32>() - 0.5) * 2.0 * scale)
            .collect();
        self.b1 = vec![0.0; self.hidden];
        self.w2 = (0..self.hidden)
            .map(|_| (rng.gen::<f32>() - 0.5) * 0.2)
            .collect();
        self.b2 = 0.0;

        for _ in 0..MLP_EPOCHS {
            let mut gw1 = vec![0.0f32; self.hidden * self.dim];
            let mut gb1 = vec![0.0f32; self.hidden];
            let mut gw2 = vec![0.0f32; self.hidden];
            let mut gb2 = 0.0f32;

            for (v, &label) in x.iter().zip(y) {
                let a1 = self.hidden_layer(v);
                let delta2 = self.output(&a1) - f32::from(label);

                for (g, a) in gw2.iter_mut().zip(&a1) {
                    *g += delta2 * a / n;
                }
                gb2 += delta2 / n;

                for h in 0..self.hidden {
                    if a1[h] <= 0.0 {
                        continue; // ReLU gate closed
                    }
                    let delta1 = delta2 * self.w2[h];
                    for (g, xi) in gw1[h * self.dim..(h + 1) * self.dim].iter_mut().zip(v) {
                        *g += delta1 * xi / n;
                    }
                    gb1[h] += delta1 / n;
                }
            }

            for (w, g) in self.w1.iter_mut().zip(&gw1) {
                *w -= MLP_LR * g;
            }
            for (b, g) in self.b1.iter_mut().zip(&gb1) {
                *b -= MLP_LR * g;
            }
            for (w, g) in self.w2.iter_mut().zip(&gw2) {
                *w -= MLP_LR * g;
            }
            self.b2 -= MLP_LR * gb2;
        }

        if self.w1.iter().chain(&self.w2).any(|w| !w.is_finite()) {
            return Err(FinderError::ClassifierTraining(
                "network training diverged (non-finite weights)".to_string(),
            ));
        }
        Ok(())
    }

    fn score_prob(&self, v: &[f32]) -> f32 {
        self.output(&self.hidden_layer(v))
    }

    fn supports_stochastic(&self) -> bool {
        true
    }

    fn score_prob_sampled(&self, v: &[f32], num_samples: usize, seed: u64) -> (f32, f32) {
        if num_samples <= 1 {
            return (self.score_prob(v), 1.0);
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let keep = 1.0 - self.dropout;

        let scores: Vec<f32> = (0..num_samples)
            .map(|_| {
                let mut a1 = self.hidden_layer(v);
                for a in &mut a1 {
                    if rng.gen::<f32>() < self.dropout {
                        *a = 0.0;
                    } else {
                        *a /= keep; // preserve expected activation
                    }
                }
                self.output(&a1)
            })
            .collect();

        let mean = scores.iter().sum::<f32>() / num_samples as f32;
        let var = scores.iter().map(|s| (s - mean) * (s - mean)).sum::<f32>()
            / num_samples as f32;
        // Variance of a [0, 1] variable is at most 0.25.
        let confidence = (1.0 - var / 0.25).clamp(0.0, 1.0);
        (mean, confidence)
    }
}

// ---------------------------------------------------------------------------
// Background sampling
// ---------------------------------------------------------------------------

/// Draw `n_samples` background embeddings uniformly at random from the
/// mosaic, excluding the exact pixels of `exclude` and pixels without
/// coverage. Deterministic given `seed`.
///
/// Fails with [`FinderError::ClassifierTraining`] when no background pixel
/// can be found; returning fewer than requested is only a warning.
pub fn sample_background(
    mosaic: &Mosaic,
    n_samples: usize,
    exclude: &[(f64, f64)],
    seed: u64,
) -> Result<(Vec<Vec<f32>>, Vec<(f64, f64)>)> {
    let (rows, cols, _) = mosaic.shape();
    let mut taken: HashSet<(usize, usize)> = exclude
        .iter()
        .filter_map(|&(lon, lat)| mosaic.pixel_for(lon, lat))
        .collect();

    let mut rng = StdRng::seed_from_u64(seed);
    let mut vectors = Vec::with_capacity(n_samples);
    let mut coords = Vec::with_capacity(n_samples);

    let max_attempts = n_samples.saturating_mul(50).max(1000);
    let mut attempts = 0;
    while vectors.len() < n_samples && attempts < max_attempts {
        attempts += 1;
        let row = rng.gen_range(0..rows);
        let col = rng.gen_range(0..cols);
        if taken.contains(&(row, col)) || !mosaic.has_embedding(row, col) {
            continue;
        }
        taken.insert((row, col));
        // Unwrap is fine: has_embedding already bounds-checked.
        vectors.push(mosaic.embedding(row, col).unwrap().to_vec());
        coords.push(mosaic.lonlat_for(row, col));
    }

    if vectors.is_empty() {
        return Err(FinderError::ClassifierTraining(
            "could not draw any background sample (no covered pixels left)".to_string(),
        ));
    }
    if vectors.len() < n_samples {
        warn!(
            requested = n_samples,
            drawn = vectors.len(),
            "background sample smaller than requested"
        );
    }
    Ok((vectors, coords))
}

// ---------------------------------------------------------------------------
// Scorer wrapper
// ---------------------------------------------------------------------------

/// [`Scorer`] adapter around a [`ClassifierModel`], owning the feature
/// standardizer fitted on the combined training set.
pub struct ClassifierScorer {
    model: Box<dyn ClassifierModel>,
    scaler: Option<Standardizer>,
}

impl ClassifierScorer {
    #[must_use]
    pub fn new(model: Box<dyn ClassifierModel>) -> Self {
        Self { model, scaler: None }
    }

    /// Convenience constructor from a model family.
    #[must_use]
    pub fn with_kind(kind: ModelKind, seed: u64) -> Self {
        Self::new(kind.build(seed))
    }

    /// Whether the underlying model can produce stochastic uncertainty.
    #[must_use]
    pub fn supports_stochastic(&self) -> bool {
        self.model.supports_stochastic()
    }

    /// Score a batch with stochastic uncertainty: `(mean, confidence)` per
    /// vector; NaN vectors yield `(NaN, 0.0)`.
    #[must_use]
    pub fn score_batch_sampled(
        &self,
        flat: &[f32],
        dim: usize,
        num_samples: usize,
        seed: u64,
    ) -> Vec<(f32, f32)> {
        flat.chunks_exact(dim)
            .enumerate()
            .map(|(i, v)| {
                if v.iter().any(|x| !x.is_finite()) {
                    return (f32::NAN, 0.0);
                }
                let scaled = self.scale(v);
                // Per-pixel seed keeps results independent of batch order.
                self.model
                    .score_prob_sampled(&scaled, num_samples, seed.wrapping_add(i as u64))
            })
            .collect()
    }

    fn scale(&self, v: &[f32]) -> Vec<f32> {
        match &self.scaler {
            Some(s) => s.transform(v),
            None => v.to_vec(),
        }
    }
}

impl Scorer for ClassifierScorer {
    fn fit(&mut self, positives: &[Vec<f32>], negatives: &[Vec<f32>]) -> Result<()> {
        if positives.len() < 2 {
            return Err(FinderError::InsufficientSamples {
                needed: 2,
                got: positives.len(),
            });
        }
        if negatives.is_empty() {
            return Err(FinderError::ClassifierTraining(
                "empty background sample".to_string(),
            ));
        }

        let combined: Vec<Vec<f32>> = positives.iter().chain(negatives).cloned().collect();
        let scaler = Standardizer::fit(&combined);
        let x: Vec<Vec<f32>> = combined.iter().map(|v| scaler.transform(v)).collect();
        let y: Vec<u8> = std::iter::repeat(1u8)
            .take(positives.len())
            .chain(std::iter::repeat(0u8).take(negatives.len()))
            .collect();

        self.model.fit(&x, &y)?;
        self.scaler = Some(scaler);
        Ok(())
    }

    fn score_batch(&self, flat: &[f32], dim: usize) -> Vec<f32> {
        flat.chunks_exact(dim)
            .map(|v| {
                if v.iter().any(|x| !x.is_finite()) {
                    return f32::NAN;
                }
                self.model.score_prob(&self.scale(v)).clamp(0.0, 1.0)
            })
            .collect()
    }
}
