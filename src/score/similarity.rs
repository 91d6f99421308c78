//! Centroid cosine-similarity scoring.
//!
//! The minimum-data strategy: L2-normalize every occurrence embedding,
//! average them, re-normalize the centroid, and score each pixel by
//! `(cos(v, centroid) + 1) / 2`. Deterministic, no background sample, and
//! well-defined from a single occurrence (the centroid degenerates to that
//! vector, which then scores exactly 1.0 at its own pixel).

use crate::error::{FinderError, Result};

use super::{dot, l2_norm, Scorer};

/// Similarity-to-centroid scorer.
#[derive(Debug, Default)]
pub struct CentroidScorer {
    centroid: Option<Vec<f32>>,
}

impl CentroidScorer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scorer for CentroidScorer {
    fn fit(&mut self, positives: &[Vec<f32>], _negatives: &[Vec<f32>]) -> Result<()> {
        if positives.is_empty() {
            return Err(FinderError::InsufficientSamples { needed: 1, got: 0 });
        }
        let dim = positives[0].len();

        let mut centroid = vec![0.0f32; dim];
        for v in positives {
            let norm = l2_norm(v);
            if norm == 0.0 {
                continue;
            }
            for (c, x) in centroid.iter_mut().zip(v) {
                *c += x / norm;
            }
        }

        let norm = l2_norm(&centroid);
        if norm == 0.0 || !norm.is_finite() {
            return Err(FinderError::ClassifierTraining(
                "degenerate occurrence embeddings (zero-norm centroid)".to_string(),
            ));
        }
        for c in &mut centroid {
            *c /= norm;
        }
        self.centroid = Some(centroid);
        Ok(())
    }

    fn score_batch(&self, flat: &[f32], dim: usize) -> Vec<f32> {
        let Some(centroid) = &self.centroid else {
            return vec![f32::NAN; flat.len() / dim];
        };

        flat.chunks_exact(dim)
            .map(|v| {
                if v.iter().any(|x| !x.is_finite()) {
                    return f32::NAN;
                }
                let norm = l2_norm(v);
                if norm == 0.0 {
                    return 0.5; // zero vector: orthogonal to everything
                }
                let cos = dot(v, centroid) / norm;
                // Map [-1, 1] to [0, 1]; clamp away float overshoot.
                ((cos + 1.0) / 2.0).clamp(0.0, 1.0)
            })
            .collect()
    }
}
