//! Habitat scoring strategies.
//!
//! Two interchangeable strategies turn occurrence embeddings into a
//! per-pixel scoring function, both behind the [`Scorer`] trait:
//!
//! - [`CentroidScorer`](similarity::CentroidScorer): cosine similarity to the
//!   normalized centroid of the occurrence embeddings. Works from a single
//!   sample; no background data, no randomness.
//! - [`ClassifierScorer`](classifier::ClassifierScorer): a binary classifier
//!   (nearest-neighbor, logistic, or small feed-forward network) trained
//!   against randomly drawn background embeddings. Better with 10+ samples.
//!
//! Method selection is a pure policy function, [`select_method`].

pub mod classifier;
pub mod similarity;
pub mod validate;

pub use classifier::{sample_background, ClassifierModel, ClassifierScorer, ModelKind};
pub use similarity::CentroidScorer;
pub use validate::{run_validation, TrialMetrics, ValidationReport};

use crate::error::Result;

/// Requested scoring method, including the auto-selection sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    /// Pick based on usable sample count.
    #[default]
    Auto,
    Similarity,
    Classifier,
}

impl std::str::FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "similarity" => Ok(Self::Similarity),
            "classifier" => Ok(Self::Classifier),
            other => Err(format!("unknown method '{other}' (auto|similarity|classifier)")),
        }
    }
}

/// Concrete strategy after selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Similarity,
    Classifier,
}

impl MethodKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Similarity => "similarity",
            Self::Classifier => "classifier",
        }
    }
}

/// Default sample count at which auto-selection switches to the classifier.
pub const DEFAULT_CLASSIFIER_THRESHOLD: usize = 10;

/// Pure method-selection policy: an explicit override is honored, otherwise
/// the classifier is chosen when `n_samples >= threshold`.
#[must_use]
pub fn select_method(requested: Method, n_samples: usize, threshold: usize) -> MethodKind {
    match requested {
        Method::Similarity => MethodKind::Similarity,
        Method::Classifier => MethodKind::Classifier,
        Method::Auto => {
            if n_samples >= threshold {
                MethodKind::Classifier
            } else {
                MethodKind::Similarity
            }
        }
    }
}

/// A fitted per-pixel scoring function.
///
/// Implementations score flat, channel-interleaved batches so the raster
/// builder can stay vectorized; a vector containing any non-finite channel
/// must score NaN.
pub trait Scorer: Send + Sync {
    /// Fit to positive (occurrence) and negative (background) embeddings.
    /// Negatives are ignored by strategies that do not need them.
    fn fit(&mut self, positives: &[Vec<f32>], negatives: &[Vec<f32>]) -> Result<()>;

    /// Score every `dim`-length vector in `flat`, returning one score in
    /// `[0, 1]` (or NaN) per vector.
    fn score_batch(&self, flat: &[f32], dim: usize) -> Vec<f32>;
}

/// Dot product of two equal-length vectors.
#[inline]
#[must_use]
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Euclidean norm.
#[inline]
#[must_use]
pub(crate) fn l2_norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_method_honors_override() {
        assert_eq!(select_method(Method::Similarity, 100, 10), MethodKind::Similarity);
        assert_eq!(select_method(Method::Classifier, 1, 10), MethodKind::Classifier);
    }

    #[test]
    fn test_select_method_auto_threshold() {
        assert_eq!(select_method(Method::Auto, 9, 10), MethodKind::Similarity);
        assert_eq!(select_method(Method::Auto, 10, 10), MethodKind::Classifier);
        assert_eq!(select_method(Method::Auto, 12, 10), MethodKind::Classifier);
        assert_eq!(select_method(Method::Auto, 0, 10), MethodKind::Similarity);
    }

    #[test]
    fn test_method_from_str() {
        assert_eq!("auto".parse::<Method>().unwrap(), Method::Auto);
        assert_eq!("SIMILARITY".parse::<Method>().unwrap(), Method::Similarity);
        assert!("knn".parse::<Method>().is_err());
    }

    #[test]
    fn test_vector_helpers() {
        assert!((dot(&[1.0, 2.0], &[3.0, 4.0]) - 11.0).abs() < f32::EPSILON);
        assert!((l2_norm(&[3.0, 4.0]) - 5.0).abs() < f32::EPSILON);
    }
}
