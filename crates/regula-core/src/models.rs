//! Optional ML capabilities: sentence encoders and entailment classifiers.
//!
//! Neither capability ships with the core. Callers plug real models in
//! through [`SentenceEncoder`] / [`EntailmentClassifier`], wrapped in a
//! [`LazyModel`] so the expensive load happens once per process. When no
//! model is configured, or loading fails, the checkers use their
//! deterministic heuristics.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{info, warn};

use crate::text;

/// Errors raised by model capabilities. They never escape the core: every
/// caller falls back to a heuristic.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Model unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to load model: {0}")]
    LoadFailed(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Empty input")]
    EmptyInput,
}

/// Encodes sentences into dense vectors.
pub trait SentenceEncoder: Send + Sync {
    /// Encode a batch of texts, one vector per text.
    fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ModelError>;

    /// Model identifier, reported in evidence details.
    fn model_id(&self) -> &str;
}

/// Three-way natural-language-inference label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NliLabel {
    Entailment,
    Neutral,
    Contradiction,
}

impl fmt::Display for NliLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NliLabel::Entailment => "entailment",
            NliLabel::Neutral => "neutral",
            NliLabel::Contradiction => "contradiction",
        })
    }
}

/// Class probabilities from an entailment classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NliScores {
    pub entailment: f64,
    pub neutral: f64,
    pub contradiction: f64,
}

impl NliScores {
    /// Winning label and its probability. Ties favour neutral, then
    /// entailment.
    pub fn winner(&self) -> (NliLabel, f64) {
        let mut best = (NliLabel::Neutral, self.neutral);
        if self.entailment > best.1 {
            best = (NliLabel::Entailment, self.entailment);
        }
        if self.contradiction > best.1 {
            best = (NliLabel::Contradiction, self.contradiction);
        }
        best
    }
}

/// Classifies whether a premise entails a hypothesis.
pub trait EntailmentClassifier: Send + Sync {
    fn classify(&self, premise: &str, hypothesis: &str) -> Result<NliScores, ModelError>;

    fn model_id(&self) -> &str;
}

type Loader<M> = Box<dyn Fn() -> Result<Arc<M>, ModelError> + Send + Sync>;

/// A model that is loaded on first use and shared afterwards.
///
/// Concurrent first callers block on a single load. A failed load is
/// remembered; later calls see `None` without retrying.
pub struct LazyModel<M: ?Sized> {
    name: String,
    cell: OnceLock<Option<Arc<M>>>,
    loader: Loader<M>,
}

impl<M: ?Sized> LazyModel<M> {
    /// Defer loading to the first [`get`](Self::get).
    pub fn new<F>(name: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> Result<Arc<M>, ModelError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            cell: OnceLock::new(),
            loader: Box::new(loader),
        }
    }

    /// Wrap an already loaded model.
    pub fn ready(name: impl Into<String>, model: Arc<M>) -> Self {
        let lazy = Self::unavailable(name);
        let _ = lazy.cell.set(Some(model));
        lazy
    }

    /// A capability that never loads.
    pub fn unavailable(name: impl Into<String>) -> Self {
        let name = name.into();
        let reason = name.clone();
        Self::new(name, move || Err(ModelError::Unavailable(reason.clone())))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The loaded model, loading it if this is the first call.
    pub fn get(&self) -> Option<Arc<M>> {
        self.cell
            .get_or_init(|| match (self.loader)() {
                Ok(model) => {
                    info!(model = %self.name, "model loaded");
                    Some(model)
                }
                Err(ModelError::Unavailable(_)) => None,
                Err(e) => {
                    warn!(model = %self.name, error = %e, "model load failed, using heuristics");
                    None
                }
            })
            .clone()
    }

    /// Whether the model loaded. Triggers the load.
    pub fn is_available(&self) -> bool {
        self.get().is_some()
    }
}

impl<M: ?Sized> fmt::Debug for LazyModel<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.cell.get() {
            None => "pending",
            Some(None) => "unavailable",
            Some(Some(_)) => "loaded",
        };
        f.debug_struct("LazyModel")
            .field("name", &self.name)
            .field("state", &state)
            .finish()
    }
}

/// Deterministic bag-of-words encoder using feature hashing.
///
/// Each content term is hashed (FNV-1a) into one of `dimension` buckets with
/// a hash-derived sign; the vector is L2-normalised. Texts sharing
/// vocabulary land close together, which makes it usable both as the
/// heuristic similarity signal and as a stand-in encoder in tests.
#[derive(Debug, Clone)]
pub struct HashingEncoder {
    dimension: usize,
    model_id: String,
}

impl HashingEncoder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            model_id: format!("feature-hashing-{}", dimension.max(1)),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Encode a single text.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for term in text::content_terms(text) {
            let hash = fnv1a(term.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEncoder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl SentenceEncoder for HashingEncoder {
    fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ModelError> {
        if texts.is_empty() {
            return Err(ModelError::EmptyInput);
        }
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_lazy_model_loads_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let lazy: LazyModel<dyn SentenceEncoder> = LazyModel::new("hashing", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(HashingEncoder::default()) as Arc<dyn SentenceEncoder>)
        });

        assert!(lazy.is_available());
        assert!(lazy.get().is_some());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_load_is_remembered() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let lazy: LazyModel<dyn EntailmentClassifier> = LazyModel::new("nli", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ModelError::LoadFailed("weights missing".to_string()))
        });

        assert!(lazy.get().is_none());
        assert!(lazy.get().is_none());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(format!("{:?}", lazy).contains("unavailable"));
    }

    #[test]
    fn test_concurrent_first_calls_share_one_load() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let lazy: Arc<LazyModel<dyn SentenceEncoder>> = Arc::new(LazyModel::new("hashing", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(HashingEncoder::default()) as Arc<dyn SentenceEncoder>)
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lazy = Arc::clone(&lazy);
                std::thread::spawn(move || lazy.get().is_some())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hashing_encoder_is_deterministic_and_normalised() {
        let encoder = HashingEncoder::new(64);
        let a = encoder.embed("issuer publishes a white paper");
        let b = encoder.embed("issuer publishes a white paper");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        let related = text::cosine(&a, &encoder.embed("the issuer must publish a white paper"));
        let unrelated = text::cosine(&a, &encoder.embed("custody of client funds"));
        assert!(related > unrelated);
    }

    #[test]
    fn test_nli_winner() {
        let scores = NliScores {
            entailment: 0.2,
            neutral: 0.1,
            contradiction: 0.7,
        };
        assert_eq!(scores.winner(), (NliLabel::Contradiction, 0.7));
    }
}
