//! Aggregator: Folds tier evidence into a consistency summary.
//!
//! Status follows strict precedence:
//! 1. If ANY evidence is `fail` → `inconsistent`
//! 2. Else if ANY evidence is `warning` → `needs_review`
//! 3. Else if there is no evidence → `unverified`
//! 4. Else → `verified`
//!
//! Confidence is the tier-weighted mean of evidence scores.

use chrono::Utc;

use crate::config::{TierWeights, VerificationConfig};
use crate::evidence::{ConsistencyEvidence, ConsistencyStatus, ConsistencySummary};

/// The Aggregator turns evidence into a [`ConsistencySummary`].
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregator {
    weights: TierWeights,
    default_weight: f64,
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            weights: TierWeights::default(),
            default_weight: 0.5,
        }
    }

    pub fn with_weights(weights: TierWeights, default_weight: f64) -> Self {
        Self {
            weights,
            default_weight,
        }
    }

    pub fn from_config(config: &VerificationConfig) -> Self {
        Self::with_weights(config.tier_weights, config.default_weight)
    }

    /// Status under the precedence rules above.
    pub fn status(&self, evidence: &[ConsistencyEvidence]) -> ConsistencyStatus {
        if evidence.iter().any(ConsistencyEvidence::is_fail) {
            ConsistencyStatus::Inconsistent
        } else if evidence.iter().any(ConsistencyEvidence::is_warning) {
            ConsistencyStatus::NeedsReview
        } else if evidence.is_empty() {
            ConsistencyStatus::Unverified
        } else {
            ConsistencyStatus::Verified
        }
    }

    /// Weighted mean of scores; `0.0` without evidence.
    pub fn confidence(&self, evidence: &[ConsistencyEvidence]) -> f64 {
        let (mut weighted, mut total) = (0.0, 0.0);
        for e in evidence {
            let weight = self.weights.weight(e.tier);
            let weight = if weight.is_finite() && weight >= 0.0 {
                weight
            } else {
                self.default_weight
            };
            weighted += e.score * weight;
            total += weight;
        }
        if total <= 0.0 {
            return 0.0;
        }
        (weighted / total).clamp(0.0, 1.0)
    }

    pub fn summarize(
        &self,
        evidence: &[ConsistencyEvidence],
        verified_by: &str,
    ) -> ConsistencySummary {
        let fails = evidence.iter().filter(|e| e.is_fail()).count();
        let warnings = evidence.iter().filter(|e| e.is_warning()).count();
        let notes = if evidence.is_empty() {
            None
        } else {
            Some(format!(
                "{} checks: {} fail, {} warning, {} pass",
                evidence.len(),
                fails,
                warnings,
                evidence.len() - fails - warnings
            ))
        };

        ConsistencySummary {
            status: self.status(evidence),
            confidence: self.confidence(evidence),
            last_verified: Utc::now(),
            verified_by: verified_by.to_string(),
            notes,
        }
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Summarize with the default weights, attributed to `system`.
pub fn compute_summary(evidence: &[ConsistencyEvidence]) -> ConsistencySummary {
    Aggregator::new().summarize(evidence, "system")
}
