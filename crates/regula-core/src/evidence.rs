//! Consistency evidence and the records built from it.
//!
//! Every verification check emits exactly one [`ConsistencyEvidence`] item:
//! a tier, a category naming the check, a pass/warning/fail label and a
//! score in `[0, 1]`. The aggregator turns a list of items into a
//! [`ConsistencySummary`]; summary plus evidence is the [`ConsistencyBlock`]
//! written back onto a rule by the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Verification tier, ordered by semantic depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Tier {
    Schema = 0,
    Lexical = 1,
    Semantic = 2,
    Entailment = 3,
    CrossRule = 4,
}

/// A tier number outside 0–4.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid tier {0}: expected 0-4")]
pub struct InvalidTier(pub u8);

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Schema,
        Tier::Lexical,
        Tier::Semantic,
        Tier::Entailment,
        Tier::CrossRule,
    ];

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Tier::Schema => "Schema & Structural",
            Tier::Lexical => "Lexical & Heuristic",
            Tier::Semantic => "Semantic Similarity",
            Tier::Entailment => "Entailment",
            Tier::CrossRule => "Cross-Rule Consistency",
        }
    }

    /// Whether the tier compares the rule against its source text.
    pub fn needs_source_text(self) -> bool {
        matches!(self, Tier::Lexical | Tier::Semantic | Tier::Entailment)
    }
}

impl TryFrom<u8> for Tier {
    type Error = InvalidTier;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Tier::ALL
            .get(n as usize)
            .copied()
            .ok_or(InvalidTier(n))
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> u8 {
        tier.number()
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tier {} ({})", self.number(), self.name())
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceLabel {
    Pass,
    Warning,
    Fail,
}

impl EvidenceLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceLabel::Pass => "pass",
            EvidenceLabel::Warning => "warning",
            EvidenceLabel::Fail => "fail",
        }
    }
}

impl fmt::Display for EvidenceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scored, labelled observation from a single check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsistencyEvidence {
    pub tier: Tier,

    /// Check name, e.g. `deontic_alignment`
    pub category: String,

    pub label: EvidenceLabel,

    /// Score in `[0, 1]`
    pub score: f64,

    pub details: String,

    /// Excerpt of the source text the check relied on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_span: Option<String>,

    /// Path of the rule element the check concerns (e.g. `applies_if`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_element_path: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl ConsistencyEvidence {
    pub fn pass(tier: Tier, category: impl Into<String>, details: impl Into<String>) -> Self {
        EvidenceBuilder::new(tier, category).pass(1.0).details(details).build()
    }

    pub fn warning(
        tier: Tier,
        category: impl Into<String>,
        score: f64,
        details: impl Into<String>,
    ) -> Self {
        EvidenceBuilder::new(tier, category).warning(score).details(details).build()
    }

    pub fn fail(tier: Tier, category: impl Into<String>, details: impl Into<String>) -> Self {
        EvidenceBuilder::new(tier, category).fail(0.0).details(details).build()
    }

    pub fn is_fail(&self) -> bool {
        self.label == EvidenceLabel::Fail
    }

    pub fn is_warning(&self) -> bool {
        self.label == EvidenceLabel::Warning
    }
}

/// Builder for evidence with fluent API.
pub struct EvidenceBuilder {
    tier: Tier,
    category: String,
    label: EvidenceLabel,
    score: f64,
    details: String,
    source_span: Option<String>,
    rule_element_path: Option<String>,
}

impl EvidenceBuilder {
    /// Start building evidence for a check.
    pub fn new(tier: Tier, category: impl Into<String>) -> Self {
        Self {
            tier,
            category: category.into(),
            label: EvidenceLabel::Pass,
            score: 1.0,
            details: String::new(),
            source_span: None,
            rule_element_path: None,
        }
    }

    pub fn label(mut self, label: EvidenceLabel, score: f64) -> Self {
        self.label = label;
        self.score = score;
        self
    }

    pub fn pass(self, score: f64) -> Self {
        self.label(EvidenceLabel::Pass, score)
    }

    pub fn warning(self, score: f64) -> Self {
        self.label(EvidenceLabel::Warning, score)
    }

    pub fn fail(self, score: f64) -> Self {
        self.label(EvidenceLabel::Fail, score)
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    /// Attach a source excerpt, truncated to 200 characters.
    pub fn source_span(mut self, span: impl AsRef<str>) -> Self {
        let span: String = span.as_ref().chars().take(200).collect();
        if !span.trim().is_empty() {
            self.source_span = Some(span);
        }
        self
    }

    pub fn rule_element(mut self, path: impl Into<String>) -> Self {
        self.rule_element_path = Some(path.into());
        self
    }

    /// Build the evidence, clamping the score into `[0, 1]`.
    pub fn build(self) -> ConsistencyEvidence {
        ConsistencyEvidence {
            tier: self.tier,
            category: self.category,
            label: self.label,
            score: if self.score.is_finite() {
                self.score.clamp(0.0, 1.0)
            } else {
                0.0
            },
            details: self.details,
            source_span: self.source_span,
            rule_element_path: self.rule_element_path,
            timestamp: Utc::now(),
        }
    }
}

/// Trust judgment for a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyStatus {
    Verified,
    NeedsReview,
    Inconsistent,
    Unverified,
}

impl fmt::Display for ConsistencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConsistencyStatus::Verified => "verified",
            ConsistencyStatus::NeedsReview => "needs_review",
            ConsistencyStatus::Inconsistent => "inconsistent",
            ConsistencyStatus::Unverified => "unverified",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsistencySummary {
    pub status: ConsistencyStatus,

    /// Weighted confidence in `[0, 1]`
    pub confidence: f64,

    pub last_verified: DateTime<Utc>,

    pub verified_by: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A reviewer's decision that replaces the computed summary fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HumanOverride {
    pub status: ConsistencyStatus,
    pub confidence: f64,
    pub verified_by: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Summary plus the evidence it was computed from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsistencyBlock {
    pub summary: ConsistencySummary,

    #[serde(default)]
    pub evidence: Vec<ConsistencyEvidence>,

    /// Set when fail-fast stopped the run before all requested tiers
    #[serde(default)]
    pub stopped_early: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,

    /// Set once a reviewer has overridden the computed summary
    #[serde(default)]
    pub overridden: bool,
}

impl ConsistencyBlock {
    /// Apply a human override. It stays authoritative until the
    /// orchestrator produces a fresh block for the rule.
    pub fn apply_override(&mut self, decision: HumanOverride) {
        self.summary.status = decision.status;
        self.summary.confidence = decision.confidence.clamp(0.0, 1.0);
        self.summary.verified_by = decision.verified_by;
        self.summary.last_verified = Utc::now();
        if decision.notes.is_some() {
            self.summary.notes = decision.notes;
        }
        self.overridden = true;
    }

    /// Evidence produced by a given tier.
    pub fn evidence_for(&self, tier: Tier) -> impl Iterator<Item = &ConsistencyEvidence> {
        self.evidence.iter().filter(move |e| e.tier == tier)
    }
}
