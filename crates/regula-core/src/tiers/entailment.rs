//! Tier 3: Entailment checks.
//!
//! Hypotheses generated from the rule are classified against the source as
//! entailment, neutral or contradiction. A classifier model is used when
//! one is available; otherwise a negation and term-overlap heuristic stands
//! in. Completeness runs the other direction: each normative clause of the
//! source should be at least compatible with what the rule says.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::patterns;
use super::{rule_statement, CheckContext, TierCheck};
use crate::evidence::{ConsistencyEvidence, EvidenceBuilder, Tier};
use crate::models::{EntailmentClassifier, LazyModel, NliLabel, NliScores};
use crate::rule::Rule;
use crate::text;

const TIER: Tier = Tier::Entailment;

/// Contradictions at or below this confidence do not override the vote.
const CONTRADICTION_OVERRIDE: f64 = 0.6;

/// Fixed phrasings for common outcome labels.
const OUTCOME_HYPOTHESES: &[(&str, &str)] = &[
    ("permitted", "The activity is permitted."),
    ("prohibited", "The activity is prohibited."),
    ("required", "This is required."),
    ("exempt", "The entity is exempt."),
    ("subject_to", "The entity is subject to requirements."),
    ("compliant", "The entity is compliant."),
    ("non_compliant", "The entity is not compliant."),
    ("authorized", "Authorization is granted."),
    ("not_authorized", "Authorization is not granted."),
    ("denied", "The request is denied."),
    ("mandatory", "This is mandatory."),
    ("optional", "This is optional."),
];

/// A classification of one premise/hypothesis pair, or an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NliResult {
    pub label: NliLabel,
    pub confidence: f64,
    pub scores: NliScores,
}

impl NliResult {
    fn labelled(
        label: NliLabel,
        confidence: f64,
        (entailment, neutral, contradiction): (f64, f64, f64),
    ) -> Self {
        Self {
            label,
            confidence,
            scores: NliScores {
                entailment,
                neutral,
                contradiction,
            },
        }
    }

    fn from_scores(scores: NliScores) -> Self {
        let (label, confidence) = scores.winner();
        Self {
            label,
            confidence,
            scores,
        }
    }
}

/// Which implementation classifies pairs.
#[derive(Clone)]
pub enum EntailmentBackend {
    Model(Arc<dyn EntailmentClassifier>),
    Heuristic,
}

impl fmt::Debug for EntailmentBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntailmentBackend::Model(model) => write!(f, "Model({})", model.model_id()),
            EntailmentBackend::Heuristic => f.write_str("Heuristic"),
        }
    }
}

/// The Tier 3 checker.
#[derive(Debug, Default)]
pub struct EntailmentChecker {
    classifier: Option<Arc<LazyModel<dyn EntailmentClassifier>>>,
}

impl EntailmentChecker {
    pub fn heuristic() -> Self {
        Self { classifier: None }
    }

    pub fn with_classifier(classifier: Arc<LazyModel<dyn EntailmentClassifier>>) -> Self {
        Self {
            classifier: Some(classifier),
        }
    }

    /// The classifier backend in use. Loads the model on the first call.
    pub fn backend(&self) -> EntailmentBackend {
        match self.classifier.as_ref().and_then(|lazy| lazy.get()) {
            Some(model) => EntailmentBackend::Model(model),
            None => EntailmentBackend::Heuristic,
        }
    }

    /// Classify one pair with the active backend.
    pub fn classify(&self, premise: &str, hypothesis: &str) -> NliResult {
        if let EntailmentBackend::Model(model) = self.backend() {
            match model.classify(premise, hypothesis) {
                Ok(scores) => return NliResult::from_scores(scores),
                Err(e) => {
                    debug!(
                        model = model.model_id(),
                        error = %e,
                        "classifier failed, using heuristics"
                    );
                }
            }
        }
        heuristic_classify(premise, hypothesis)
    }

    pub fn check_all(&self, rule: &Rule, source_text: Option<&str>) -> Vec<ConsistencyEvidence> {
        vec![
            self.check_entailment(rule, source_text),
            self.check_completeness(rule, source_text),
        ]
    }

    /// Does the source entail what the rule concludes?
    pub fn check_entailment(&self, rule: &Rule, source_text: Option<&str>) -> ConsistencyEvidence {
        let builder =
            EvidenceBuilder::new(TIER, "entailment").rule_element("description, decision_tree");
        let Some(source) = source_text.filter(|s| !s.trim().is_empty()) else {
            return builder
                .warning(0.5)
                .details("No source text provided for entailment check")
                .build();
        };

        let hypotheses = hypotheses(rule);
        if hypotheses.is_empty() {
            return builder
                .warning(0.5)
                .details("No hypotheses could be generated from rule")
                .build();
        }

        let results: Vec<NliResult> = hypotheses.iter().map(|h| self.classify(source, h)).collect();
        let verdict = aggregate(&results);
        let details = format!(
            "Entailment check: {} across {} hypotheses (confidence {:.2})",
            verdict.label,
            hypotheses.len(),
            verdict.confidence
        );

        let builder = match verdict.label {
            NliLabel::Entailment => builder.pass(verdict.confidence),
            NliLabel::Contradiction => builder.fail(1.0 - verdict.confidence),
            NliLabel::Neutral => builder.warning(0.5),
        };
        let span = hypotheses
            .iter()
            .zip(&results)
            .find(|(_, r)| r.label == verdict.label)
            .and_then(|(h, _)| relevant_sentence(source, h));
        builder
            .details(details)
            .source_span(span.unwrap_or_default())
            .build()
    }

    /// Is every normative clause of the source compatible with the rule?
    pub fn check_completeness(
        &self,
        rule: &Rule,
        source_text: Option<&str>,
    ) -> ConsistencyEvidence {
        let builder =
            EvidenceBuilder::new(TIER, "completeness").rule_element("decision_tree, applies_if");
        let Some(source) = source_text.filter(|s| !s.trim().is_empty()) else {
            return builder
                .warning(0.5)
                .details("No source text provided for completeness check")
                .build();
        };

        let clauses = patterns::normative_clauses(source);
        if clauses.is_empty() {
            return builder
                .pass(0.9)
                .details("No normative clauses found in source text")
                .build();
        }

        let statement = rule_statement(rule);
        if statement.trim().is_empty() {
            return builder
                .warning(0.5)
                .details("Rule has no text to compare against source clauses")
                .build();
        }

        let uncovered: Vec<&String> = clauses
            .iter()
            .filter(|clause| self.classify(&statement, clause).label == NliLabel::Contradiction)
            .collect();
        let covered = clauses.len() - uncovered.len();
        let ratio = covered as f64 / clauses.len() as f64;

        let builder = if ratio >= 0.8 {
            builder.pass(ratio)
        } else if ratio >= 0.5 {
            builder.warning(ratio)
        } else {
            builder.fail(ratio)
        };
        let mut details = format!(
            "Completeness: {}/{} normative clauses covered",
            covered,
            clauses.len()
        );
        if let Some(first) = uncovered.first() {
            details.push_str(&format!(". Uncovered: {}", text::excerpt(first, 100)));
        }
        builder
            .details(details)
            .source_span(uncovered.first().map(|c| c.as_str()).unwrap_or_default())
            .build()
    }
}

impl TierCheck for EntailmentChecker {
    fn tier(&self) -> Tier {
        TIER
    }

    fn check(&self, context: &CheckContext<'_>) -> Vec<ConsistencyEvidence> {
        match context.source() {
            Some(source) => self.check_all(context.rule, Some(source)),
            None => Vec::new(),
        }
    }
}

/// Check entailment with the heuristic classifier.
pub fn check_entailment(rule: &Rule, source_text: Option<&str>) -> ConsistencyEvidence {
    EntailmentChecker::heuristic().check_entailment(rule, source_text)
}

/// Check completeness with the heuristic classifier.
pub fn check_completeness(rule: &Rule, source_text: Option<&str>) -> ConsistencyEvidence {
    EntailmentChecker::heuristic().check_completeness(rule, source_text)
}

/// Statements the source should support if the rule is faithful to it.
pub fn hypotheses(rule: &Rule) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |h: String| {
        if !out.contains(&h) {
            out.push(h);
        }
    };

    if let Some(description) = rule.description.as_ref().filter(|d| !d.trim().is_empty()) {
        push(description.trim().to_string());
    }
    for outcome in rule.outcomes() {
        if let Some(phrase) = outcome_hypothesis(&outcome) {
            push(phrase.to_string());
        } else if outcome.len() > 10 {
            push(text::humanize(&outcome));
        }
    }
    if let Some(notes) = &rule.interpretation_notes {
        for sentence in text::split_sentences(notes).into_iter().filter(|s| s.len() > 10).take(2) {
            push(sentence);
        }
    }
    out
}

/// Exact match first, then the longest label the outcome contains.
fn outcome_hypothesis(outcome: &str) -> Option<&'static str> {
    if let Some((_, phrase)) = OUTCOME_HYPOTHESES.iter().find(|(key, _)| *key == outcome) {
        return Some(phrase);
    }
    OUTCOME_HYPOTHESES
        .iter()
        .filter(|(key, _)| outcome.contains(key))
        .max_by_key(|(key, _)| key.len())
        .map(|(_, phrase)| *phrase)
}

/// Negation mismatch between premise and hypothesis signals contradiction;
/// otherwise the share of the hypothesis' terms found in the premise decides.
pub fn heuristic_classify(premise: &str, hypothesis: &str) -> NliResult {
    if patterns::has_negation(premise) != patterns::has_negation(hypothesis) {
        return NliResult::labelled(NliLabel::Contradiction, 0.6, (0.2, 0.2, 0.6));
    }

    let hypothesis_terms = text::stem_set(hypothesis);
    if hypothesis_terms.is_empty() {
        return NliResult::labelled(NliLabel::Neutral, 0.4, (0.3, 0.4, 0.3));
    }
    let premise_terms = text::stem_set(premise);
    let overlap = hypothesis_terms.intersection(&premise_terms).count() as f64
        / hypothesis_terms.len() as f64;

    if overlap > 0.7 {
        let confidence = 0.5 + (overlap - 0.7);
        NliResult::labelled(NliLabel::Entailment, confidence.min(0.8), (confidence, 0.15, 0.05))
    } else if overlap > 0.4 {
        NliResult::labelled(NliLabel::Neutral, 0.5, (0.3, 0.5, 0.2))
    } else {
        NliResult::labelled(NliLabel::Neutral, 0.4, (0.25, 0.4, 0.35))
    }
}

/// Combine per-hypothesis results. A confident contradiction wins outright;
/// otherwise the majority label wins, ties going to entailment, then
/// neutral. Confidence is the mean over every result.
pub fn aggregate(results: &[NliResult]) -> NliResult {
    if results.is_empty() {
        return NliResult::labelled(NliLabel::Neutral, 0.5, (0.33, 0.34, 0.33));
    }

    let scores = mean_scores(results);
    let strongest_contradiction = results
        .iter()
        .filter(|r| r.label == NliLabel::Contradiction && r.confidence > CONTRADICTION_OVERRIDE)
        .map(|r| r.confidence)
        .fold(None, |best: Option<f64>, c| Some(best.map_or(c, |b| b.max(c))));
    if let Some(confidence) = strongest_contradiction {
        return NliResult {
            label: NliLabel::Contradiction,
            confidence,
            scores,
        };
    }

    let mut winner = (NliLabel::Entailment, 0usize);
    for label in [NliLabel::Entailment, NliLabel::Neutral, NliLabel::Contradiction] {
        let votes = results.iter().filter(|r| r.label == label).count();
        if votes > winner.1 {
            winner = (label, votes);
        }
    }
    let confidence = results.iter().map(|r| r.confidence).sum::<f64>() / results.len() as f64;

    NliResult {
        label: winner.0,
        confidence,
        scores,
    }
}

fn mean_scores(results: &[NliResult]) -> NliScores {
    let n = results.len() as f64;
    NliScores {
        entailment: results.iter().map(|r| r.scores.entailment).sum::<f64>() / n,
        neutral: results.iter().map(|r| r.scores.neutral).sum::<f64>() / n,
        contradiction: results.iter().map(|r| r.scores.contradiction).sum::<f64>() / n,
    }
}

/// The premise sentence sharing the most terms with the hypothesis.
fn relevant_sentence(premise: &str, hypothesis: &str) -> Option<String> {
    let target = text::stem_set(hypothesis);
    text::split_sentences(premise)
        .into_iter()
        .map(|s| (text::stem_set(&s).intersection(&target).count(), s))
        .filter(|(n, _)| *n > 0)
        .max_by_key(|(n, _)| *n)
        .map(|(_, s)| s)
}
