//! Tier 2: Semantic Similarity checks.
//!
//! Two backends compute a similarity score in `[0, 1]`:
//!
//! - **Model**: cosine similarity of sentence embeddings from a
//!   [`SentenceEncoder`].
//! - **Heuristic**: a blend of TF-IDF cosine, feature-hashed embedding
//!   cosine, character 2/3-gram Jaccard and token Jaccard.
//!
//! The backend is chosen on first use by checking whether an encoder loads.
//! Both map scores to labels through the same [`SimilarityBands`], so
//! switching backends moves scores but never the thresholds.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::patterns::{self, OBLIGATION_WORDS};
use super::{outcome_phrases, rule_statement, CheckContext, TierCheck};
use crate::config::SimilarityBands;
use crate::evidence::{ConsistencyEvidence, EvidenceBuilder, EvidenceLabel, Tier};
use crate::models::{HashingEncoder, LazyModel, SentenceEncoder};
use crate::rule::{FieldCondition, Rule};
use crate::text;

const TIER: Tier = Tier::Semantic;

/// Grounded share of conditions needed to pass the grounding check.
const GROUNDED_PASS: f64 = 0.8;
/// Grounded share below which the grounding check fails.
const GROUNDED_WARNING: f64 = 0.5;

/// Similarity band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityLevel {
    High,
    Medium,
    Low,
}

impl SimilarityLevel {
    pub fn label(self) -> EvidenceLabel {
        match self {
            SimilarityLevel::High => EvidenceLabel::Pass,
            SimilarityLevel::Medium => EvidenceLabel::Warning,
            SimilarityLevel::Low => EvidenceLabel::Fail,
        }
    }
}

impl fmt::Display for SimilarityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SimilarityLevel::High => "high",
            SimilarityLevel::Medium => "medium",
            SimilarityLevel::Low => "low",
        })
    }
}

/// A scored comparison of two texts.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityResult {
    pub level: SimilarityLevel,
    pub score: f64,
    pub details: String,
}

/// Which implementation computes similarity.
#[derive(Clone)]
pub enum SimilarityBackend {
    Model(Arc<dyn SentenceEncoder>),
    Heuristic,
}

impl fmt::Debug for SimilarityBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimilarityBackend::Model(encoder) => write!(f, "Model({})", encoder.model_id()),
            SimilarityBackend::Heuristic => f.write_str("Heuristic"),
        }
    }
}

/// The Tier 2 checker.
#[derive(Debug)]
pub struct SemanticChecker {
    encoder: Option<Arc<LazyModel<dyn SentenceEncoder>>>,
    bands: SimilarityBands,
    hashing: HashingEncoder,
}

impl Default for SemanticChecker {
    fn default() -> Self {
        Self::heuristic()
    }
}

impl SemanticChecker {
    /// A checker that only ever uses the heuristic backend.
    pub fn heuristic() -> Self {
        Self {
            encoder: None,
            bands: SimilarityBands::default(),
            hashing: HashingEncoder::default(),
        }
    }

    /// A checker backed by an encoder, falling back to heuristics when the
    /// encoder is unavailable or fails.
    pub fn with_encoder(encoder: Arc<LazyModel<dyn SentenceEncoder>>) -> Self {
        Self {
            encoder: Some(encoder),
            ..Self::heuristic()
        }
    }

    pub fn with_bands(mut self, bands: SimilarityBands) -> Self {
        self.bands = bands;
        self
    }

    /// The encoder backend in use. Loads the model on the first call.
    pub fn backend(&self) -> SimilarityBackend {
        match self.encoder.as_ref().and_then(|lazy| lazy.get()) {
            Some(encoder) => SimilarityBackend::Model(encoder),
            None => SimilarityBackend::Heuristic,
        }
    }

    /// Map a score to its band. Shared by both backends.
    pub fn level(&self, score: f64) -> SimilarityLevel {
        if score >= self.bands.high {
            SimilarityLevel::High
        } else if score >= self.bands.medium {
            SimilarityLevel::Medium
        } else {
            SimilarityLevel::Low
        }
    }

    /// Similarity of two texts using the active backend.
    pub fn similarity(&self, a: &str, b: &str) -> SimilarityResult {
        if let SimilarityBackend::Model(encoder) = self.backend() {
            match encoder.encode(&[a, b]) {
                Ok(vectors) if vectors.len() == 2 => {
                    let score = text::cosine(&vectors[0], &vectors[1]).clamp(0.0, 1.0);
                    return SimilarityResult {
                        level: self.level(score),
                        score,
                        details: format!(
                            "Embedding similarity ({}): {:.3}",
                            encoder.model_id(),
                            score
                        ),
                    };
                }
                Ok(vectors) => {
                    debug!(
                        model = encoder.model_id(),
                        got = vectors.len(),
                        "encoder returned wrong batch size, using heuristics"
                    );
                }
                Err(e) => {
                    debug!(
                        model = encoder.model_id(),
                        error = %e,
                        "encoder failed, using heuristics"
                    );
                }
            }
        }
        self.heuristic_similarity(a, b)
    }

    /// Deterministic similarity used when no model is available.
    pub fn heuristic_similarity(&self, a: &str, b: &str) -> SimilarityResult {
        let tokens_a = stemmed_tokens(a);
        let tokens_b = stemmed_tokens(b);
        if tokens_a.is_empty() || tokens_b.is_empty() {
            return SimilarityResult {
                level: SimilarityLevel::Low,
                score: 0.0,
                details: "Unable to tokenize texts for comparison".to_string(),
            };
        }

        let tfidf = tfidf_cosine(&tokens_a, &tokens_b);
        let hashed = text::cosine(&self.hashing.embed(a), &self.hashing.embed(b)).max(0.0);
        let ngram = ngram_similarity(a, b);
        let set_a: HashSet<&String> = tokens_a.iter().collect();
        let set_b: HashSet<&String> = tokens_b.iter().collect();
        let jaccard = text::jaccard(&set_a, &set_b);

        let score = (0.35 * tfidf + 0.25 * hashed + 0.25 * ngram + 0.15 * jaccard).clamp(0.0, 1.0);
        SimilarityResult {
            level: self.level(score),
            score,
            details: format!(
                "Heuristic similarity: {:.3} \
                 (tfidf={:.2}, hashed={:.2}, ngram={:.2}, jaccard={:.2})",
                score, tfidf, hashed, ngram, jaccard
            ),
        }
    }

    /// Run all three Tier 2 checks.
    pub fn check_all(&self, rule: &Rule, source_text: Option<&str>) -> Vec<ConsistencyEvidence> {
        vec![
            self.check_semantic_alignment(rule, source_text),
            self.check_obligation_similarity(rule, source_text),
            self.check_condition_grounding(rule, source_text),
        ]
    }

    /// The rule's prose (description, outcomes, notes) against the source.
    pub fn check_semantic_alignment(
        &self,
        rule: &Rule,
        source_text: Option<&str>,
    ) -> ConsistencyEvidence {
        let builder = EvidenceBuilder::new(TIER, "semantic_alignment");
        let Some(source) = non_blank(source_text) else {
            return no_source(builder, "semantic analysis");
        };

        let statement = rule_statement(rule);
        if statement.trim().is_empty() {
            return builder
                .warning(0.5)
                .details("No text extracted from rule for semantic analysis")
                .build();
        }

        let result = self.similarity(&statement, source);
        builder
            .label(result.level.label(), result.score)
            .details(result.details)
            .source_span(best_sentence(source, &statement).unwrap_or_default())
            .rule_element("description, decision_tree")
            .build()
    }

    /// Deontic sentences of the source against the rule's outcomes and
    /// obligations.
    pub fn check_obligation_similarity(
        &self,
        rule: &Rule,
        source_text: Option<&str>,
    ) -> ConsistencyEvidence {
        let builder = EvidenceBuilder::new(TIER, "obligation_similarity")
            .rule_element("decision_tree.obligations");
        let Some(source) = non_blank(source_text) else {
            return no_source(builder, "obligation analysis");
        };

        let sentences = patterns::deontic_sentences(source);
        if sentences.is_empty() {
            return builder
                .pass(0.9)
                .details("No deontic obligations found in source text")
                .build();
        }

        let obligations = rule_obligation_texts(rule);
        if obligations.is_empty() {
            return builder
                .warning(0.5)
                .details("No obligations found in rule to compare")
                .build();
        }

        let result = self.similarity(&obligations.join(". "), &sentences.join(". "));
        builder
            .label(result.level.label(), result.score)
            .details(format!("Obligation match: {}", result.details))
            .source_span(&sentences[0])
            .build()
    }

    /// Share of the rule's conditions that find support in the source.
    ///
    /// A condition counts as grounded once it reaches the medium band: by
    /// embedding similarity to its closest source sentence, or heuristically
    /// by the share of its terms (and type synonyms) the source mentions.
    /// The grounded share passes from 0.8 and warns from 0.5.
    pub fn check_condition_grounding(
        &self,
        rule: &Rule,
        source_text: Option<&str>,
    ) -> ConsistencyEvidence {
        let builder =
            EvidenceBuilder::new(TIER, "condition_grounding").rule_element("applies_if");
        let Some(source) = non_blank(source_text) else {
            return no_source(builder, "condition grounding");
        };

        let mut leaves: Vec<&FieldCondition> = Vec::new();
        if let Some(applies_if) = &rule.applies_if {
            leaves.extend(applies_if.leaves());
        }
        for branch in rule.decision_tree.branches() {
            leaves.extend(branch.condition.leaves());
        }
        if leaves.is_empty() {
            return builder
                .pass(1.0)
                .details("No conditions in rule to ground")
                .build();
        }

        let backend = self.backend();
        let sentences = text::split_sentences(source);
        let source_lower = source.to_lowercase();
        let source_stems = text::stem_set(source);

        let mut ungrounded = Vec::new();
        for leaf in &leaves {
            let score = match &backend {
                SimilarityBackend::Model(_) => sentences
                    .iter()
                    .map(|s| self.similarity(&condition_phrase(leaf), s).score)
                    .fold(0.0, f64::max),
                SimilarityBackend::Heuristic => term_support(leaf, &source_lower, &source_stems),
            };
            if self.level(score) == SimilarityLevel::Low {
                ungrounded.push(leaf.to_string());
            }
        }

        let grounded = leaves.len() - ungrounded.len();
        let ratio = grounded as f64 / leaves.len() as f64;
        let mut details = format!(
            "Condition grounding: {}/{} conditions grounded",
            grounded,
            leaves.len()
        );
        if !ungrounded.is_empty() {
            let shown: Vec<&str> = ungrounded.iter().take(3).map(String::as_str).collect();
            details.push_str(&format!(". Ungrounded: {}", shown.join(", ")));
        }

        let builder = if ratio >= GROUNDED_PASS {
            builder.pass(ratio)
        } else if ratio >= GROUNDED_WARNING {
            builder.warning(ratio)
        } else {
            builder.fail(ratio)
        };
        builder.details(details).build()
    }
}

impl TierCheck for SemanticChecker {
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

/// Check semantic alignment with a heuristic-only checker.
pub fn check_semantic_alignment(rule: &Rule, source_text: Option<&str>) -> ConsistencyEvidence {
    SemanticChecker::heuristic().check_semantic_alignment(rule, source_text)
}

/// Check obligation similarity with a heuristic-only checker.
pub fn check_obligation_similarity(rule: &Rule, source_text: Option<&str>) -> ConsistencyEvidence {
    SemanticChecker::heuristic().check_obligation_similarity(rule, source_text)
}

/// Check condition grounding with a heuristic-only checker.
pub fn check_condition_grounding(rule: &Rule, source_text: Option<&str>) -> ConsistencyEvidence {
    SemanticChecker::heuristic().check_condition_grounding(rule, source_text)
}

fn non_blank(source_text: Option<&str>) -> Option<&str> {
    source_text.filter(|s| !s.trim().is_empty())
}

fn no_source(builder: EvidenceBuilder, what: &str) -> ConsistencyEvidence {
    builder
        .warning(0.5)
        .details(format!("No source text provided for {}", what))
        .build()
}

fn stemmed_tokens(text: &str) -> Vec<String> {
    text::tokenize(text).iter().map(|t| text::stem(t)).collect()
}

/// TF-IDF cosine over the two-document corpus `{a, b}`.
fn tfidf_cosine(a: &[String], b: &[String]) -> f64 {
    let tf_a = term_frequencies(a);
    let tf_b = term_frequencies(b);

    let vocabulary: HashSet<&str> = tf_a.keys().chain(tf_b.keys()).copied().collect();
    let (mut dot, mut norm_a, mut norm_b) = (0.0, 0.0, 0.0);
    for term in vocabulary {
        let df = f64::from(u8::from(tf_a.contains_key(term)) + u8::from(tf_b.contains_key(term)));
        let idf = (3.0 / (df + 1.0)).ln() + 1.0;
        let wa = tf_a.get(term).copied().unwrap_or(0.0) * idf;
        let wb = tf_b.get(term).copied().unwrap_or(0.0) * idf;
        dot += wa * wb;
        norm_a += wa * wa;
        norm_b += wb * wb;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn term_frequencies(tokens: &[String]) -> HashMap<&str, f64> {
    let mut counts = HashMap::new();
    for t in tokens {
        *counts.entry(t.as_str()).or_insert(0.0) += 1.0;
    }
    counts
}

/// Mean Jaccard of character bigrams and trigrams.
fn ngram_similarity(a: &str, b: &str) -> f64 {
    let scores: Vec<f64> = [2, 3]
        .iter()
        .map(|n| text::jaccard(&text::char_ngrams(a, *n), &text::char_ngrams(b, *n)))
        .collect();
    scores.iter().sum::<f64>() / scores.len() as f64
}

/// Outcomes, obligation descriptions and an obligation-phrased description.
fn rule_obligation_texts(rule: &Rule) -> Vec<String> {
    let mut texts = outcome_phrases(rule);
    let leaf_obligations = rule
        .decision_tree
        .leaves()
        .into_iter()
        .flat_map(|l| l.obligations.iter());
    for obligation in leaf_obligations.chain(rule.obligations.iter()) {
        texts.push(
            obligation
                .description
                .clone()
                .unwrap_or_else(|| text::humanize(&obligation.id)),
        );
    }
    if let Some(description) = rule.description.as_ref().filter(|d| OBLIGATION_WORDS.is_match(d)) {
        texts.push(description.clone());
    }
    texts
}

/// A condition as words: field name and string values.
fn condition_phrase(leaf: &FieldCondition) -> String {
    let mut words = vec![text::humanize(leaf.field.trim_start_matches("is_"))];
    words.extend(value_strings(&leaf.value).into_iter().map(text::humanize));
    words.join(" ")
}

/// Share of a condition's terms found in the source. A condition is
/// judged by its string values when it has any (values also count when the
/// source uses one of their synonyms), otherwise by its field name.
fn term_support(leaf: &FieldCondition, source_lower: &str, source_stems: &HashSet<String>) -> f64 {
    let values = value_strings(&leaf.value);
    if !values.is_empty() {
        let hits = values
            .iter()
            .filter(|v| {
                patterns::mentions_type(source_lower, v)
                    || text::stem_set(v).iter().any(|t| source_stems.contains(t))
            })
            .count();
        return hits as f64 / values.len() as f64;
    }

    let field_terms = text::stem_set(&leaf.field);
    if field_terms.is_empty() {
        return 0.0;
    }
    let hits = field_terms.iter().filter(|t| source_stems.contains(*t)).count();
    hits as f64 / field_terms.len() as f64
}

fn value_strings(value: &Value) -> Vec<&str> {
    match value {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

/// The source sentence sharing the most terms with the given text.
fn best_sentence(source: &str, against: &str) -> Option<String> {
    let target = text::stem_set(against);
    text::split_sentences(source)
        .into_iter()
        .map(|s| (text::stem_set(&s).intersection(&target).count(), s))
        .filter(|(n, _)| *n > 0)
        .max_by_key(|(n, _)| *n)
        .map(|(_, s)| text::excerpt(&s, 200))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelError;

    const RULE: &str = r#"
id: mica_art16_offer
description: Issuers of asset-referenced tokens must publish a crypto-asset white paper
  before a public offer.
applies_if:
  all:
    - field: instrument_type
      operator: in
      value: [art]
    - field: activity
      value: public_offer
decision_tree:
  condition:
    field: whitepaper_published
    value: true
  true_branch:
    result: compliant
  false_branch:
    result: non_compliant
    obligations:
      - id: publish_whitepaper
        description: Publish a crypto-asset white paper
"#;

    const SOURCE: &str = "Issuers of asset-referenced tokens shall publish a crypto-asset \
        white paper before making a public offer. The white paper shall be notified to the \
        competent authority.";

    struct FixedEncoder(Vec<Vec<f32>>);

    impl SentenceEncoder for FixedEncoder {
        fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ModelError> {
            Ok(texts.iter().enumerate().map(|(i, _)| self.0[i % self.0.len()].clone()).collect())
        }

        fn model_id(&self) -> &str {
            "fixed"
        }
    }

    struct BrokenEncoder;

    impl SentenceEncoder for BrokenEncoder {
        fn encode(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, ModelError> {
            Err(ModelError::Inference("device lost".to_string()))
        }

        fn model_id(&self) -> &str {
            "broken"
        }
    }

    fn model_checker(encoder: impl SentenceEncoder + 'static) -> SemanticChecker {
        let encoder: Arc<dyn SentenceEncoder> = Arc::new(encoder);
        SemanticChecker::with_encoder(Arc::new(LazyModel::ready("test", encoder)))
    }

    fn rule() -> Rule {
        Rule::from_yaml(RULE).unwrap()
    }

    #[test]
    fn test_bands() {
        let checker = SemanticChecker::heuristic();
        assert_eq!(checker.level(0.75), SimilarityLevel::High);
        assert_eq!(checker.level(0.74), SimilarityLevel::Medium);
        assert_eq!(checker.level(0.50), SimilarityLevel::Medium);
        assert_eq!(checker.level(0.49), SimilarityLevel::Low);
    }

    #[test]
    fn test_heuristic_identical_and_unrelated() {
        let checker = SemanticChecker::heuristic();
        let same = checker.heuristic_similarity(SOURCE, SOURCE);
        assert!(same.score > 0.99);
        assert_eq!(same.level, SimilarityLevel::High);

        let unrelated = checker
            .heuristic_similarity("custody of client funds", "white paper publication duties");
        assert_eq!(unrelated.level, SimilarityLevel::Low);
        assert_eq!(checker.heuristic_similarity("", SOURCE).score, 0.0);
    }

    #[test]
    fn test_model_path_uses_same_bands() {
        // cos = 0.6 lands in the medium band for both backends.
        let checker = model_checker(FixedEncoder(vec![vec![1.0, 0.0], vec![0.6, 0.8]]));
        assert!(matches!(checker.backend(), SimilarityBackend::Model(_)));

        let result = checker.similarity("a", "b");
        assert!((result.score - 0.6).abs() < 1e-6);
        assert_eq!(result.level, SimilarityLevel::Medium);
        assert_eq!(result.level, SemanticChecker::heuristic().level(result.score));
    }

    #[test]
    fn test_failing_model_falls_back() {
        let checker = model_checker(BrokenEncoder);
        let model = checker.similarity(SOURCE, SOURCE);
        let heuristic = SemanticChecker::heuristic().heuristic_similarity(SOURCE, SOURCE);
        assert_eq!(model.score, heuristic.score);
    }

    #[test]
    fn test_unavailable_model_selects_heuristic() {
        let lazy: LazyModel<dyn SentenceEncoder> = LazyModel::unavailable("none");
        let checker = SemanticChecker::with_encoder(Arc::new(lazy));
        assert!(matches!(checker.backend(), SimilarityBackend::Heuristic));
    }

    #[test]
    fn test_missing_source_is_warning() {
        for evidence in SemanticChecker::heuristic().check_all(&rule(), None) {
            assert_eq!(evidence.label, EvidenceLabel::Warning);
            assert_eq!(evidence.score, 0.5);
        }
    }

    #[test]
    fn test_checks_against_matching_source() {
        let checker = SemanticChecker::heuristic();
        let evidence = checker.check_all(&rule(), Some(SOURCE));
        assert_eq!(evidence.len(), 3);
        assert!(evidence.iter().all(|e| e.tier == Tier::Semantic));

        let grounding = &evidence[2];
        assert_eq!(grounding.category, "condition_grounding");
        assert_eq!(grounding.label, EvidenceLabel::Pass, "{}", grounding.details);

        let alignment = &evidence[0];
        assert!(alignment.source_span.is_some());
    }

    #[test]
    fn test_grounding_flags_unrelated_conditions() {
        let source = "Custody providers shall segregate client funds.";
        let evidence = check_condition_grounding(&rule(), Some(source));
        assert_eq!(evidence.label, EvidenceLabel::Fail);
        assert!(evidence.details.contains("Ungrounded"));
    }

    #[test]
    fn test_three_of_four_grounded_conditions_warn() {
        let rule = Rule::from_yaml(
            r#"
id: mica_art16_custody
applies_if:
  all:
    - field: instrument_type
      value: art
    - field: activity
      value: public_offer
    - field: issuer_status
      value: authorised
    - field: custody_wallet
      value: cold
decision_tree:
  result: compliant
"#,
        )
        .unwrap();
        let source =
            "Issuers of asset-referenced tokens shall be authorised before a public offer.";

        let evidence = check_condition_grounding(&rule, Some(source));
        assert_eq!(evidence.label, EvidenceLabel::Warning, "{}", evidence.details);
        assert_eq!(evidence.score, 0.75);
        assert!(evidence.details.contains("3/4"));
        assert!(evidence.details.contains("custody_wallet"));
    }

    #[test]
    fn test_no_deontic_sentences_passes_obligation_check() {
        let source = "Asset-referenced tokens are crypto-assets.";
        let evidence = check_obligation_similarity(&rule(), Some(source));
        assert_eq!(evidence.label, EvidenceLabel::Pass);
        assert_eq!(evidence.score, 0.9);
    }
}
