//! Verification orchestrator: runs the requested tiers for one rule.
//!
//! Tiers run sequentially in ascending order. Tier 0 always runs. Tiers 1-3
//! compare the rule with its source text and are skipped when none is
//! available (neither supplied nor resolvable through the source lookup).
//! In fail-fast mode the run stops after the first tier that produced a
//! `fail`; evidence gathered so far is still summarized.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::aggregator::Aggregator;
use crate::config::VerificationConfig;
use crate::evidence::{ConsistencyBlock, ConsistencyEvidence, InvalidTier, Tier};
use crate::models::{EntailmentClassifier, LazyModel, SentenceEncoder};
use crate::rule::Rule;
use crate::source::SourceLookup;
use crate::tiers::schema::check_document;
use crate::tiers::{
    CheckContext, CrossRuleChecker, EntailmentChecker, LexicalChecker, SchemaChecker,
    SemanticChecker, TierCheck,
};

/// Errors that can occur during verification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error(transparent)]
    InvalidTier(#[from] InvalidTier),
}

/// Everything one verification run looks at.
#[derive(Clone, Copy)]
pub struct VerificationRequest<'a> {
    pub rule: &'a Rule,

    /// Raw document the rule was parsed from; Tier 0 checks it when present
    pub document: Option<&'a Value>,

    pub source_text: Option<&'a str>,

    pub related_rules: &'a [Rule],

    /// Tier numbers to run; the configured defaults when `None`
    pub tiers: Option<&'a [u8]>,

    /// Overrides the configured fail-fast default
    pub fail_fast: Option<bool>,
}

impl<'a> VerificationRequest<'a> {
    pub fn new(rule: &'a Rule) -> Self {
        Self {
            rule,
            document: None,
            source_text: None,
            related_rules: &[],
            tiers: None,
            fail_fast: None,
        }
    }

    pub fn document(mut self, document: &'a Value) -> Self {
        self.document = Some(document);
        self
    }

    pub fn source_text(mut self, source_text: &'a str) -> Self {
        self.source_text = Some(source_text);
        self
    }

    pub fn related_rules(mut self, related_rules: &'a [Rule]) -> Self {
        self.related_rules = related_rules;
        self
    }

    pub fn tiers(mut self, tiers: &'a [u8]) -> Self {
        self.tiers = Some(tiers);
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = Some(fail_fast);
        self
    }
}

/// Runs tier checkers and aggregates their evidence.
pub struct VerificationOrchestrator {
    config: VerificationConfig,
    aggregator: Aggregator,
    schema: SchemaChecker,
    lexical: LexicalChecker,
    semantic: SemanticChecker,
    entailment: EntailmentChecker,
    cross_rule: CrossRuleChecker,
    lookup: Option<Arc<dyn SourceLookup>>,
}

impl VerificationOrchestrator {
    /// An orchestrator using heuristic backends for Tiers 2 and 3.
    pub fn new(config: VerificationConfig) -> Self {
        Self {
            aggregator: Aggregator::from_config(&config),
            semantic: SemanticChecker::heuristic().with_bands(config.similarity),
            schema: SchemaChecker::new(),
            lexical: LexicalChecker::new(),
            entailment: EntailmentChecker::heuristic(),
            cross_rule: CrossRuleChecker::new(),
            lookup: None,
            config,
        }
    }

    pub fn with_encoder(mut self, encoder: Arc<LazyModel<dyn SentenceEncoder>>) -> Self {
        self.semantic = SemanticChecker::with_encoder(encoder).with_bands(self.config.similarity);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<LazyModel<dyn EntailmentClassifier>>) -> Self {
        self.entailment = EntailmentChecker::with_classifier(classifier);
        self
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn SourceLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    /// Verify a rule against an optional source text.
    pub fn verify_rule(
        &self,
        rule: &Rule,
        source_text: Option<&str>,
        tiers: &[u8],
        fail_fast: bool,
    ) -> Result<ConsistencyBlock, VerificationError> {
        let mut request = VerificationRequest::new(rule).tiers(tiers).fail_fast(fail_fast);
        request.source_text = source_text;
        self.verify(request)
    }

    pub fn verify(
        &self,
        request: VerificationRequest<'_>,
    ) -> Result<ConsistencyBlock, VerificationError> {
        let rule = request.rule;
        let tiers = self.resolve_tiers(request.tiers)?;
        let fail_fast = request.fail_fast.unwrap_or(self.config.fail_fast);

        let numbers: Vec<u8> = tiers.iter().map(|t| t.number()).collect();
        info!(rule_id = %rule.id, tiers = ?numbers, fail_fast, "verification started");

        let resolved = match request.source_text.filter(|s| !s.trim().is_empty()) {
            Some(text) => Some(text.to_string()),
            None => self.resolve_source(rule),
        };
        let context = CheckContext {
            rule,
            document: request.document,
            source_text: resolved.as_deref(),
            related_rules: request.related_rules,
            lookup: self.lookup.as_deref(),
        };

        let mut evidence: Vec<ConsistencyEvidence> = Vec::new();
        let mut skipped = Vec::new();
        let mut stop_reason = None;

        for tier in tiers {
            if tier.needs_source_text() && context.source().is_none() {
                debug!(rule_id = %rule.id, tier = tier.number(), "no source text, skipping tier");
                skipped.push(tier.number().to_string());
                continue;
            }

            let produced = self.checker(tier).check(&context);
            let failed = produced.iter().any(ConsistencyEvidence::is_fail);
            evidence.extend(produced);

            if fail_fast && failed {
                stop_reason = Some(format!("Tier {} ({}) failed", tier.number(), tier.name()));
                break;
            }
        }

        let mut summary = self.aggregator.summarize(&evidence, &self.config.verified_by);
        if !skipped.is_empty() {
            let note = format!("Skipped tiers {}: no source text", skipped.join(", "));
            summary.notes = Some(match summary.notes.take() {
                Some(notes) => format!("{}. {}", notes, note),
                None => note,
            });
        }

        info!(
            rule_id = %rule.id,
            status = %summary.status,
            confidence = summary.confidence,
            evidence = evidence.len(),
            stopped_early = stop_reason.is_some(),
            "verification finished"
        );

        Ok(ConsistencyBlock {
            summary,
            evidence,
            stopped_early: stop_reason.is_some(),
            stop_reason,
            overridden: false,
        })
    }

    /// Verify a raw rule document. A document that does not parse into a
    /// rule gets its Tier 0 evidence alone.
    pub fn verify_document(
        &self,
        document: &Value,
        source_text: Option<&str>,
        related_rules: &[Rule],
    ) -> Result<ConsistencyBlock, VerificationError> {
        let rule = match Rule::from_value(document) {
            Ok(rule) => rule,
            Err(e) => {
                debug!(error = %e, "document does not parse into a rule, running tier 0 only");
                let evidence = check_document(document, source_text, self.lookup.as_deref());
                let mut summary = self.aggregator.summarize(&evidence, &self.config.verified_by);
                summary.notes = Some(format!("Document is not a valid rule: {}", e));
                return Ok(ConsistencyBlock {
                    summary,
                    evidence,
                    stopped_early: false,
                    stop_reason: None,
                    overridden: false,
                });
            }
        };

        let mut request = VerificationRequest::new(&rule)
            .document(document)
            .related_rules(related_rules);
        request.source_text = source_text;
        self.verify(request)
    }

    /// Requested tiers (or the configured defaults) plus Tier 0, ascending.
    fn resolve_tiers(&self, requested: Option<&[u8]>) -> Result<BTreeSet<Tier>, VerificationError> {
        let numbers = requested.unwrap_or(&self.config.default_tiers);
        let mut tiers = BTreeSet::from([Tier::Schema]);
        for number in numbers {
            tiers.insert(Tier::try_from(*number)?);
        }
        Ok(tiers)
    }

    fn resolve_source(&self, rule: &Rule) -> Option<String> {
        let lookup = self.lookup.as_ref()?;
        let citation = rule.source.as_ref()?;
        lookup.resolve(citation).filter(|text| !text.trim().is_empty())
    }

    fn checker(&self, tier: Tier) -> &dyn TierCheck {
        match tier {
            Tier::Schema => &self.schema,
            Tier::Lexical => &self.lexical,
            Tier::Semantic => &self.semantic,
            Tier::Entailment => &self.entailment,
            Tier::CrossRule => &self.cross_rule,
        }
    }
}

impl Default for VerificationOrchestrator {
    fn default() -> Self {
        Self::new(VerificationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::ConsistencyStatus;
    use crate::source::SourceLibrary;
    use serde_json::json;

    const RULE: &str = r#"
id: mica_art36_authorisation
description: Issuers of asset-referenced tokens must be authorised before a public offer.
source:
  document_id: mica_2023
  article: "16(1)"
applies_if:
  field: instrument_type
  operator: in
  value: [art]
decision_tree:
  condition:
    field: is_authorized
    value: true
  true_branch:
    result: authorized
  false_branch:
    result: not_authorized
"#;

    fn rule() -> Rule {
        Rule::from_yaml(RULE).unwrap()
    }

    #[test]
    fn test_invalid_tier_is_error() {
        let orchestrator = VerificationOrchestrator::default();
        let err = orchestrator.verify_rule(&rule(), None, &[0, 7], false).unwrap_err();
        assert_eq!(err, VerificationError::InvalidTier(InvalidTier(7)));
    }

    #[test]
    fn test_tier_zero_always_runs() {
        let orchestrator = VerificationOrchestrator::default();
        let block = orchestrator.verify_rule(&rule(), None, &[4], false).unwrap();
        assert_eq!(block.evidence_for(Tier::Schema).count(), 6);
        assert_eq!(block.evidence_for(Tier::CrossRule).count(), 3);
    }

    #[test]
    fn test_source_tiers_skipped_without_text() {
        let orchestrator = VerificationOrchestrator::default();
        let block = orchestrator.verify_rule(&rule(), None, &[0, 1, 2, 3], false).unwrap();
        assert!(block.evidence.iter().all(|e| e.tier == Tier::Schema));
        let notes = block.summary.notes.unwrap();
        assert!(notes.contains("Skipped tiers 1, 2, 3"));
    }

    #[test]
    fn test_lookup_supplies_source_text() {
        let library = SourceLibrary::new().with_article(
            "mica_2023",
            "16(1)",
            "Issuers of asset-referenced tokens shall be authorised before a public offer.",
        );
        let orchestrator = VerificationOrchestrator::default().with_lookup(Arc::new(library));
        let block = orchestrator.verify_rule(&rule(), None, &[0, 1], false).unwrap();
        assert_eq!(block.evidence_for(Tier::Lexical).count(), 6);
    }

    #[test]
    fn test_fail_fast_stops_after_failing_tier() {
        let mut broken = rule();
        broken.effective_from = Some("2025-01-01".parse().unwrap());
        broken.effective_to = Some("2024-01-01".parse().unwrap());

        let orchestrator = VerificationOrchestrator::default();
        let block = orchestrator.verify_rule(&broken, None, &[0, 4], true).unwrap();
        assert!(block.stopped_early);
        assert_eq!(block.stop_reason.as_deref(), Some("Tier 0 (Schema & Structural) failed"));
        assert_eq!(block.evidence_for(Tier::CrossRule).count(), 0);
        assert_eq!(block.summary.status, ConsistencyStatus::Inconsistent);

        let block = orchestrator.verify_rule(&broken, None, &[0, 4], false).unwrap();
        assert!(!block.stopped_early);
        assert_eq!(block.evidence_for(Tier::CrossRule).count(), 3);
    }

    #[test]
    fn test_unparseable_document_gets_tier_zero_only() {
        let document = json!({"rule_id": "broken", "decision_tree": {"result": 3}});
        let orchestrator = VerificationOrchestrator::default();
        let block = orchestrator.verify_document(&document, Some("text"), &[]).unwrap();
        assert!(block.evidence.iter().all(|e| e.tier == Tier::Schema));
        assert_eq!(block.summary.status, ConsistencyStatus::Inconsistent);
    }

    #[test]
    fn test_request_carries_related_rules() {
        let mut other = rule();
        other.id = "mica_art36_denial".to_string();
        other.decision_tree = crate::rule::DecisionNode::leaf("denied");

        let orchestrator = VerificationOrchestrator::default();
        let main = rule();
        let related = vec![other];
        let tiers = [4];
        let request = VerificationRequest::new(&main).related_rules(&related).tiers(&tiers);
        let block = orchestrator.verify(request).unwrap();

        let contradiction = block
            .evidence
            .iter()
            .find(|e| e.category == "no_contradiction")
            .unwrap();
        assert!(contradiction.is_fail());
    }
}
