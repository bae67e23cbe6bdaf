//! Verification tiers.
//!
//! Each tier is a checker that turns a rule (and whatever context it needs)
//! into evidence:
//!
//! 0. **Schema & Structural**: is the document well-formed?
//! 1. **Lexical & Heuristic**: do modal verbs, actors, keywords, negations
//!    and exceptions in the source show up in the rule?
//! 2. **Semantic Similarity**: does the rule say what the source says?
//! 3. **Entailment**: does the source entail the rule's conclusions?
//! 4. **Cross-Rule**: does the rule contradict its neighbours?

pub mod cross_rule;
pub mod entailment;
pub mod lexical;
pub mod patterns;
pub mod schema;
pub mod semantic;

pub use cross_rule::{
    check_cross_rule_consistency, ContradictionPair, ContradictionResult, CrossRuleChecker,
    HierarchyResult, HierarchyViolation, Severity, TemporalConflict, TemporalResult,
};
pub use entailment::{check_completeness, check_entailment, EntailmentChecker, NliResult};
pub use lexical::LexicalChecker;
pub use schema::SchemaChecker;
pub use semantic::{
    check_condition_grounding, check_obligation_similarity, check_semantic_alignment,
    SemanticChecker, SimilarityLevel, SimilarityResult,
};

use serde_json::Value;

use crate::evidence::{ConsistencyEvidence, Tier};
use crate::rule::{Modality, Rule};
use crate::source::SourceLookup;
use crate::text;

/// Everything a tier may look at for one rule.
#[derive(Clone, Copy)]
pub struct CheckContext<'a> {
    pub rule: &'a Rule,

    /// Raw document the rule was parsed from, when available
    pub document: Option<&'a Value>,

    pub source_text: Option<&'a str>,

    pub related_rules: &'a [Rule],

    pub lookup: Option<&'a dyn SourceLookup>,
}

impl<'a> CheckContext<'a> {
    pub fn new(rule: &'a Rule) -> Self {
        Self {
            rule,
            document: None,
            source_text: None,
            related_rules: &[],
            lookup: None,
        }
    }

    pub fn with_document(mut self, document: &'a Value) -> Self {
        self.document = Some(document);
        self
    }

    pub fn with_source_text(mut self, source_text: &'a str) -> Self {
        self.source_text = Some(source_text);
        self
    }

    pub fn with_related_rules(mut self, related_rules: &'a [Rule]) -> Self {
        self.related_rules = related_rules;
        self
    }

    pub fn with_lookup(mut self, lookup: &'a dyn SourceLookup) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Source text, treating blank text as absent.
    pub fn source(&self) -> Option<&'a str> {
        self.source_text.filter(|s| !s.trim().is_empty())
    }
}

/// A verification tier.
pub trait TierCheck: Send + Sync {
    fn tier(&self) -> Tier;

    /// Run every check of the tier. Never fails: problems are evidence.
    fn check(&self, context: &CheckContext<'_>) -> Vec<ConsistencyEvidence>;
}

/// Outcome labels as words, e.g. `not_authorized` becomes "not authorized".
pub(crate) fn outcome_phrases(rule: &Rule) -> Vec<String> {
    rule.decision_tree
        .outcomes()
        .into_iter()
        .map(|o| text::humanize(o.trim()))
        .filter(|o| !o.is_empty())
        .collect()
}

/// What the rule asserts in prose: description, outcomes and
/// interpretation notes.
pub(crate) fn rule_statement(rule: &Rule) -> String {
    let mut parts = Vec::new();
    if let Some(description) = &rule.description {
        parts.push(description.clone());
    }
    parts.extend(outcome_phrases(rule));
    if let Some(notes) = &rule.interpretation_notes {
        parts.push(notes.chars().take(500).collect());
    }
    parts.join(" ")
}

/// The rule's declared modality, or one inferred from its outcomes and
/// obligations.
pub fn infer_modality(rule: &Rule) -> Option<Modality> {
    if let Some(modality) = rule.modality {
        return Some(modality);
    }

    let outcomes = rule.outcomes();
    let any = |needles: &[&str]| {
        outcomes
            .iter()
            .any(|o| needles.iter().any(|n| o.contains(n)))
    };

    if any(&["prohibit", "forbid", "banned"]) {
        return Some(Modality::Prohibition);
    }
    let has_obligations = !rule.obligations.is_empty()
        || rule.decision_tree.leaves().iter().any(|l| !l.obligations.is_empty());
    if has_obligations || any(&["required", "mandatory", "must", "obligat", "subject_to"]) {
        return Some(Modality::Obligation);
    }
    if any(&["permitted", "allowed", "optional", "exempt", "authorized", "authorised"]) {
        return Some(Modality::Permission);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::DecisionNode;

    #[test]
    fn test_infer_modality() {
        let rule = Rule::new("r", DecisionNode::leaf("prohibited"));
        assert_eq!(infer_modality(&rule), Some(Modality::Prohibition));

        let rule = Rule::new("r", DecisionNode::leaf("permitted"));
        assert_eq!(infer_modality(&rule), Some(Modality::Permission));

        let mut rule = Rule::new("r", DecisionNode::leaf("permitted"));
        rule.modality = Some(Modality::Obligation);
        assert_eq!(infer_modality(&rule), Some(Modality::Obligation));

        let rule = Rule::new("r", DecisionNode::leaf("unknown"));
        assert_eq!(infer_modality(&rule), None);
    }

    #[test]
    fn test_rule_statement_humanizes_outcomes() {
        let mut rule = Rule::new("r", DecisionNode::leaf("not_authorized"));
        rule.description = Some("Issuers must be authorised.".to_string());
        assert_eq!(rule_statement(&rule), "Issuers must be authorised. not authorized");
    }
}
