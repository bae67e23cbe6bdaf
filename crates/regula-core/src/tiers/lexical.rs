//! Tier 1: Lexical & Heuristic checks.
//!
//! Compares the surface of the source text (modal verbs, named actors and
//! instruments, vocabulary, negations, exception clauses) with the rule's
//! logic. Regex and lexicon driven, fully deterministic.

use std::collections::HashSet;

use serde_json::Value;

use super::patterns::{self, PROHIBITION_MARKERS};
use super::{infer_modality, rule_statement, CheckContext, TierCheck};
use crate::evidence::{ConsistencyEvidence, EvidenceBuilder, Tier};
use crate::rule::{Condition, FieldCondition, Operator, Rule};
use crate::text;

const TIER: Tier = Tier::Lexical;

/// Outcomes that show a rule models an exception.
const EXEMPTION_OUTCOMES: &[&str] = &["exempt", "not_applicable", "excluded", "out_of_scope"];

/// The Tier 1 checker.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalChecker;

impl LexicalChecker {
    pub fn new() -> Self {
        Self
    }

    /// Run every lexical check against a source text.
    pub fn check_all(&self, rule: &Rule, source_text: &str) -> Vec<ConsistencyEvidence> {
        vec![
            check_deontic_alignment(rule, source_text),
            check_actor_mentioned(rule, source_text),
            check_instrument_mentioned(rule, source_text),
            check_keyword_overlap(rule, source_text),
            check_negation_consistency(rule, source_text),
            check_exception_coverage(rule, source_text),
        ]
    }
}

impl TierCheck for LexicalChecker {
    fn tier(&self) -> Tier {
        TIER
    }

    fn check(&self, context: &CheckContext<'_>) -> Vec<ConsistencyEvidence> {
        match context.source() {
            Some(source) => self.check_all(context.rule, source),
            None => Vec::new(),
        }
    }
}

/// Modal markers in the source against the rule's modality.
///
/// Match passes; a different modality is a warning; a prohibition facing
/// an obligation or permission (or the reverse) fails.
pub fn check_deontic_alignment(rule: &Rule, source_text: &str) -> ConsistencyEvidence {
    let builder = EvidenceBuilder::new(TIER, "deontic_alignment").rule_element("modality");
    let counts = patterns::modal_counts(source_text);

    let Some(found) = counts.dominant() else {
        return builder
            .warning(0.5)
            .details("No deontic markers found in source text")
            .build();
    };
    let span = first_sentence_matching(source_text, |s| patterns::DEONTIC_MARKERS.is_match(s))
        .or_else(|| first_sentence_matching(source_text, |s| PROHIBITION_MARKERS.is_match(s)));

    let Some(expected) = infer_modality(rule) else {
        return builder
            .warning(0.5)
            .details(format!(
                "Rule modality undetermined; source reads as {:?}",
                found
            ))
            .source_span(span.unwrap_or_default())
            .build();
    };

    let builder = builder.source_span(span.unwrap_or_default());
    if found == expected {
        builder
            .pass(1.0)
            .details(format!("Source modality {:?} matches rule", found))
            .build()
    } else if counts.count(expected) > 0 {
        builder
            .warning(0.5)
            .details(format!(
                "Source mixes modalities: mostly {:?}, rule is {:?}",
                found, expected
            ))
            .build()
    } else if found.is_reversed(expected) {
        builder
            .fail(0.0)
            .details(format!(
                "Polarity reversed: source expresses {:?}, rule encodes {:?}",
                found, expected
            ))
            .build()
    } else {
        builder
            .warning(0.5)
            .details(format!(
                "Modality mismatch: source expresses {:?}, rule encodes {:?}",
                found, expected
            ))
            .build()
    }
}

/// Actor types the rule constrains should be named in the source.
pub fn check_actor_mentioned(rule: &Rule, source_text: &str) -> ConsistencyEvidence {
    check_types_mentioned(rule, source_text, "actor_mentioned", "actor", |field| {
        patterns::ACTOR_FIELD.is_match(field)
    })
}

/// Instrument types the rule constrains should be named in the source.
pub fn check_instrument_mentioned(rule: &Rule, source_text: &str) -> ConsistencyEvidence {
    check_types_mentioned(rule, source_text, "instrument_mentioned", "instrument", |field| {
        patterns::INSTRUMENT_FIELD.is_match(field)
    })
}

fn check_types_mentioned(
    rule: &Rule,
    source_text: &str,
    category: &str,
    kind: &str,
    is_relevant: impl Fn(&str) -> bool,
) -> ConsistencyEvidence {
    let builder = EvidenceBuilder::new(TIER, category).rule_element("applies_if");

    let mut codes: Vec<String> = Vec::new();
    for leaf in all_leaves(rule) {
        if !is_relevant(&leaf.field) {
            continue;
        }
        for code in type_codes(leaf) {
            if !codes.contains(&code) {
                codes.push(code);
            }
        }
    }

    if codes.is_empty() {
        return builder
            .pass(1.0)
            .details(format!("Rule does not constrain {} types", kind))
            .build();
    }

    let lower = source_text.to_lowercase();
    let (found, missing): (Vec<&String>, Vec<&String>) =
        codes.iter().partition(|code| patterns::mentions_type(&lower, code));

    if found.is_empty() {
        return builder
            .warning(0.5)
            .details(format!(
                "No {} type of the rule is mentioned in source: {}",
                kind,
                join(&missing)
            ))
            .build();
    }

    let ratio = found.len() as f64 / codes.len() as f64;
    let mut details = format!("{} type(s) mentioned in source: {}", capitalize(kind), join(&found));
    if !missing.is_empty() {
        details.push_str(&format!("; not mentioned: {}", join(&missing)));
    }
    builder.pass(0.5 + 0.5 * ratio).details(details).build()
}

/// Share of the rule's own terms that occur verbatim in the source.
pub fn check_keyword_overlap(rule: &Rule, source_text: &str) -> ConsistencyEvidence {
    let builder =
        EvidenceBuilder::new(TIER, "keyword_overlap").rule_element("description, decision_tree");

    let mut rule_terms = text::stem_set(&rule_statement(rule));
    for leaf in all_leaves(rule) {
        rule_terms.extend(leaf_terms(leaf));
    }
    if rule_terms.is_empty() {
        return builder
            .warning(0.5)
            .details("No terms extracted from rule")
            .build();
    }

    let source_terms = text::stem_set(source_text);
    let mut missing: Vec<&String> = rule_terms
        .iter()
        .filter(|t| !source_terms.contains(*t))
        .collect();
    missing.sort();
    let matched = rule_terms.len() - missing.len();
    let ratio = matched as f64 / rule_terms.len() as f64;

    let mut details = format!(
        "Keyword overlap {:.2} ({}/{} rule terms in source)",
        ratio,
        matched,
        rule_terms.len()
    );
    if !missing.is_empty() {
        let shown: Vec<&str> = missing.iter().take(5).map(|t| t.as_str()).collect();
        details.push_str(&format!("; missing: {}", shown.join(", ")));
    }

    let builder = if ratio >= 0.5 {
        builder.pass(ratio)
    } else {
        builder.warning(ratio)
    };
    builder.details(details).build()
}

/// Terms the source negates must be negated in the applicability logic.
pub fn check_negation_consistency(rule: &Rule, source_text: &str) -> ConsistencyEvidence {
    let builder = EvidenceBuilder::new(TIER, "negation_consistency").rule_element("applies_if");

    // "shall not" and friends are modality, covered by deontic_alignment.
    let masked = PROHIBITION_MARKERS.replace_all(source_text, " ");
    let negated = patterns::negated_terms(&masked);
    if negated.is_empty() {
        return builder.pass(1.0).details("No negations in source text").build();
    }

    let leaves = rule
        .applies_if
        .as_ref()
        .map(Condition::leaves_with_polarity)
        .unwrap_or_default();

    let mut bound = 0;
    let mut conflicts = Vec::new();
    for (term, span) in &negated {
        let stemmed = text::stem(term);
        let matching: Vec<&(&FieldCondition, bool)> = leaves
            .iter()
            .filter(|(leaf, _)| leaf_terms(leaf).contains(&stemmed))
            .collect();
        if matching.is_empty() {
            continue;
        }
        bound += 1;
        if !matching.iter().any(|(_, negative)| *negative) {
            conflicts.push((span.clone(), matching[0].0.to_string()));
        }
    }

    if let Some((span, _)) = conflicts.first() {
        let listed: Vec<String> = conflicts
            .iter()
            .map(|(span, leaf)| format!("'{}' vs '{}'", span.trim(), leaf))
            .collect();
        return builder
            .fail(0.0)
            .details(format!(
                "Source negates what the rule requires positively: {}",
                listed.join("; ")
            ))
            .source_span(span)
            .build();
    }

    if bound == 0 {
        builder
            .pass(1.0)
            .details(format!(
                "{} negation(s) in source, none bound to applicability conditions",
                negated.len()
            ))
            .build()
    } else {
        builder
            .pass(1.0)
            .details(format!("{} negated term(s) agree with rule polarity", bound))
            .build()
    }
}

/// Exception clauses in the source should surface as decision branches.
pub fn check_exception_coverage(rule: &Rule, source_text: &str) -> ConsistencyEvidence {
    let builder = EvidenceBuilder::new(TIER, "exception_coverage").rule_element("decision_tree");

    let clauses = patterns::exception_clauses(source_text);
    if clauses.is_empty() {
        return builder.pass(1.0).details("No exception clauses in source text").build();
    }

    let has_exemption_outcome = rule
        .outcomes()
        .iter()
        .any(|o| EXEMPTION_OUTCOMES.iter().any(|e| o.contains(e)));

    let mut branch_terms: HashSet<String> = HashSet::new();
    for branch in rule.decision_tree.branches() {
        for leaf in branch.condition.leaves() {
            branch_terms.extend(leaf_terms(leaf));
        }
    }
    if let Some(applies_if) = &rule.applies_if {
        for (leaf, negative) in applies_if.leaves_with_polarity() {
            if negative {
                branch_terms.extend(leaf_terms(leaf));
            }
        }
    }

    let uncovered: Vec<&String> = clauses
        .iter()
        .filter(|clause| {
            !has_exemption_outcome && text::stem_set(clause).is_disjoint(&branch_terms)
        })
        .collect();

    if uncovered.is_empty() {
        return builder
            .pass(1.0)
            .details(format!("{} exception clause(s) mapped to decision branches", clauses.len()))
            .build();
    }

    let ratio = (clauses.len() - uncovered.len()) as f64 / clauses.len() as f64;
    builder
        .warning(ratio)
        .details(format!(
            "{}/{} exception clause(s) not reflected in decision tree",
            uncovered.len(),
            clauses.len()
        ))
        .source_span(uncovered[0])
        .build()
}

fn all_leaves(rule: &Rule) -> Vec<&FieldCondition> {
    let mut leaves = Vec::new();
    if let Some(applies_if) = &rule.applies_if {
        leaves.extend(applies_if.leaves());
    }
    for branch in rule.decision_tree.branches() {
        leaves.extend(branch.condition.leaves());
    }
    leaves
}

/// Stemmed words of a leaf's field name and string values.
fn leaf_terms(leaf: &FieldCondition) -> HashSet<String> {
    let mut terms = text::stem_set(&leaf.field);
    for value in string_values(&leaf.value) {
        terms.extend(text::stem_set(value));
    }
    terms
}

/// Type codes a leaf constrains to: its string values, or `x` for a
/// boolean `is_x == true`.
fn type_codes(leaf: &FieldCondition) -> Vec<String> {
    if leaf.operator == Operator::Eq && leaf.value == Value::Bool(true) {
        let name = leaf.field.rsplit('.').next().unwrap_or(&leaf.field);
        let name = name.strip_prefix("is_").unwrap_or(name);
        return vec![name.to_lowercase()];
    }
    if leaf.is_negative() {
        return Vec::new();
    }
    string_values(&leaf.value)
        .into_iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn string_values(value: &Value) -> Vec<&str> {
    match value {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn first_sentence_matching(text: &str, pred: impl Fn(&str) -> bool) -> Option<String> {
    text::split_sentences(text).into_iter().find(|s| pred(s))
}

fn join(items: &[&String]) -> String {
    items.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::EvidenceLabel;
    use crate::rule::Modality;

    const ART_RULE: &str = r#"
id: mica_art36_authorization
description: Issuers of asset-referenced tokens must be authorised before a public offer.
modality: obligation
applies_if:
  all:
    - field: instrument_type
      operator: in
      value: [art, stablecoin]
    - field: activity
      value: public_offer
decision_tree:
  condition:
    field: is_credit_institution
    value: true
  true_branch:
    result: exempt
  false_branch:
    condition:
      field: authorized
      value: true
    true_branch:
      result: authorized
    false_branch:
      result: not_authorized
"#;

    const ART_SOURCE: &str = "No person shall make a public offer of an asset-referenced token \
        unless that person is the issuer. Issuers shall be authorised by the competent authority. \
        This requirement does not apply to credit institutions.";

    fn art_rule() -> Rule {
        Rule::from_yaml(ART_RULE).unwrap()
    }

    #[test]
    fn test_shall_matches_obligation_rule() {
        let evidence = check_deontic_alignment(&art_rule(), "Issuers shall be authorised.");
        assert_eq!(evidence.label, EvidenceLabel::Pass);
        assert_eq!(evidence.score, 1.0);
    }

    #[test]
    fn test_may_for_obligation_rule_is_warning() {
        let evidence = check_deontic_alignment(&art_rule(), "Issuers may apply for authorisation.");
        assert_eq!(evidence.label, EvidenceLabel::Warning);
    }

    #[test]
    fn test_prohibition_against_obligation_fails() {
        let source = "Issuers are prohibited from offering tokens.";
        let evidence = check_deontic_alignment(&art_rule(), source);
        assert_eq!(evidence.label, EvidenceLabel::Fail);
        assert_eq!(evidence.score, 0.0);
    }

    #[test]
    fn test_no_markers_is_warning() {
        let source = "Asset-referenced tokens are crypto-assets.";
        let evidence = check_deontic_alignment(&art_rule(), source);
        assert_eq!(evidence.label, EvidenceLabel::Warning);
        assert_eq!(evidence.score, 0.5);
    }

    #[test]
    fn test_permission_rule_against_prohibition_source() {
        let mut rule = art_rule();
        rule.modality = Some(Modality::Permission);
        let evidence = check_deontic_alignment(&rule, "Such offers are forbidden.");
        assert!(evidence.is_fail());
    }

    #[test]
    fn test_types_mentioned() {
        let rule = art_rule();
        let instrument = check_instrument_mentioned(&rule, ART_SOURCE);
        assert_eq!(instrument.label, EvidenceLabel::Pass);
        assert_eq!(instrument.score, 1.0);

        let actor = check_actor_mentioned(&rule, ART_SOURCE);
        assert_eq!(actor.label, EvidenceLabel::Pass);

        // Absence is only ever a warning.
        let absent = check_instrument_mentioned(&rule, "Service providers shall keep records.");
        assert_eq!(absent.label, EvidenceLabel::Warning);
    }

    #[test]
    fn test_keyword_overlap_ratio() {
        let rule = art_rule();
        let high = check_keyword_overlap(&rule, ART_SOURCE);
        assert_eq!(high.label, EvidenceLabel::Pass);
        assert!(high.score >= 0.5);

        let low = check_keyword_overlap(&rule, "Market abuse rules cover insider dealing.");
        assert_eq!(low.label, EvidenceLabel::Warning);
        assert!(low.score < 0.5);
    }

    #[test]
    fn test_negation_disagreement_fails() {
        let mut rule = art_rule();
        let source = "Offerors that are not authorised must stop.";
        let authorized = |value: bool| Condition::field("authorized", Operator::Eq, value.into());

        rule.applies_if = Some(authorized(true));
        let evidence = check_negation_consistency(&rule, source);
        assert!(evidence.is_fail());

        rule.applies_if = Some(authorized(false));
        let evidence = check_negation_consistency(&rule, source);
        assert_eq!(evidence.label, EvidenceLabel::Pass);
    }

    #[test]
    fn test_prohibition_phrasing_is_not_a_negated_term() {
        let evidence = check_negation_consistency(&art_rule(), "Issuers shall not offer tokens.");
        assert_eq!(evidence.label, EvidenceLabel::Pass);
    }

    #[test]
    fn test_exception_coverage() {
        let covered = check_exception_coverage(&art_rule(), ART_SOURCE);
        assert_eq!(covered.label, EvidenceLabel::Pass);

        let rule = Rule::from_yaml(
            r#"
id: simple
decision_tree:
  condition: {field: authorized, value: true}
  true_branch: {result: authorized}
  false_branch: {result: not_authorized}
"#,
        )
        .unwrap();
        let source = "Issuers shall publish a white paper, \
            except for small offerings below EUR 1 million.";
        let uncovered = check_exception_coverage(&rule, source);
        assert_eq!(uncovered.label, EvidenceLabel::Warning);
        assert!(uncovered.source_span.is_some());
    }

    #[test]
    fn test_check_all_emits_six_items() {
        let evidence = LexicalChecker::new().check_all(&art_rule(), ART_SOURCE);
        assert_eq!(evidence.len(), 6);
        assert!(evidence.iter().all(|e| e.tier == Tier::Lexical));
    }
}
