//! Tier 4: Cross-Rule consistency.
//!
//! Deterministic checks of a rule against related rules:
//!
//! - **Contradiction**: opposed outcomes under overlapping applicability.
//! - **Hierarchy**: opposed outcomes between rules of different
//!   specificity, where the more specific rule should take precedence.
//! - **Temporal**: opposed outcomes in force during the same period.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{CheckContext, TierCheck};
use crate::evaluator::values_equal;
use crate::evidence::{ConsistencyEvidence, EvidenceBuilder, Tier};
use crate::rule::{Condition, FieldCondition, Operator, Rule};

const TIER: Tier = Tier::CrossRule;

/// Outcome pairs that cannot both hold for the same scenario, in either
/// order.
pub const CONTRADICTING_OUTCOMES: &[(&str, &str)] = &[
    ("permitted", "prohibited"),
    ("required", "forbidden"),
    ("authorized", "denied"),
    ("compliant", "non_compliant"),
    ("exempt", "subject_to"),
    ("allowed", "forbidden"),
    ("mandatory", "optional"),
];

pub fn are_contradicting(a: &str, b: &str) -> bool {
    CONTRADICTING_OUTCOMES
        .iter()
        .any(|(x, y)| (*x == a && *y == b) || (*x == b && *y == a))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContradictionPair {
    pub rule1_id: String,
    pub rule1_outcome: String,
    pub rule2_id: String,
    pub rule2_outcome: String,
    pub conditions_overlap: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContradictionResult {
    pub has_contradiction: bool,
    pub contradicting_rule_ids: Vec<String>,
    pub pairs: Vec<ContradictionPair>,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyViolation {
    pub more_specific_rule: String,
    pub less_specific_rule: String,
    pub more_specific_score: usize,
    pub less_specific_score: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyResult {
    pub is_consistent: bool,
    pub specificity_scores: BTreeMap<String, usize>,
    pub violations: Vec<HierarchyViolation>,
}

/// Two conflicting rules in force at once. `None` bounds are unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalConflict {
    pub rule1_id: String,
    pub rule2_id: String,
    pub overlap_start: Option<NaiveDate>,
    pub overlap_end: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalResult {
    pub is_consistent: bool,
    pub overlapping_conflicts: Vec<TemporalConflict>,
}

/// The Tier 4 checker. Stateless; related rules are passed per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossRuleChecker;

impl CrossRuleChecker {
    pub fn new() -> Self {
        Self
    }

    /// Always three items: contradiction, hierarchy, temporal.
    pub fn check_all(&self, rule: &Rule, related: &[Rule]) -> Vec<ConsistencyEvidence> {
        vec![
            self.check_contradiction(rule, related),
            self.check_hierarchy(rule, related),
            self.check_temporal_consistency(rule, related),
        ]
    }

    pub fn find_contradictions(&self, rule: &Rule, related: &[Rule]) -> ContradictionResult {
        let outcomes = rule.outcomes();
        let mut pairs = Vec::new();
        let mut ids: Vec<String> = Vec::new();

        for other in others(rule, related) {
            let overlap = conditions_overlap(rule, other);
            for (mine, theirs) in opposed_outcomes(&outcomes, &other.outcomes()) {
                pairs.push(ContradictionPair {
                    rule1_id: rule.id.clone(),
                    rule1_outcome: mine,
                    rule2_id: other.id.clone(),
                    rule2_outcome: theirs,
                    conditions_overlap: overlap,
                });
                if !ids.contains(&other.id) {
                    ids.push(other.id.clone());
                }
            }
        }

        let severity = if pairs.is_empty() {
            Severity::None
        } else if pairs.iter().any(|p| p.conditions_overlap) {
            Severity::High
        } else {
            Severity::Low
        };
        ContradictionResult {
            has_contradiction: !pairs.is_empty(),
            contradicting_rule_ids: ids,
            pairs,
            severity,
        }
    }

    pub fn check_contradiction(&self, rule: &Rule, related: &[Rule]) -> ConsistencyEvidence {
        let builder = EvidenceBuilder::new(TIER, "no_contradiction").rule_element("decision_tree");
        if related.is_empty() {
            return builder
                .pass(1.0)
                .details("No related rules provided for comparison")
                .build();
        }

        let result = self.find_contradictions(rule, related);
        let ids = result.contradicting_rule_ids.join(", ");
        let builder = match result.severity {
            Severity::None => builder
                .pass(1.0)
                .details("No contradicting outcomes found with related rules"),
            Severity::High => builder.fail(0.2).details(format!(
                "Found {} contradiction(s) with overlapping conditions. Conflicting rules: {}",
                result.pairs.len(),
                ids
            )),
            Severity::Low | Severity::Medium => builder.warning(0.7).details(format!(
                "Found {} potential contradiction(s) but conditions appear disjoint. Rules: {}",
                result.pairs.len(),
                ids
            )),
        };
        builder.build()
    }

    pub fn analyze_hierarchy(&self, rule: &Rule, related: &[Rule]) -> HierarchyResult {
        let own = specificity(rule);
        let mut scores = BTreeMap::new();
        scores.insert(rule.id.clone(), own);
        let outcomes = rule.outcomes();

        let mut violations = Vec::new();
        for other in others(rule, related) {
            let theirs = specificity(other);
            scores.insert(other.id.clone(), theirs);

            let conflict = !opposed_outcomes(&outcomes, &other.outcomes()).is_empty();
            if !conflict || own == theirs || !conditions_overlap(rule, other) {
                continue;
            }
            let (more, less) = if own > theirs { (rule, other) } else { (other, rule) };
            violations.push(HierarchyViolation {
                more_specific_rule: more.id.clone(),
                less_specific_rule: less.id.clone(),
                more_specific_score: own.max(theirs),
                less_specific_score: own.min(theirs),
            });
        }

        HierarchyResult {
            is_consistent: violations.is_empty(),
            specificity_scores: scores,
            violations,
        }
    }

    pub fn check_hierarchy(&self, rule: &Rule, related: &[Rule]) -> ConsistencyEvidence {
        let builder = EvidenceBuilder::new(TIER, "hierarchy_consistent")
            .rule_element("applies_if,decision_tree");
        if related.is_empty() {
            return builder
                .pass(1.0)
                .details("No related rules provided for hierarchy comparison")
                .build();
        }

        let result = self.analyze_hierarchy(rule, related);
        let own = result.specificity_scores.get(&rule.id).copied().unwrap_or_default();
        if result.is_consistent {
            return builder
                .pass(1.0)
                .details(format!(
                    "Rule specificity score: {}. No lex specialis violations found",
                    own
                ))
                .build();
        }

        let listed: Vec<String> = result
            .violations
            .iter()
            .map(|v| {
                format!(
                    "{} ({}) over {} ({})",
                    v.more_specific_rule,
                    v.more_specific_score,
                    v.less_specific_rule,
                    v.less_specific_score
                )
            })
            .collect();
        builder
            .warning(0.6)
            .details(format!(
                "Found {} hierarchy violation(s); the more specific rule should take \
                 precedence: {}",
                result.violations.len(),
                listed.join("; ")
            ))
            .build()
    }

    pub fn analyze_temporal(&self, rule: &Rule, related: &[Rule]) -> TemporalResult {
        let outcomes = rule.outcomes();
        let mut conflicts = Vec::new();

        for other in others(rule, related) {
            if opposed_outcomes(&outcomes, &other.outcomes()).is_empty() {
                continue;
            }
            let overlap = periods_overlap(
                (rule.effective_from, rule.effective_to),
                (other.effective_from, other.effective_to),
            );
            if let Some((start, end)) = overlap {
                conflicts.push(TemporalConflict {
                    rule1_id: rule.id.clone(),
                    rule2_id: other.id.clone(),
                    overlap_start: start,
                    overlap_end: end,
                });
            }
        }

        TemporalResult {
            is_consistent: conflicts.is_empty(),
            overlapping_conflicts: conflicts,
        }
    }

    pub fn check_temporal_consistency(&self, rule: &Rule, related: &[Rule]) -> ConsistencyEvidence {
        let builder = EvidenceBuilder::new(TIER, "temporal_consistent")
            .rule_element("effective_from,effective_to");
        if related.is_empty() {
            return builder
                .pass(1.0)
                .details("No related rules provided for temporal comparison")
                .build();
        }

        let result = self.analyze_temporal(rule, related);
        if result.is_consistent {
            let bound = |d: Option<NaiveDate>| {
                d.map_or_else(|| "unbounded".to_string(), |d| d.to_string())
            };
            return builder
                .pass(1.0)
                .details(format!(
                    "Rule validity: {} to {}. No temporal conflicts found",
                    bound(rule.effective_from),
                    bound(rule.effective_to)
                ))
                .build();
        }

        let ids: Vec<&str> = result
            .overlapping_conflicts
            .iter()
            .map(|c| c.rule2_id.as_str())
            .collect();
        builder
            .warning(0.5)
            .details(format!(
                "Found {} temporal conflict(s). Conflicting rules active in same period: {}",
                ids.len(),
                ids.join(", ")
            ))
            .build()
    }
}

impl TierCheck for CrossRuleChecker {
    fn tier(&self) -> Tier {
        TIER
    }

    fn check(&self, context: &CheckContext<'_>) -> Vec<ConsistencyEvidence> {
        self.check_all(context.rule, context.related_rules)
    }
}

/// Run the three Tier 4 checks.
pub fn check_cross_rule_consistency(rule: &Rule, related: &[Rule]) -> Vec<ConsistencyEvidence> {
    CrossRuleChecker.check_all(rule, related)
}

/// Structural specificity: applicability leaves plus decision-tree nodes.
pub fn specificity(rule: &Rule) -> usize {
    rule.applies_if.as_ref().map_or(0, Condition::leaf_count) + rule.decision_tree.node_count()
}

/// Whether two rules could apply to the same scenario.
///
/// Conservative: only reports disjoint when the rules test no common field,
/// or when a common field is pinned by top-level `==`/`in` constraints to
/// value sets that share nothing.
pub fn conditions_overlap(a: &Rule, b: &Rule) -> bool {
    let (Some(left), Some(right)) = (&a.applies_if, &b.applies_if) else {
        return true;
    };

    let left_fields = left.fields();
    let right_fields = right.fields();
    if left_fields.is_disjoint(&right_fields) {
        return false;
    }

    let left_pins = pinned_values(left);
    let right_pins = pinned_values(right);
    for field in left_fields.intersection(&right_fields) {
        if let (Some(l), Some(r)) = (left_pins.get(field), right_pins.get(field)) {
            if !l.iter().any(|x| r.iter().any(|y| values_equal(x, y))) {
                return false;
            }
        }
    }
    true
}

/// Intersection of two validity periods, `None` when they do not meet.
/// Missing bounds are unbounded; the returned bounds are `None` where both
/// inputs were unbounded.
pub fn periods_overlap(
    a: (Option<NaiveDate>, Option<NaiveDate>),
    b: (Option<NaiveDate>, Option<NaiveDate>),
) -> Option<(Option<NaiveDate>, Option<NaiveDate>)> {
    let start = match (a.0, b.0) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    };
    let end = match (a.1, b.1) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, y) => x.or(y),
    };
    match (start, end) {
        (Some(s), Some(e)) if s > e => None,
        _ => Some((start, end)),
    }
}

fn others<'r>(rule: &'r Rule, related: &'r [Rule]) -> impl Iterator<Item = &'r Rule> {
    related.iter().filter(move |other| other.id != rule.id)
}

fn opposed_outcomes(mine: &[String], theirs: &[String]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for a in mine {
        for b in theirs {
            if are_contradicting(a, b) && !out.contains(&(a.clone(), b.clone())) {
                out.push((a.clone(), b.clone()));
            }
        }
    }
    out
}

/// Values each field is restricted to by top-level `==` / `in` leaves.
fn pinned_values(condition: &Condition) -> HashMap<&str, Vec<&Value>> {
    let top_level: Vec<&FieldCondition> = match condition {
        Condition::Field(leaf) => vec![leaf],
        Condition::All(items) => items
            .iter()
            .filter_map(|item| match item {
                Condition::Field(leaf) => Some(leaf),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    let mut pins: HashMap<&str, Vec<&Value>> = HashMap::new();
    for leaf in top_level {
        let allowed: Vec<&Value> = match (leaf.operator, &leaf.value) {
            (Operator::Eq, value) => vec![value],
            (Operator::In, Value::Array(items)) => items.iter().collect(),
            _ => continue,
        };
        match pins.entry(leaf.field.as_str()) {
            Entry::Occupied(mut entry) => entry
                .get_mut()
                .retain(|x| allowed.iter().any(|y| values_equal(x, y))),
            Entry::Vacant(entry) => {
                entry.insert(allowed);
            }
        }
    }
    pins
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::EvidenceLabel;
    use crate::rule::DecisionNode;
    use serde_json::json;

    fn rule(id: &str, outcome: &str, applies_if: Option<Condition>) -> Rule {
        let mut rule = Rule::new(id, DecisionNode::leaf(outcome));
        rule.applies_if = applies_if;
        rule
    }

    fn instrument(value: Value) -> Option<Condition> {
        let operator = if value.is_array() { Operator::In } else { Operator::Eq };
        Some(Condition::field("instrument_type", operator, value))
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_no_related_rules_pass() {
        let evidence = check_cross_rule_consistency(&rule("a", "permitted", None), &[]);
        assert_eq!(evidence.len(), 3);
        assert!(evidence.iter().all(|e| e.label == EvidenceLabel::Pass && e.score == 1.0));
    }

    #[test]
    fn test_overlapping_contradiction_fails() {
        let a = rule("a", "permitted", None);
        let b = rule("b", "prohibited", None);
        let evidence = CrossRuleChecker.check_contradiction(&a, &[b]);
        assert_eq!(evidence.label, EvidenceLabel::Fail);
        assert_eq!(evidence.score, 0.2);
        assert!(evidence.details.contains('b'));
    }

    #[test]
    fn test_disjoint_contradiction_warns() {
        let a = rule("a", "permitted", instrument(json!("art")));
        let b = rule("b", "prohibited", instrument(json!(["emt", "utility_token"])));
        let result = CrossRuleChecker.find_contradictions(&a, std::slice::from_ref(&b));
        assert_eq!(result.severity, Severity::Low);
        assert!(!result.pairs[0].conditions_overlap);

        let evidence = CrossRuleChecker.check_contradiction(&a, &[b]);
        assert_eq!(evidence.label, EvidenceLabel::Warning);
        assert_eq!(evidence.score, 0.7);
    }

    #[test]
    fn test_self_is_skipped() {
        let a = rule("a", "permitted", None);
        let twin = rule("a", "prohibited", None);
        let result = CrossRuleChecker.find_contradictions(&a, &[a.clone(), twin]);
        assert!(!result.has_contradiction);
    }

    #[test]
    fn test_contradiction_is_symmetric() {
        let a = rule("a", "compliant", instrument(json!(["art", "emt"])));
        let b = rule("b", "non_compliant", instrument(json!("emt")));
        let ab = CrossRuleChecker.find_contradictions(&a, std::slice::from_ref(&b));
        let ba = CrossRuleChecker.find_contradictions(&b, std::slice::from_ref(&a));
        assert_eq!(ab.severity, ba.severity);
        assert_eq!(ab.severity, Severity::High);
    }

    #[test]
    fn test_overlap_heuristic() {
        let unconditional = rule("u", "permitted", None);
        let art = rule("a", "permitted", instrument(json!("art")));
        let custody = Condition::field("activity", Operator::Eq, json!("custody"));
        let other_field = rule("o", "permitted", Some(custody));
        let not_art = Condition::field("instrument_type", Operator::Ne, json!("art"));
        let range = rule("r", "permitted", Some(not_art));

        assert!(conditions_overlap(&unconditional, &art));
        assert!(!conditions_overlap(&art, &other_field));
        // A `!=` constraint is not pinned, so overlap is assumed.
        assert!(conditions_overlap(&art, &range));
    }

    #[test]
    fn test_hierarchy_flags_conflicting_specificity() {
        let general = rule("general", "permitted", None);
        let mut specific = rule(
            "specific",
            "prohibited",
            Some(Condition::All(vec![
                Condition::field("instrument_type", Operator::Eq, json!("art")),
                Condition::field("is_credit_institution", Operator::Eq, json!(false)),
            ])),
        );
        specific.decision_tree = DecisionNode::branch(
            "root",
            Condition::field("whitepaper_published", Operator::Eq, json!(true)),
            DecisionNode::leaf("permitted"),
            DecisionNode::leaf("prohibited"),
        );

        let result = CrossRuleChecker.analyze_hierarchy(&general, std::slice::from_ref(&specific));
        assert_eq!(result.specificity_scores["general"], 1);
        assert_eq!(result.specificity_scores["specific"], 5);
        assert_eq!(result.violations[0].more_specific_rule, "specific");

        let evidence = CrossRuleChecker.check_hierarchy(&general, &[specific]);
        assert_eq!(evidence.label, EvidenceLabel::Warning);
        assert_eq!(evidence.score, 0.6);
    }

    #[test]
    fn test_temporal_conflicts() {
        let mut a = rule("a", "authorized", None);
        let mut b = rule("b", "denied", None);
        let evidence = CrossRuleChecker.check_temporal_consistency(&a, std::slice::from_ref(&b));
        assert_eq!(evidence.score, 0.5);

        a.effective_to = Some(date("2024-06-30"));
        b.effective_from = Some(date("2024-07-01"));
        let evidence = CrossRuleChecker.check_temporal_consistency(&a, std::slice::from_ref(&b));
        assert_eq!(evidence.label, EvidenceLabel::Pass);

        b.effective_from = Some(date("2024-06-30"));
        let result = CrossRuleChecker.analyze_temporal(&a, &[b]);
        assert_eq!(result.overlapping_conflicts[0].overlap_start, Some(date("2024-06-30")));
        assert_eq!(result.overlapping_conflicts[0].overlap_end, Some(date("2024-06-30")));
    }

    #[test]
    fn test_periods_overlap() {
        assert_eq!(periods_overlap((None, None), (None, None)), Some((None, None)));
        let from_2025 = (Some(date("2025-01-01")), None);
        let until_2024 = (None, Some(date("2024-12-31")));
        assert!(periods_overlap(from_2025, until_2024).is_none());
    }
}
