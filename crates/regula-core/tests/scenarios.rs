//! End-to-end scenarios: decide with the engine, then verify the same rules.

use std::sync::Arc;

use regula_core::{
    check_rule_drift, ConsistencyStatus, DecisionEngine, DriftType, EvidenceLabel, Facts, Rule,
    SourceLibrary, SourceLookup, Tier, VerificationOrchestrator, VerificationRequest,
};
use serde_json::{json, Value};

const AUTHORISATION_RULE: &str = r#"
id: mica_art16_authorisation
description: Issuers of asset-referenced tokens must be authorised before a public offer.
modality: obligation
source:
  document_id: mica_2023
  article: "16(1)"
applies_if:
  all:
    - field: instrument_type
      operator: in
      value: [art, stablecoin]
    - field: activity
      value: public_offer
decision_tree:
  node_id: check_credit_institution
  condition:
    field: is_credit_institution
    value: true
  true_branch:
    result: exempt
    notes: Credit institutions follow Article 17.
  false_branch:
    node_id: check_authorisation
    condition:
      field: authorized
      value: true
    true_branch:
      result: authorized
      obligations:
        - id: publish_whitepaper
          description: Publish a crypto-asset white paper
    false_branch:
      result: not_authorized
"#;

const ARTICLE_16: &str = "No person shall make a public offer of an asset-referenced token \
    unless that person is the issuer of that token. Issuers shall be authorised by the \
    competent authority. This requirement does not apply to credit institutions.";

fn rule() -> Rule {
    Rule::from_yaml(AUTHORISATION_RULE).unwrap()
}

fn facts(value: Value) -> Facts {
    value.as_object().cloned().unwrap()
}

fn library() -> SourceLibrary {
    SourceLibrary::new().with_article("mica_2023", "16(1)", ARTICLE_16)
}

#[test]
fn test_other_instrument_type_is_not_applicable() {
    let result = DecisionEngine::new().evaluate(
        &rule(),
        &facts(json!({"instrument_type": "emt", "activity": "public_offer"})),
    );
    assert!(!result.applicable);
    assert!(result.decision.is_none());
    assert!(result.trace.is_empty());
}

#[test]
fn test_credit_institution_short_circuits() {
    let result = DecisionEngine::new().evaluate(
        &rule(),
        &facts(json!({
            "instrument_type": "art",
            "activity": "public_offer",
            "is_credit_institution": true,
            "authorized": false
        })),
    );
    assert_eq!(result.decision.as_deref(), Some("exempt"));
    assert_eq!(result.trace.len(), 1);
    assert!(result.trace[0].result);
    assert!(result.obligations.is_empty());
}

#[test]
fn test_authorised_issuer_carries_obligation() {
    let result = DecisionEngine::new().evaluate(
        &rule(),
        &facts(json!({
            "instrument_type": "stablecoin",
            "activity": "public_offer",
            "is_credit_institution": false,
            "authorized": true
        })),
    );
    assert_eq!(result.decision.as_deref(), Some("authorized"));
    let nodes: Vec<&str> = result.trace.iter().map(|s| s.node_id.as_str()).collect();
    assert_eq!(nodes, vec!["check_credit_institution", "check_authorisation"]);
    assert_eq!(result.obligations.len(), 1);
    assert_eq!(result.obligations[0].id, "publish_whitepaper");
}

#[test]
fn test_well_formed_rule_verifies_structurally() {
    let orchestrator = VerificationOrchestrator::default().with_lookup(Arc::new(library()));
    let block = orchestrator.verify_rule(&rule(), None, &[0, 4], false).unwrap();

    assert_eq!(block.evidence.len(), 9);
    assert!(block.evidence.iter().all(|e| e.label == EvidenceLabel::Pass), "{:#?}", block.evidence);
    assert_eq!(block.summary.status, ConsistencyStatus::Verified);
    assert_eq!(block.summary.confidence, 1.0);
    assert!(!block.stopped_early);
}

#[test]
fn test_all_tiers_run_with_resolved_source() {
    let orchestrator = VerificationOrchestrator::default().with_lookup(Arc::new(library()));
    let block = orchestrator.verify_rule(&rule(), None, &[0, 1, 2, 3, 4], false).unwrap();

    assert_eq!(block.evidence_for(Tier::Schema).count(), 6);
    assert_eq!(block.evidence_for(Tier::Lexical).count(), 6);
    assert_eq!(block.evidence_for(Tier::Semantic).count(), 3);
    assert_eq!(block.evidence_for(Tier::Entailment).count(), 2);
    assert_eq!(block.evidence_for(Tier::CrossRule).count(), 3);
    assert_ne!(block.summary.status, ConsistencyStatus::Unverified);
    assert!((0.0..=1.0).contains(&block.summary.confidence));

    // Evidence comes out in tier order.
    let tiers: Vec<u8> = block.evidence.iter().map(|e| e.tier.number()).collect();
    let mut sorted = tiers.clone();
    sorted.sort();
    assert_eq!(tiers, sorted);
}

#[test]
fn test_permission_rule_against_prohibition_stops_at_lexical_tier() {
    let mut permissive = rule();
    permissive.modality = Some(regula_core::Modality::Permission);
    let source = "Public offers of such tokens are prohibited.";

    let orchestrator = VerificationOrchestrator::default();
    let block = orchestrator
        .verify_rule(&permissive, Some(source), &[0, 1, 2, 3, 4], true)
        .unwrap();

    assert!(block.stopped_early);
    assert_eq!(block.stop_reason.as_deref(), Some("Tier 1 (Lexical & Heuristic) failed"));
    assert_eq!(block.evidence_for(Tier::Semantic).count(), 0);
    assert_eq!(block.summary.status, ConsistencyStatus::Inconsistent);
}

#[test]
fn test_permitted_and_prohibited_rules_contradict() {
    let permitted = Rule::from_yaml(
        r#"
id: offer_permitted
applies_if: {field: instrument_type, value: art}
decision_tree: {result: permitted}
"#,
    )
    .unwrap();
    let prohibited = Rule::from_yaml(
        r#"
id: offer_prohibited
applies_if: {field: instrument_type, value: art}
decision_tree: {result: prohibited}
"#,
    )
    .unwrap();
    let elsewhere = Rule::from_yaml(
        r#"
id: offer_prohibited_emt
applies_if: {field: instrument_type, value: emt}
decision_tree: {result: prohibited}
"#,
    )
    .unwrap();

    let orchestrator = VerificationOrchestrator::default();
    let related = vec![prohibited];
    let tiers = [4];
    let block = orchestrator
        .verify(VerificationRequest::new(&permitted).related_rules(&related).tiers(&tiers))
        .unwrap();
    let evidence = block.evidence.iter().find(|e| e.category == "no_contradiction").unwrap();
    assert!(evidence.is_fail());
    assert!(evidence.details.contains("offer_prohibited"));
    assert_eq!(block.summary.status, ConsistencyStatus::Inconsistent);

    // Disjoint applicability softens the finding to a warning.
    let related = vec![elsewhere];
    let block = orchestrator
        .verify(VerificationRequest::new(&permitted).related_rules(&related).tiers(&tiers))
        .unwrap();
    let evidence = block.evidence.iter().find(|e| e.category == "no_contradiction").unwrap();
    assert_eq!(evidence.label, EvidenceLabel::Warning);
}

#[test]
fn test_written_consistency_survives_reload() {
    let orchestrator = VerificationOrchestrator::default().with_lookup(Arc::new(library()));
    let mut stored = rule();
    let block = orchestrator.verify_rule(&stored, None, &[0], false).unwrap();
    stored.write_consistency(block.clone());

    let yaml = serde_yaml::to_string(&stored).unwrap();
    let reloaded = Rule::from_yaml(&yaml).unwrap();
    assert_eq!(reloaded.consistency.as_ref().map(|c| c.summary.status), Some(block.summary.status));
    assert_eq!(reloaded.consistency.unwrap().evidence.len(), block.evidence.len());

    let document = stored.to_value();
    let library = library();
    let drift = check_rule_drift(&stored.id, Some(&document), Some(&library as &dyn SourceLookup));
    assert!(!drift.has_drift, "{:?}", drift.details);
    assert!(drift.last_verified.is_some());
}

#[test]
fn test_drift_flags_missing_and_unresolved_rules() {
    let empty = SourceLibrary::new();
    let document = rule().to_value();

    let lookup = Some(&empty as &dyn SourceLookup);
    let unresolved = check_rule_drift("mica_art16_authorisation", Some(&document), lookup);
    assert_eq!(unresolved.drift_types, vec![DriftType::ReferenceDrift]);

    let missing = check_rule_drift("mica_art99", None, lookup);
    assert_eq!(missing.drift_types, vec![DriftType::RuleMissing]);
}
