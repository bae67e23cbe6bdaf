//! Drift detection for stored rules.
//!
//! A rule drifts when it disappears from the store, stops passing the
//! structural checks, or its citation no longer resolves. Drift is judged
//! from Tier 0 alone so it can run over a whole rule base cheaply.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::evidence::{ConsistencySummary, EvidenceLabel};
use crate::source::SourceLookup;
use crate::tiers::schema::check_document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftType {
    RuleMissing,
    SchemaDrift,
    ReferenceDrift,
}

impl fmt::Display for DriftType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DriftType::RuleMissing => "rule_missing",
            DriftType::SchemaDrift => "schema_drift",
            DriftType::ReferenceDrift => "reference_drift",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftSeverity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

/// Outcome of a drift check on one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDriftResult {
    pub rule_id: String,
    pub has_drift: bool,
    pub drift_types: Vec<DriftType>,
    pub details: Vec<String>,
    pub severity: DriftSeverity,

    /// When the stored consistency summary was last computed
    pub last_verified: Option<DateTime<Utc>>,

    pub checked_at: DateTime<Utc>,
}

/// Check one stored rule document for drift. `None` means the rule is no
/// longer in the store.
pub fn check_rule_drift(
    rule_id: &str,
    document: Option<&Value>,
    lookup: Option<&dyn SourceLookup>,
) -> RuleDriftResult {
    let checked_at = Utc::now();
    let Some(document) = document else {
        return RuleDriftResult {
            rule_id: rule_id.to_string(),
            has_drift: true,
            drift_types: vec![DriftType::RuleMissing],
            details: vec!["Rule no longer exists in rule data".to_string()],
            severity: DriftSeverity::Critical,
            last_verified: None,
            checked_at,
        };
    };

    let mut drift_types = Vec::new();
    let mut details = Vec::new();
    for evidence in check_document(document, None, lookup) {
        match evidence.label {
            EvidenceLabel::Fail => {
                push_unique(&mut drift_types, DriftType::SchemaDrift);
                details.push(format!("Schema check failed: {}", evidence.details));
            }
            EvidenceLabel::Warning if evidence.category == "source_exists" => {
                push_unique(&mut drift_types, DriftType::ReferenceDrift);
                details.push(format!("Reference issue: {}", evidence.details));
            }
            _ => {}
        }
    }

    let severity = if drift_types.contains(&DriftType::SchemaDrift) {
        DriftSeverity::High
    } else if drift_types.contains(&DriftType::ReferenceDrift) {
        DriftSeverity::Medium
    } else {
        DriftSeverity::None
    };

    RuleDriftResult {
        rule_id: rule_id.to_string(),
        has_drift: !drift_types.is_empty(),
        drift_types,
        details,
        severity,
        last_verified: stored_last_verified(document),
        checked_at,
    }
}

fn push_unique(types: &mut Vec<DriftType>, drift: DriftType) {
    if !types.contains(&drift) {
        types.push(drift);
    }
}

/// `consistency.summary.last_verified` of the stored document, if readable.
fn stored_last_verified(document: &Value) -> Option<DateTime<Utc>> {
    let summary = document.get("consistency")?.get("summary")?;
    if let Ok(summary) = ConsistencySummary::deserialize(summary) {
        return Some(summary.last_verified);
    }
    summary
        .get("last_verified")?
        .as_str()?
        .parse::<DateTime<Utc>>()
        .ok()
}
