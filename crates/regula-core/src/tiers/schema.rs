//! Tier 0: Schema & Structural checks.
//!
//! Operates on the raw document rather than the parsed [`Rule`], so a
//! document that does not even parse still gets evidence explaining why.
//! All checks are deterministic; a failing check scores 0.0, a passing one
//! 1.0 and a warning 0.5.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;

use super::{CheckContext, TierCheck};
use crate::evidence::{ConsistencyEvidence, EvidenceBuilder, Tier};
use crate::rule::schema::schema_violations;
use crate::rule::SourceCitation;
use crate::source::SourceLookup;

lazy_static! {
    static ref RULE_ID: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9_.\-]{1,127}$").unwrap();
}

/// Deepest decision tree accepted.
pub const MAX_TREE_DEPTH: usize = 64;

const TIER: Tier = Tier::Schema;

/// The Tier 0 checker.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaChecker;

impl SchemaChecker {
    pub fn new() -> Self {
        Self
    }
}

impl TierCheck for SchemaChecker {
    fn tier(&self) -> Tier {
        TIER
    }

    fn check(&self, context: &CheckContext<'_>) -> Vec<ConsistencyEvidence> {
        match context.document {
            Some(document) => check_document(document, context.source(), context.lookup),
            None => check_document(&context.rule.to_value(), context.source(), context.lookup),
        }
    }
}

/// Run every Tier 0 check on a raw document.
pub fn check_document(
    document: &Value,
    source_text: Option<&str>,
    lookup: Option<&dyn SourceLookup>,
) -> Vec<ConsistencyEvidence> {
    vec![
        check_schema_valid(document),
        check_required_fields(document),
        check_source_exists(document, source_text, lookup),
        check_date_consistency(document),
        check_id_format(document),
        check_decision_tree_valid(document),
    ]
}

/// Validate the document against the rule JSON Schema. A failure points at
/// the element of the first violation.
pub fn check_schema_valid(document: &Value) -> ConsistencyEvidence {
    let builder = EvidenceBuilder::new(TIER, "schema_valid");
    let violations = schema_violations(document);
    let Some(first) = violations.first() else {
        return builder
            .pass(1.0)
            .details("Rule document conforms to the rule schema")
            .build();
    };

    let shown: Vec<String> = violations.iter().take(3).map(ToString::to_string).collect();
    let mut details = format!("{} schema violation(s): {}", violations.len(), shown.join("; "));
    if violations.len() > shown.len() {
        details.push_str("; ...");
    }
    builder
        .fail(0.0)
        .details(details)
        .rule_element(first.element())
        .build()
}

/// The rule id and both citation parts must be present and non-empty.
pub fn check_required_fields(document: &Value) -> ConsistencyEvidence {
    let mut missing = Vec::new();
    if rule_id(document).is_none() {
        missing.push("id");
    }
    if document.get("decision_tree").map_or(true, Value::is_null) {
        missing.push("decision_tree");
    }
    let source = document.get("source");
    if non_empty_str(source.and_then(|s| s.get("document_id"))).is_none() {
        missing.push("source.document_id");
    }
    if non_empty_str(source.and_then(|s| s.get("article"))).is_none() {
        missing.push("source.article");
    }

    if missing.is_empty() {
        ConsistencyEvidence::pass(TIER, "required_fields", "All required fields present")
    } else {
        EvidenceBuilder::new(TIER, "required_fields")
            .fail(0.0)
            .details(format!("Missing required fields: {}", missing.join(", ")))
            .build()
    }
}

/// The citation should resolve to a real passage. An unresolvable citation
/// is a warning, never a failure.
pub fn check_source_exists(
    document: &Value,
    source_text: Option<&str>,
    lookup: Option<&dyn SourceLookup>,
) -> ConsistencyEvidence {
    let builder = EvidenceBuilder::new(TIER, "source_exists").rule_element("source");

    let Some(citation) = citation(document) else {
        return builder
            .warning(0.5)
            .details("No source citation to resolve")
            .build();
    };

    match lookup {
        Some(lookup) => match lookup.resolve(&citation) {
            Some(passage) => builder
                .pass(1.0)
                .details(format!(
                    "Citation {} Art. {} resolved",
                    citation.document_id, citation.article
                ))
                .source_span(passage)
                .build(),
            None => builder
                .warning(0.5)
                .details(format!(
                    "Citation {} Art. {} could not be resolved",
                    citation.document_id, citation.article
                ))
                .build(),
        },
        None if source_text.is_some_and(|t| !t.trim().is_empty()) => builder
            .pass(1.0)
            .details(format!(
                "Source text supplied for {} Art. {}",
                citation.document_id, citation.article
            ))
            .build(),
        None => builder
            .warning(0.5)
            .details(format!(
                "No source lookup available to resolve {} Art. {}",
                citation.document_id, citation.article
            ))
            .build(),
    }
}

/// Effective dates must parse and be ordered.
pub fn check_date_consistency(document: &Value) -> ConsistencyEvidence {
    let builder =
        EvidenceBuilder::new(TIER, "date_consistency").rule_element("effective_from,effective_to");

    let from = match parse_date(document, "effective_from") {
        Ok(date) => date,
        Err(message) => return builder.fail(0.0).details(message).build(),
    };
    let to = match parse_date(document, "effective_to") {
        Ok(date) => date,
        Err(message) => return builder.fail(0.0).details(message).build(),
    };

    match (from, to) {
        (Some(from), Some(to)) if from > to => builder
            .fail(0.0)
            .details(format!("effective_from {} is after effective_to {}", from, to))
            .build(),
        (from, to) => builder
            .pass(1.0)
            .details(format!(
                "Effective {} to {}",
                from.map_or("unbounded".to_string(), |d| d.to_string()),
                to.map_or("unbounded".to_string(), |d| d.to_string())
            ))
            .build(),
    }
}

/// Rule ids start with a letter and use only letters, digits, `_`, `.`
/// and `-`.
pub fn check_id_format(document: &Value) -> ConsistencyEvidence {
    let builder = EvidenceBuilder::new(TIER, "id_format").rule_element("id");
    match rule_id(document) {
        Some(id) if RULE_ID.is_match(id) => builder
            .pass(1.0)
            .details(format!("Rule id '{}' is well-formed", id))
            .build(),
        Some(id) => builder
            .fail(0.0)
            .details(format!(
                "Rule id '{}' must start with a letter and contain only letters, digits, \
                 '_', '.' or '-' (2-128 chars)",
                id
            ))
            .build(),
        None => builder.fail(0.0).details("Rule has no id").build(),
    }
}

/// The decision tree must be finite and well-formed: unique node ids,
/// bounded depth, complete branches and labelled leaves.
pub fn check_decision_tree_valid(document: &Value) -> ConsistencyEvidence {
    let builder = EvidenceBuilder::new(TIER, "decision_tree_valid").rule_element("decision_tree");

    let Some(root) = document.get("decision_tree").filter(|v| !v.is_null()) else {
        return builder.fail(0.0).details("Rule has no decision tree").build();
    };

    let mut walk = TreeWalk::default();
    walk.visit(root, "root", 1);

    if walk.problems.is_empty() {
        builder
            .pass(1.0)
            .details(format!(
                "Decision tree valid: {} nodes, {} leaves, depth {}",
                walk.nodes, walk.leaves, walk.max_depth
            ))
            .build()
    } else {
        let shown: Vec<&str> = walk.problems.iter().take(5).map(String::as_str).collect();
        builder
            .fail(0.0)
            .details(format!(
                "{} decision tree problem(s): {}",
                walk.problems.len(),
                shown.join("; ")
            ))
            .build()
    }
}

#[derive(Default)]
struct TreeWalk {
    ids: HashSet<String>,
    problems: Vec<String>,
    nodes: usize,
    leaves: usize,
    max_depth: usize,
}

impl TreeWalk {
    fn visit(&mut self, node: &Value, path: &str, depth: usize) {
        if depth > MAX_TREE_DEPTH {
            self.problems.push(format!(
                "{}: tree deeper than {} levels (possible cycle)",
                path, MAX_TREE_DEPTH
            ));
            return;
        }
        self.nodes += 1;
        self.max_depth = self.max_depth.max(depth);

        let Some(map) = node.as_object() else {
            self.problems.push(format!("{}: node is not a mapping", path));
            return;
        };

        let is_branch = ["condition", "true_branch", "false_branch"]
            .iter()
            .any(|k| map.contains_key(*k));

        if map.contains_key("result") {
            self.leaves += 1;
            if is_branch {
                self.problems.push(format!("{}: node is both a leaf and a branch", path));
            }
            if non_empty_str(map.get("result")).is_none() {
                self.problems.push(format!("{}: leaf has no result label", path));
            }
            return;
        }

        if !is_branch {
            self.problems.push(format!("{}: node has neither a result nor a condition", path));
            return;
        }

        self.check_branch_id(map, path);
        if map.get("condition").map_or(true, Value::is_null) {
            self.problems.push(format!("{}: branch has no condition", path));
        }
        for key in ["true_branch", "false_branch"] {
            match map.get(key).filter(|v| !v.is_null()) {
                Some(child) => {
                    let child_path = format!("{}.{}", path, key.trim_end_matches("_branch"));
                    self.visit(child, &child_path, depth + 1);
                }
                None => self.problems.push(format!("{}: branch is missing {}", path, key)),
            }
        }
    }

    fn check_branch_id(&mut self, map: &Map<String, Value>, path: &str) {
        let id = non_empty_str(map.get("node_id")).unwrap_or(path).to_string();
        if !self.ids.insert(id.clone()) {
            self.problems.push(format!(
                "{}: duplicate node id '{}' (shared or cyclic subtree)",
                path, id
            ));
        }
    }
}

fn rule_id(document: &Value) -> Option<&str> {
    non_empty_str(document.get("id")).or_else(|| non_empty_str(document.get("rule_id")))
}

fn citation(document: &Value) -> Option<SourceCitation> {
    let source = document.get("source")?;
    let mut citation = SourceCitation::new(
        non_empty_str(source.get("document_id"))?,
        non_empty_str(source.get("article"))?,
    );
    citation.page = source
        .get("page")
        .and_then(Value::as_u64)
        .and_then(|p| u32::try_from(p).ok());
    Some(citation)
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

fn parse_date(document: &Value, key: &str) -> Result<Option<NaiveDate>, String> {
    match document.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Some)
            .map_err(|e| format!("{} '{}' is not a valid date: {}", key, s, e)),
        Some(other) => Err(format!("{} must be a YYYY-MM-DD string, got {}", key, other)),
    }
}
