//! The rule document schema.
//!
//! schema/rule.schema.json is embedded at compile time and compiled on first
//! use. Violations are reported against the rule element they concern, in
//! the dotted form evidence uses (`decision_tree.true_branch.result`).

use std::fmt;
use std::sync::OnceLock;

use jsonschema::error::ValidationErrorKind;
use jsonschema::{ValidationError, Validator};
use serde_json::Value;

const RULE_SCHEMA_JSON: &str = include_str!("../../../../schema/rule.schema.json");

static RULE_SCHEMA: OnceLock<Result<Validator, String>> = OnceLock::new();

/// One way a rule document departs from the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// Dotted path of the offending rule element; empty for the document root.
    pub path: String,
    pub message: String,
}

impl SchemaViolation {
    /// The offending element, or `document` when the root itself is at fault.
    pub fn element(&self) -> &str {
        if self.path.is_empty() {
            "document"
        } else {
            &self.path
        }
    }

    fn from_error(error: &ValidationError<'_>) -> Self {
        let mut path: Vec<String> = error
            .instance_path
            .to_string()
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
            .collect();
        // A missing property is reported at its parent; point at the property.
        if let ValidationErrorKind::Required { property } = &error.kind {
            if let Some(name) = property.as_str() {
                path.push(name.to_string());
            }
        }
        Self {
            path: path.join("."),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.element(), self.message)
    }
}

fn rule_schema() -> Result<&'static Validator, &'static str> {
    RULE_SCHEMA
        .get_or_init(|| {
            let schema: Value = serde_json::from_str(RULE_SCHEMA_JSON)
                .map_err(|e| format!("rule schema is not valid JSON: {}", e))?;
            jsonschema::options()
                .build(&schema)
                .map_err(|e| format!("rule schema does not compile: {}", e))
        })
        .as_ref()
        .map_err(String::as_str)
}

/// Every schema violation in a rule document; empty when it conforms.
///
/// A schema that fails to compile is reported as a single violation at the
/// document root, so callers never mistake it for a conforming rule.
pub fn schema_violations(document: &Value) -> Vec<SchemaViolation> {
    match rule_schema() {
        Ok(schema) => schema
            .iter_errors(document)
            .map(|e| SchemaViolation::from_error(&e))
            .collect(),
        Err(message) => vec![SchemaViolation {
            path: String::new(),
            message: message.to_string(),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> Value {
        json!({
            "id": "mica_art16_offer",
            "decision_tree": { "result": "permitted" },
            "source": { "document_id": "mica_2023", "article": "16" }
        })
    }

    #[test]
    fn test_minimal_rule_conforms() {
        assert_eq!(schema_violations(&minimal()), Vec::new());
    }

    #[test]
    fn test_missing_decision_tree_points_at_it() {
        let mut doc = minimal();
        doc.as_object_mut().unwrap().remove("decision_tree");
        let violations = schema_violations(&doc);
        assert!(violations.iter().any(|v| v.element() == "decision_tree"), "{:?}", violations);
    }

    #[test]
    fn test_unknown_operator_points_into_applies_if() {
        let mut doc = minimal();
        doc["applies_if"] = json!({
            "field": "instrument_type", "operator": "like", "value": "art"
        });
        let violations = schema_violations(&doc);
        assert!(!violations.is_empty());
        assert!(violations.iter().all(|v| v.path.starts_with("applies_if")), "{:?}", violations);
    }

    #[test]
    fn test_nested_groups_conform() {
        let mut doc = minimal();
        doc["applies_if"] = json!({
            "all": [
                { "field": "instrument_type", "operator": "in", "value": ["art", "emt"] },
                { "any": [ { "field": "activity", "value": "offer" }, true ] },
                { "not": { "field": "is_credit_institution", "value": true } }
            ]
        });
        doc["decision_tree"] = json!({
            "node_id": "root",
            "condition": { "field": "authorized", "value": true },
            "true_branch": { "result": "authorized" },
            "false_branch": { "result": "not_authorized", "obligations": [ { "id": "apply" } ] }
        });
        assert!(schema_violations(&doc).is_empty());
    }

    #[test]
    fn test_bad_date_format_names_the_date() {
        let mut doc = minimal();
        doc["effective_from"] = json!("30/06/2024");
        let violations = schema_violations(&doc);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].element(), "effective_from");
        assert!(violations[0].to_string().starts_with("effective_from: "));
    }
}
