//! Rule parsing from YAML/JSON.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::condition::Condition;
use super::tree::{DecisionNode, Obligation};
use crate::evidence::ConsistencyBlock;

/// Errors that can occur when loading rules.
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Failed to read rule file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Rule document is not a mapping")]
    NotAMapping,
}

/// Where a rule's legal text lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceCitation {
    /// Corpus document identifier, e.g. `mica_2023`
    pub document_id: String,

    /// Article reference, e.g. `36(1)`
    pub article: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

impl SourceCitation {
    pub fn new(document_id: impl Into<String>, article: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            article: article.into(),
            page: None,
        }
    }
}

/// Deontic modality a rule declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Obligation,
    Permission,
    Prohibition,
}

impl Modality {
    /// Prohibition sits on the opposite side of both obligation and permission.
    pub fn is_reversed(self, other: Modality) -> bool {
        (self == Modality::Prohibition) != (other == Modality::Prohibition)
    }
}

/// A machine-readable regulatory rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    #[serde(alias = "rule_id")]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpretation_notes: Option<String>,

    /// Declared modality; inferred from outcomes when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modality: Option<Modality>,

    /// Applicability gate; a rule without one always applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applies_if: Option<Condition>,

    pub decision_tree: DecisionNode,

    /// Obligations that hold whenever the rule applies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub obligations: Vec<Obligation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceCitation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_from: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_to: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency: Option<ConsistencyBlock>,
}

impl Rule {
    /// Minimal rule: an id and a decision tree.
    pub fn new(id: impl Into<String>, decision_tree: DecisionNode) -> Self {
        let mut rule = Self {
            id: id.into(),
            version: None,
            description: None,
            interpretation_notes: None,
            modality: None,
            applies_if: None,
            decision_tree,
            obligations: Vec::new(),
            source: None,
            effective_from: None,
            effective_to: None,
            consistency: None,
        };
        rule.decision_tree.assign_node_ids("root");
        rule
    }

    /// Parse a rule from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, RuleError> {
        let rule: Rule = serde_yaml::from_str(yaml)?;
        Ok(rule.normalized())
    }

    /// Parse a rule from JSON string.
    pub fn from_json(json: &str) -> Result<Self, RuleError> {
        let rule: Rule = serde_json::from_str(json)?;
        Ok(rule.normalized())
    }

    /// Parse a rule from an already loaded document.
    pub fn from_value(document: &Value) -> Result<Self, RuleError> {
        let rule: Rule = Rule::deserialize(document)?;
        Ok(rule.normalized())
    }

    /// Parse a rule from a YAML or JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        let document = read_document(path)?;
        Self::from_value(&document)
    }

    /// Serialize back into document form.
    pub fn to_value(&self) -> Value {
        // Every field serializes to plain JSON data.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Replace the consistency record. Only the caller writes back.
    pub fn write_consistency(&mut self, block: ConsistencyBlock) {
        self.consistency = Some(block);
    }

    /// Every outcome label the decision tree can produce, lower-cased.
    pub fn outcomes(&self) -> Vec<String> {
        self.decision_tree
            .outcomes()
            .into_iter()
            .map(|o| o.trim().to_lowercase())
            .collect()
    }

    fn normalized(mut self) -> Self {
        self.decision_tree.assign_node_ids("root");
        self
    }
}

/// Load a raw rule document. YAML is a superset of JSON, so one parser
/// handles both.
pub fn document_from_str(contents: &str) -> Result<Value, RuleError> {
    let document: Value = serde_yaml::from_str(contents)?;
    if !document.is_object() {
        return Err(RuleError::NotAMapping);
    }
    Ok(document)
}

/// Read a raw rule document from a YAML or JSON file.
pub fn read_document(path: impl AsRef<Path>) -> Result<Value, RuleError> {
    let contents = fs::read_to_string(path)?;
    document_from_str(&contents)
}
