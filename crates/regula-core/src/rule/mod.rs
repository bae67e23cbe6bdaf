//! Rule model: parsing and validation.
//!
//! Rules are structured documents (YAML or JSON) validated against
//! schema/rule.schema.json. This module parses them into typed values; the
//! structural checks that report problems as evidence live in Tier 0.

mod condition;
mod parser;
pub mod schema;
mod tree;

pub use condition::{render_value, Condition, FieldCondition, Operator};
pub use parser::{document_from_str, read_document, Modality, Rule, RuleError, SourceCitation};
pub use tree::{DecisionBranch, DecisionLeaf, DecisionNode, Obligation};
