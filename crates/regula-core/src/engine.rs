//! Decision Engine: executes a rule against scenario facts.
//!
//! Applicability is checked first; an inapplicable rule returns with an empty
//! trace. Otherwise the decision tree is walked from the root, one
//! [`TraceStep`] per branch visited, until a leaf supplies the outcome.
//!
//! The tree is assumed acyclic. Tier 0 rejects cyclic or unbounded trees
//! before a rule is trusted, so the walk has no cycle guard.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::evaluator::{self, Facts};
use crate::rule::{Condition, DecisionNode, Obligation, Rule};

/// One condition evaluation along the decision path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub node_id: String,

    /// Rendered condition, e.g. `authorized == true`
    pub condition_text: String,

    pub result: bool,

    /// Fact consulted by a field condition; `null` for groups or missing facts
    pub evaluated_value: Value,
}

/// Outcome of evaluating one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResult {
    pub rule_id: String,
    pub applicable: bool,
    pub decision: Option<String>,
    pub trace: Vec<TraceStep>,
    pub obligations: Vec<Obligation>,
}

impl DecisionResult {
    fn not_applicable(rule_id: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            applicable: false,
            decision: None,
            trace: Vec::new(),
            obligations: Vec::new(),
        }
    }
}

/// The decision engine. Stateless; one instance can serve any number of
/// concurrent evaluations.
#[derive(Debug, Default, Clone, Copy)]
pub struct DecisionEngine;

impl DecisionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a rule against facts.
    pub fn evaluate(&self, rule: &Rule, facts: &Facts) -> DecisionResult {
        let applicable = rule
            .applies_if
            .as_ref()
            .map_or(true, |condition| evaluator::evaluate(condition, facts));

        if !applicable {
            debug!(rule_id = %rule.id, "rule not applicable");
            return DecisionResult::not_applicable(&rule.id);
        }

        let mut trace = Vec::new();
        let mut node = &rule.decision_tree;
        let leaf = loop {
            match node {
                DecisionNode::Leaf(leaf) => break leaf,
                DecisionNode::Branch(branch) => {
                    let result = evaluator::evaluate(&branch.condition, facts);
                    trace.push(TraceStep {
                        node_id: branch.node_id.clone(),
                        condition_text: branch.condition.to_string(),
                        result,
                        evaluated_value: consulted_value(&branch.condition, facts),
                    });
                    node = if result {
                        &branch.true_branch
                    } else {
                        &branch.false_branch
                    };
                }
            }
        };

        // Leaf obligations first, then rule-level ones not already listed.
        let mut obligations = leaf.obligations.clone();
        for obligation in &rule.obligations {
            if !obligations.iter().any(|o| o.id == obligation.id) {
                obligations.push(obligation.clone());
            }
        }

        debug!(
            rule_id = %rule.id,
            decision = %leaf.result,
            steps = trace.len(),
            "rule evaluated"
        );

        DecisionResult {
            rule_id: rule.id.clone(),
            applicable: true,
            decision: Some(leaf.result.clone()),
            trace,
            obligations,
        }
    }

    /// Evaluate several rules in input order, optionally restricted to the
    /// given ids.
    pub fn evaluate_all(
        &self,
        rules: &[Rule],
        facts: &Facts,
        rule_ids: Option<&[String]>,
    ) -> Vec<DecisionResult> {
        rules
            .iter()
            .filter(|rule| rule_ids.map_or(true, |ids| ids.iter().any(|id| id == &rule.id)))
            .map(|rule| self.evaluate(rule, facts))
            .collect()
    }
}

fn consulted_value(condition: &Condition, facts: &Facts) -> Value {
    match condition {
        Condition::Field(leaf) => evaluator::lookup(facts, &leaf.field)
            .cloned()
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}
