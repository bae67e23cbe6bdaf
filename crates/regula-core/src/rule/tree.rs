//! Decision trees.

use serde::{Deserialize, Serialize};

use super::condition::Condition;

/// An obligation attached to a leaf or to the rule as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obligation {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
}

/// Terminal node: the outcome of a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecisionLeaf {
    /// Outcome label, e.g. `authorized` or `exempt`
    pub result: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub obligations: Vec<Obligation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Inner node: a condition with one subtree per truth value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecisionBranch {
    /// Assigned from the node's path when the document omits it
    #[serde(default)]
    pub node_id: String,

    pub condition: Condition,

    pub true_branch: Box<DecisionNode>,

    pub false_branch: Box<DecisionNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DecisionNode {
    Branch(DecisionBranch),
    Leaf(DecisionLeaf),
}

impl DecisionNode {
    pub fn leaf(result: impl Into<String>) -> Self {
        DecisionNode::Leaf(DecisionLeaf {
            result: result.into(),
            obligations: Vec::new(),
            notes: None,
        })
    }

    pub fn branch(
        node_id: impl Into<String>,
        condition: Condition,
        true_branch: DecisionNode,
        false_branch: DecisionNode,
    ) -> Self {
        DecisionNode::Branch(DecisionBranch {
            node_id: node_id.into(),
            condition,
            true_branch: Box::new(true_branch),
            false_branch: Box::new(false_branch),
        })
    }

    /// Every leaf outcome label, depth-first, true branch before false.
    pub fn outcomes(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.visit(&mut |node| {
            if let DecisionNode::Leaf(leaf) = node {
                out.push(leaf.result.as_str());
            }
        });
        out
    }

    /// Every leaf, depth-first.
    pub fn leaves(&self) -> Vec<&DecisionLeaf> {
        let mut out = Vec::new();
        self.visit(&mut |node| {
            if let DecisionNode::Leaf(leaf) = node {
                out.push(leaf);
            }
        });
        out
    }

    /// Every branch, depth-first.
    pub fn branches(&self) -> Vec<&DecisionBranch> {
        let mut out = Vec::new();
        self.visit(&mut |node| {
            if let DecisionNode::Branch(branch) = node {
                out.push(branch);
            }
        });
        out
    }

    /// Total number of nodes, leaves included.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.visit(&mut |_| count += 1);
        count
    }

    fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a DecisionNode)) {
        f(self);
        if let DecisionNode::Branch(branch) = self {
            branch.true_branch.visit(f);
            branch.false_branch.visit(f);
        }
    }

    /// Fill in missing branch ids from the node path.
    pub(crate) fn assign_node_ids(&mut self, path: &str) {
        if let DecisionNode::Branch(branch) = self {
            if branch.node_id.is_empty() {
                branch.node_id = path.to_string();
            }
            branch.true_branch.assign_node_ids(&format!("{}.true", path));
            branch.false_branch.assign_node_ids(&format!("{}.false", path));
        }
    }
}
