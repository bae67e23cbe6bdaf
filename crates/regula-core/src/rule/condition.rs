//! Applicability and branch conditions.
//!
//! Rule documents express conditions loosely: a field comparison mapping,
//! a group mapping with `all` / `any` / `not` keys, or a bare boolean.
//! They are parsed into the closed [`Condition`] enum once and never change
//! afterwards.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Comparison operator of a field condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Operator {
    #[default]
    #[serde(rename = "==", alias = "eq", alias = "equals")]
    Eq,
    #[serde(rename = "!=", alias = "ne", alias = "not_equals")]
    Ne,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not_in")]
    NotIn,
    #[serde(rename = ">", alias = "gt")]
    Gt,
    #[serde(rename = ">=", alias = "gte")]
    Gte,
    #[serde(rename = "<", alias = "lt")]
    Lt,
    #[serde(rename = "<=", alias = "lte")]
    Lte,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "exists")]
    Exists,
}

impl Operator {
    /// Canonical symbol used in documents and traces.
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Contains => "contains",
            Operator::Exists => "exists",
        }
    }

    /// Whether the operator itself expresses negation.
    pub fn is_negative(&self) -> bool {
        matches!(self, Operator::Ne | Operator::NotIn)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A single `field operator value` comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldCondition {
    /// Fact name, dotted for nested facts (e.g. `issuer.type`)
    pub field: String,

    #[serde(default)]
    pub operator: Operator,

    #[serde(default)]
    pub value: Value,

    /// Free-text explanation carried from the rule document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldCondition {
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
            description: None,
        }
    }

    /// Whether this comparison holds when its fact is negative, e.g.
    /// `authorized == false` or `type != bank`.
    pub fn is_negative(&self) -> bool {
        self.operator.is_negative()
            || (self.operator == Operator::Eq && self.value == Value::Bool(false))
    }
}

impl fmt::Display for FieldCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operator == Operator::Exists {
            return write!(f, "{} exists", self.field);
        }
        write!(
            f,
            "{} {} {}",
            self.field,
            self.operator,
            render_value(&self.value)
        )
    }
}

/// Boolean expression over scenario facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ConditionDoc", into = "ConditionDoc")]
pub enum Condition {
    Field(FieldCondition),
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
    True,
    False,
}

impl Condition {
    /// Shorthand for a field leaf.
    pub fn field(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Condition::Field(FieldCondition::new(field, operator, value))
    }

    /// All field leaves in declaration order.
    pub fn leaves(&self) -> Vec<&FieldCondition> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a FieldCondition>) {
        match self {
            Condition::Field(leaf) => out.push(leaf),
            Condition::All(items) | Condition::Any(items) => {
                for item in items {
                    item.collect_leaves(out);
                }
            }
            Condition::Not(inner) => inner.collect_leaves(out),
            Condition::True | Condition::False => {}
        }
    }

    /// Field leaves paired with their effective polarity: `true` when the
    /// leaf requires the negative case once enclosing `not`s are applied.
    pub fn leaves_with_polarity(&self) -> Vec<(&FieldCondition, bool)> {
        let mut out = Vec::new();
        self.collect_polarity(false, &mut out);
        out
    }

    fn collect_polarity<'a>(&'a self, negated: bool, out: &mut Vec<(&'a FieldCondition, bool)>) {
        match self {
            Condition::Field(leaf) => out.push((leaf, leaf.is_negative() != negated)),
            Condition::All(items) | Condition::Any(items) => {
                for item in items {
                    item.collect_polarity(negated, out);
                }
            }
            Condition::Not(inner) => inner.collect_polarity(!negated, out),
            Condition::True | Condition::False => {}
        }
    }

    /// Number of field comparisons in the expression.
    pub fn leaf_count(&self) -> usize {
        self.leaves().len()
    }

    /// Distinct field names referenced anywhere in the expression.
    pub fn fields(&self) -> BTreeSet<&str> {
        self.leaves().into_iter().map(|l| l.field.as_str()).collect()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Field(leaf) => write!(f, "{}", leaf),
            Condition::All(items) => write_joined(f, items, " AND ", "TRUE"),
            Condition::Any(items) => write_joined(f, items, " OR ", "FALSE"),
            Condition::Not(inner) => write!(f, "NOT ({})", inner),
            Condition::True => f.write_str("TRUE"),
            Condition::False => f.write_str("FALSE"),
        }
    }
}

fn write_joined(
    f: &mut fmt::Formatter<'_>,
    items: &[Condition],
    sep: &str,
    empty: &str,
) -> fmt::Result {
    match items {
        [] => f.write_str(empty),
        [only] => write!(f, "{}", only),
        _ => {
            f.write_str("(")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(sep)?;
                }
                write!(f, "{}", item)?;
            }
            f.write_str(")")
        }
    }
}

/// Render a condition value the way it reads in a trace.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(render_value).collect();
            format!("[{}]", inner.join(", "))
        }
        other => other.to_string(),
    }
}

// Document representation

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ConditionDoc {
    Literal(bool),
    Field(FieldCondition),
    Group(GroupDoc),
}

#[derive(Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct GroupDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    all: Option<Vec<Condition>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    any: Option<Vec<Condition>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    not: Option<Box<Condition>>,
}

impl TryFrom<ConditionDoc> for Condition {
    type Error = String;

    fn try_from(doc: ConditionDoc) -> Result<Self, Self::Error> {
        match doc {
            ConditionDoc::Literal(true) => Ok(Condition::True),
            ConditionDoc::Literal(false) => Ok(Condition::False),
            ConditionDoc::Field(leaf) => Ok(Condition::Field(leaf)),
            ConditionDoc::Group(group) => {
                let mut parts = Vec::new();
                if let Some(all) = group.all {
                    parts.push(Condition::All(all));
                }
                if let Some(any) = group.any {
                    parts.push(Condition::Any(any));
                }
                if let Some(not) = group.not {
                    parts.push(Condition::Not(not));
                }
                // Several keys in one group are conjoined.
                match parts.len() {
                    0 => Err("empty condition group: expected `all`, `any` or `not`".to_string()),
                    1 => Ok(parts.remove(0)),
                    _ => Ok(Condition::All(parts)),
                }
            }
        }
    }
}

impl From<Condition> for ConditionDoc {
    fn from(condition: Condition) -> Self {
        match condition {
            Condition::True => ConditionDoc::Literal(true),
            Condition::False => ConditionDoc::Literal(false),
            Condition::Field(leaf) => ConditionDoc::Field(leaf),
            Condition::All(items) => ConditionDoc::Group(GroupDoc {
                all: Some(items),
                ..Default::default()
            }),
            Condition::Any(items) => ConditionDoc::Group(GroupDoc {
                any: Some(items),
                ..Default::default()
            }),
            Condition::Not(inner) => ConditionDoc::Group(GroupDoc {
                not: Some(inner),
                ..Default::default()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_field_condition() {
        let cond: Condition = serde_yaml::from_str(
            r#"
field: instrument_type
operator: in
value: [art, stablecoin]
"#,
        )
        .unwrap();

        match cond {
            Condition::Field(leaf) => {
                assert_eq!(leaf.field, "instrument_type");
                assert_eq!(leaf.operator, Operator::In);
                assert_eq!(leaf.value, json!(["art", "stablecoin"]));
            }
            other => panic!("expected field leaf, got {:?}", other),
        }
    }

    #[test]
    fn test_operator_defaults_to_eq_and_accepts_aliases() {
        let cond: Condition =
            serde_json::from_value(json!({"field": "authorized", "value": true})).unwrap();
        assert_eq!(cond.leaves()[0].operator, Operator::Eq);

        let doc = json!({"field": "amount", "operator": "gte", "value": 5});
        let cond: Condition = serde_json::from_value(doc).unwrap();
        assert_eq!(cond.leaves()[0].operator, Operator::Gte);
    }

    #[test]
    fn test_group_with_several_keys_is_conjoined() {
        let cond: Condition = serde_json::from_value(json!({
            "all": [{"field": "a", "value": 1}],
            "not": {"field": "b", "value": 2}
        }))
        .unwrap();

        match cond {
            Condition::All(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(parts[1], Condition::Not(_)));
            }
            other => panic!("expected conjunction, got {:?}", other),
        }
    }

    #[test]
    fn test_literals_and_empty_group() {
        let t: Condition = serde_json::from_value(json!(true)).unwrap();
        assert_eq!(t, Condition::True);

        let empty: Result<Condition, _> = serde_json::from_value(json!({}));
        assert!(empty.is_err());
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let result: Result<Condition, _> =
            serde_json::from_value(json!({"field": "a", "operator": "~=", "value": 1}));
        assert!(result.is_err());
    }

    #[test]
    fn test_display_and_round_trip() {
        let cond = Condition::All(vec![
            Condition::field("instrument_type", Operator::In, json!(["art", "emt"])),
            Condition::Not(Box::new(Condition::field("authorized", Operator::Eq, json!(true)))),
        ]);
        assert_eq!(
            cond.to_string(),
            "(instrument_type in [art, emt] AND NOT (authorized == true))"
        );

        let value = serde_json::to_value(&cond).unwrap();
        let back: Condition = serde_json::from_value(value).unwrap();
        assert_eq!(back, cond);
    }

    #[test]
    fn test_polarity_accounts_for_not() {
        let cond = Condition::All(vec![
            Condition::field("is_credit_institution", Operator::Eq, json!(false)),
            Condition::Not(Box::new(Condition::field("exempt", Operator::Eq, json!(true)))),
            Condition::field("authorized", Operator::Eq, json!(true)),
        ]);
        let polarity: Vec<bool> = cond.leaves_with_polarity().iter().map(|(_, n)| *n).collect();
        assert_eq!(polarity, vec![true, true, false]);
        assert_eq!(cond.leaf_count(), 3);
    }
}
