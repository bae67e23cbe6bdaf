//! Condition evaluation against scenario facts.
//!
//! Evaluation is total: a missing fact, a `null` fact or a comparison between
//! mismatched types yields `false` instead of an error. `all` / `any` stop at
//! the first deciding operand in declared order, so traces are reproducible.
//! The cross-rule checker reuses the same value equality when comparing
//! the values two rules pin a field to.

use serde_json::{Map, Value};

use crate::rule::{Condition, FieldCondition, Operator};

/// Scenario facts, keyed by field name.
pub type Facts = Map<String, Value>;

/// Evaluate a condition against facts.
pub fn evaluate(condition: &Condition, facts: &Facts) -> bool {
    match condition {
        Condition::Field(leaf) => evaluate_field(leaf, facts),
        Condition::All(items) => items.iter().all(|c| evaluate(c, facts)),
        Condition::Any(items) => items.iter().any(|c| evaluate(c, facts)),
        Condition::Not(inner) => !evaluate(inner, facts),
        Condition::True => true,
        Condition::False => false,
    }
}

/// Evaluate a single field comparison.
pub fn evaluate_field(leaf: &FieldCondition, facts: &Facts) -> bool {
    let Some(actual) = lookup(facts, &leaf.field) else {
        return false;
    };
    let expected = &leaf.value;

    match leaf.operator {
        Operator::Exists => true,
        Operator::Eq => values_equal(actual, expected),
        Operator::Ne => !values_equal(actual, expected),
        Operator::In => match expected {
            Value::Array(items) => items.iter().any(|item| values_equal(actual, item)),
            _ => false,
        },
        Operator::NotIn => match expected {
            Value::Array(items) => !items.iter().any(|item| values_equal(actual, item)),
            _ => false,
        },
        Operator::Contains => match (actual, expected) {
            (Value::Array(items), _) => items.iter().any(|item| values_equal(item, expected)),
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            _ => false,
        },
        Operator::Gt => compare_numbers(actual, expected, |a, b| a > b),
        Operator::Gte => compare_numbers(actual, expected, |a, b| a >= b),
        Operator::Lt => compare_numbers(actual, expected, |a, b| a < b),
        Operator::Lte => compare_numbers(actual, expected, |a, b| a <= b),
    }
}

/// Resolve a field, trying the literal key before a dotted path.
/// `null` counts as missing.
pub fn lookup<'a>(facts: &'a Facts, field: &str) -> Option<&'a Value> {
    let found = match facts.get(field) {
        Some(value) => Some(value),
        None if field.contains('.') => {
            let mut parts = field.split('.');
            let first = parts.next()?;
            parts.try_fold(facts.get(first)?, |current, part| current.get(part))
        }
        None => None,
    };
    found.filter(|v| !v.is_null())
}

pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

fn compare_numbers(actual: &Value, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => cmp(x, y),
            _ => false,
        },
        _ => false,
    }
}
