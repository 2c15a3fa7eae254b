//! Transition guard evaluation.
//!
//! A transition's `conditions` are `{field, operator, value}` triples checked
//! against a JSON document shaped
//! `{ context, payload, outcome, subject_employee_id }` and combined with the
//! transition's AND/OR combinator. An empty list always holds.

use std::cmp::Ordering;

use hrflow_types::instance::StepOutcome;
use hrflow_types::workflow::{Condition, ConditionCombinator, ConditionOperator};
use serde_json::{Value, json};
use uuid::Uuid;

/// Build the document transition conditions are evaluated against.
pub fn guard_document(
    context_data: &Value,
    payload: Option<&Value>,
    outcome: StepOutcome,
    subject_employee_id: &Uuid,
) -> Value {
    json!({
        "context": context_data,
        "payload": payload.cloned().unwrap_or(Value::Null),
        "outcome": outcome.to_string(),
        "subject_employee_id": subject_employee_id.to_string(),
    })
}

/// Whether all (AND) or any (OR) of `conditions` hold for `doc`.
pub fn conditions_hold(
    conditions: &[Condition],
    combinator: ConditionCombinator,
    doc: &Value,
) -> bool {
    if conditions.is_empty() {
        return true;
    }
    match combinator {
        ConditionCombinator::And => conditions.iter().all(|c| condition_holds(c, doc)),
        ConditionCombinator::Or => conditions.iter().any(|c| condition_holds(c, doc)),
    }
}

fn condition_holds(condition: &Condition, doc: &Value) -> bool {
    let actual = lookup(doc, &condition.field);
    let expected = &condition.value;
    match condition.operator {
        ConditionOperator::Exists => actual.is_some_and(|v| !v.is_null()),
        ConditionOperator::NotExists => actual.is_none_or(Value::is_null),
        ConditionOperator::Eq => actual.is_some_and(|v| loosely_equal(v, expected)),
        ConditionOperator::Ne => !actual.is_some_and(|v| loosely_equal(v, expected)),
        ConditionOperator::Gt => compare(actual, expected) == Some(Ordering::Greater),
        ConditionOperator::Gte => matches!(
            compare(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        ConditionOperator::Lt => compare(actual, expected) == Some(Ordering::Less),
        ConditionOperator::Lte => matches!(
            compare(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        ConditionOperator::In => actual.is_some_and(|v| member_of(v, expected)),
        ConditionOperator::NotIn => !actual.is_some_and(|v| member_of(v, expected)),
        ConditionOperator::Contains => actual.is_some_and(|v| contains(v, expected)),
    }
}

/// Resolve a dotted path (`context.request.amount`, `payload.items.0`).
fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(doc, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// Equality that treats numbers by value (`1 == 1.0`).
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    let actual = actual?;
    if let (Some(x), Some(y)) = (actual.as_f64(), expected.as_f64()) {
        return x.partial_cmp(&y);
    }
    match (actual, expected) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn member_of(value: &Value, set: &Value) -> bool {
    match set {
        Value::Array(items) => items.iter().any(|item| loosely_equal(value, item)),
        _ => false,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::String(s), Value::String(n)) => s.contains(n.as_str()),
        (Value::Array(items), n) => items.iter().any(|item| loosely_equal(item, n)),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        _ => false,
    }
}
