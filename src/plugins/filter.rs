//! Document filter evaluation.
//!
//! Filters are JSON objects in the familiar document-store dialect:
//!
//! ```json
//! {"age": {"$gte": 18}, "$or": [{"role": "admin"}, {"tags": {"$in": ["ops"]}}]}
//! ```
//!
//! Field names may be dotted paths into nested objects. A bare value means
//! equality; an object whose keys all start with `$` is an operator set.

use crate::framework::{Result, RpcError};
use regex::Regex;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Resolves a dotted `path` inside `doc`.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Evaluates `filter` against `doc`. An empty filter matches everything.
pub fn matches(doc: &Value, filter: &Value) -> Result<bool> {
    let clauses = match filter {
        Value::Null => return Ok(true),
        Value::Object(map) => map,
        other => {
            return Err(RpcError::Validation(format!(
                "filter must be an object, got {other}"
            )))
        }
    };

    for (key, condition) in clauses {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in sub_filters(key, condition)? {
                    if !matches(doc, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for sub in sub_filters(key, condition)? {
                    if matches(doc, sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            op if op.starts_with('$') => {
                return Err(RpcError::Validation(format!(
                    "unknown top-level operator '{op}'"
                )))
            }
            path => field_matches(lookup(doc, path), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_filters<'a>(op: &str, condition: &'a Value) -> Result<&'a Vec<Value>> {
    condition
        .as_array()
        .ok_or_else(|| RpcError::Validation(format!("'{op}' expects an array of filters")))
}

fn is_operator_set(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

fn field_matches(field: Option<&Value>, condition: &Value) -> Result<bool> {
    let ops = match condition {
        Value::Object(map) if is_operator_set(map) => map,
        _ => return Ok(equals(field, condition)),
    };

    for (op, operand) in ops {
        let ok = match op.as_str() {
            "$eq" => equals(field, operand),
            "$ne" => !equals(field, operand),
            "$gt" => compare(field, operand) == Some(Ordering::Greater),
            "$gte" => matches!(
                compare(field, operand),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            "$lt" => compare(field, operand) == Some(Ordering::Less),
            "$lte" => matches!(compare(field, operand), Some(Ordering::Less | Ordering::Equal)),
            "$in" => set_operand(op, operand)?.iter().any(|v| equals(field, v)),
            "$nin" => !set_operand(op, operand)?.iter().any(|v| equals(field, v)),
            "$exists" => {
                let wanted = operand.as_bool().ok_or_else(|| {
                    RpcError::Validation("'$exists' expects a boolean".into())
                })?;
                field.is_some() == wanted
            }
            "$regex" => {
                let pattern = operand
                    .as_str()
                    .ok_or_else(|| RpcError::Validation("'$regex' expects a string".into()))?;
                let re = Regex::new(pattern)
                    .map_err(|e| RpcError::Validation(format!("invalid '$regex': {e}")))?;
                field
                    .and_then(Value::as_str)
                    .is_some_and(|s| re.is_match(s))
            }
            other => {
                return Err(RpcError::Validation(format!(
                    "unknown operator '{other}'"
                )))
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn set_operand<'a>(op: &str, operand: &'a Value) -> Result<&'a Vec<Value>> {
    operand
        .as_array()
        .ok_or_else(|| RpcError::Validation(format!("'{op}' expects an array")))
}

/// Equality, where an array field also matches any of its elements.
fn equals(field: Option<&Value>, expected: &Value) -> bool {
    match field {
        None => expected.is_null(),
        Some(value) if value == expected => true,
        Some(Value::Array(items)) => items.iter().any(|item| item == expected),
        Some(value) => numbers_equal(value, expected),
    }
}

fn numbers_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Ordering between values of the same kind; `None` across kinds.
fn compare(field: Option<&Value>, operand: &Value) -> Option<Ordering> {
    match (field?, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn kind_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

/// Total order used for sorting: missing or null, then bool, number, string, array, object.
pub fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    kind_rank(a).cmp(&kind_rank(b)).then_with(|| match (a, b) {
        (Some(x), Some(y)) => compare(Some(x), y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    })
}
