//! Condition evaluator: a single (attribute, operator, value) boolean test.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    Gte,
    Lte,
    In,
    NotIn,
    Exists,
    NotExists,
    Matches,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub attribute: String,
    pub operator: Operator,
    pub value: Value,
}

/// `toString` coercion rule: null -> "", primitives -> lexical form,
/// anything else -> its natural (JSON) rendering.
pub fn to_string_form(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn as_sequence(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        _ => None,
    }
}

fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Evaluate one condition against a (possibly absent) attribute value.
///
/// `attribute_value` is `None` when the attribute key is missing from the
/// evaluation context entirely; `Some(Value::Null)` when present but null.
/// Both count as "absent" for `exists`/`not_exists`.
pub fn matches(attribute_value: Option<&Value>, operator: Operator, condition_value: &Value) -> bool {
    use Operator::*;

    if matches!(operator, Exists | NotExists) {
        let present = matches!(attribute_value, Some(v) if !v.is_null());
        return if operator == Exists { present } else { !present };
    }

    let attr = attribute_value.cloned().unwrap_or(Value::Null);

    match operator {
        Equals => to_string_form(&attr) == to_string_form(condition_value),
        NotEquals => to_string_form(&attr) != to_string_form(condition_value),
        Contains => match as_sequence(&attr) {
            Some(items) => items.iter().any(|v| to_string_form(v) == to_string_form(condition_value)),
            None => to_string_form(&attr).contains(&to_string_form(condition_value)),
        },
        NotContains => !matches(attribute_value, Contains, condition_value),
        StartsWith => to_string_form(&attr).starts_with(&to_string_form(condition_value)),
        EndsWith => to_string_form(&attr).ends_with(&to_string_form(condition_value)),
        GreaterThan => match (to_f64(&attr), to_f64(condition_value)) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        LessThan => match (to_f64(&attr), to_f64(condition_value)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
        Gte => match (to_f64(&attr), to_f64(condition_value)) {
            (Some(a), Some(b)) => a >= b,
            _ => false,
        },
        Lte => match (to_f64(&attr), to_f64(condition_value)) {
            (Some(a), Some(b)) => a <= b,
            _ => false,
        },
        In => match as_sequence(condition_value) {
            Some(items) => items.iter().any(|v| to_string_form(v) == to_string_form(&attr)),
            None => false,
        },
        NotIn => !matches(attribute_value, In, condition_value),
        Matches => match condition_value.as_str() {
            Some(pattern) => Regex::new(pattern)
                .map(|re| re.is_match(&to_string_form(&attr)))
                .unwrap_or(false),
            None => false,
        },
        Exists | NotExists => unreachable!("handled above"),
    }
}

/// AND-combine a rule's conditions against a flat attribute map.
///
/// An empty condition list matches unconditionally.
pub fn matches_all(conditions: &[Condition], attributes: &serde_json::Map<String, Value>) -> bool {
    conditions
        .iter()
        .all(|c| matches(attributes.get(&c.attribute), c.operator, &c.value))
}
