//! Value utility functions shared across modules
//!
//! This module provides nested field access for expression evaluation and
//! sort-key traversal, the canonical total order over values, and the
//! canonical string used as a group key.

use crate::decimal::Decimal;
use crate::value::{Document, Value};
use std::cmp::Ordering;

/// Evaluate a field path the way aggregation expressions do
///
/// Arrays met along the path are traversed: the result is an array of the
/// results for each element, with missing results dropped and scalar
/// elements skipped. Returns `None` when the path is missing.
pub fn evaluate_path(doc: &Document, path: &str) -> Option<Value> {
    let parts: Vec<&str> = path.split('.').collect();
    let (first, rest) = parts.split_first()?;
    let value = doc.get(first)?;
    evaluate_parts(value, rest)
}

fn evaluate_parts(value: &Value, parts: &[&str]) -> Option<Value> {
    let Some((first, rest)) = parts.split_first() else {
        return Some(value.clone());
    };

    match value {
        Value::Document(doc) => evaluate_parts(doc.get(first)?, rest),
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .filter(|item| matches!(item, Value::Document(_) | Value::Array(_)))
                .filter_map(|item| evaluate_parts(item, parts))
                .collect(),
        )),
        _ => None,
    }
}

/// Collect every leaf a sort path reaches
///
/// Arrays along the path are traversed element by element; numeric path
/// components additionally index into arrays. A terminal array contributes
/// each of its elements (one level), so an empty terminal array contributes
/// nothing.
pub fn collect_sort_leaves<'a>(doc: &'a Document, path: &str, out: &mut Vec<&'a Value>) {
    let parts: Vec<&str> = path.split('.').collect();
    let Some((first, rest)) = parts.split_first() else {
        return;
    };
    if let Some(value) = doc.get(first) {
        collect_leaves(value, rest, out);
    }
}

fn collect_leaves<'a>(value: &'a Value, parts: &[&str], out: &mut Vec<&'a Value>) {
    let Some((first, rest)) = parts.split_first() else {
        match value {
            Value::Array(items) => out.extend(items.iter()),
            other => out.push(other),
        }
        return;
    };

    match value {
        Value::Document(doc) => {
            if let Some(next) = doc.get(first) {
                collect_leaves(next, rest, out);
            }
        }
        Value::Array(items) => {
            if let Ok(index) = first.parse::<usize>() {
                if let Some(item) = items.get(index) {
                    collect_leaves(item, rest, out);
                }
            }
            for item in items {
                if let Value::Document(_) = item {
                    collect_leaves(item, parts, out);
                }
            }
        }
        _ => {}
    }
}

/// Rank of a value's type in the canonical cross-type order
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 1,
        Value::Int32(_) | Value::Int64(_) | Value::Double(_) | Value::Decimal(_) => 2,
        Value::String(_) => 3,
        Value::Document(_) => 4,
        Value::Array(_) => 5,
        Value::Bool(_) => 8,
    }
}

/// Compare two values in the canonical total order
///
/// Null < numbers < strings < documents < arrays < booleans. Numbers compare
/// by numeric value regardless of their width; doubles meet decimals at 34
/// significant digits. NaN sorts below every other number and equals itself.
///
/// # Examples
///
/// ```
/// use std::cmp::Ordering;
/// use ironagg_core::value::Value;
/// use ironagg_core::value_utils::compare_values;
///
/// assert_eq!(compare_values(&Value::Int32(10), &Value::Double(5.5)), Ordering::Greater);
/// assert_eq!(compare_values(&Value::Null, &Value::Int32(0)), Ordering::Less);
/// assert_eq!(compare_values(&Value::from("a"), &Value::Int32(1)), Ordering::Greater);
/// ```
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let rank_order = type_rank(a).cmp(&type_rank(b));
    if rank_order != Ordering::Equal {
        return rank_order;
    }

    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::String(s1), Value::String(s2)) => s1.as_bytes().cmp(s2.as_bytes()),
        (Value::Bool(b1), Value::Bool(b2)) => b1.cmp(b2),
        (Value::Document(d1), Value::Document(d2)) => compare_documents(d1, d2),
        (Value::Array(a1), Value::Array(a2)) => compare_sequences(a1, a2),
        _ => compare_numbers(a, b),
    }
}

fn compare_sequences(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let order = compare_values(x, y);
        if order != Ordering::Equal {
            return order;
        }
    }
    a.len().cmp(&b.len())
}

fn compare_documents(a: &Document, b: &Document) -> Ordering {
    for ((name_a, value_a), (name_b, value_b)) in a.iter().zip(b.iter()) {
        let order = type_rank(value_a)
            .cmp(&type_rank(value_b))
            .then_with(|| name_a.as_bytes().cmp(name_b.as_bytes()))
            .then_with(|| compare_values(value_a, value_b));
        if order != Ordering::Equal {
            return order;
        }
    }
    a.len().cmp(&b.len())
}

fn compare_numbers(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int32(x), Value::Int32(y)) => x.cmp(y),
        (Value::Int32(_) | Value::Int64(_), Value::Int32(_) | Value::Int64(_)) => {
            integer_of(a).cmp(&integer_of(b))
        }
        (Value::Double(x), Value::Double(y)) => compare_doubles(*x, *y),
        (Value::Double(x), Value::Int32(_) | Value::Int64(_)) => {
            compare_double_to_integer(*x, integer_of(b))
        }
        (Value::Int32(_) | Value::Int64(_), Value::Double(y)) => {
            compare_double_to_integer(*y, integer_of(a)).reverse()
        }
        _ => decimal_of(a).total_cmp(&decimal_of(b)),
    }
}

fn integer_of(value: &Value) -> i64 {
    match value {
        Value::Int32(i) => *i as i64,
        Value::Int64(i) => *i,
        _ => 0,
    }
}

fn decimal_of(value: &Value) -> Decimal {
    match value {
        Value::Int32(i) => Decimal::from_i64(*i as i64),
        Value::Int64(i) => Decimal::from_i64(*i),
        Value::Double(d) => Decimal::from_f64(*d),
        Value::Decimal(d) => *d,
        _ => Decimal::nan(),
    }
}

fn compare_doubles(x: f64, y: f64) -> Ordering {
    match (x.is_nan(), y.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        // -0.0 == 0.0 here, unlike f64::total_cmp
        (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
    }
}

/// Exact comparison of a double against a 64-bit integer
fn compare_double_to_integer(x: f64, i: i64) -> Ordering {
    const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
    if x.is_nan() {
        return Ordering::Less;
    }
    if x >= TWO_POW_63 {
        return Ordering::Greater;
    }
    if x < -TWO_POW_63 {
        return Ordering::Less;
    }
    let truncated = x.trunc() as i64;
    match truncated.cmp(&i) {
        Ordering::Equal => compare_doubles(x.fract(), 0.0),
        other => other,
    }
}

/// Canonical string representation used to group values
///
/// Numerically equal values of different widths share a key, so `1`,
/// `1.0`, `NumberLong(1)` and `Decimal("1.00")` land in the same group.
/// Document keys keep their field order, as the database compares them.
///
/// # Examples
///
/// ```
/// use ironagg_core::value::Value;
/// use ironagg_core::value_utils::canonical_key;
///
/// assert_eq!(canonical_key(&Value::Int32(1)), canonical_key(&Value::Double(1.0)));
/// assert_ne!(canonical_key(&Value::Int32(1)), canonical_key(&Value::from("1")));
/// ```
pub fn canonical_key(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("b:{}", b),
        Value::Int32(_) | Value::Int64(_) | Value::Double(_) | Value::Decimal(_) => {
            format!("n:{}", decimal_of(value).canonical_string())
        }
        Value::String(s) => format!("s:{:?}", s),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_key).collect();
            format!("[{}]", inner.join(","))
        }
        Value::Document(doc) => {
            let inner: Vec<String> = doc
                .iter()
                .map(|(name, value)| format!("{:?}:{}", name, canonical_key(value)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(json: serde_json::Value) -> Document {
        Document::from_json(&json).unwrap()
    }

    fn val(json: serde_json::Value) -> Value {
        Value::from_json(&json).unwrap()
    }

    #[test]
    fn test_evaluate_path_traverses_arrays() {
        let d = doc(json!({"a": [{"b": 1}, {"c": 2}, 7, {"b": 3}]}));
        assert_eq!(evaluate_path(&d, "a.b"), Some(val(json!([1, 3]))));
        assert_eq!(evaluate_path(&d, "a.z"), Some(val(json!([]))));
        assert_eq!(evaluate_path(&d, "z"), None);

        let scalar = doc(json!({"a": 5}));
        assert_eq!(evaluate_path(&scalar, "a.b"), None);
    }

    #[test]
    fn test_collect_sort_leaves() {
        let d = doc(json!({"a": [{"b": 1}, {"b": 99}]}));
        let mut leaves = Vec::new();
        collect_sort_leaves(&d, "a.b", &mut leaves);
        assert_eq!(leaves, vec![&Value::Int32(1), &Value::Int32(99)]);

        let d = doc(json!({"a": [6, 1]}));
        let mut leaves = Vec::new();
        collect_sort_leaves(&d, "a", &mut leaves);
        assert_eq!(leaves.len(), 2);

        let d = doc(json!({"a": []}));
        let mut leaves = Vec::new();
        collect_sort_leaves(&d, "a", &mut leaves);
        assert!(leaves.is_empty());
    }

    #[test]
    fn test_collect_sort_leaves_numeric_component() {
        let d = doc(json!({"a": [{"b": 4}, {"b": 5}]}));
        let mut leaves = Vec::new();
        collect_sort_leaves(&d, "a.1.b", &mut leaves);
        assert_eq!(leaves, vec![&Value::Int32(5)]);
    }

    #[test]
    fn test_compare_numbers_across_widths() {
        assert_eq!(
            compare_values(&Value::Int32(5), &Value::Int64(5)),
            Ordering::Equal
        );
        assert_eq!(
            compare_values(&Value::Int64(i64::MAX), &Value::Double(9.223372036854776e18)),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&Value::Double(2.5), &Value::Int32(2)),
            Ordering::Greater
        );
        assert_eq!(
            compare_values(&val(json!({"$numberDecimal": "0.1"})), &Value::Double(0.1)),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&Value::Double(f64::NAN), &Value::Int32(i32::MIN)),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&Value::Double(f64::NAN), &Value::Double(f64::NAN)),
            Ordering::Equal
        );
    }

    #[test]
    fn test_compare_type_order() {
        let ordered = [
            Value::Null,
            Value::Double(f64::NEG_INFINITY),
            Value::Int32(3),
            Value::from("abc"),
            val(json!({"a": 1})),
            val(json!([1])),
            Value::Bool(false),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(compare_values(&pair[0], &pair[1]), Ordering::Less, "{:?}", pair);
        }
    }

    #[test]
    fn test_compare_arrays_and_documents() {
        assert_eq!(
            compare_values(&val(json!([1, 2])), &val(json!([1, 2, 0]))),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&val(json!({"a": 1})), &val(json!({"b": 0}))),
            Ordering::Less
        );
    }

    #[test]
    fn test_canonical_key_groups_numeric_widths() {
        let keys: Vec<String> = [
            Value::Int32(1),
            Value::Int64(1),
            Value::Double(1.0),
            val(json!({"$numberDecimal": "1.00"})),
        ]
        .iter()
        .map(canonical_key)
        .collect();
        assert!(keys.windows(2).all(|w| w[0] == w[1]));
        assert_ne!(canonical_key(&Value::Null), canonical_key(&Value::from("null")));
        assert_eq!(
            canonical_key(&val(json!({"x": 2, "y": [1]}))),
            canonical_key(&val(json!({"x": 2.0, "y": [1.0]})))
        );
    }
}
