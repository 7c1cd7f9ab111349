//! JSON value helpers shared by the translator, validator and reference store
//!
//! Paths are given as segment slices, never as dotted strings, so a key that
//! itself contains a dot is addressed unambiguously.

use serde_json::Value;
use std::cmp::Ordering;

/// Follow `segments` through objects and (by numeric segment) arrays.
///
/// ```
/// use serde_json::json;
/// use docrepo_core::value_utils::get_path;
///
/// let doc = json!({"company": {"name": "Acme"}, "skills": ["rust", "sql"]});
/// assert_eq!(get_path(&doc, &["company", "name"]), Some(&json!("Acme")));
/// assert_eq!(get_path(&doc, &["skills", "1"]), Some(&json!("sql")));
/// ```
pub fn get_path<'a, S: AsRef<str>>(doc: &'a Value, segments: &[S]) -> Option<&'a Value> {
    let mut value = doc;
    for segment in segments {
        let segment = segment.as_ref();
        match value {
            Value::Object(map) => value = map.get(segment)?,
            Value::Array(arr) => value = arr.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        }
    }
    Some(value)
}

/// Set the value at `segments`, creating intermediate objects as needed.
///
/// Returns `false` (leaving `doc` untouched) when a non-object value sits on
/// the way.
///
/// ```
/// use serde_json::json;
/// use docrepo_core::value_utils::set_path;
///
/// let mut doc = json!({"name": "Alice"});
/// assert!(set_path(&mut doc, &["address", "city"], json!("NYC")));
/// assert_eq!(doc["address"]["city"], "NYC");
/// ```
pub fn set_path<S: AsRef<str>>(doc: &mut Value, segments: &[S], value: Value) -> bool {
    let Some((last, parents)) = segments.split_last() else {
        return false;
    };

    let mut current = doc;
    for segment in parents {
        let Value::Object(map) = current else {
            return false;
        };
        current = map
            .entry(segment.as_ref().to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }

    match current {
        Value::Object(map) => {
            map.insert(last.as_ref().to_string(), value);
            true
        }
        _ => false,
    }
}

/// Equality match with document-store semantics.
///
/// An array met on the way is searched element-wise (`skills.name` matches if
/// any element's `name` equals `expected`), and an array at the leaf matches
/// when it equals `expected` or contains it.
pub fn path_matches<S: AsRef<str>>(doc: &Value, segments: &[S], expected: &Value) -> bool {
    let Some((head, rest)) = segments.split_first() else {
        return leaf_matches(doc, expected);
    };
    let head = head.as_ref();

    match doc {
        Value::Object(map) => match map.get(head) {
            Some(next) => path_matches(next, rest, expected),
            None => expected.is_null() && rest.is_empty(),
        },
        Value::Array(arr) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(next) = arr.get(index) {
                    if path_matches(next, rest, expected) {
                        return true;
                    }
                }
            }
            arr.iter()
                .any(|element| element.is_object() && path_matches(element, segments, expected))
        }
        _ => false,
    }
}

fn leaf_matches(value: &Value, expected: &Value) -> bool {
    if values_equal(value, expected) {
        return true;
    }
    match value {
        Value::Array(arr) => arr.iter().any(|element| values_equal(element, expected)),
        _ => false,
    }
}

/// Structural equality where `10` and `10.0` are the same number.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i == j,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map_or(false, |other| values_equal(v, other)))
        }
        _ => a == b,
    }
}

/// Add two JSON numbers, keeping integers integral.
///
/// ```
/// use serde_json::json;
/// use docrepo_core::value_utils::add_numbers;
///
/// assert_eq!(add_numbers(&json!(10), &json!(5)), Some(json!(15)));
/// assert_eq!(add_numbers(&json!(1.5), &json!(1)), Some(json!(2.5)));
/// assert_eq!(add_numbers(&json!("a"), &json!(1)), None);
/// ```
pub fn add_numbers(current: &Value, delta: &Value) -> Option<Value> {
    if let (Some(a), Some(b)) = (current.as_i64(), delta.as_i64()) {
        return a.checked_add(b).map(Value::from);
    }
    let (a, b) = (current.as_f64()?, delta.as_f64()?);
    serde_json::Number::from_f64(a + b).map(Value::Number)
}

/// Ordering of two present values: numbers, strings and booleans compare
/// naturally, mixed types by type rank.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(n1), Value::Number(n2)) => {
            let f1 = n1.as_f64().unwrap_or(0.0);
            let f2 = n2.as_f64().unwrap_or(0.0);
            f1.partial_cmp(&f2).unwrap_or(Ordering::Equal)
        }
        (Value::String(s1), Value::String(s2)) => s1.cmp(s2),
        (Value::Bool(b1), Value::Bool(b2)) => b1.cmp(b2),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Missing values sort before any present value.
pub fn compare_values_with_none(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(av), Some(bv)) => compare_values(av, bv),
    }
}

// null < number < string < bool < object < array
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Bool(_) => 3,
        Value::Object(_) => 4,
        Value::Array(_) => 5,
    }
}
