//! Update Expression Application
//!
//! Applies an update expression to a document, producing a new document.
//! Operators run in a fixed order: `$set`, `$unset`, `$inc`, `$push`,
//! `$pull`, `$addToSet`. Top-level keys that are not operators are
//! treated as implicit `$set` assignments.

use serde_json::Value;

use crate::Document;
use crate::filter::values_equal;

/// Apply an update expression to `doc`, returning the updated document.
/// The input is left untouched; callers decide whether to persist.
pub fn apply_update(doc: &Document, update: &Document) -> Document {
    let mut out = doc.clone();

    for (key, value) in update.iter().filter(|(k, _)| !k.starts_with('$')) {
        out.insert(key.clone(), value.clone());
    }

    if let Some(Value::Object(fields)) = update.get("$set") {
        for (key, value) in fields {
            out.insert(key.clone(), value.clone());
        }
    }

    if let Some(Value::Object(fields)) = update.get("$unset") {
        for key in fields.keys() {
            out.remove(key);
        }
    }

    if let Some(Value::Object(fields)) = update.get("$inc") {
        for (key, delta) in fields {
            inc_field(&mut out, key, delta);
        }
    }

    if let Some(Value::Object(fields)) = update.get("$push") {
        for (key, value) in fields {
            push_field(&mut out, key, value.clone());
        }
    }

    if let Some(Value::Object(fields)) = update.get("$pull") {
        for (key, value) in fields {
            if let Some(Value::Array(items)) = out.get_mut(key) {
                items.retain(|item| !values_equal(item, value));
            }
        }
    }

    if let Some(Value::Object(fields)) = update.get("$addToSet") {
        for (key, value) in fields {
            add_to_set(&mut out, key, value.clone());
        }
    }

    out
}

/// Add a numeric delta, creating the field at the delta value if absent.
/// A non-numeric existing value is left untouched.
fn inc_field(doc: &mut Document, key: &str, delta: &Value) {
    let Some(delta) = delta.as_f64() else { return };
    match doc.get(key) {
        None => {
            doc.insert(key.to_string(), number(delta));
        }
        Some(Value::Number(current)) => {
            let sum = current.as_f64().unwrap_or(0.0) + delta;
            doc.insert(key.to_string(), number(sum));
        }
        Some(_) => {}
    }
}

fn push_field(doc: &mut Document, key: &str, value: Value) {
    match doc.get_mut(key) {
        Some(Value::Array(items)) => items.push(value),
        Some(_) => {}
        None => {
            doc.insert(key.to_string(), Value::Array(vec![value]));
        }
    }
}

fn add_to_set(doc: &mut Document, key: &str, value: Value) {
    match doc.get_mut(key) {
        Some(Value::Array(items)) => {
            if !items.iter().any(|item| values_equal(item, &value)) {
                items.push(value);
            }
        }
        Some(_) => {}
        None => {
            doc.insert(key.to_string(), Value::Array(vec![value]));
        }
    }
}

/// Keep whole results integral so counters stay integers.
fn number(v: f64) -> Value {
    if v.fract() == 0.0 && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
        Value::from(v as i64)
    } else {
        serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn set_overwrites_and_creates() {
        let d = doc(json!({"a": 1}));
        let out = apply_update(&d, &doc(json!({"$set": {"a": 2, "b": "x"}})));
        assert_eq!(out, doc(json!({"a": 2, "b": "x"})));
        // Original untouched.
        assert_eq!(d, doc(json!({"a": 1})));
    }

    #[test]
    fn bare_fields_are_implicit_set() {
        let out = apply_update(&doc(json!({"a": 1})), &doc(json!({"b": 2})));
        assert_eq!(out, doc(json!({"a": 1, "b": 2})));
    }

    #[test]
    fn unset_removes_fields() {
        let out = apply_update(
            &doc(json!({"a": 1, "b": 2})),
            &doc(json!({"$unset": {"b": ""}})),
        );
        assert_eq!(out, doc(json!({"a": 1})));
    }

    #[test]
    fn inc_creates_missing_field_at_delta() {
        let out = apply_update(&doc(json!({})), &doc(json!({"$inc": {"count": 1}})));
        assert_eq!(out, doc(json!({"count": 1})));
    }

    #[test]
    fn inc_adds_to_existing_number() {
        let out = apply_update(
            &doc(json!({"count": 4})),
            &doc(json!({"$inc": {"count": -1}})),
        );
        assert_eq!(out, doc(json!({"count": 3})));
    }

    #[test]
    fn inc_ignores_non_numeric_fields() {
        let out = apply_update(
            &doc(json!({"count": "many"})),
            &doc(json!({"$inc": {"count": 1}})),
        );
        assert_eq!(out, doc(json!({"count": "many"})));
    }

    #[test]
    fn push_appends_and_creates() {
        let update = doc(json!({"$push": {"tags": "x"}}));
        let once = apply_update(&doc(json!({})), &update);
        assert_eq!(once, doc(json!({"tags": ["x"]})));
        let twice = apply_update(&once, &update);
        assert_eq!(twice, doc(json!({"tags": ["x", "x"]})));
    }

    #[test]
    fn pull_removes_all_equal_elements() {
        let out = apply_update(
            &doc(json!({"tags": ["a", "b", "a"]})),
            &doc(json!({"$pull": {"tags": "a"}})),
        );
        assert_eq!(out, doc(json!({"tags": ["b"]})));
    }

    #[test]
    fn add_to_set_deduplicates() {
        let update = doc(json!({"$addToSet": {"tags": "x"}}));
        let once = apply_update(&doc(json!({})), &update);
        let twice = apply_update(&once, &update);
        assert_eq!(twice, doc(json!({"tags": ["x"]})));
    }

    #[test]
    fn operators_apply_in_fixed_order() {
        // $set writes the field, $inc then bumps it.
        let out = apply_update(
            &doc(json!({})),
            &doc(json!({"$inc": {"n": 1}, "$set": {"n": 10}})),
        );
        assert_eq!(out, doc(json!({"n": 11})));
    }
}
