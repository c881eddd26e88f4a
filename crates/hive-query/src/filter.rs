//! Filter Expression Matching
//!
//! A filter is a mapping from field name to either a literal value
//! (implicit equality) or an operator map (`{"$gte": 18, "$lt": 65}`).
//! All clauses are combined with implicit AND.

use std::cmp::Ordering;

use serde_json::Value;

use crate::Document;

/// Check whether a document matches a filter expression.
///
/// Every field clause must match. Missing fields never satisfy an
/// operator, with two exceptions: `$ne` and `$nin` against a defined
/// value hold for an absent field.
pub fn matches(doc: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(field, cond)| field_matches(doc.get(field), cond))
}

fn field_matches(value: Option<&Value>, cond: &Value) -> bool {
    if let Some(ops) = operator_map(cond) {
        ops.iter()
            .all(|(op, operand)| apply_operator(op, value, operand))
    } else {
        // Literal condition: implicit equality against a present field.
        value.is_some_and(|v| values_equal(v, cond))
    }
}

/// A condition is an operator map iff it is a non-empty object whose
/// keys all start with `$`. Anything else is a literal.
fn operator_map(cond: &Value) -> Option<&Document> {
    match cond {
        Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => {
            Some(map)
        }
        _ => None,
    }
}

fn apply_operator(op: &str, value: Option<&Value>, operand: &Value) -> bool {
    match op {
        "$eq" => value.is_some_and(|v| values_equal(v, operand)),
        "$ne" => !value.is_some_and(|v| values_equal(v, operand)),
        "$gt" => compare(value, operand) == Some(Ordering::Greater),
        "$gte" => matches!(
            compare(value, operand),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        "$lt" => compare(value, operand) == Some(Ordering::Less),
        "$lte" => matches!(
            compare(value, operand),
            Some(Ordering::Less | Ordering::Equal)
        ),
        "$in" => match (value, operand) {
            (Some(v), Value::Array(list)) => list.iter().any(|c| values_equal(v, c)),
            _ => false,
        },
        "$nin" => match operand {
            Value::Array(list) => !value.is_some_and(|v| list.iter().any(|c| values_equal(v, c))),
            _ => false,
        },
        "$contains" => string_test(value, operand, |s, n| s.contains(n)),
        "$startsWith" => string_test(value, operand, |s, n| s.starts_with(n)),
        "$endsWith" => string_test(value, operand, |s, n| s.ends_with(n)),
        // Unknown operators never match.
        _ => false,
    }
}

/// Ordered comparison is defined for number/number and string/string
/// pairs only; everything else is incomparable.
fn compare(value: Option<&Value>, operand: &Value) -> Option<Ordering> {
    match (value?, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}

/// Case-sensitive substring tests over string-typed values only.
fn string_test(value: Option<&Value>, operand: &Value, test: impl Fn(&str, &str) -> bool) -> bool {
    match (value, operand) {
        (Some(Value::String(s)), Value::String(needle)) => test(s, needle),
        _ => false,
    }
}

/// Equality with cross-representation numeric comparison (1 == 1.0).
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
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
    fn literal_equality() {
        let d = doc(json!({"name": "John", "age": 30}));
        assert!(matches(&d, &doc(json!({"name": "John"}))));
        assert!(matches(&d, &doc(json!({"name": "John", "age": 30}))));
        assert!(!matches(&d, &doc(json!({"name": "Jane"}))));
        assert!(!matches(&d, &doc(json!({"missing": "x"}))));
    }

    #[test]
    fn numeric_equality_crosses_representations() {
        let d = doc(json!({"age": 30}));
        assert!(matches(&d, &doc(json!({"age": 30.0}))));
    }

    #[test]
    fn range_operators() {
        let filter = doc(json!({"age": {"$gte": 18, "$lt": 65}}));
        assert!(matches(&doc(json!({"age": 30})), &filter));
        assert!(!matches(&doc(json!({"age": 70})), &filter));
        assert!(!matches(&doc(json!({"age": 10})), &filter));
        // Missing field never satisfies a range operator.
        assert!(!matches(&doc(json!({})), &filter));
    }

    #[test]
    fn string_operators_are_string_only() {
        let filter = doc(json!({"name": {"$contains": "oh"}}));
        assert!(matches(&doc(json!({"name": "John"})), &filter));
        assert!(!matches(&doc(json!({"name": 42})), &filter));
        assert!(!matches(&doc(json!({})), &filter));

        assert!(matches(
            &doc(json!({"name": "John"})),
            &doc(json!({"name": {"$startsWith": "Jo"}}))
        ));
        assert!(matches(
            &doc(json!({"name": "John"})),
            &doc(json!({"name": {"$endsWith": "hn"}}))
        ));
        assert!(!matches(
            &doc(json!({"name": "John"})),
            &doc(json!({"name": {"$startsWith": "jo"}}))
        ));
    }

    #[test]
    fn membership_operators() {
        let filter = doc(json!({"color": {"$in": ["red", "blue"]}}));
        assert!(matches(&doc(json!({"color": "red"})), &filter));
        assert!(!matches(&doc(json!({"color": "green"})), &filter));
        assert!(!matches(&doc(json!({})), &filter));

        let filter = doc(json!({"color": {"$nin": ["red", "blue"]}}));
        assert!(matches(&doc(json!({"color": "green"})), &filter));
        assert!(!matches(&doc(json!({"color": "red"})), &filter));
        // Absent field is "not in" any list.
        assert!(matches(&doc(json!({})), &filter));
    }

    #[test]
    fn not_equal_on_missing_field() {
        let filter = doc(json!({"status": {"$ne": "done"}}));
        assert!(matches(&doc(json!({"status": "open"})), &filter));
        assert!(matches(&doc(json!({})), &filter));
        assert!(!matches(&doc(json!({"status": "done"})), &filter));
    }

    #[test]
    fn multiple_operators_on_one_field_are_anded() {
        let filter = doc(json!({"name": {"$startsWith": "J", "$endsWith": "n"}}));
        assert!(matches(&doc(json!({"name": "John"})), &filter));
        assert!(!matches(&doc(json!({"name": "Jane"})), &filter));
    }

    #[test]
    fn nested_literal_matches_deeply() {
        let d = doc(json!({"owner": {"id": 7, "name": "ann"}}));
        assert!(matches(
            &d,
            &doc(json!({"owner": {"id": 7, "name": "ann"}}))
        ));
        assert!(!matches(&d, &doc(json!({"owner": {"id": 8}}))));
    }

    #[test]
    fn unknown_operator_never_matches() {
        assert!(!matches(
            &doc(json!({"age": 30})),
            &doc(json!({"age": {"$near": 30}}))
        ));
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(matches(&doc(json!({"a": 1})), &Document::new()));
        assert!(matches(&Document::new(), &Document::new()));
    }
}
