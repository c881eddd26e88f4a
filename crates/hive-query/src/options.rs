//! Result-Set Options
//!
//! Sorting and pagination applied to a materialized result list, plus
//! the options object accepted by `findWithOptions`/`findOneAndUpdate`.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Document;

/// Sort direction for a `sort` field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Options accepted by find-style operations.
///
/// `page` is 1-based; `limit` without `page` simply caps the result.
/// `return_new` selects the post-update document in `findOneAndUpdate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FindOptions {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub sort: Option<String>,
    pub order: Option<SortOrder>,
    pub return_new: Option<bool>,
}

/// Sort and paginate a result list.
pub fn apply_options(mut docs: Vec<Document>, options: &FindOptions) -> Vec<Document> {
    if let Some(field) = &options.sort {
        let order = options.order.unwrap_or_default();
        docs.sort_by(|a, b| {
            let ordering = order_values(a.get(field.as_str()), b.get(field.as_str()));
            match order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });
    }

    let skip = match (options.page, options.limit) {
        (Some(page), Some(limit)) => page.saturating_sub(1).saturating_mul(limit),
        _ => 0,
    } as usize;
    let take = options.limit.map_or(usize::MAX, |l| l as usize);

    docs.into_iter().skip(skip).take(take).collect()
}

/// Total order over JSON values: missing < null < bool < number <
/// string < array < object; within a type, the natural order where one
/// exists.
fn order_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(Value::Array(_)) => 5,
            Some(Value::Object(_)) => 6,
        }
    }

    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs(values: &[serde_json::Value]) -> Vec<Document> {
        values
            .iter()
            .map(|v| match v {
                Value::Object(map) => map.clone(),
                other => panic!("expected object, got {other:?}"),
            })
            .collect()
    }

    #[test]
    fn sorts_ascending_by_default() {
        let input = docs(&[json!({"n": 3}), json!({"n": 1}), json!({"n": 2})]);
        let options = FindOptions {
            sort: Some("n".into()),
            ..Default::default()
        };
        let out = apply_options(input, &options);
        let values: Vec<i64> = out.iter().map(|d| d["n"].as_i64().unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn sorts_descending() {
        let input = docs(&[json!({"n": 1}), json!({"n": 3}), json!({"n": 2})]);
        let options = FindOptions {
            sort: Some("n".into()),
            order: Some(SortOrder::Desc),
            ..Default::default()
        };
        let out = apply_options(input, &options);
        let values: Vec<i64> = out.iter().map(|d| d["n"].as_i64().unwrap()).collect();
        assert_eq!(values, vec![3, 2, 1]);
    }

    #[test]
    fn missing_sort_field_sorts_first() {
        let input = docs(&[json!({"n": 1}), json!({})]);
        let options = FindOptions {
            sort: Some("n".into()),
            ..Default::default()
        };
        let out = apply_options(input, &options);
        assert!(out[0].get("n").is_none());
    }

    #[test]
    fn paginates_one_based() {
        let input = docs(&[
            json!({"n": 1}),
            json!({"n": 2}),
            json!({"n": 3}),
            json!({"n": 4}),
            json!({"n": 5}),
        ]);
        let options = FindOptions {
            page: Some(2),
            limit: Some(2),
            ..Default::default()
        };
        let out = apply_options(input, &options);
        let values: Vec<i64> = out.iter().map(|d| d["n"].as_i64().unwrap()).collect();
        assert_eq!(values, vec![3, 4]);
    }

    #[test]
    fn limit_without_page_caps_results() {
        let input = docs(&[json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]);
        let options = FindOptions {
            limit: Some(2),
            ..Default::default()
        };
        assert_eq!(apply_options(input, &options).len(), 2);
    }

    #[test]
    fn options_deserialize_from_wire_shape() {
        let options: FindOptions =
            serde_json::from_value(json!({"page": 1, "limit": 10, "sort": "age", "order": "desc", "returnNew": true}))
                .unwrap();
        assert_eq!(options.page, Some(1));
        assert_eq!(options.order, Some(SortOrder::Desc));
        assert_eq!(options.return_new, Some(true));
    }
}
