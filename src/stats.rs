//! Totals extracted from Tautulli's graph payloads.
//!
//! `get_plays_by_date` does not have one stable shape across Tautulli
//! versions. A payload is classified structurally and each shape has its own
//! extraction rule. The deep traversal at the end is a heuristic: it finds a
//! number when the shape is unknown, it does not guarantee a correct parse.

use serde::Serialize;
use serde_json::Value;

/// Structural classification of a labelled series payload.
#[derive(Debug)]
pub enum SeriesShape<'a> {
    /// `[{ "Movies": 3, "TV": 2 }, ...]`
    FlatRows(&'a [Value]),
    /// `{ "series": [{ "label"|"name": .., "data": [..] }], "data": [..] }`
    NamedBuckets {
        root: &'a Value,
        buckets: Vec<&'a Value>,
    },
    /// Any other object; searched key by key.
    OpaqueTree(&'a Value),
    /// Scalars and null carry no totals.
    Empty,
}

impl<'a> SeriesShape<'a> {
    pub fn detect(payload: &'a Value) -> Self {
        match payload {
            Value::Array(rows) => Self::FlatRows(rows),
            Value::Object(root) => {
                let buckets: Vec<&Value> = ["series", "data"]
                    .iter()
                    .filter_map(|k| root.get(*k).and_then(Value::as_array))
                    .flatten()
                    .collect();
                if buckets.is_empty() {
                    Self::OpaqueTree(payload)
                } else {
                    Self::NamedBuckets {
                        root: payload,
                        buckets,
                    }
                }
            }
            _ => Self::Empty,
        }
    }
}

/// Case-insensitive total for `label` in a Tautulli series payload.
pub fn sum_for_label(payload: &Value, label: &str) -> f64 {
    let wanted = label.to_lowercase();
    match SeriesShape::detect(payload) {
        SeriesShape::FlatRows(rows) => rows
            .iter()
            .filter_map(Value::as_object)
            .flat_map(|row| row.iter())
            .filter(|(k, _)| k.to_lowercase() == wanted)
            .map(|(_, v)| coerce(v))
            .sum(),
        SeriesShape::NamedBuckets { root, buckets } => {
            let points = buckets
                .into_iter()
                .find(|b| bucket_label(b).to_lowercase() == wanted)
                .and_then(|b| b.get("data"))
                .and_then(Value::as_array);
            match points {
                Some(points) => points.iter().map(point_value).sum(),
                None => deep_sum(std::iter::once(root), &wanted),
            }
        }
        SeriesShape::OpaqueTree(tree) => deep_sum(std::iter::once(tree), &wanted),
        SeriesShape::Empty => 0.0,
    }
}

/// `label`, falling back to `name` when `label` is missing, empty or zero.
fn bucket_label(bucket: &Value) -> String {
    ["label", "name"]
        .iter()
        .filter_map(|k| bucket.get(*k))
        .find_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) if n.as_f64().is_some_and(|f| f != 0.0) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_default()
}

/// A bucket point: bare number, `[x, y]`, or `{ y | value | count }`.
fn point_value(point: &Value) -> f64 {
    match point {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::Array(pair) => pair.get(1).map(coerce).unwrap_or(0.0),
        Value::Object(obj) => ["y", "value", "count"]
            .iter()
            .find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
            .map(coerce)
            .unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Depth-first walk summing every value stored under a matching key.
fn deep_sum<'a>(roots: impl Iterator<Item = &'a Value>, wanted: &str) -> f64 {
    let mut total = 0.0;
    let mut stack: Vec<&Value> = roots.collect();
    while let Some(current) = stack.pop() {
        match current {
            Value::Array(items) => stack.extend(items),
            Value::Object(obj) => {
                for (k, v) in obj {
                    if k.to_lowercase() == wanted {
                        total += coerce(v);
                    }
                    if v.is_object() || v.is_array() {
                        stack.push(v);
                    }
                }
            }
            _ => {}
        }
    }
    total
}

/// Lenient numeric coercion: numbers, numeric strings, booleans; else zero.
pub fn coerce(value: &Value) -> f64 {
    let n = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                0.0
            } else {
                s.parse::<f64>().unwrap_or(0.0)
            }
        }
        Value::Bool(b) => f64::from(u8::from(*b)),
        _ => 0.0,
    };
    if n.is_finite() {
        n
    } else {
        0.0
    }
}

/// Play and duration totals for the trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Totals {
    pub movies: f64,
    pub episodes: f64,
    pub total_plays: f64,
    pub total_time_seconds: f64,
}

impl Totals {
    pub const MOVIES_LABEL: &'static str = "Movies";
    pub const TV_LABEL: &'static str = "TV";

    pub fn from_series(plays: &Value, durations: &Value) -> Self {
        let movies = sum_for_label(plays, Self::MOVIES_LABEL);
        let episodes = sum_for_label(plays, Self::TV_LABEL);
        let seconds = sum_for_label(durations, Self::MOVIES_LABEL)
            + sum_for_label(durations, Self::TV_LABEL);
        Self {
            movies,
            episodes,
            total_plays: movies + episodes,
            total_time_seconds: seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flat_rows_sum_matching_columns() {
        let payload = json!([{ "Movies": 3, "TV": 2 }, { "Movies": 5 }]);
        assert_eq!(sum_for_label(&payload, "Movies"), 8.0);
        assert_eq!(sum_for_label(&payload, "tv"), 2.0);
    }

    #[test]
    fn flat_rows_coerce_strings_and_skip_junk() {
        let payload = json!([{ "movies": "4" }, "not a row", null, { "MOVIES": "n/a", "TV": 1 }]);
        assert_eq!(sum_for_label(&payload, "Movies"), 4.0);
    }

    #[test]
    fn named_bucket_matches_case_insensitively() {
        let payload = json!({ "series": [{ "label": "TV", "data": [1, 2, 3] }] });
        assert_eq!(sum_for_label(&payload, "tv"), 6.0);
    }

    #[test]
    fn bucket_points_in_every_supported_form() {
        let payload = json!({
            "categories": ["2024-01-01", "2024-01-02"],
            "series": [
                { "name": "Movies", "data": [2, [0, 3], { "y": 4 }, { "value": "5" }, { "count": 1 }, null, "x"] },
                { "name": "TV", "data": [100] }
            ]
        });
        assert_eq!(sum_for_label(&payload, "Movies"), 15.0);
    }

    #[test]
    fn zero_label_falls_back_to_name() {
        let payload = json!({ "series": [{ "label": 0, "name": "Movies", "data": [1, 3] }] });
        assert_eq!(sum_for_label(&payload, "Movies"), 4.0);
        let payload = json!({ "series": [{ "label": 2024, "name": "Movies", "data": [1, 3] }] });
        assert_eq!(sum_for_label(&payload, "2024"), 4.0);
    }

    #[test]
    fn buckets_under_data_key_are_searched_too() {
        let payload = json!({ "data": [{ "label": "Music", "data": [9] }, { "label": "Movies", "data": [1, 1] }] });
        assert_eq!(sum_for_label(&payload, "movies"), 2.0);
    }

    #[test]
    fn unmatched_bucket_falls_back_to_deep_search() {
        let payload = json!({
            "series": [{ "label": "Music", "data": [9] }],
            "extra": { "Movies": 7 },
            "movies": 1
        });
        assert_eq!(sum_for_label(&payload, "Movies"), 8.0);
    }

    #[test]
    fn deep_traversal_sums_every_occurrence() {
        let payload = json!({ "a": { "b": { "Movies": 4 } }, "Movies": 1 });
        assert_eq!(sum_for_label(&payload, "Movies"), 5.0);
    }

    #[test]
    fn non_containers_are_zero() {
        assert_eq!(sum_for_label(&Value::Null, "Movies"), 0.0);
        assert_eq!(sum_for_label(&json!("oops"), "Movies"), 0.0);
        assert_eq!(sum_for_label(&json!(42), "Movies"), 0.0);
    }

    #[test]
    fn totals_combine_plays_and_duration() {
        let plays = json!({ "series": [
            { "name": "Movies", "data": [1, 2] },
            { "name": "TV", "data": [3, 4] }
        ] });
        let durations = json!([{ "Movies": 3600, "TV": 1800 }, { "TV": 1200 }]);
        let totals = Totals::from_series(&plays, &durations);
        assert_eq!(
            totals,
            Totals {
                movies: 3.0,
                episodes: 7.0,
                total_plays: 10.0,
                total_time_seconds: 6600.0,
            }
        );
    }
}
