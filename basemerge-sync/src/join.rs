//! Key-equality right join.
//!
//! Every right row appears at least once, in right-row order. Each left row
//! sharing the right row's key yields one output row (fan-out, left order).
//! Fields named by the descriptor union but missing on a row are null.
//! Null or missing keys never match.

use std::collections::HashMap;

use serde_json::Value;

use basemerge_core::{FieldDescriptor, Row};

/// Right-join `left` onto `right` on `left_key` = `right_key`.
///
/// When both sides carry a field of the same name, the right value wins.
/// Output rows carry no store identifier.
pub fn right_join(
    left: &[Row],
    right: &[Row],
    left_key: &str,
    right_key: &str,
    fields: &[FieldDescriptor],
) -> Vec<Row> {
    let mut index: HashMap<String, Vec<&Row>> = HashMap::new();
    for row in left {
        if let Some(key) = key_of(row, left_key) {
            index.entry(key).or_default().push(row);
        }
    }

    let mut out = Vec::with_capacity(right.len());
    for r in right {
        let matches = key_of(r, right_key).and_then(|key| index.get(&key));
        match matches {
            Some(lefts) => {
                for l in lefts {
                    out.push(merge(Some(*l), r, fields));
                }
            }
            None => out.push(merge(None, r, fields)),
        }
    }
    out
}

/// Union of two field lists by name; first occurrence wins.
pub fn field_union(left: &[FieldDescriptor], right: &[FieldDescriptor]) -> Vec<FieldDescriptor> {
    let mut out: Vec<FieldDescriptor> = Vec::with_capacity(left.len() + right.len());
    for field in left.iter().chain(right) {
        if !out.iter().any(|f| f.name == field.name) {
            out.push(field.clone());
        }
    }
    out
}

fn merge(left: Option<&Row>, right: &Row, fields: &[FieldDescriptor]) -> Row {
    let mut row = Row::new();
    for field in fields {
        row.set(field.name.clone(), Value::Null);
    }
    if let Some(left) = left {
        row.fields
            .extend(left.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    row.fields
        .extend(right.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
    row
}

/// Canonical join key, or `None` for null / missing values.
fn key_of(row: &Row, key: &str) -> Option<String> {
    match row.get(key) {
        None | Some(Value::Null) => None,
        // Value serialization cannot fail: map keys are always strings.
        Some(value) => serde_json::to_string(value).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basemerge_core::FieldType;
    use rstest::rstest;
    use serde_json::json;

    fn row(value: Value) -> Row {
        Row::from_json(value).expect("object")
    }

    fn fields(names: &[&str]) -> Vec<FieldDescriptor> {
        names
            .iter()
            .map(|n| FieldDescriptor::new(*n, FieldType::SingleLineText))
            .collect()
    }

    #[test]
    fn right_join_fills_unmatched_with_null() {
        let left = vec![row(json!({"Concept Name": "A", "X": 1}))];
        let right = vec![
            row(json!({"Concept Name": "A", "Y": 2})),
            row(json!({"Concept Name": "B", "Y": 3})),
        ];
        let out = right_join(
            &left,
            &right,
            "Concept Name",
            "Concept Name",
            &fields(&["Concept Name", "X", "Y"]),
        );
        assert_eq!(
            out,
            vec![
                row(json!({"Concept Name": "A", "X": 1, "Y": 2})),
                row(json!({"Concept Name": "B", "X": null, "Y": 3})),
            ]
        );
    }

    #[test]
    fn fan_out_produces_one_row_per_pair() {
        let left = vec![
            row(json!({"k": "A", "X": 1})),
            row(json!({"k": "A", "X": 2})),
            row(json!({"k": "B", "X": 3})),
        ];
        let right = vec![row(json!({"k": "A", "Y": "r"}))];
        let out = right_join(&left, &right, "k", "k", &fields(&["k", "X", "Y"]));
        assert_eq!(
            out,
            vec![
                row(json!({"k": "A", "X": 1, "Y": "r"})),
                row(json!({"k": "A", "X": 2, "Y": "r"})),
            ]
        );
    }

    #[test]
    fn left_only_rows_are_dropped() {
        let left = vec![row(json!({"k": "only-left"}))];
        let right: Vec<Row> = vec![];
        assert!(right_join(&left, &right, "k", "k", &fields(&["k"])).is_empty());
    }

    #[rstest]
    #[case::null_key(json!({"k": null, "Y": 1}))]
    #[case::missing_key(json!({"Y": 1}))]
    fn null_keys_never_match(#[case] right_row: Value) {
        let left = vec![row(json!({"k": null, "X": 9})), row(json!({"X": 8}))];
        let out = right_join(&left, &[row(right_row)], "k", "k", &fields(&["k", "X", "Y"]));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("X"), Some(&Value::Null));
    }

    #[test]
    fn falsy_values_are_not_nulled() {
        let left = vec![row(json!({"k": 0, "X": 0, "Flag": false}))];
        let right = vec![row(json!({"k": 0, "Y": ""}))];
        let out = right_join(&left, &right, "k", "k", &fields(&["k", "X", "Flag", "Y"]));
        assert_eq!(out, vec![row(json!({"k": 0, "X": 0, "Flag": false, "Y": ""}))]);
    }

    #[test]
    fn differently_named_keys_join() {
        let left = vec![row(json!({"code": "A", "X": 1}))];
        let right = vec![row(json!({"ref": "A", "Y": 2}))];
        let out = right_join(&left, &right, "code", "ref", &fields(&["code", "ref", "X", "Y"]));
        assert_eq!(out, vec![row(json!({"code": "A", "ref": "A", "X": 1, "Y": 2}))]);
    }

    #[test]
    fn right_value_wins_on_shared_field() {
        let left = vec![row(json!({"k": "A", "Note": "left"}))];
        let right = vec![row(json!({"k": "A", "Note": "right"}))];
        let out = right_join(&left, &right, "k", "k", &fields(&["k", "Note"]));
        assert_eq!(out[0].get("Note"), Some(&json!("right")));
    }

    #[test]
    fn output_rows_have_no_id() {
        let left = vec![row(json!({"k": "A"})).with_id("recL")];
        let right = vec![row(json!({"k": "A"})).with_id("recR")];
        let out = right_join(&left, &right, "k", "k", &fields(&["k"]));
        assert!(out.iter().all(|r| r.id.is_none()));
    }

    #[test]
    fn field_union_dedupes_by_name() {
        let left = fields(&["Concept Name", "X"]);
        let mut right = fields(&["Concept Name", "Y"]);
        right[0].field_type = FieldType::Number;
        let union = field_union(&left, &right);
        let names: Vec<_> = union.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Concept Name", "X", "Y"]);
        assert_eq!(union[0].field_type, FieldType::SingleLineText, "first wins");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        /// `None` alternates between a null key and a missing key.
        fn keyed_rows(keys: &[Option<i64>], tag: &str) -> Vec<Row> {
            keys.iter()
                .enumerate()
                .map(|(i, key)| {
                    let mut r = Row::new();
                    match key {
                        Some(k) => r.set("k", json!(k)),
                        None if i % 2 == 0 => r.set("k", Value::Null),
                        None => {}
                    }
                    r.set(tag, json!(i));
                    r
                })
                .collect()
        }

        fn arb_keys() -> impl Strategy<Value = Vec<Option<i64>>> {
            prop::collection::vec(prop::option::of(0i64..3), 0..8)
        }

        proptest! {
            #[test]
            fn one_row_per_matching_pair_plus_unmatched_right(
                left_keys in arb_keys(),
                right_keys in arb_keys(),
            ) {
                let left = keyed_rows(&left_keys, "l");
                let right = keyed_rows(&right_keys, "r");
                let out = right_join(&left, &right, "k", "k", &fields(&["k", "l", "r"]));

                // Multiplicity of each right row, in right order.
                let expected: Vec<usize> = right_keys
                    .iter()
                    .map(|rk| match rk {
                        Some(k) => {
                            left_keys.iter().filter(|lk| **lk == Some(*k)).count().max(1)
                        }
                        None => 1,
                    })
                    .collect();
                prop_assert_eq!(out.len(), expected.iter().sum::<usize>());

                let order: Vec<Value> = expected
                    .iter()
                    .enumerate()
                    .flat_map(|(i, n)| std::iter::repeat(json!(i)).take(*n))
                    .collect();
                let seen: Vec<Value> = out
                    .iter()
                    .map(|o| o.get("r").cloned().unwrap_or_default())
                    .collect();
                prop_assert_eq!(seen, order);

                for o in &out {
                    prop_assert!(o.get("l").is_some(), "unioned field present, possibly null");
                    if o.get("l") != Some(&Value::Null) {
                        prop_assert!(o.get("k").is_some_and(|k| !k.is_null()));
                    }
                }
            }
        }
    }
}
