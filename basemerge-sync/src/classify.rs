//! Row classification: new, stale, unchanged.
//!
//! Rows are compared by value only. Each row is reduced to a SHA-256
//! fingerprint of its canonical JSON field map (identifier excluded), and a
//! row counts as present on the other side when any row there has the same
//! fingerprint.

use std::collections::{HashMap, HashSet, VecDeque};

use sha2::{Digest, Sha256};

use basemerge_core::{RecordId, Row};

/// What a sync run has to do to a destination table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncPlan {
    /// Join-output rows absent from the destination.
    pub inserts: Vec<Row>,
    /// Destination rows absent from the join output, identifiers stripped.
    pub deletes: Vec<Row>,
    /// Join-output rows already present in the destination.
    pub unchanged: usize,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.deletes.is_empty()
    }
}

/// Hex SHA-256 of the row's field map.
pub fn fingerprint(row: &Row) -> String {
    let mut h = Sha256::new();
    // BTreeMap<String, Value> serialization cannot fail and is key-ordered.
    if let Ok(canonical) = serde_json::to_vec(&row.fields) {
        h.update(&canonical);
    }
    hex::encode(h.finalize())
}

fn fingerprints(rows: &[Row]) -> HashSet<String> {
    rows.iter().map(fingerprint).collect()
}

/// `merged − destination`: rows that must be inserted.
///
/// With an empty destination every merged row is new.
pub fn new_rows(merged: &[Row], destination: &[Row]) -> Vec<Row> {
    if destination.is_empty() {
        return merged.iter().map(Row::without_id).collect();
    }
    let present = fingerprints(destination);
    merged
        .iter()
        .filter(|row| !present.contains(&fingerprint(row)))
        .map(Row::without_id)
        .collect()
}

/// `destination − merged`: rows that must be deleted.
///
/// Empty whenever the destination is empty.
pub fn stale_rows(merged: &[Row], destination: &[Row]) -> Vec<Row> {
    if destination.is_empty() {
        return Vec::new();
    }
    let wanted = fingerprints(merged);
    destination
        .iter()
        .filter(|row| !wanted.contains(&fingerprint(row)))
        .map(Row::without_id)
        .collect()
}

/// Classify `merged` against `destination`.
pub fn plan(merged: &[Row], destination: &[Row]) -> SyncPlan {
    let inserts = new_rows(merged, destination);
    let deletes = stale_rows(merged, destination);
    SyncPlan {
        unchanged: merged.len() - inserts.len(),
        inserts,
        deletes,
    }
}

/// Map stale rows back to destination record ids.
///
/// Each snapshot record is consumed at most once, so two identical stale rows
/// resolve to two distinct records. Rows with no remaining match are returned
/// as misses.
pub fn resolve_ids<'a>(stale: &'a [Row], snapshot: &[Row]) -> (Vec<RecordId>, Vec<&'a Row>) {
    let mut available: HashMap<String, VecDeque<&RecordId>> = HashMap::new();
    for row in snapshot {
        if let Some(id) = row.id.as_ref() {
            available.entry(fingerprint(row)).or_default().push_back(id);
        }
    }

    let mut ids = Vec::with_capacity(stale.len());
    let mut misses = Vec::new();
    for row in stale {
        match available
            .get_mut(&fingerprint(row))
            .and_then(VecDeque::pop_front)
        {
            Some(id) => ids.push(id.clone()),
            None => misses.push(row),
        }
    }
    (ids, misses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn row(value: Value) -> Row {
        Row::from_json(value).expect("object")
    }

    #[test]
    fn fingerprint_ignores_id_and_key_order() {
        let a = row(json!({"a": 1, "b": [1, 2]})).with_id("r1");
        let b = row(json!({"b": [1, 2], "a": 1})).with_id("r2");
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_ne!(fingerprint(&a), fingerprint(&row(json!({"a": 1, "b": [2, 1]}))));
    }

    #[test]
    fn empty_destination_means_all_new_none_stale() {
        let merged = vec![row(json!({"k": "A"})), row(json!({"k": "B"}))];
        let plan = plan(&merged, &[]);
        assert_eq!(plan.inserts, merged);
        assert!(plan.deletes.is_empty());
        assert_eq!(plan.unchanged, 0);
    }

    #[test]
    fn replaced_row_is_one_insert_one_delete() {
        let destination = vec![row(json!({"Concept Name": "A", "X": 1, "Y": 2})).with_id("r1")];
        let merged = vec![row(json!({"Concept Name": "B", "X": null, "Y": 3}))];

        let plan = plan(&merged, &destination);
        assert_eq!(plan.inserts, vec![row(json!({"Concept Name": "B", "X": null, "Y": 3}))]);
        assert_eq!(plan.deletes, vec![row(json!({"Concept Name": "A", "X": 1, "Y": 2}))]);
        assert!(plan.deletes[0].id.is_none(), "deletes are value-only rows");
    }

    #[test]
    fn identical_sides_produce_empty_plan() {
        let merged = vec![row(json!({"k": "A", "n": 1}))];
        let destination = vec![row(json!({"k": "A", "n": 1})).with_id("r7")];
        let plan = plan(&merged, &destination);
        assert!(plan.is_empty());
        assert_eq!(plan.unchanged, 1);
    }

    #[test]
    fn resolve_ids_uses_each_record_once() {
        let snapshot = vec![
            row(json!({"k": "A"})).with_id("r1"),
            row(json!({"k": "A"})).with_id("r2"),
            row(json!({"k": "B"})).with_id("r3"),
        ];
        let stale = vec![row(json!({"k": "A"})), row(json!({"k": "A"})), row(json!({"k": "A"}))];
        let (ids, misses) = resolve_ids(&stale, &snapshot);
        assert_eq!(ids, vec![RecordId::from("r1"), RecordId::from("r2")]);
        assert_eq!(misses.len(), 1);
    }

    #[test]
    fn null_and_missing_field_differ() {
        let merged = vec![row(json!({"k": "A", "n": null}))];
        let destination = vec![row(json!({"k": "A"})).with_id("r1")];
        let plan = plan(&merged, &destination);
        assert_eq!(plan.inserts.len(), 1);
        assert_eq!(plan.deletes.len(), 1);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_row() -> impl Strategy<Value = Row> {
            prop::collection::btree_map(
                prop::sample::select(vec!["k", "x", "y"]),
                prop_oneof![Just(Value::Null), (0i64..4).prop_map(Value::from)],
                0..3,
            )
            .prop_map(|m| m.into_iter().collect::<Row>())
        }

        proptest! {
            #[test]
            fn second_run_is_a_no_op(merged in prop::collection::vec(arb_row(), 0..8)) {
                // After applying a plan to an empty destination, the destination
                // holds exactly the merged rows and a re-plan is empty.
                let first = plan(&merged, &[]);
                let destination: Vec<Row> = first
                    .inserts
                    .iter()
                    .enumerate()
                    .map(|(i, r)| r.clone().with_id(format!("r{i}")))
                    .collect();
                let again = plan(&merged, &destination);
                prop_assert!(again.is_empty());
            }

            #[test]
            fn inserts_and_deletes_are_disjoint(
                merged in prop::collection::vec(arb_row(), 0..8),
                destination in prop::collection::vec(arb_row(), 0..8),
            ) {
                let p = plan(&merged, &destination);
                for ins in &p.inserts {
                    prop_assert!(!destination.iter().any(|d| d.same_values(ins)));
                }
                for del in &p.deletes {
                    prop_assert!(!merged.iter().any(|m| m.same_values(del)));
                }
                if destination.is_empty() {
                    prop_assert!(p.deletes.is_empty());
                }
            }

            #[test]
            fn new_rows_and_shared_rows_rebuild_merged_multiset(
                unique in prop::collection::vec(arb_row(), 0..6),
                repeats in 0usize..4,
                destination in prop::collection::vec(arb_row(), 0..8),
            ) {
                // Force duplicates into the merged side.
                let merged: Vec<Row> = unique
                    .iter()
                    .chain(unique.iter().take(repeats))
                    .cloned()
                    .collect();
                let present: HashSet<String> = destination.iter().map(fingerprint).collect();
                let shared: Vec<&Row> = merged
                    .iter()
                    .filter(|r| present.contains(&fingerprint(r)))
                    .collect();

                let inserts = new_rows(&merged, &destination);
                let mut rebuilt: Vec<String> = inserts
                    .iter()
                    .chain(shared.iter().copied())
                    .map(fingerprint)
                    .collect();
                let mut expected: Vec<String> = merged.iter().map(fingerprint).collect();
                rebuilt.sort();
                expected.sort();
                prop_assert_eq!(rebuilt, expected);
                prop_assert_eq!(plan(&merged, &destination).unchanged, shared.len());
            }

            #[test]
            fn every_stale_row_resolves(destination in prop::collection::vec(arb_row(), 0..8)) {
                let snapshot: Vec<Row> = destination
                    .iter()
                    .enumerate()
                    .map(|(i, r)| r.clone().with_id(format!("r{i}")))
                    .collect();
                let stale = stale_rows(&[], &snapshot);
                let (ids, misses) = resolve_ids(&stale, &snapshot);
                prop_assert!(misses.is_empty());
                prop_assert_eq!(ids.len(), snapshot.len());
            }
        }
    }
}
