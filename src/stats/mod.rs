//! Statistics engine: reduces per-run records into descriptive statistics.

pub mod descriptive;

use std::collections::BTreeMap;

use tracing::debug;

use crate::core::{PermutationStats, ResultStore, TargetStats};

pub use descriptive::{describe, percentile};

/// Recompute all statistics of `store` from scratch.
///
/// Targets without any recorded permutation are skipped. For each cell, the
/// fields of the first repetition's record are considered; a field is
/// skipped when any repetition's value is missing or not numeric.
pub fn compute(store: &mut ResultStore) {
    let mut all: BTreeMap<String, TargetStats> = BTreeMap::new();

    for target in store.targets() {
        if !store.has_measurements(&target.name) {
            debug!(target = %target.name, "no measurements, skipping statistics");
            continue;
        }

        let mut per_target = TargetStats::new();
        for perm in store.space().iter() {
            let records = store.records(&target.name, &perm);
            let Some(first) = records.first() else {
                continue;
            };

            let mut cell = PermutationStats::default();
            for field in first.field_names() {
                let data: Option<Vec<f64>> = records
                    .iter()
                    .map(|r| r.get(field).and_then(|v| v.as_f64()))
                    .collect();
                let Some(data) = data else {
                    debug!(target = %target.name, %perm, field, "non-numeric field skipped");
                    continue;
                };
                if let Some(stats) = describe(&data) {
                    cell.insert(field, stats);
                }
            }
            per_target.insert(perm, cell);
        }
        all.insert(target.name.clone(), per_target);
    }

    store.set_stats(all);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ParameterSpace, RawRecord, Statistic, Target};

    fn record(pairs: &[(&str, &str)]) -> RawRecord {
        let mut r = RawRecord::new();
        for (k, v) in pairs {
            r.insert(*k, crate::core::Scalar::from_raw(v));
        }
        r
    }

    #[test]
    fn test_compute_skips_targets_without_measurements() {
        let space = ParameterSpace::default().with_dimension("threads", [1i64]);
        let mut store = ResultStore::new("b", space, vec![Target::new("a"), Target::new("b")]);
        let perm = store.space().iter().next().unwrap();
        store.push("a", &perm, record(&[("t", "1")]));

        compute(&mut store);
        let stats = store.stats().unwrap();
        assert!(stats.contains_key("a"));
        assert!(!stats.contains_key("b"));
    }

    #[test]
    fn test_non_numeric_fields_are_skipped() {
        let mut store = ResultStore::new("b", ParameterSpace::default(), vec![Target::new("a")]);
        let perm = store.space().iter().next().unwrap();
        store.push("a", &perm, record(&[("t", "1"), ("label", "x")]));
        store.push("a", &perm, record(&[("t", "3"), ("label", "y")]));

        compute(&mut store);
        let cell = store.cell_stats("a", &perm).unwrap();
        assert_eq!(cell.get(Statistic::Mean, "t"), Some(2.0));
        assert!(cell.field("label").is_none());
    }

    #[test]
    fn test_compute_is_idempotent_and_recomputes() {
        let mut store = ResultStore::new("b", ParameterSpace::default(), vec![Target::new("a")]);
        let perm = store.space().iter().next().unwrap();
        store.push("a", &perm, record(&[("t", "1")]));
        store.push("a", &perm, record(&[("t", "3")]));

        compute(&mut store);
        let first = store.stats().unwrap().clone();
        compute(&mut store);
        assert_eq!(store.stats().unwrap(), &first);

        store.push("a", &perm, record(&[("t", "5")]));
        compute(&mut store);
        let cell = store.cell_stats("a", &perm).unwrap();
        assert_eq!(cell.get(Statistic::Mean, "t"), Some(3.0));
        assert_eq!(cell.get(Statistic::Max, "t"), Some(5.0));
    }
}
