//! In-memory result store: `target -> permutation -> [RawRecord]`.

use std::collections::BTreeMap;

use crate::{BenchError, BenchResult};

use super::schema::{Facts, PermutationStats, RawRecord, Target};
use super::space::{ParameterSpace, Permutation};

/// Per-target statistics keyed by permutation.
pub type TargetStats = BTreeMap<Permutation, PermutationStats>;

/// Measurements, statistics and facts of one benchmark.
#[derive(Debug, Clone)]
pub struct ResultStore {
    benchmark: String,
    space: ParameterSpace,
    targets: Vec<Target>,
    measurements: BTreeMap<String, BTreeMap<Permutation, Vec<RawRecord>>>,
    stats: Option<BTreeMap<String, TargetStats>>,
    facts: Facts,
}

impl ResultStore {
    pub fn new(benchmark: impl Into<String>, space: ParameterSpace, targets: Vec<Target>) -> Self {
        let measurements = targets
            .iter()
            .map(|t| (t.name.clone(), BTreeMap::new()))
            .collect();
        ResultStore {
            benchmark: benchmark.into(),
            space,
            targets,
            measurements,
            stats: None,
            facts: Facts::default(),
        }
    }

    pub fn benchmark(&self) -> &str {
        &self.benchmark
    }

    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// Register a target, replacing any stored definition of the same name.
    /// Its recorded measurements are kept.
    pub fn upsert_target(&mut self, target: Target) {
        self.measurements.entry(target.name.clone()).or_default();
        match self.targets.iter_mut().find(|t| t.name == target.name) {
            Some(existing) => *existing = target,
            None => self.targets.push(target),
        }
    }

    pub fn facts(&self) -> &Facts {
        &self.facts
    }

    pub fn facts_mut(&mut self) -> &mut Facts {
        &mut self.facts
    }

    /// Records of one cell in repetition order; empty if never executed.
    pub fn records(&self, target: &str, perm: &Permutation) -> &[RawRecord] {
        self.measurements
            .get(target)
            .and_then(|m| m.get(perm))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn target_measurements(&self, target: &str) -> Option<&BTreeMap<Permutation, Vec<RawRecord>>> {
        self.measurements.get(target)
    }

    /// Whether any permutation of `target` has been recorded.
    pub fn has_measurements(&self, target: &str) -> bool {
        self.measurements
            .get(target)
            .is_some_and(|m| !m.is_empty())
    }

    /// Append one repetition's record to a cell.
    pub fn push(&mut self, target: &str, perm: &Permutation, record: RawRecord) {
        self.measurements
            .entry(target.to_string())
            .or_default()
            .entry(perm.clone())
            .or_default()
            .push(record);
    }

    /// Replace a cell's records wholesale. Used when loading.
    pub fn set_records(&mut self, target: &str, perm: Permutation, records: Vec<RawRecord>) {
        self.measurements
            .entry(target.to_string())
            .or_default()
            .insert(perm, records);
    }

    /// Repetitions recorded so far, if every recorded cell agrees.
    pub fn repetitions(&self) -> BenchResult<usize> {
        let mut lens = self
            .measurements
            .iter()
            .flat_map(|(target, cells)| cells.iter().map(move |(perm, r)| (target, perm, r.len())));
        let Some((_, _, expected)) = lens.next() else {
            return Ok(0);
        };
        for (target, perm, len) in lens {
            if len != expected {
                return Err(BenchError::Message(format!(
                    "misaligned results: {target} {perm} has {len} records, expected {expected}"
                )));
            }
        }
        Ok(expected)
    }

    /// Replace every empty failure placeholder with a NaN record shaped like
    /// `template`. Returns the number of replaced records.
    pub fn backfill(&mut self, template: &RawRecord) -> usize {
        if template.is_empty() {
            return 0;
        }
        let mut replaced = 0;
        for cells in self.measurements.values_mut() {
            for records in cells.values_mut() {
                for record in records.iter_mut().filter(|r| r.is_empty()) {
                    *record = RawRecord::nan_like(template);
                    replaced += 1;
                }
            }
        }
        replaced
    }

    pub fn stats(&self) -> Option<&BTreeMap<String, TargetStats>> {
        self.stats.as_ref()
    }

    pub fn cell_stats(&self, target: &str, perm: &Permutation) -> Option<&PermutationStats> {
        self.stats.as_ref()?.get(target)?.get(perm)
    }

    pub fn set_stats(&mut self, stats: BTreeMap<String, TargetStats>) {
        self.stats = Some(stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ResultStore {
        let space = ParameterSpace::default().with_dimension("threads", [1i64, 2]);
        ResultStore::new("loop", space, vec![Target::new("a"), Target::new("b")])
    }

    #[test]
    fn test_push_keeps_repetition_order() {
        let mut store = store();
        let perm = store.space().iter().next().unwrap();
        for v in [1.0, 2.0, 3.0] {
            let mut r = RawRecord::new();
            r.insert("x", v);
            store.push("a", &perm, r);
        }
        let values: Vec<f64> = store
            .records("a", &perm)
            .iter()
            .map(|r| r.get("x").unwrap().as_f64().unwrap())
            .collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
        assert!(store.has_measurements("a"));
        assert!(!store.has_measurements("b"));
    }

    #[test]
    fn test_upsert_target_replaces_definition_and_keeps_records() {
        let mut store = store();
        let perm = store.space().iter().next().unwrap();
        let mut r = RawRecord::new();
        r.insert("x", 1.0);
        store.push("a", &perm, r);

        store.upsert_target(Target::new("a").with_preload("/opt/je/libjemalloc.so"));
        store.upsert_target(Target::new("c"));

        let names: Vec<&str> = store.targets().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(store.target("a").unwrap().preload, "/opt/je/libjemalloc.so");
        assert_eq!(store.records("a", &perm).len(), 1);
        assert!(!store.has_measurements("c"));
    }

    #[test]
    fn test_repetitions_detects_misalignment() {
        let mut store = store();
        let perms: Vec<Permutation> = store.space().iter().collect();
        store.push("a", &perms[0], RawRecord::new());
        store.push("a", &perms[1], RawRecord::new());
        assert_eq!(store.repetitions().unwrap(), 1);

        store.push("a", &perms[1], RawRecord::new());
        assert!(store.repetitions().is_err());
    }

    #[test]
    fn test_backfill_only_touches_placeholders() {
        let mut store = store();
        let perm = store.space().iter().next().unwrap();
        let mut valid = RawRecord::new();
        valid.insert("x", 4.0);
        store.push("a", &perm, valid.clone());
        store.push("a", &perm, RawRecord::new());

        assert_eq!(store.backfill(&valid), 1);
        let records = store.records("a", &perm);
        assert_eq!(records[0].get("x").unwrap().as_f64(), Some(4.0));
        assert!(records[1].get("x").unwrap().is_nan());
    }

    #[test]
    fn test_backfill_with_empty_template_is_noop() {
        let mut store = store();
        let perm = store.space().iter().next().unwrap();
        store.push("a", &perm, RawRecord::new());
        assert_eq!(store.backfill(&RawRecord::new()), 0);
        assert!(store.records("a", &perm)[0].is_empty());
    }
}
