//! JSON persistence of a `ResultStore`.
//!
//! Permutation keys are flattened to plain field mappings on save and rebuilt
//! through `ParameterSpace::permutation` on load, so reloaded keys compare
//! equal to freshly enumerated ones.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::schema::SCHEMA_VERSION;
use crate::core::{
    Facts, ParamValue, ParameterSpace, PermutationStats, RawRecord, ResultStore, Target,
    TargetStats,
};
use crate::{BenchError, BenchResult};

#[derive(Debug, Serialize, Deserialize)]
struct SavedCell {
    perm: BTreeMap<String, ParamValue>,
    records: Vec<RawRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedStats {
    perm: BTreeMap<String, ParamValue>,
    stats: PermutationStats,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedStore {
    schema_version: u32,
    benchmark: String,
    args: ParameterSpace,
    targets: Vec<Target>,
    measurements: BTreeMap<String, Vec<SavedCell>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stats: Option<BTreeMap<String, Vec<SavedStats>>>,
    #[serde(default)]
    facts: Facts,
}

/// Reader/writer for one benchmark's result file.
#[derive(Debug, Clone)]
pub struct ResultFile {
    path: PathBuf,
}

impl ResultFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        ResultFile {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// `<dir>/<benchmark>.json`
    pub fn in_dir(dir: impl AsRef<Path>, benchmark: &str) -> Self {
        Self::new(dir.as_ref().join(format!("{benchmark}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn save(&self, store: &ResultStore) -> BenchResult<()> {
        info!(path = %self.path.display(), "saving results");

        let mut measurements = BTreeMap::new();
        for target in store.targets() {
            // targets never executed stay out of the file
            let Some(cells) = store.target_measurements(&target.name) else {
                continue;
            };
            if cells.is_empty() {
                continue;
            }
            let saved = store
                .space()
                .iter()
                .filter_map(|perm| {
                    cells.get(&perm).map(|records| SavedCell {
                        perm: perm.to_map(),
                        records: records.clone(),
                    })
                })
                .collect();
            measurements.insert(target.name.clone(), saved);
        }

        let stats = store.stats().map(|all| {
            all.iter()
                .map(|(target, per_perm)| {
                    let cells = per_perm
                        .iter()
                        .map(|(perm, stats)| SavedStats {
                            perm: perm.to_map(),
                            stats: stats.clone(),
                        })
                        .collect();
                    (target.clone(), cells)
                })
                .collect()
        });

        let saved = SavedStore {
            schema_version: SCHEMA_VERSION,
            benchmark: store.benchmark().to_string(),
            args: store.space().clone(),
            targets: store.targets().to_vec(),
            measurements,
            stats,
            facts: store.facts().clone(),
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(&saved)?)?;
        Ok(())
    }

    /// Load a store. A missing file is `BenchError::NotFound`; a file that
    /// cannot be decoded is `BenchError::Corrupt`. Statistics are computed
    /// when the file carries none.
    pub fn load(&self) -> BenchResult<ResultStore> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BenchError::NotFound(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        info!(path = %self.path.display(), "loading results");

        let saved: SavedStore = serde_json::from_slice(&bytes).map_err(|e| self.corrupt(e))?;
        if saved.schema_version != SCHEMA_VERSION {
            return Err(self.corrupt(format!(
                "schema version mismatch: file has v{}, expected v{}",
                saved.schema_version, SCHEMA_VERSION
            )));
        }

        let mut store = ResultStore::new(saved.benchmark, saved.args, saved.targets);
        store.facts_mut().merge_missing(&saved.facts);

        for (target, cells) in saved.measurements {
            if store.target(&target).is_none() {
                return Err(self.corrupt(format!("measurements for unknown target '{target}'")));
            }
            for cell in cells {
                let perm = store.space().permutation(&cell.perm).map_err(|e| self.corrupt(e))?;
                store.set_records(&target, perm, cell.records);
            }
        }

        match saved.stats {
            Some(saved_stats) => {
                let mut all = BTreeMap::new();
                for (target, cells) in saved_stats {
                    let mut per_target = TargetStats::new();
                    for cell in cells {
                        let perm =
                            store.space().permutation(&cell.perm).map_err(|e| self.corrupt(e))?;
                        per_target.insert(perm, cell.stats);
                    }
                    all.insert(target, per_target);
                }
                store.set_stats(all);
            }
            None => crate::stats::compute(&mut store),
        }

        Ok(store)
    }

    fn corrupt(&self, reason: impl ToString) -> BenchError {
        BenchError::Corrupt {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let file = ResultFile::in_dir(dir.path(), "loop");
        assert!(!file.exists());
        assert!(matches!(file.load(), Err(BenchError::NotFound(_))));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loop.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(ResultFile::new(&path).load(), Err(BenchError::Corrupt { .. })));
    }

    #[test]
    fn test_schema_version_mismatch_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loop.json");
        let body = serde_json::json!({
            "schema_version": 999,
            "benchmark": "loop",
            "args": {},
            "targets": [],
            "measurements": {}
        });
        std::fs::write(&path, serde_json::to_vec(&body).unwrap()).unwrap();
        let err = ResultFile::new(&path).load().unwrap_err();
        assert!(err.to_string().contains("schema version mismatch"));
    }
}
