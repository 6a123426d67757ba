use std::path::PathBuf;

use crate::core::env::load_facts;
use crate::core::{ResultStore, Statistic};
use crate::storage::ResultFile;
use crate::BenchResult;

/// Text summary of a store: one line per target, permutation and field.
pub fn render_summary(store: &ResultStore) -> String {
    let mut out = format!("benchmark {}\n", store.benchmark());
    let Some(stats) = store.stats() else {
        out.push_str("  (no statistics)\n");
        return out;
    };
    for target in store.targets() {
        let Some(per_perm) = stats.get(&target.name) else {
            continue;
        };
        out.push_str(&format!("{}\n", target.name));
        for perm in store.space().iter() {
            let Some(cell) = per_perm.get(&perm) else {
                continue;
            };
            for (field, s) in cell.fields() {
                out.push_str(&format!(
                    "  {perm} {field}: mean={:.4} std={:.4} outliers={}\n",
                    s.get(Statistic::Mean),
                    s.get(Statistic::Std),
                    s.outliers.len()
                ));
            }
        }
    }
    out
}

pub fn run(file: PathBuf, facts: bool) -> BenchResult<()> {
    let store = ResultFile::new(&file).load()?;
    print!("{}", render_summary(&store));

    if facts {
        let mut facts = store.facts().clone();
        // facts.json in the same directory may carry host facts the store lacks
        if let Some(dir) = file.parent().filter(|d| d.is_dir()) {
            if let Ok(shared) = load_facts(dir) {
                facts.merge_missing(&shared);
            }
        }
        println!("{}", serde_json::to_string_pretty(&facts)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ParameterSpace, RawRecord, Scalar, Target};

    #[test]
    fn test_summary_lists_fields() {
        let space = ParameterSpace::default().with_dimension("threads", [1i64]);
        let mut store = ResultStore::new("loop", space, vec![Target::new("glibc"), Target::new("idle")]);
        let perm = store.space().iter().next().unwrap();
        for v in ["1", "3"] {
            let mut r = RawRecord::new();
            r.insert("time", Scalar::from_raw(v));
            store.push("glibc", &perm, r);
        }
        crate::stats::compute(&mut store);

        let text = render_summary(&store);
        assert!(text.contains("glibc\n"));
        assert!(text.contains("(threads=1) time: mean=2.0000 std=1.4142 outliers=0"));
        assert!(!text.contains("idle"));
    }
}
