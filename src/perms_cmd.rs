use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::bench::load_benchmark;
use crate::core::{ParamValue, ParameterSpace, Permutation};
use crate::{BenchError, BenchResult};

/// Parse `dim=value` filters.
pub fn parse_fixed(pairs: &[String]) -> BenchResult<BTreeMap<String, ParamValue>> {
    pairs
        .iter()
        .map(|pair| {
            let (dim, value) = pair
                .split_once('=')
                .ok_or_else(|| BenchError::Config(format!("expected dim=value, got '{pair}'")))?;
            Ok((dim.trim().to_string(), ParamValue::parse(value)))
        })
        .collect()
}

/// Permutations of `space` matching `fixed`. Unknown dimensions are an error.
pub fn select(space: &ParameterSpace, fixed: &BTreeMap<String, ParamValue>) -> BenchResult<Vec<Permutation>> {
    if let Some(unknown) = fixed.keys().find(|k| !space.dimensions().contains_key(*k)) {
        return Err(BenchError::Config(format!("unknown dimension '{unknown}'")));
    }
    Ok(space.iter_fixed(fixed).collect())
}

pub fn run(benchmark: PathBuf, fix: Vec<String>, cpus: Option<usize>) -> BenchResult<()> {
    let spec = load_benchmark(&benchmark)?;
    let cpus = cpus
        .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
        .unwrap_or(1);
    let space = spec.parameter_space(cpus);
    let fixed = parse_fixed(&fix)?;
    for perm in select(&space, &fixed)? {
        println!("{perm}");
    }
    Ok(())
}
