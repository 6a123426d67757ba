use std::path::PathBuf;

use tracing::{info, warn};

use crate::bench::{load_benchmark, load_targets};
use crate::core::env::store_facts;
use crate::core::{ResultStore, Target};
use crate::engine::{ExecutionEngine, RunSummary};
use crate::storage::ResultFile;
use crate::{BenchError, BenchResult, RunContext};

/// Options of `matrix-bench run`.
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub benchmark: PathBuf,
    pub targets: PathBuf,
    pub runs: usize,
    /// Restrict execution to these targets; empty runs all.
    pub only: Vec<String>,
    /// Merge into previously saved results instead of starting empty.
    pub load: bool,
    pub save: bool,
    pub build_dir: PathBuf,
    pub result_dir: PathBuf,
    pub exec_wrapper: Option<PathBuf>,
    pub preloads: Vec<String>,
}

/// `matrix-exec` next to the running binary, if present.
fn sibling_exec_wrapper() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let candidate = exe.parent()?.join("matrix-exec");
    candidate.is_file().then_some(candidate)
}

fn logical_cpus(ctx: &RunContext) -> usize {
    ctx.facts()
        .get("cpus")
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
        .unwrap_or(1)
}

fn open_store(
    file: &ResultFile,
    name: &str,
    space: crate::core::ParameterSpace,
    targets: Vec<Target>,
    load: bool,
) -> BenchResult<ResultStore> {
    if !load {
        return Ok(ResultStore::new(name, space, targets));
    }
    match file.load() {
        Ok(mut store) => {
            if store.space() != &space {
                return Err(BenchError::Config(format!(
                    "{} was recorded with a different parameter space",
                    file.path().display()
                )));
            }
            for target in targets {
                store.upsert_target(target);
            }
            Ok(store)
        }
        Err(BenchError::NotFound(path)) => {
            warn!(path = %path.display(), "no previous results, starting empty");
            Ok(ResultStore::new(name, space, targets))
        }
        Err(e) => Err(e),
    }
}

pub fn run(args: RunArgs) -> BenchResult<RunSummary> {
    let spec = load_benchmark(&args.benchmark)?;
    let targets = load_targets(&args.targets)?;

    let mut builder = RunContext::builder()
        .build_dir(&args.build_dir)
        .result_dir(&args.result_dir);
    if let Some(wrapper) = args.exec_wrapper.clone().or_else(sibling_exec_wrapper) {
        builder = builder.exec_wrapper(wrapper);
    }
    for preload in &args.preloads {
        builder = builder.instrumentation_preload(preload.clone());
    }
    let ctx = builder.build();

    let space = spec.parameter_space(logical_cpus(&ctx));
    info!(benchmark = %spec.name, permutations = space.len(), targets = targets.len(), "loaded benchmark");

    let file = ResultFile::in_dir(ctx.result_dir(), &spec.name);
    let mut store = open_store(&file, &spec.name, space, targets, args.load)?;

    let mut engine = ExecutionEngine::new(&ctx, &spec).runs(args.runs);
    if !args.only.is_empty() {
        engine = engine.only_targets(args.only.clone());
    }
    let summary = engine.run(&mut store)?;

    if args.save {
        file.save(&store)?;
        std::fs::create_dir_all(ctx.result_dir())?;
        store_facts(store.facts(), ctx.result_dir())?;
    }

    println!(
        "{}: {} runs, {} succeeded, {} failed, {} skipped",
        spec.name, summary.runs, summary.succeeded, summary.failed, summary.skipped
    );
    Ok(summary)
}
