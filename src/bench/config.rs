use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::{ParamValue, ParameterSpace, Target, scale_threads_for_cpus};
use crate::engine::ServerSpec;
use crate::{BenchError, BenchResult, RunContext};

pub const DEFAULT_MEASURE_CMD: &str = "perf stat -x, -d";

/// A benchmark definition as read from its configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchmarkSpec {
    pub name: String,
    /// Command template run once per target, permutation and repetition.
    pub cmd: String,
    /// Swept dimensions.
    #[serde(default)]
    pub args: BTreeMap<String, Vec<ParamValue>>,
    #[serde(default)]
    pub thread_scaling: Option<ThreadScaling>,
    /// Measurement wrapper placed before the command. Empty disables it.
    #[serde(default = "default_measure_cmd")]
    pub measure_cmd: String,
    /// Executables that must be present before anything runs.
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub servers: Vec<ServerSpec>,
    #[serde(default = "default_settle_ms")]
    pub server_settle_ms: u64,
    /// Working directory template for the benchmark processes.
    #[serde(default)]
    pub run_dir: Option<String>,
    /// Extra substitution keys.
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    /// SHA-256 of the file this definition was loaded from.
    #[serde(skip)]
    pub source_sha256: Option<String>,
}

fn default_measure_cmd() -> String {
    DEFAULT_MEASURE_CMD.to_string()
}

fn default_settle_ms() -> u64 {
    5000
}

/// Generates a thread-count dimension from the number of CPUs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThreadScaling {
    #[serde(default = "default_thread_dimension")]
    pub dimension: String,
    #[serde(default = "default_factor")]
    pub factor: usize,
    #[serde(default = "default_min_threads")]
    pub min_threads: usize,
    #[serde(default = "default_steps")]
    pub steps: usize,
}

fn default_thread_dimension() -> String {
    "threads".to_string()
}

fn default_factor() -> usize {
    2
}

fn default_min_threads() -> usize {
    1
}

fn default_steps() -> usize {
    10
}

impl BenchmarkSpec {
    /// A minimal definition with defaults for everything but name and command.
    pub fn new(name: impl Into<String>, cmd: impl Into<String>) -> Self {
        BenchmarkSpec {
            name: name.into(),
            cmd: cmd.into(),
            args: BTreeMap::new(),
            thread_scaling: None,
            measure_cmd: default_measure_cmd(),
            requirements: Vec::new(),
            servers: Vec::new(),
            server_settle_ms: default_settle_ms(),
            run_dir: None,
            attrs: BTreeMap::new(),
            source_sha256: None,
        }
    }

    pub fn validate(&self) -> BenchResult<()> {
        if self.name.trim().is_empty() {
            return Err(BenchError::Config("benchmark name must not be empty".into()));
        }
        if self.cmd.trim().is_empty() {
            return Err(BenchError::Config(format!("benchmark '{}' has no cmd", self.name)));
        }
        if let Some(scaling) = &self.thread_scaling {
            if self.args.contains_key(&scaling.dimension) {
                return Err(BenchError::Config(format!(
                    "dimension '{}' is both listed in args and generated by thread_scaling",
                    scaling.dimension
                )));
            }
            if scaling.factor == 0 || scaling.min_threads == 0 || scaling.steps == 0 {
                return Err(BenchError::Config(
                    "thread_scaling factor, min_threads and steps must be positive".into(),
                ));
            }
        }
        for server in &self.servers {
            if server.cmd.trim().is_empty() {
                return Err(BenchError::Config(format!("server '{}' has no cmd", server.name)));
            }
        }
        Ok(())
    }

    /// The swept parameter space, with the thread dimension generated for
    /// `cpus` logical CPUs when thread scaling is configured.
    pub fn parameter_space(&self, cpus: usize) -> ParameterSpace {
        let mut dimensions = self.args.clone();
        if let Some(scaling) = &self.thread_scaling {
            let threads = scale_threads_for_cpus(scaling.factor, scaling.min_threads, scaling.steps, cpus);
            dimensions.insert(
                scaling.dimension.clone(),
                threads.into_iter().map(ParamValue::Int).collect(),
            );
        }
        ParameterSpace::new(dimensions)
    }

    /// Lowest-precedence substitution layer for this benchmark.
    pub fn substitutions(&self, ctx: &RunContext) -> BTreeMap<String, String> {
        let mut subs = self.attrs.clone();
        subs.insert("name".into(), self.name.clone());
        subs.insert("build_dir".into(), ctx.build_dir().display().to_string());
        subs.insert("result_dir".into(), ctx.result_dir().display().to_string());
        subs.insert(
            "benchmark_dir".into(),
            ctx.benchmark_dir(&self.name).display().to_string(),
        );
        subs
    }
}

#[derive(Debug, Deserialize)]
struct TargetsFile {
    #[serde(rename = "target")]
    targets: Vec<Target>,
}

fn parse_by_extension<T: DeserializeOwned>(path: &Path, text: &str) -> BenchResult<T> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    match ext {
        "yaml" | "yml" => serde_yaml::from_str(text)
            .map_err(|e| BenchError::Config(format!("{}: {e}", path.display()))),
        "json" => serde_json::from_str(text)
            .map_err(|e| BenchError::Config(format!("{}: {e}", path.display()))),
        _ => toml::from_str(text).map_err(|e| BenchError::Config(format!("{}: {e}", path.display()))),
    }
}

/// Load and validate a benchmark definition (`.toml`, `.yaml`/`.yml` or `.json`).
pub fn load_benchmark(path: &Path) -> BenchResult<BenchmarkSpec> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| BenchError::Config(format!("{}: {e}", path.display())))?;
    let mut spec: BenchmarkSpec = parse_by_extension(path, &text)?;
    spec.validate()?;
    spec.source_sha256 = Some(crate::sha256_hex(text.as_bytes()));
    Ok(spec)
}

/// Load the `[[target]]` entries of a targets file. Names must be unique.
pub fn load_targets(path: &Path) -> BenchResult<Vec<Target>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| BenchError::Config(format!("{}: {e}", path.display())))?;
    let file: TargetsFile = parse_by_extension(path, &text)?;
    let mut seen = BTreeSet::new();
    for target in &file.targets {
        if target.name.trim().is_empty() {
            return Err(BenchError::Config("target name must not be empty".into()));
        }
        if !seen.insert(target.name.as_str()) {
            return Err(BenchError::Config(format!("duplicate target '{}'", target.name)));
        }
    }
    Ok(file.targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOOP_TOML: &str = r#"
name = "loop"
cmd = "loop-{binary_suffix} {nthreads} 1000000 {size}"
requirements = ["sh"]
measure_cmd = ""

[args]
size = [64, 128]

[thread_scaling]
dimension = "nthreads"
steps = 4

[attrs]
iterations = "1000"
"#;

    const TARGETS_TOML: &str = r#"
[[target]]
name = "glibc"

[[target]]
name = "jemalloc"
preload = "/opt/jemalloc/lib/libjemalloc.so"
library_path = "/opt/jemalloc/lib"
color = "C1"
"#;

    #[test]
    fn test_load_toml_benchmark() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loop.toml");
        std::fs::write(&path, LOOP_TOML).unwrap();

        let spec = load_benchmark(&path).unwrap();
        assert_eq!(spec.name, "loop");
        assert_eq!(spec.measure_cmd, "");
        assert_eq!(spec.server_settle_ms, 5000);
        assert_eq!(spec.source_sha256.as_deref(), Some(crate::sha256_hex(LOOP_TOML.as_bytes()).as_str()));

        let space = spec.parameter_space(4);
        let names: Vec<_> = space.dimension_names().collect();
        assert_eq!(names, vec!["nthreads", "size"]);
        assert_eq!(space.len(), space.dimensions()["nthreads"].len() * 2);
    }

    #[test]
    fn test_load_yaml_benchmark_with_servers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mysql.yaml");
        std::fs::write(
            &path,
            "name: mysql\ncmd: sysbench --threads={nthreads} run\nargs:\n  nthreads: [1, 2]\nservers:\n  - name: mysqld\n    cmd: mysqld --datadir={build_dir}/db\n    shutdown_cmds: [\"mysqladmin shutdown\"]\n",
        )
        .unwrap();
        let spec = load_benchmark(&path).unwrap();
        assert_eq!(spec.measure_cmd, DEFAULT_MEASURE_CMD);
        assert_eq!(spec.servers.len(), 1);
        assert_eq!(spec.servers[0].name, "mysqld");
        assert!(spec.servers[0].prepare_cmds.is_empty());
    }

    #[test]
    fn test_thread_scaling_conflict_rejected() {
        let mut spec = BenchmarkSpec::new("b", "true");
        spec.args.insert("threads".into(), vec![ParamValue::Int(1)]);
        spec.thread_scaling = Some(ThreadScaling {
            dimension: "threads".into(),
            factor: 2,
            min_threads: 1,
            steps: 10,
        });
        assert!(matches!(spec.validate(), Err(BenchError::Config(_))));
    }

    #[test]
    fn test_load_targets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.toml");
        std::fs::write(&path, TARGETS_TOML).unwrap();
        let targets = load_targets(&path).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1].library_path.as_deref(), Some("/opt/jemalloc/lib"));
        assert_eq!(targets[1].color.as_deref(), Some("C1"));
    }

    #[test]
    fn test_duplicate_targets_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.toml");
        std::fs::write(&path, "[[target]]\nname = \"a\"\n[[target]]\nname = \"a\"\n").unwrap();
        assert!(matches!(load_targets(&path), Err(BenchError::Config(_))));
    }
}
