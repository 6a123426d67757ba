//! The benchmark matrix loop: repetitions × targets × permutations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::bench::BenchmarkSpec;
use crate::core::env::exe_version;
use crate::core::{Permutation, RawRecord, ResultStore, Target};
use crate::{BenchError, BenchResult, RunContext};

use super::capture::{parse_perf_csv, take_status_file};
use super::environment::ChildEnv;
use super::hooks::BenchmarkHooks;
use super::preflight::{check_measure_cmd, check_requirements};
use super::server::{ServerGroup, ServerOptions};
use super::template::Substitutions;

/// Marker the dynamic linker prints when a preload cannot be loaded.
pub const LD_PRELOAD_FAILURE: &str = "ERROR: ld.so";

/// Counts of one engine run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub runs: usize,
    /// Invocations that produced a record.
    pub succeeded: usize,
    /// Invocations that failed.
    pub failed: usize,
    /// Cells left empty because the target's servers did not start.
    pub skipped: usize,
    /// Placeholders replaced by NaN records.
    pub backfilled: usize,
}

/// Executes one benchmark against the targets of a `ResultStore`.
pub struct ExecutionEngine<'a> {
    ctx: &'a RunContext,
    spec: &'a BenchmarkSpec,
    hooks: BenchmarkHooks,
    runs: usize,
    only: Option<Vec<String>>,
}

/// Outcome of a single invocation.
enum Outcome {
    Success(RawRecord),
    Failure,
}

/// Per-target process state shared by every invocation of one repetition.
struct Launch<'e> {
    /// Inherited env plus the target's preloads and library path.
    target_env: &'e ChildEnv,
    spawn_env: &'e ChildEnv,
    servers: &'e ServerGroup,
}

impl<'a> ExecutionEngine<'a> {
    pub fn new(ctx: &'a RunContext, spec: &'a BenchmarkSpec) -> Self {
        ExecutionEngine {
            ctx,
            spec,
            hooks: BenchmarkHooks::default(),
            runs: 3,
            only: None,
        }
    }

    pub fn with_hooks(mut self, hooks: BenchmarkHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Number of repetitions.
    pub fn runs(mut self, runs: usize) -> Self {
        self.runs = runs;
        self
    }

    /// Restrict execution to the named targets.
    pub fn only_targets(mut self, names: Vec<String>) -> Self {
        self.only = Some(names);
        self
    }

    fn base_env(&self) -> ChildEnv {
        ChildEnv::inherited().with_search_paths(&[self.ctx.benchmark_dir(&self.spec.name)])
    }

    fn measure_program(&self) -> Option<String> {
        shlex::split(&self.spec.measure_cmd).and_then(|argv| argv.into_iter().next())
    }

    fn uses_perf(&self) -> bool {
        self.measure_program()
            .as_deref()
            .and_then(|p| Path::new(p).file_name())
            .is_some_and(|n| n == "perf")
    }

    fn selected(&self, store: &ResultStore) -> Vec<Target> {
        store
            .targets()
            .iter()
            .filter(|t| self.only.as_ref().is_none_or(|names| names.contains(&t.name)))
            .cloned()
            .collect()
    }

    /// Setup checks. Nothing is executed or recorded if any of them fails.
    fn preflight(&self, targets: &[Target], store: &ResultStore) -> BenchResult<BTreeMap<String, PathBuf>> {
        let env = self.base_env();
        let requirements = check_requirements(&self.spec.requirements, &env)?;

        if let Some(program) = self.measure_program() {
            check_measure_cmd(&program, &env)?;
        }

        if self.spec.servers.is_empty() {
            if let Some(wrapper) = self.ctx.exec_wrapper() {
                if !wrapper.is_file() {
                    return Err(BenchError::MissingExecutable(wrapper.display().to_string()));
                }
            }
        }

        // every command template must render before anything runs
        let bench_subs = self.spec.substitutions(self.ctx);
        let first = store.space().iter().next();
        for target in targets {
            if let Some(perm) = &first {
                let subs = Substitutions::for_run(&bench_subs, target, perm, 1);
                subs.render_argv(&self.spec.cmd)?;
                subs.render_argv(&self.spec.measure_cmd)?;
                subs.render_argv(&target.cmd_prefix)?;
                if let Some(run_dir) = &self.spec.run_dir {
                    subs.render(run_dir)?;
                }
            }
            let subs = Substitutions::for_server(&bench_subs, target, 1);
            for server in &self.spec.servers {
                subs.render_argv(&server.cmd)?;
            }
        }

        Ok(requirements)
    }

    fn record_facts(&self, store: &mut ResultStore, requirements: &BTreeMap<String, PathBuf>) {
        let facts = store.facts_mut();
        facts.merge_missing(self.ctx.facts());
        facts.record("benchmark", self.spec.name.clone());
        facts.record("runs", self.runs);
        if let Some(sha) = &self.spec.source_sha256 {
            facts.record("sha256", sha.clone());
        }
        for (name, path) in requirements {
            facts.record_in("requirements", name.clone(), path.display().to_string());
        }
        if let Some(program) = self.measure_program() {
            if let Some(path) = super::preflight::find_executable(&program, &self.base_env()) {
                if let Some(version) = exe_version(&path) {
                    facts.record_in("versions", program, version);
                }
            }
        }
    }

    /// Run the whole matrix, then backfill failures and recompute statistics.
    ///
    /// Only setup errors are returned; failures of servers or single
    /// invocations are recorded as empty cells and logged.
    pub fn run(&self, store: &mut ResultStore) -> BenchResult<RunSummary> {
        let targets = self.selected(store);
        if targets.is_empty() {
            return Err(BenchError::Config(format!(
                "no targets selected for benchmark '{}'",
                self.spec.name
            )));
        }

        let requirements = self.preflight(&targets, store)?;
        self.record_facts(store, &requirements);

        let bench_subs = self.spec.substitutions(self.ctx);
        let base_env = self.base_env();
        let perms: Vec<Permutation> = store.space().iter().collect();
        let total = perms.len() * targets.len();

        let mut summary = RunSummary {
            runs: self.runs,
            ..Default::default()
        };
        let mut valid_template = RawRecord::new();

        for run in 1..=self.runs {
            info!(benchmark = %self.spec.name, run, runs = self.runs, "starting repetition");

            for (t, target) in targets.iter().enumerate() {
                let env = base_env
                    .clone()
                    .for_target(target, self.ctx.instrumentation_preloads());

                let servers = match self.start_servers(&bench_subs, target, run, &env) {
                    Ok(servers) => Some(servers),
                    Err(e) => {
                        error!(target = %target.name, run, error = %e, "server startup failed, skipping target");
                        None
                    }
                };

                if let Some(hook) = &self.hooks.before_target_run {
                    if let Err(e) = hook(target, run) {
                        warn!(target = %target.name, run, error = %format!("{e:#}"), "before_target_run hook failed");
                    }
                }

                for (p, perm) in perms.iter().enumerate() {
                    let Some(servers) = &servers else {
                        store.push(&target.name, perm, RawRecord::new());
                        summary.skipped += 1;
                        continue;
                    };

                    debug!(
                        progress = t * perms.len() + p + 1,
                        total,
                        target = %target.name,
                        %perm,
                        "executing"
                    );
                    let launch = Launch {
                        target_env: &env,
                        spawn_env: self.spawn_env(&base_env, &env),
                        servers,
                    };
                    match self.execute(&bench_subs, target, perm, run, &launch) {
                        Outcome::Success(record) => {
                            if !record.is_empty() {
                                valid_template = record.clone();
                            }
                            store.push(&target.name, perm, record);
                            summary.succeeded += 1;
                        }
                        Outcome::Failure => {
                            store.push(&target.name, perm, RawRecord::new());
                            summary.failed += 1;
                        }
                    }
                }

                // shut down before the next target starts its own servers
                drop(servers);

                if let Some(hook) = &self.hooks.after_target_run {
                    if let Err(e) = hook(target, run) {
                        warn!(target = %target.name, run, error = %format!("{e:#}"), "after_target_run hook failed");
                    }
                }
            }
        }

        summary.backfilled = store.backfill(&valid_template);
        if summary.backfilled > 0 {
            info!(count = summary.backfilled, "filled failed runs with NaN records");
        }

        crate::stats::compute(store);

        if let Some(cleanup) = &self.hooks.cleanup {
            if let Err(e) = cleanup() {
                warn!(benchmark = %self.spec.name, error = %format!("{e:#}"), "cleanup hook failed");
            }
        }

        info!(
            benchmark = %self.spec.name,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "benchmark finished"
        );
        Ok(summary)
    }

    fn start_servers(
        &self,
        bench_subs: &BTreeMap<String, String>,
        target: &Target,
        run: usize,
        env: &ChildEnv,
    ) -> BenchResult<ServerGroup> {
        if self.spec.servers.is_empty() {
            return Ok(ServerGroup::none());
        }
        let subs = Substitutions::for_server(bench_subs, target, run);
        let mut prefix = subs.render_argv(&self.spec.measure_cmd)?;
        prefix.extend(subs.render_argv(&target.cmd_prefix)?);
        ServerGroup::start(
            &self.spec.servers,
            &subs,
            &ServerOptions {
                prefix: &prefix,
                env,
                cwd: None,
                settle: Duration::from_millis(self.spec.server_settle_ms),
                grace: self.ctx.server_grace(),
            },
        )
    }

    /// Environment the invocation is spawned with. The exec wrapper installs
    /// the target's preload list itself, so the measure command and the
    /// wrapper run without it.
    fn spawn_env<'e>(&self, base: &'e ChildEnv, target_env: &'e ChildEnv) -> &'e ChildEnv {
        if self.spec.servers.is_empty() && self.ctx.exec_wrapper().is_some() {
            base
        } else {
            target_env
        }
    }

    /// Full argv of one benchmark invocation.
    fn command_line(&self, subs: &Substitutions, target: &Target, env: &ChildEnv) -> BenchResult<Vec<String>> {
        let mut argv = Vec::new();
        if self.spec.servers.is_empty() {
            argv.extend(subs.render_argv(&self.spec.measure_cmd)?);
            if let Some(wrapper) = self.ctx.exec_wrapper() {
                argv.push(wrapper.display().to_string());
                argv.push("-p".into());
                argv.push(env.preload().to_string());
                if let Some(lib) = target.library_path.as_deref().filter(|l| !l.is_empty()) {
                    argv.push("-l".into());
                    argv.push(lib.to_string());
                }
                argv.push("--".into());
            }
            argv.extend(subs.render_argv(&target.cmd_prefix)?);
        }
        argv.extend(subs.render_argv(&self.spec.cmd)?);
        Ok(argv)
    }

    fn execute(
        &self,
        bench_subs: &BTreeMap<String, String>,
        target: &Target,
        perm: &Permutation,
        run: usize,
        launch: &Launch<'_>,
    ) -> Outcome {
        let servers = launch.servers;
        let env = launch.spawn_env;
        let subs = Substitutions::for_run(bench_subs, target, perm, run);
        let (argv, run_dir) = match self.command_line(&subs, target, launch.target_env).and_then(|argv| {
            let dir = match &self.spec.run_dir {
                Some(t) => Some(PathBuf::from(subs.render(t)?)),
                None => None,
            };
            Ok((argv, dir))
        }) {
            Ok(v) => v,
            Err(e) => {
                error!(target = %target.name, %perm, error = %e, "could not build command");
                return Outcome::Failure;
            }
        };
        let Some((program, args)) = argv.split_first() else {
            error!(target = %target.name, %perm, "empty command");
            return Outcome::Failure;
        };

        debug!(argv = ?argv, run_dir = ?run_dir, "command");
        let mut cmd = Command::new(env.resolve(program));
        cmd.args(args).stdin(Stdio::null());
        env.apply(&mut cmd);
        if let Some(dir) = &run_dir {
            cmd.current_dir(dir);
        }

        let status_file = match &run_dir {
            Some(dir) => dir.join("status"),
            None => PathBuf::from("status"),
        };

        let out = match cmd.output() {
            Ok(out) => out,
            Err(e) => {
                error!(target = %target.name, %perm, program = %program, error = %e, "failed to spawn");
                return Outcome::Failure;
            }
        };
        let stdout = String::from_utf8_lossy(&out.stdout);
        let stderr = String::from_utf8_lossy(&out.stderr);

        if !out.status.success() || stderr.contains(LD_PRELOAD_FAILURE) {
            debug!(%stdout, %stderr, "failed invocation output");
            if !out.status.success() {
                error!(target = %target.name, %perm, status = %out.status, argv = ?argv, "benchmark failed");
            } else {
                error!(target = %target.name, %perm, preload = %target.preload, "preloading failed");
            }
            if servers.is_empty() && status_file.exists() {
                let _ = std::fs::remove_file(&status_file);
            }
            return Outcome::Failure;
        }

        let mut record = RawRecord::new();
        let key = self.ctx.status_key();
        if servers.is_empty() {
            if let Some(value) = take_status_file(&status_file, key) {
                record.insert(key, crate::core::Scalar::from_raw(&value));
            }
        } else {
            for (server, value) in servers.status_values(key) {
                record.insert(format!("{server}_{key}"), crate::core::Scalar::from_raw(&value));
            }
        }

        if self.uses_perf() {
            let context = format!("{} {}", target.name, perm);
            parse_perf_csv(&stderr, &mut record, &context);
        }

        if let Some(hook) = &self.hooks.on_output_captured {
            if let Err(e) = hook(&mut record, &stdout, &stderr, target, perm) {
                warn!(target = %target.name, %perm, error = %format!("{e:#}"), "output hook failed");
            }
        }

        Outcome::Success(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ParameterSpace;

    fn ctx() -> RunContext {
        RunContext::builder().without_environment_facts().build()
    }

    fn spec(cmd: &str) -> BenchmarkSpec {
        let mut spec = BenchmarkSpec::new("unit", cmd);
        spec.measure_cmd = String::new();
        spec
    }

    #[test]
    fn test_missing_requirement_aborts_before_execution() {
        let ctx = ctx();
        let mut spec = spec("true");
        spec.requirements = vec!["no-such-tool-anywhere".into()];
        let mut store = ResultStore::new("unit", ParameterSpace::default(), vec![Target::new("a")]);

        let err = ExecutionEngine::new(&ctx, &spec).runs(1).run(&mut store).unwrap_err();
        assert!(matches!(err, BenchError::MissingExecutable(_)));
        assert!(!store.has_measurements("a"));
        assert!(store.facts().is_empty());
    }

    #[test]
    fn test_unknown_placeholder_aborts_before_execution() {
        let ctx = ctx();
        let spec = spec("echo {nope}");
        let mut store = ResultStore::new("unit", ParameterSpace::default(), vec![Target::new("a")]);
        let err = ExecutionEngine::new(&ctx, &spec).run(&mut store).unwrap_err();
        assert!(matches!(err, BenchError::Template(_)));
        assert!(!store.has_measurements("a"));
    }

    #[test]
    fn test_hook_fields_and_failures() {
        let ctx = ctx();
        let spec = spec("sh -c 'test {x} != 2 && echo value={x}'");
        let space = ParameterSpace::default().with_dimension("x", [1i64, 2, 3]);
        let mut store = ResultStore::new("unit", space, vec![Target::new("a")]);

        let hooks = BenchmarkHooks::new().on_output_captured(|record, stdout, _, _, _| {
            let value = stdout
                .trim()
                .strip_prefix("value=")
                .ok_or_else(|| anyhow::anyhow!("unexpected output {stdout:?}"))?;
            record.insert("value", crate::core::Scalar::from_raw(value));
            Ok(())
        });

        let summary = ExecutionEngine::new(&ctx, &spec)
            .with_hooks(hooks)
            .runs(2)
            .run(&mut store)
            .unwrap();
        assert_eq!(summary.succeeded, 4);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.backfilled, 2);
        assert_eq!(store.repetitions().unwrap(), 2);

        let perms: Vec<_> = store.space().iter().collect();
        assert_eq!(store.records("a", &perms[0])[1].get("value").and_then(|v| v.as_f64()), Some(1.0));
        assert!(store.records("a", &perms[1]).iter().all(|r| r.get("value").unwrap().is_nan()));
        let stats = store.cell_stats("a", &perms[2]).unwrap();
        assert_eq!(stats.get(crate::core::Statistic::Mean, "value"), Some(3.0));
    }

    #[test]
    fn test_target_filter() {
        let ctx = ctx();
        let spec = spec("true");
        let mut store = ResultStore::new(
            "unit",
            ParameterSpace::default(),
            vec![Target::new("a"), Target::new("b")],
        );
        ExecutionEngine::new(&ctx, &spec)
            .runs(1)
            .only_targets(vec!["b".into()])
            .run(&mut store)
            .unwrap();
        assert!(!store.has_measurements("a"));
        assert!(store.has_measurements("b"));
        assert!(store.stats().unwrap().contains_key("b"));

        let err = ExecutionEngine::new(&ctx, &spec)
            .only_targets(vec!["c".into()])
            .run(&mut store)
            .unwrap_err();
        assert!(matches!(err, BenchError::Config(_)));
    }

    #[test]
    fn test_status_file_read_from_run_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx();
        let mut spec = spec("sh -c 'printf \"VmHWM:\\t 100 kB\\nVmHWM:\\t 7 kB\\n\" > status'");
        spec.run_dir = Some(dir.path().display().to_string());
        let mut store = ResultStore::new("unit", ParameterSpace::default(), vec![Target::new("a")]);

        ExecutionEngine::new(&ctx, &spec).runs(1).run(&mut store).unwrap();
        let perm = Permutation::empty();
        assert_eq!(store.records("a", &perm)[0].get("VmHWM").and_then(|v| v.as_f64()), Some(100.0));
        assert!(!dir.path().join("status").exists());
    }

    #[test]
    fn test_hooks_called_per_target_and_once_for_cleanup() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let calls = Rc::new(RefCell::new(Vec::<String>::new()));
        let (before, after, cleanup) = (calls.clone(), calls.clone(), calls.clone());
        let hooks = BenchmarkHooks::new()
            .before_target_run(move |t, run| {
                before.borrow_mut().push(format!("before {} {run}", t.name));
                Ok(())
            })
            .after_target_run(move |t, run| {
                after.borrow_mut().push(format!("after {} {run}", t.name));
                anyhow::bail!("ignored")
            })
            .cleanup(move || {
                cleanup.borrow_mut().push("cleanup".into());
                Ok(())
            });

        let ctx = ctx();
        let spec = spec("true");
        let mut store = ResultStore::new("unit", ParameterSpace::default(), vec![Target::new("a")]);
        ExecutionEngine::new(&ctx, &spec).with_hooks(hooks).runs(2).run(&mut store).unwrap();

        assert_eq!(
            *calls.borrow(),
            vec!["before a 1", "after a 1", "before a 2", "after a 2", "cleanup"]
        );
    }
}
