//! Setup checks performed before any benchmark process runs.

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use tracing::{debug, info};

use crate::{BenchError, BenchResult};

use super::environment::ChildEnv;

/// First executable file named `program` in `dirs`.
pub fn find_in(program: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Locate `program` for a child running in `env`.
pub fn find_executable(program: &str, env: &ChildEnv) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return is_executable(&path).then_some(path);
    }
    find_in(program, &env.search_path())
}

/// Locate every required executable. A missing one is a fatal setup error.
pub fn check_requirements(
    requirements: &[String],
    env: &ChildEnv,
) -> BenchResult<BTreeMap<String, PathBuf>> {
    let mut found = BTreeMap::new();
    for requirement in requirements {
        let path = find_executable(requirement, env)
            .ok_or_else(|| BenchError::MissingExecutable(requirement.clone()))?;
        debug!(requirement = %requirement, path = %path.display(), "requirement located");
        found.insert(requirement.clone(), path);
    }
    Ok(found)
}

static PERF_ALLOWED: OnceLock<bool> = OnceLock::new();

/// Whether `perf stat` can be used on this host. Probed once per process.
pub fn perf_allowed(perf: &Path) -> bool {
    *PERF_ALLOWED.get_or_init(|| {
        info!("checking whether perf may be used");
        Command::new(perf)
            .args(["stat", "true"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    })
}

/// Fail unless the measurement wrapper `argv0` is usable.
pub fn check_measure_cmd(argv0: &str, env: &ChildEnv) -> BenchResult<()> {
    let path = find_executable(argv0, env)
        .ok_or_else(|| BenchError::MissingExecutable(argv0.to_string()))?;
    let is_perf = Path::new(argv0).file_name().is_some_and(|n| n == "perf");
    if is_perf && !perf_allowed(&path) {
        return Err(BenchError::Message(
            "not permitted to use perf on this system (check perf_event_paranoid)".into(),
        ));
    }
    Ok(())
}
