//! Per-invocation harness configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::{EnvironmentInfo, Facts};

/// Default key read from the side-channel `status` file.
pub const DEFAULT_STATUS_KEY: &str = "VmHWM";

/// Configuration shared by every benchmark of one harness invocation.
///
/// Built once with [`RunContextBuilder`] and read-only afterwards, except
/// for the facts which are append-only.
#[derive(Debug, Clone)]
pub struct RunContext {
    build_dir: PathBuf,
    result_dir: PathBuf,
    exec_wrapper: Option<PathBuf>,
    instrumentation_preloads: Vec<String>,
    status_key: String,
    server_grace: Duration,
    facts: Facts,
}

impl RunContext {
    pub fn builder() -> RunContextBuilder {
        RunContextBuilder::default()
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn result_dir(&self) -> &Path {
        &self.result_dir
    }

    /// Path of the `matrix-exec` wrapper, if one is used.
    pub fn exec_wrapper(&self) -> Option<&Path> {
        self.exec_wrapper.as_deref()
    }

    pub fn instrumentation_preloads(&self) -> &[String] {
        &self.instrumentation_preloads
    }

    pub fn status_key(&self) -> &str {
        &self.status_key
    }

    pub fn server_grace(&self) -> Duration {
        self.server_grace
    }

    /// `<build_dir>/benchmarks/<name>`, added to the child `PATH`.
    pub fn benchmark_dir(&self, name: &str) -> PathBuf {
        self.build_dir.join("benchmarks").join(name)
    }

    pub fn facts(&self) -> &Facts {
        &self.facts
    }

    pub fn facts_mut(&mut self) -> &mut Facts {
        &mut self.facts
    }
}

#[derive(Debug, Clone)]
pub struct RunContextBuilder {
    build_dir: PathBuf,
    result_dir: PathBuf,
    exec_wrapper: Option<PathBuf>,
    instrumentation_preloads: Vec<String>,
    status_key: String,
    server_grace: Duration,
    detect_environment: bool,
}

impl Default for RunContextBuilder {
    fn default() -> Self {
        RunContextBuilder {
            build_dir: PathBuf::from("build"),
            result_dir: PathBuf::from("results"),
            exec_wrapper: None,
            instrumentation_preloads: Vec::new(),
            status_key: DEFAULT_STATUS_KEY.to_string(),
            server_grace: Duration::from_secs(5),
            detect_environment: true,
        }
    }
}

impl RunContextBuilder {
    pub fn build_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.build_dir = dir.into();
        self
    }

    pub fn result_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.result_dir = dir.into();
        self
    }

    pub fn exec_wrapper(mut self, path: impl Into<PathBuf>) -> Self {
        self.exec_wrapper = Some(path.into());
        self
    }

    /// Shared object preloaded into every benchmark process, before the
    /// target's own preloads.
    pub fn instrumentation_preload(mut self, path: impl Into<String>) -> Self {
        self.instrumentation_preloads.push(path.into());
        self
    }

    pub fn status_key(mut self, key: impl Into<String>) -> Self {
        self.status_key = key.into();
        self
    }

    pub fn server_grace(mut self, grace: Duration) -> Self {
        self.server_grace = grace;
        self
    }

    /// Skip host detection; facts start empty.
    pub fn without_environment_facts(mut self) -> Self {
        self.detect_environment = false;
        self
    }

    pub fn build(self) -> RunContext {
        let mut facts = Facts::default();
        if self.detect_environment {
            EnvironmentInfo::detect().record_into(&mut facts);
        }
        RunContext {
            build_dir: self.build_dir,
            result_dir: self.result_dir,
            exec_wrapper: self.exec_wrapper,
            instrumentation_preloads: self.instrumentation_preloads,
            status_key: self.status_key,
            server_grace: self.server_grace,
            facts,
        }
    }
}
